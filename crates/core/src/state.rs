//! Lifecycle of a template on a data store.
//!
//! A record starts `Allocated`, moves through an in-flight state while content
//! is created, copied or migrated, and settles in `Ready`. In-flight work can
//! fail into `Failed`. Any live state can be torn down through `Destroying`
//! into the terminal `Destroyed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of an object in a data store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    /// Record exists, no content has been requested yet.
    Allocated,
    /// Content is being downloaded or created on the store.
    Creating,
    /// Content was created but not yet confirmed usable.
    ///
    /// No event leads here; callers that create content outside the normal
    /// download flow set it directly with an explicit state update.
    Created,
    /// Content is being copied to or from the store.
    Copying,
    /// Content is being migrated between stores.
    Migrating,
    /// Content is present and usable.
    Ready,
    /// The last in-flight operation failed.
    Failed,
    /// Teardown in progress.
    Destroying,
    /// Torn down. Terminal.
    Destroyed,
}

impl ObjectState {
    pub const ALL: [ObjectState; 9] = [
        Self::Allocated,
        Self::Creating,
        Self::Created,
        Self::Copying,
        Self::Migrating,
        Self::Ready,
        Self::Failed,
        Self::Destroying,
        Self::Destroyed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocated => "Allocated",
            Self::Creating => "Creating",
            Self::Created => "Created",
            Self::Copying => "Copying",
            Self::Migrating => "Migrating",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Destroying => "Destroying",
            Self::Destroyed => "Destroyed",
        }
    }

    /// Check if an operation on the content is currently running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Created | Self::Copying | Self::Migrating
        )
    }

    /// Check if the state has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Resolve the state reached by applying `event`, if the transition is allowed.
    pub fn next(self, event: ObjectEvent) -> Option<ObjectState> {
        use ObjectEvent as E;
        use ObjectState as S;

        match (self, event) {
            (S::Destroyed, _) => None,

            (S::Allocated, E::CreateRequested | E::CreateOnlyRequested) => Some(S::Creating),
            (S::Failed, E::CreateRequested) => Some(S::Creating),

            (S::Creating | S::Created, E::OperationSucceeded) => Some(S::Ready),
            (S::Creating | S::Created, E::OperationFailed) => Some(S::Failed),

            (S::Ready, E::CopyingRequested) => Some(S::Copying),
            (S::Ready, E::MigrationRequested) => Some(S::Migrating),
            (S::Copying | S::Migrating, E::OperationSucceeded) => Some(S::Ready),
            (S::Copying | S::Migrating, E::OperationFailed) => Some(S::Failed),

            (S::Destroying, E::ExpungeRequested | E::OperationSucceeded) => Some(S::Destroyed),
            (S::Destroying, E::OperationFailed) => Some(S::Destroying),
            (_, E::DestroyRequested) => Some(S::Destroying),

            _ => None,
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidState(s.to_string()))
    }
}

/// Event driving an [`ObjectState`] transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectEvent {
    CreateRequested,
    CreateOnlyRequested,
    CopyingRequested,
    MigrationRequested,
    OperationSucceeded,
    OperationFailed,
    DestroyRequested,
    ExpungeRequested,
}

impl ObjectEvent {
    pub const ALL: [ObjectEvent; 8] = [
        Self::CreateRequested,
        Self::CreateOnlyRequested,
        Self::CopyingRequested,
        Self::MigrationRequested,
        Self::OperationSucceeded,
        Self::OperationFailed,
        Self::DestroyRequested,
        Self::ExpungeRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRequested => "CreateRequested",
            Self::CreateOnlyRequested => "CreateOnlyRequested",
            Self::CopyingRequested => "CopyingRequested",
            Self::MigrationRequested => "MigrationRequested",
            Self::OperationSucceeded => "OperationSucceeded",
            Self::OperationFailed => "OperationFailed",
            Self::DestroyRequested => "DestroyRequested",
            Self::ExpungeRequested => "ExpungeRequested",
        }
    }
}

impl fmt::Display for ObjectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectEvent {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidEvent(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_reaches_ready() {
        let state = ObjectState::Allocated
            .next(ObjectEvent::CreateOnlyRequested)
            .unwrap();
        assert_eq!(state, ObjectState::Creating);
        assert!(state.is_in_flight());

        let state = state.next(ObjectEvent::OperationSucceeded).unwrap();
        assert_eq!(state, ObjectState::Ready);
        assert!(!state.is_in_flight());
    }

    #[test]
    fn test_in_flight_states_can_fail() {
        for state in ObjectState::ALL.into_iter().filter(|s| s.is_in_flight()) {
            assert_eq!(
                state.next(ObjectEvent::OperationFailed),
                Some(ObjectState::Failed),
                "{state} should fail into Failed"
            );
        }
    }

    #[test]
    fn test_every_live_state_can_be_destroyed() {
        for state in ObjectState::ALL {
            let next = state.next(ObjectEvent::DestroyRequested);
            if state.is_terminal() {
                assert_eq!(next, None);
            } else {
                assert_eq!(next, Some(ObjectState::Destroying));
            }
        }

        assert_eq!(
            ObjectState::Destroying.next(ObjectEvent::ExpungeRequested),
            Some(ObjectState::Destroyed)
        );
    }

    #[test]
    fn test_destroyed_is_terminal() {
        assert!(ObjectState::Destroyed.is_terminal());
        for event in ObjectEvent::ALL {
            assert_eq!(ObjectState::Destroyed.next(event), None);
        }
    }

    #[test]
    fn test_created_is_only_entered_explicitly() {
        for state in ObjectState::ALL {
            for event in ObjectEvent::ALL {
                assert_ne!(state.next(event), Some(ObjectState::Created));
            }
        }

        assert_eq!(
            ObjectState::Created.next(ObjectEvent::OperationSucceeded),
            Some(ObjectState::Ready)
        );
        assert_eq!(
            ObjectState::Created.next(ObjectEvent::OperationFailed),
            Some(ObjectState::Failed)
        );
    }

    #[test]
    fn test_rejected_transitions() {
        assert_eq!(ObjectState::Ready.next(ObjectEvent::CreateOnlyRequested), None);
        assert_eq!(ObjectState::Allocated.next(ObjectEvent::OperationSucceeded), None);
        assert_eq!(ObjectState::Failed.next(ObjectEvent::CopyingRequested), None);
    }

    #[test]
    fn test_parse_rejects_unknown_state() {
        assert_eq!("Ready".parse::<ObjectState>().unwrap(), ObjectState::Ready);
        assert!("ready".parse::<ObjectState>().is_err());
        assert!("Exploded".parse::<ObjectEvent>().is_err());
    }
}
