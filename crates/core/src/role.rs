//! Data store roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Purpose of a data store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataStoreRole {
    /// Primary storage attached to hypervisors.
    Primary,
    /// Secondary image repository (zone-local or region-wide).
    Image,
    /// Zone-local staging cache in front of a region-wide image store.
    ImageCache,
    /// Backup target.
    Backup,
}

impl DataStoreRole {
    pub const ALL: [DataStoreRole; 4] = [Self::Primary, Self::Image, Self::ImageCache, Self::Backup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::Image => "Image",
            Self::ImageCache => "ImageCache",
            Self::Backup => "Backup",
        }
    }
}

impl fmt::Display for DataStoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataStoreRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidRole(s.to_string()))
    }
}
