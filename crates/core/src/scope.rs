//! Zone scopes for store resolution.

use crate::ZoneId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical partition used to resolve eligible stores.
///
/// An unscoped value covers every zone; it is also the marker registered in the
/// template catalog for cross-zone templates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneScope {
    zone_id: Option<ZoneId>,
}

impl ZoneScope {
    /// Scope limited to a single zone.
    pub fn zone(zone_id: ZoneId) -> Self {
        Self {
            zone_id: Some(zone_id),
        }
    }

    /// Scope covering all zones.
    pub fn all() -> Self {
        Self { zone_id: None }
    }

    pub fn zone_id(&self) -> Option<ZoneId> {
        self.zone_id
    }

    pub fn is_unscoped(&self) -> bool {
        self.zone_id.is_none()
    }
}

impl From<Option<ZoneId>> for ZoneScope {
    fn from(zone_id: Option<ZoneId>) -> Self {
        Self { zone_id }
    }
}

impl fmt::Display for ZoneScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.zone_id {
            Some(id) => write!(f, "{id}"),
            None => f.write_str("all"),
        }
    }
}

impl FromStr for ZoneScope {
    type Err = crate::Error;

    /// Parse `all` or a numeric zone id.
    fn from_str(s: &str) -> crate::Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        s.parse::<ZoneId>()
            .map(Self::zone)
            .map_err(|e| crate::Error::InvalidZoneScope(format!("{s}: {e}")))
    }
}
