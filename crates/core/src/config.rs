//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path (`:memory:` for a private in-memory database).
        path: PathBuf,
        /// Seconds to wait for the pool connection before a call fails.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/depot.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Diagnostics emitted by the association layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// On a lost compare-and-swap, re-read the persisted row and log the stale,
    /// persisted and attempted values at debug level (default: true).
    #[serde(default = "default_stale_write_details")]
    pub stale_write_details: bool,
}

fn default_stale_write_details() -> bool {
    true
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            stale_write_details: default_stale_write_details(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Diagnostics configuration.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl AppConfig {
    /// Create a test configuration backed by an in-memory SQLite database.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}
