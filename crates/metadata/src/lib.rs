//! Persistence for template to data store associations.
//!
//! This crate tracks where each template's content lives:
//! - One record per template per image or image cache store
//! - Lifecycle state changes under optimistic concurrency control
//! - Zone-scoped lookups over the store topology
//! - Promotion of cache records onto a region-wide image store

pub mod association;
pub mod error;
pub mod filters;
pub mod models;
pub mod repos;
pub mod store;

pub use association::{AssociationStore, DuplicationReport, LockedRecord};
pub use error::{MetadataError, MetadataResult};
pub use filters::AssociationFilter;
pub use store::{MetadataStore, SqliteStore};

use depot_core::config::{AppConfig, MetadataConfig};
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<SqliteStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Open the association store described by an application configuration.
pub async fn open(config: &AppConfig) -> MetadataResult<AssociationStore> {
    let store = from_config(&config.metadata).await?;
    Ok(AssociationStore::from_store(store)
        .with_stale_write_diagnostics(config.diagnostics.stale_write_details))
}
