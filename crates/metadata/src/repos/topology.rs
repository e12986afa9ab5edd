//! Store topology repository.

use crate::error::MetadataResult;
use crate::models::ImageStoreRow;
use async_trait::async_trait;
use depot_core::{StoreId, ZoneScope};

/// Resolves a zone scope to the stores eligible to serve it.
///
/// Results are ordered; callers that pick "the first store with a match" rely on
/// the order being stable.
#[async_trait]
pub trait StoreTopology: Send + Sync {
    /// Register an image or image cache store.
    async fn create_image_store(&self, store: &ImageStoreRow) -> MetadataResult<()>;

    /// Image stores serving the scope: stores in the zone plus region-wide stores.
    /// An unscoped value resolves every image store.
    async fn resolve_image_stores(&self, scope: ZoneScope) -> MetadataResult<Vec<StoreId>>;

    /// Image cache stores in the scope. An unscoped value resolves every cache store.
    async fn resolve_image_cache_stores(&self, scope: ZoneScope) -> MetadataResult<Vec<StoreId>>;
}
