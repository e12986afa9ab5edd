//! Template store association repository.

use crate::error::MetadataResult;
use crate::filters::AssociationFilter;
use crate::models::{StateTransition, TemplateStoreRow};
use async_trait::async_trait;
use depot_core::DataStoreRole;
use uuid::Uuid;

/// How a single row is chosen when several match a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPick {
    /// First row in `(created_at, id)` order.
    First,
    /// Uniformly random row.
    Random,
}

/// Persistent storage for `template_store_ref` rows.
///
/// Reads take an [`AssociationFilter`]; there is no other way to express a predicate.
/// Multi-row writes run inside a single transaction.
#[async_trait]
pub trait TemplateStoreRepo: Send + Sync {
    /// Insert a new association record.
    async fn create_record(&self, record: &TemplateStoreRow) -> MetadataResult<()>;

    /// Insert several records atomically. Either all rows are inserted or none.
    async fn create_records(&self, records: &[TemplateStoreRow]) -> MetadataResult<()>;

    /// Get a record by ID. Destroyed records are only returned when `include_destroyed` is set.
    async fn get_record(
        &self,
        id: Uuid,
        include_destroyed: bool,
    ) -> MetadataResult<Option<TemplateStoreRow>>;

    /// List all records matching a filter in `(created_at, id)` order.
    async fn list_records(
        &self,
        filter: &AssociationFilter<'_>,
    ) -> MetadataResult<Vec<TemplateStoreRow>>;

    /// Get a single record matching a filter.
    async fn find_record(
        &self,
        filter: &AssociationFilter<'_>,
        pick: RowPick,
    ) -> MetadataResult<Option<TemplateStoreRow>>;

    /// Pick a random record matching a filter and hold a write lock on it until the
    /// returned claim is committed or dropped.
    async fn claim_record(
        &self,
        filter: &AssociationFilter<'_>,
    ) -> MetadataResult<Option<Box<dyn RecordClaim>>>;

    /// Apply a conditional state write. Returns the number of affected rows (0 or 1).
    async fn compare_and_set_state(&self, transition: &StateTransition) -> MetadataResult<u64>;

    /// Hard-delete every record matching a filter in one transaction.
    /// Returns the number of deleted rows.
    async fn delete_records(&self, filter: &AssociationFilter<'_>) -> MetadataResult<u64>;

    /// Set the role of every record matching a filter in one transaction.
    /// Returns the number of updated rows.
    async fn update_role(
        &self,
        filter: &AssociationFilter<'_>,
        role: DataStoreRole,
    ) -> MetadataResult<u64>;

    /// Increment the reference count of a live record. Returns false if no live record matched.
    async fn increment_ref_cnt(&self, id: Uuid) -> MetadataResult<bool>;

    /// Decrement the reference count of a live record, never going below zero.
    /// Returns false if no live record matched.
    async fn decrement_ref_cnt(&self, id: Uuid) -> MetadataResult<bool>;
}

/// A record held under a write lock inside an open transaction.
///
/// Dropping the claim without calling [`RecordClaim::commit`] rolls back.
#[async_trait]
pub trait RecordClaim: Send {
    /// The claimed record as last written through this claim.
    fn record(&self) -> &TemplateStoreRow;

    fn record_mut(&mut self) -> &mut TemplateStoreRow;

    /// Apply a conditional state write inside the claim's transaction.
    async fn compare_and_set_state(&mut self, transition: &StateTransition) -> MetadataResult<u64>;

    /// Re-read the claimed row as persisted, including destroyed rows.
    async fn reload(&mut self) -> MetadataResult<Option<TemplateStoreRow>>;

    /// Commit the transaction and release the lock.
    async fn commit(&mut self) -> MetadataResult<()>;
}
