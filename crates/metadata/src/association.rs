//! Template store association operations.
//!
//! [`AssociationStore`] is the caller-facing surface over `template_store_ref`. It
//! composes the record repository with store topology and the template catalog,
//! and runs every state change through the compare-and-swap protocol in
//! [`AssociationStore::update_state`].

use crate::error::{MetadataError, MetadataResult};
use crate::filters::AssociationFilter;
use crate::models::{StateTransition, TemplateStoreRow};
use crate::repos::{RecordClaim, RowPick, StoreTopology, TemplateCatalog, TemplateStoreRepo};
use crate::store::MetadataStore;
use depot_core::{
    DataStoreRole, DownloadStatus, ObjectEvent, ObjectState, StoreId, TemplateId, ZoneScope,
};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

/// Outcome of promoting cache records onto a region-wide store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicationReport {
    /// Number of `Image` records inserted on the new store.
    pub records_created: usize,
    /// Number of distinct templates marked cross-zone.
    pub templates_promoted: usize,
}

/// Association store operations.
pub struct AssociationStore {
    repo: Arc<dyn TemplateStoreRepo>,
    topology: Arc<dyn StoreTopology>,
    catalog: Arc<dyn TemplateCatalog>,
    stale_write_details: bool,
}

impl AssociationStore {
    pub fn new(
        repo: Arc<dyn TemplateStoreRepo>,
        topology: Arc<dyn StoreTopology>,
        catalog: Arc<dyn TemplateCatalog>,
    ) -> Self {
        Self {
            repo,
            topology,
            catalog,
            stale_write_details: true,
        }
    }

    /// Build an association store whose repository, topology and catalog all come
    /// from one metadata store.
    pub fn from_store<S: MetadataStore + 'static>(store: Arc<S>) -> Self {
        Self::new(store.clone(), store.clone(), store)
    }

    /// Toggle the re-read of the persisted row after a lost compare-and-swap.
    pub fn with_stale_write_diagnostics(mut self, enabled: bool) -> Self {
        self.stale_write_details = enabled;
        self
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    pub async fn create_record(&self, record: &TemplateStoreRow) -> MetadataResult<()> {
        self.repo.create_record(record).await?;
        tracing::debug!(
            id = %record.id,
            template_id = record.template_id,
            store_id = record.store_id,
            role = %record.store_role,
            "Created template store record"
        );
        Ok(())
    }

    pub async fn get_record(
        &self,
        id: Uuid,
        include_destroyed: bool,
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        self.repo.get_record(id, include_destroyed).await
    }

    pub async fn increment_ref_cnt(&self, id: Uuid) -> MetadataResult<bool> {
        self.repo.increment_ref_cnt(id).await
    }

    pub async fn decrement_ref_cnt(&self, id: Uuid) -> MetadataResult<bool> {
        self.repo.decrement_ref_cnt(id).await
    }

    // -------------------------------------------------------------------------
    // Store-scoped listing and deletion
    // -------------------------------------------------------------------------

    /// Live records on a store.
    pub async fn list_by_store(&self, store_id: StoreId) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_store(store_id))
            .await
    }

    /// Soft-deleted records on a store.
    pub async fn list_destroyed(&self, store_id: StoreId) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_store_including_destroyed(store_id, true))
            .await
    }

    /// Live, referenced records on a store. These must not be evicted.
    pub async fn list_active_on_cache(
        &self,
        store_id: StoreId,
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::active_on_cache(store_id))
            .await
    }

    /// Hard-delete every record on a store, destroyed or not.
    pub async fn delete_for_store(&self, store_id: StoreId) -> MetadataResult<u64> {
        let deleted = self
            .repo
            .delete_records(&AssociationFilter::by_store_any(store_id))
            .await?;
        tracing::info!(store_id, deleted, "Deleted template store records for store");
        Ok(deleted)
    }

    /// Hard-delete every record of a template, including soft-deleted ones.
    pub async fn delete_for_template(&self, template_id: TemplateId) -> MetadataResult<u64> {
        let deleted = self
            .repo
            .delete_records(&AssociationFilter::by_template_any(template_id))
            .await?;
        tracing::info!(template_id, deleted, "Deleted template store records for template");
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Template + store lookups
    // -------------------------------------------------------------------------

    pub async fn list_by_template_store(
        &self,
        template_id: TemplateId,
        store_id: StoreId,
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_template_store(template_id, store_id))
            .await
    }

    pub async fn list_by_template_store_states(
        &self,
        template_id: TemplateId,
        store_id: StoreId,
        states: &[ObjectState],
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_template_store_states(
                template_id,
                store_id,
                states,
            ))
            .await
    }

    pub async fn list_by_template_store_download_statuses(
        &self,
        template_id: TemplateId,
        store_id: StoreId,
        statuses: &[DownloadStatus],
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_template_store_download_statuses(
                template_id,
                store_id,
                statuses,
            ))
            .await
    }

    /// First live record of a template on a store.
    pub async fn find_by_store_template(
        &self,
        store_id: StoreId,
        template_id: TemplateId,
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        self.repo
            .find_record(
                &AssociationFilter::by_template_store(template_id, store_id),
                RowPick::First,
            )
            .await
    }

    /// Pick a random live record of a template on a store and hold it under the
    /// database write lock.
    ///
    /// The store's connection stays reserved until the returned record is
    /// committed or dropped; issue no other store calls in between.
    pub async fn find_by_store_template_locked(
        &self,
        store_id: StoreId,
        template_id: TemplateId,
    ) -> MetadataResult<Option<LockedRecord>> {
        let claim = self
            .repo
            .claim_record(&AssociationFilter::by_template_store(template_id, store_id))
            .await?;
        Ok(claim.map(|claim| LockedRecord {
            claim,
            stale_write_details: self.stale_write_details,
        }))
    }

    // -------------------------------------------------------------------------
    // Template-scoped lookups
    // -------------------------------------------------------------------------

    pub async fn find_by_template_role(
        &self,
        template_id: TemplateId,
        role: DataStoreRole,
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        self.repo
            .find_record(
                &AssociationFilter::by_template_role(template_id, role, None),
                RowPick::First,
            )
            .await
    }

    /// First `Ready` copy of a template on an image cache store.
    pub async fn find_ready_on_cache(
        &self,
        template_id: TemplateId,
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        self.repo
            .find_record(
                &AssociationFilter::by_template_role(
                    template_id,
                    DataStoreRole::ImageCache,
                    Some(ObjectState::Ready),
                ),
                RowPick::First,
            )
            .await
    }

    /// Live copies of a template on image cache stores, in any state.
    pub async fn list_on_cache(
        &self,
        template_id: TemplateId,
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_template_role(
                template_id,
                DataStoreRole::ImageCache,
                None,
            ))
            .await
    }

    pub async fn list_by_template(
        &self,
        template_id: TemplateId,
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        self.repo
            .list_records(&AssociationFilter::by_template(template_id))
            .await
    }

    // -------------------------------------------------------------------------
    // Zone-scoped resolution
    // -------------------------------------------------------------------------

    /// Records of a template across the zone's image stores, in topology order.
    pub async fn list_by_template_zone_download_statuses(
        &self,
        template_id: TemplateId,
        zone: ZoneScope,
        statuses: &[DownloadStatus],
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        let stores = self.topology.resolve_image_stores(zone).await?;
        let mut records = Vec::new();
        for store_id in stores {
            records.extend(
                self.list_by_template_store_download_statuses(template_id, store_id, statuses)
                    .await?,
            );
        }
        Ok(records)
    }

    /// A random matching record from the first image store in the zone that has any.
    ///
    /// Picking at random spreads reads across equivalent copies.
    pub async fn find_by_template_zone_download_status(
        &self,
        template_id: TemplateId,
        zone: ZoneScope,
        statuses: &[DownloadStatus],
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        let mut candidates = self
            .first_store_with_statuses(template_id, zone, statuses)
            .await?;
        candidates.shuffle(&mut rand::rng());
        Ok(candidates.into_iter().next())
    }

    /// Same as [`Self::find_by_template_zone_download_status`] with a caller-supplied RNG.
    pub async fn find_by_template_zone_download_status_with_rng<R: Rng + Send>(
        &self,
        template_id: TemplateId,
        zone: ZoneScope,
        statuses: &[DownloadStatus],
        rng: &mut R,
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        let mut candidates = self
            .first_store_with_statuses(template_id, zone, statuses)
            .await?;
        candidates.shuffle(rng);
        Ok(candidates.into_iter().next())
    }

    async fn first_store_with_statuses(
        &self,
        template_id: TemplateId,
        zone: ZoneScope,
        statuses: &[DownloadStatus],
    ) -> MetadataResult<Vec<TemplateStoreRow>> {
        let stores = self.topology.resolve_image_stores(zone).await?;
        for store_id in stores {
            let records = self
                .list_by_template_store_download_statuses(template_id, store_id, statuses)
                .await?;
            if !records.is_empty() {
                return Ok(records);
            }
        }
        Ok(Vec::new())
    }

    /// First live record of a template on the zone's stores of `role`.
    ///
    /// `Image` searches image stores and `ImageCache` searches cache stores; any
    /// other role has no stores to search.
    pub async fn find_by_template_zone(
        &self,
        template_id: TemplateId,
        zone: ZoneScope,
        role: DataStoreRole,
    ) -> MetadataResult<Option<TemplateStoreRow>> {
        let stores = match role {
            DataStoreRole::Image => self.topology.resolve_image_stores(zone).await?,
            DataStoreRole::ImageCache => self.topology.resolve_image_cache_stores(zone).await?,
            _ => return Ok(None),
        };
        for store_id in stores {
            let records = self.list_by_template_store(template_id, store_id).await?;
            if let Some(record) = records.into_iter().next() {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// Move `record` from `current` to `next` if nobody else has written it since it
    /// was read.
    ///
    /// Returns `Ok(false)` when the persisted state or version no longer match; the
    /// in-memory record is then left untouched and the caller must re-read it. On
    /// success the record carries the written state, version and timestamp.
    pub async fn update_state(
        &self,
        record: &mut TemplateStoreRow,
        current: ObjectState,
        event: ObjectEvent,
        next: ObjectState,
    ) -> MetadataResult<bool> {
        let transition = StateTransition::new(record, current, next);
        let affected = self.repo.compare_and_set_state(&transition).await?;
        if affected == 1 {
            transition.apply_to(record);
            log_transition(record, &transition, event);
            return Ok(true);
        }

        if self.stale_write_details && tracing::enabled!(Level::DEBUG) {
            match self.repo.get_record(record.id, true).await {
                Ok(persisted) => log_stale_write(record, persisted.as_ref(), &transition, event),
                Err(e) => tracing::warn!(
                    id = %record.id,
                    error = %e,
                    "Failed to re-read record after stale write"
                ),
            }
        }
        Ok(false)
    }

    /// Apply `event` to the record's current state.
    ///
    /// Fails with [`MetadataError::InvalidStateTransition`] without writing if the
    /// state machine has no transition for the event.
    pub async fn transition(
        &self,
        record: &mut TemplateStoreRow,
        event: ObjectEvent,
    ) -> MetadataResult<bool> {
        let current = record.state()?;
        let next = next_state(current, event)?;
        self.update_state(record, current, event, next).await
    }

    // -------------------------------------------------------------------------
    // Promotion
    // -------------------------------------------------------------------------

    /// Copy every live image cache record onto a new region-wide image store.
    ///
    /// All copies are inserted in one transaction. Each distinct template is then
    /// marked cross-zone and associated with all zones, once, in ascending id order.
    /// Templates missing from the catalog do not stop the others; they are reported
    /// together as [`MetadataError::TemplateNotFound`] and the inserted copies stay.
    pub async fn duplicate_cache_records_on_region_store(
        &self,
        store_id: StoreId,
    ) -> MetadataResult<DuplicationReport> {
        let sources = self
            .repo
            .list_records(&AssociationFilter::by_role(DataStoreRole::ImageCache))
            .await?;

        let copies: Vec<TemplateStoreRow> = sources
            .iter()
            .map(|source| source.duplicate_onto(store_id))
            .collect();
        self.repo.create_records(&copies).await?;

        tracing::info!(
            store_id,
            records = copies.len(),
            "Duplicated image cache records onto region store"
        );

        let template_ids: BTreeSet<TemplateId> =
            sources.iter().map(|source| source.template_id).collect();

        let mut promoted = 0;
        let mut missing = Vec::new();
        for template_id in template_ids {
            match self.promote_template(template_id).await {
                Ok(true) => promoted += 1,
                Ok(false) => {
                    tracing::error!(
                        template_id,
                        store_id,
                        "Template missing from catalog, cannot mark it cross-zone"
                    );
                    missing.push(template_id);
                }
                Err(e) => return Err(e),
            }
        }

        if !missing.is_empty() {
            return Err(MetadataError::TemplateNotFound {
                template_ids: missing,
            });
        }

        Ok(DuplicationReport {
            records_created: copies.len(),
            templates_promoted: promoted,
        })
    }

    /// Returns false if the template is not in the catalog.
    async fn promote_template(&self, template_id: TemplateId) -> MetadataResult<bool> {
        if self.catalog.find_template(template_id).await?.is_none() {
            return Ok(false);
        }
        match self.catalog.mark_cross_zone(template_id).await {
            Ok(()) => {}
            // Removed between lookup and update
            Err(MetadataError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.catalog.associate_to_zone(template_id, None).await?;
        tracing::debug!(template_id, "Marked template cross-zone");
        Ok(true)
    }

    /// Relabel every live record on a store as an image cache record.
    pub async fn update_store_role_to_cache(&self, store_id: StoreId) -> MetadataResult<u64> {
        let updated = self
            .repo
            .update_role(
                &AssociationFilter::by_store(store_id),
                DataStoreRole::ImageCache,
            )
            .await?;
        tracing::info!(store_id, updated, "Relabelled store records as image cache");
        Ok(updated)
    }
}

/// A template store record held under the database write lock.
///
/// Dropping it without [`LockedRecord::commit`] rolls back every write made
/// through it.
pub struct LockedRecord {
    claim: Box<dyn RecordClaim>,
    stale_write_details: bool,
}

impl LockedRecord {
    pub fn record(&self) -> &TemplateStoreRow {
        self.claim.record()
    }

    /// Same protocol as [`AssociationStore::update_state`], inside the lock's transaction.
    pub async fn update_state(
        &mut self,
        current: ObjectState,
        event: ObjectEvent,
        next: ObjectState,
    ) -> MetadataResult<bool> {
        let transition = StateTransition::new(self.claim.record(), current, next);
        let affected = self.claim.compare_and_set_state(&transition).await?;
        if affected == 1 {
            let record = self.claim.record_mut();
            transition.apply_to(record);
            log_transition(record, &transition, event);
            return Ok(true);
        }

        if self.stale_write_details && tracing::enabled!(Level::DEBUG) {
            match self.claim.reload().await {
                Ok(persisted) => log_stale_write(
                    self.claim.record(),
                    persisted.as_ref(),
                    &transition,
                    event,
                ),
                Err(e) => tracing::warn!(
                    id = %self.claim.record().id,
                    error = %e,
                    "Failed to re-read locked record after stale write"
                ),
            }
        }
        Ok(false)
    }

    /// Apply `event` to the locked record's current state.
    pub async fn transition(&mut self, event: ObjectEvent) -> MetadataResult<bool> {
        let current = self.claim.record().state()?;
        let next = next_state(current, event)?;
        self.update_state(current, event, next).await
    }

    /// Commit the writes and release the lock, returning the record as written.
    pub async fn commit(mut self) -> MetadataResult<TemplateStoreRow> {
        self.claim.commit().await?;
        Ok(self.claim.record().clone())
    }
}

fn next_state(current: ObjectState, event: ObjectEvent) -> MetadataResult<ObjectState> {
    current
        .next(event)
        .ok_or_else(|| MetadataError::InvalidStateTransition {
            from: current.to_string(),
            to: format!("<{event}>"),
        })
}

fn log_transition(record: &TemplateStoreRow, transition: &StateTransition, event: ObjectEvent) {
    tracing::debug!(
        id = %record.id,
        template_id = record.template_id,
        store_id = record.store_id,
        event = %event,
        from = %transition.expected_state,
        to = %transition.next_state,
        version = transition.next_version,
        "Template store record transitioned"
    );
}

fn log_stale_write(
    stale: &TemplateStoreRow,
    persisted: Option<&TemplateStoreRow>,
    transition: &StateTransition,
    event: ObjectEvent,
) {
    match persisted {
        Some(persisted) => tracing::debug!(
            id = %stale.id,
            event = %event,
            attempted_from = %transition.expected_state,
            attempted_to = %transition.next_state,
            stale_state = %stale.state,
            stale_version = stale.updated_count,
            stale_updated_at = %stale.updated_at,
            persisted_state = %persisted.state,
            persisted_version = persisted.updated_count,
            persisted_updated_at = %persisted.updated_at,
            "Unsuccessful state update, record was changed by another writer"
        ),
        None => tracing::debug!(
            id = %stale.id,
            event = %event,
            attempted_from = %transition.expected_state,
            attempted_to = %transition.next_state,
            stale_version = stale.updated_count,
            "Unsuccessful state update, record no longer exists"
        ),
    }
}
