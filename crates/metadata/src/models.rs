//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use depot_core::{DataStoreRole, DownloadStatus, ObjectState, StoreId, TemplateId, ZoneId};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Template <-> store associations
// =============================================================================

/// Association between one template and one data store (`template_store_ref`).
///
/// Enum-valued columns are stored as text; use the typed accessors to read them.
/// `state` must only change through the compare-and-swap transition protocol.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TemplateStoreRow {
    pub id: Uuid,
    pub template_id: TemplateId,
    pub store_id: StoreId,
    pub store_role: String,
    pub state: String,
    pub download_state: String,
    pub download_percent: i32,
    pub download_url: Option<String>,
    pub error_string: Option<String>,
    /// Location of the content on the store. None until the content is present.
    pub install_path: Option<String>,
    pub size: i64,
    pub physical_size: i64,
    /// Number of active dependents. Records with a non-zero count are not evicted.
    pub ref_cnt: i64,
    pub destroyed: bool,
    /// Version token, incremented by exactly one on every successful transition.
    pub updated_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TemplateStoreRow {
    /// Build a fresh `Allocated` record for a template on a store.
    pub fn new(template_id: TemplateId, store_id: StoreId, role: DataStoreRole) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            template_id,
            store_id,
            store_role: role.as_str().to_string(),
            state: ObjectState::Allocated.as_str().to_string(),
            download_state: DownloadStatus::NotDownloaded.as_str().to_string(),
            download_percent: 0,
            download_url: None,
            error_string: None,
            install_path: None,
            size: 0,
            physical_size: 0,
            ref_cnt: 0,
            destroyed: false,
            updated_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the region-store copy of an image cache record.
    ///
    /// Transfer metadata is carried over, the install path is left empty since the
    /// content is not on the new store yet, and the reference count is bumped by one
    /// so the copy is not evicted before the content is pushed.
    pub fn duplicate_onto(&self, store_id: StoreId) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            template_id: self.template_id,
            store_id,
            store_role: DataStoreRole::Image.as_str().to_string(),
            state: self.state.clone(),
            download_state: self.download_state.clone(),
            download_percent: self.download_percent,
            download_url: self.download_url.clone(),
            error_string: self.error_string.clone(),
            install_path: None,
            size: self.size,
            physical_size: self.physical_size,
            ref_cnt: self.ref_cnt + 1,
            destroyed: false,
            updated_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> MetadataResult<ObjectState> {
        Ok(self.state.parse()?)
    }

    pub fn store_role(&self) -> MetadataResult<DataStoreRole> {
        Ok(self.store_role.parse()?)
    }

    pub fn download_state(&self) -> MetadataResult<DownloadStatus> {
        Ok(self.download_state.parse()?)
    }
}

/// A single conditional state write.
///
/// Applies only if the persisted row still has `expected_state` and
/// `expected_version`; otherwise another writer got there first.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub id: Uuid,
    pub expected_state: ObjectState,
    pub expected_version: i64,
    pub next_state: ObjectState,
    pub next_version: i64,
    pub updated_at: OffsetDateTime,
    /// Set when `next_state` is `Destroyed`; the soft-delete marker is written atomically
    /// with the state change.
    pub mark_destroyed: bool,
}

impl StateTransition {
    pub fn new(record: &TemplateStoreRow, current: ObjectState, next: ObjectState) -> Self {
        Self {
            id: record.id,
            expected_state: current,
            expected_version: record.updated_count,
            next_state: next,
            next_version: record.updated_count + 1,
            updated_at: OffsetDateTime::now_utc(),
            mark_destroyed: next == ObjectState::Destroyed,
        }
    }

    /// Copy the written values into the caller's record after a successful write.
    pub fn apply_to(&self, record: &mut TemplateStoreRow) {
        record.state = self.next_state.as_str().to_string();
        record.updated_count = self.next_version;
        record.updated_at = self.updated_at;
        if self.mark_destroyed {
            record.destroyed = true;
        }
    }
}

// =============================================================================
// Template catalog
// =============================================================================

/// Template catalog entry.
#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub template_id: TemplateId,
    pub name: String,
    /// Whether the template is available in every zone.
    pub cross_zones: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Template to zone association. `zone_id = NULL` marks an all-zones association.
#[derive(Debug, Clone, FromRow)]
pub struct TemplateZoneRow {
    pub template_id: TemplateId,
    pub zone_id: Option<ZoneId>,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Store topology
// =============================================================================

/// Registered image or image cache store. `zone_id = NULL` marks a region-wide store.
#[derive(Debug, Clone, FromRow)]
pub struct ImageStoreRow {
    pub store_id: StoreId,
    pub name: String,
    pub role: String,
    pub zone_id: Option<ZoneId>,
    pub created_at: OffsetDateTime,
}
