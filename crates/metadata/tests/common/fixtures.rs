//! Test fixtures for generating test data.

use depot_core::{DataStoreRole, DownloadStatus, ObjectState, StoreId, TemplateId, ZoneId};
use depot_metadata::models::{ImageStoreRow, TemplateRow, TemplateStoreRow};
use depot_metadata::repos::{StoreTopology, TemplateCatalog};
use depot_metadata::{AssociationStore, SqliteStore};
use std::sync::atomic::{AtomicI64, Ordering};
use time::{Duration, OffsetDateTime};

/// Counter for giving each fixture record a distinct creation time.
static RECORD_COUNTER: AtomicI64 = AtomicI64::new(1);

/// Build a live record with a creation time later than every earlier fixture record.
#[allow(dead_code)]
pub fn record(template_id: TemplateId, store_id: StoreId, role: DataStoreRole) -> TemplateStoreRow {
    let seq = RECORD_COUNTER.fetch_add(1, Ordering::Relaxed);
    let created_at = OffsetDateTime::now_utc() - Duration::days(1) + Duration::milliseconds(seq);
    let mut row = TemplateStoreRow::new(template_id, store_id, role);
    row.created_at = created_at;
    row.updated_at = created_at;
    row
}

/// Build a record in a given state and version.
#[allow(dead_code)]
pub fn record_in_state(
    template_id: TemplateId,
    store_id: StoreId,
    role: DataStoreRole,
    state: ObjectState,
    version: i64,
) -> TemplateStoreRow {
    let mut row = record(template_id, store_id, role);
    row.state = state.as_str().to_string();
    row.updated_count = version;
    row
}

/// Build a fully downloaded `Ready` record.
#[allow(dead_code)]
pub fn ready_record(template_id: TemplateId, store_id: StoreId, role: DataStoreRole) -> TemplateStoreRow {
    let mut row = record_in_state(template_id, store_id, role, ObjectState::Ready, 2);
    row.download_state = DownloadStatus::Downloaded.as_str().to_string();
    row.download_percent = 100;
    row.install_path = Some(format!("template/tmpl/{store_id}/{template_id}"));
    row.size = 4096;
    row.physical_size = 1024;
    row
}

/// Insert a record and return it.
#[allow(dead_code)]
pub async fn seed(associations: &AssociationStore, row: TemplateStoreRow) -> TemplateStoreRow {
    associations
        .create_record(&row)
        .await
        .expect("Failed to seed record");
    row
}

/// Register an image or image cache store.
#[allow(dead_code)]
pub async fn seed_image_store(
    store: &SqliteStore,
    store_id: StoreId,
    role: DataStoreRole,
    zone_id: Option<ZoneId>,
) {
    let row = ImageStoreRow {
        store_id,
        name: format!("store-{store_id}"),
        role: role.as_str().to_string(),
        zone_id,
        created_at: OffsetDateTime::now_utc(),
    };
    store
        .create_image_store(&row)
        .await
        .expect("Failed to seed image store");
}

/// Register a zone-local template in the catalog.
#[allow(dead_code)]
pub async fn seed_template(store: &SqliteStore, template_id: TemplateId) {
    let now = OffsetDateTime::now_utc();
    let row = TemplateRow {
        template_id,
        name: format!("template-{template_id}"),
        cross_zones: false,
        created_at: now,
        updated_at: now,
    };
    store
        .create_template(&row)
        .await
        .expect("Failed to seed template");
}
