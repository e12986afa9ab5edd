//! Metadata store test utilities.

use async_trait::async_trait;
use depot_core::{TemplateId, ZoneId};
use depot_metadata::models::{TemplateRow, TemplateZoneRow};
use depot_metadata::repos::TemplateCatalog;
use depot_metadata::{AssociationStore, MetadataResult, SqliteStore};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A test metadata store wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<SqliteStore>,
    pub associations: AssociationStore,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    /// Create a new test metadata store backed by a file in a temp directory.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(&db_path, None).await?);

        Ok(Self {
            associations: AssociationStore::from_store(store.clone()),
            store,
            _temp_dir: temp_dir,
        })
    }

    /// Create a new in-memory SQLite store (faster for tests).
    pub async fn in_memory() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = Arc::new(SqliteStore::new(":memory:", None).await?);

        Ok(Self {
            associations: AssociationStore::from_store(store.clone()),
            store,
            _temp_dir: temp_dir,
        })
    }

    /// Swap the catalog the association store consults.
    pub fn with_catalog(mut self, catalog: Arc<dyn TemplateCatalog>) -> Self {
        self.associations = AssociationStore::new(self.store.clone(), self.store.clone(), catalog);
        self
    }

    /// Association store operations.
    pub fn associations(&self) -> &AssociationStore {
        &self.associations
    }

    /// Get a reference to the SQLite connection pool for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.store.pool()
    }
}

/// Catalog wrapper that counts cross-zone markings per template.
pub struct CountingCatalog {
    inner: Arc<dyn TemplateCatalog>,
    marks: Mutex<HashMap<TemplateId, usize>>,
}

#[allow(dead_code)]
impl CountingCatalog {
    pub fn new(inner: Arc<dyn TemplateCatalog>) -> Self {
        Self {
            inner,
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `mark_cross_zone` was called for a template.
    pub fn marks(&self, template_id: TemplateId) -> usize {
        self.marks
            .lock()
            .unwrap()
            .get(&template_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_marks(&self) -> usize {
        self.marks.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl TemplateCatalog for CountingCatalog {
    async fn create_template(&self, template: &TemplateRow) -> MetadataResult<()> {
        self.inner.create_template(template).await
    }

    async fn find_template(&self, template_id: TemplateId) -> MetadataResult<Option<TemplateRow>> {
        self.inner.find_template(template_id).await
    }

    async fn mark_cross_zone(&self, template_id: TemplateId) -> MetadataResult<()> {
        *self.marks.lock().unwrap().entry(template_id).or_insert(0) += 1;
        self.inner.mark_cross_zone(template_id).await
    }

    async fn associate_to_zone(
        &self,
        template_id: TemplateId,
        zone_id: Option<ZoneId>,
    ) -> MetadataResult<()> {
        self.inner.associate_to_zone(template_id, zone_id).await
    }

    async fn list_template_zones(
        &self,
        template_id: TemplateId,
    ) -> MetadataResult<Vec<TemplateZoneRow>> {
        self.inner.list_template_zones(template_id).await
    }
}
