//! Template catalog repository.

use crate::error::MetadataResult;
use crate::models::{TemplateRow, TemplateZoneRow};
use async_trait::async_trait;
use depot_core::{TemplateId, ZoneId};

/// Template metadata and template/zone bookkeeping.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Register a template.
    async fn create_template(&self, template: &TemplateRow) -> MetadataResult<()>;

    /// Get a template by ID.
    async fn find_template(&self, template_id: TemplateId) -> MetadataResult<Option<TemplateRow>>;

    /// Mark a template as available across all zones.
    async fn mark_cross_zone(&self, template_id: TemplateId) -> MetadataResult<()>;

    /// Associate a template with a zone. `None` registers the all-zones marker.
    /// Associating twice is a no-op.
    async fn associate_to_zone(
        &self,
        template_id: TemplateId,
        zone_id: Option<ZoneId>,
    ) -> MetadataResult<()>;

    /// List the zone associations of a template.
    async fn list_template_zones(
        &self,
        template_id: TemplateId,
    ) -> MetadataResult<Vec<TemplateZoneRow>>;
}
