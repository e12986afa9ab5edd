//! Metadata store error types.

use depot_core::TemplateId;
use thiserror::Error;

/// Format template ids for display, capping at MAX_DISPLAYED to prevent log bloat.
fn format_template_ids(ids: &[TemplateId]) -> String {
    const MAX_DISPLAYED: usize = 5;
    if ids.len() <= MAX_DISPLAYED {
        format!("{:?}", ids)
    } else {
        let sample: Vec<_> = ids.iter().take(MAX_DISPLAYED).collect();
        format!("{:?} (and {} more)", sample, ids.len() - MAX_DISPLAYED)
    }
}

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("no template found for {} template id(s): {}", .template_ids.len(), format_template_ids(.template_ids))]
    TemplateNotFound { template_ids: Vec<TemplateId> },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<depot_core::Error> for MetadataError {
    fn from(e: depot_core::Error) -> Self {
        MetadataError::Corrupt(e.to_string())
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
