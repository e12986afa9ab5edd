//! Repository traits for metadata operations.

pub mod catalog;
pub mod template_stores;
pub mod topology;

pub use catalog::TemplateCatalog;
pub use template_stores::{RecordClaim, RowPick, TemplateStoreRepo};
pub use topology::StoreTopology;
