//! Core domain types for template/store association tracking.
//!
//! This crate defines the vocabulary shared by the metadata layer and its callers:
//! - Object-in-store lifecycle states, events and the transition table
//! - Data store roles (primary image repository vs. image cache tier)
//! - Transfer status of a template on a store
//! - Zone scopes used to resolve eligible stores
//! - Configuration types

pub mod config;
pub mod download;
pub mod error;
pub mod role;
pub mod scope;
pub mod state;

pub use download::DownloadStatus;
pub use error::{Error, Result};
pub use role::DataStoreRole;
pub use scope::ZoneScope;
pub use state::{ObjectEvent, ObjectState};

/// Identifier of a template in the template catalog.
pub type TemplateId = i64;

/// Identifier of an image store or image cache store.
pub type StoreId = i64;

/// Identifier of an availability zone.
pub type ZoneId = i64;
