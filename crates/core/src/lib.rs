//! # sheetfind-core
//!
//! Domain model and service plumbing for sheetfind.
//!
//! This crate provides:
//! - Users, documents and grants
//! - The access filter and authorization guards
//! - Document byte storage
//! - The registry that owns users, documents and grants
//! - Configuration loading

/// Access filter and guards.
pub mod access;
/// Service configuration.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Domain records.
pub mod model;
/// Password hashing.
pub mod password;
/// User, document and grant store.
pub mod registry;
/// Document byte storage.
pub mod storage;

pub use access::{require_admin, require_user, AccessFilter, Denied, PermissionStore};
pub use config::{BootstrapAdmin, Config};
pub use error::{CoreError, CoreResult};
pub use model::{
    Capability, Document, DocumentId, Grant, GrantId, GrantSubject, Stats, User, UserId,
};
pub use registry::{NewDocument, NewUser, Page, Registry, UserUpdate};
pub use storage::{FsStorage, MemoryStorage, Storage};
