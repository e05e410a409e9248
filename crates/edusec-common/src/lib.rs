//! EduSec Common - Shared types for the role-security engine
//!
//! This crate provides the vocabulary every other EduSec crate speaks:
//! - Ordered role enumeration and admin scopes
//! - Record-store contract (insert / filtered select / update / upsert)
//! - Typed record shapes for assignments, rate-limit history and blocks
//! - Role directory over the record store
//! - Error taxonomy and aggregate error statistics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Security Decisions                      │
//! │   RateLimiter │ EscalationPrevention │ PermissionChecker    │
//! │                            │                                │
//! │                   ┌────────▼────────┐                       │
//! │                   │  RoleDirectory  │                       │
//! │                   └────────┬────────┘                       │
//! │                   ┌────────▼────────┐                       │
//! │                   │  RecordStore    │  (external, shared)   │
//! │                   └─────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod directory;
pub mod error;
pub mod records;
pub mod role;
pub mod store;

pub use directory::{holds_system_admin, RoleDirectory};
pub use error::*;
pub use records::*;
pub use role::*;
pub use store::*;

/// Generic reason returned to callers when a security decision fails internally.
pub const SYSTEM_ERROR_REASON: &str = "system error";

/// Generate a new random identifier for events, alerts and rows
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
