//! EduSec Authorization
//!
//! Permission checks for the education platform:
//! - Closed permission enumeration with `resource:action` scope strings
//! - Cumulative role -> permission table
//! - Per-assignment conditions (denied permissions, own resources only)
//! - TTL decision cache with synchronous per-user invalidation
//! - Bulk checks that resolve assignments once per request
//! - UI element and feature gating (AND / OR)

#![warn(clippy::all)]

pub mod bulk;
pub mod cache;
pub mod checker;
pub mod permission;

pub use bulk::{BulkPermissionService, FeatureRequirement, RequirementMode};
pub use cache::{CacheKey, CacheStats, PermissionCache, PermissionContext};
pub use checker::{CheckerStats, PermissionCheck, PermissionChecker};
pub use permission::{parse_scopes, Permission, PermissionTable};

use serde::{Deserialize, Serialize};

/// Permission cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    /// Most permissions accepted by one bulk check
    pub bulk_check_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 300,
            cache_max_entries: 100_000,
            bulk_check_limit: 100,
        }
    }
}
