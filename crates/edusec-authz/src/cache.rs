//! Permission decision cache
//!
//! Entries are keyed by (user, permission, context hash) and carry the
//! stamp taken before the underlying assignments were read: the cache epoch,
//! the global invalidation sequence and the instant of the read. A user
//! invalidation records the sequence number it was given; any entry stamped
//! below it is stale, even when its insert races the invalidation. Entries
//! expire one TTL after their stamp, and invalidation marks live for one TTL,
//! so no bookkeeping outlives the entries it guards.

use crate::permission::Permission;
use crate::CacheConfig;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Scope of a permission check
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionContext {
    pub institution_id: Option<String>,
    pub department_id: Option<String>,
    /// Owner of the resource being acted on
    pub resource_owner_id: Option<String>,
}

impl PermissionContext {
    pub fn institution(institution_id: &str) -> Self {
        Self {
            institution_id: Some(institution_id.to_string()),
            ..Default::default()
        }
    }

    pub fn department(mut self, department_id: &str) -> Self {
        self.department_id = Some(department_id.to_string());
        self
    }

    pub fn owned_by(mut self, owner_id: &str) -> Self {
        self.resource_owner_id = Some(owner_id.to_string());
        self
    }

    pub fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// (user, permission, context hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: String,
    pub permission: Permission,
    pub context_hash: u64,
}

impl CacheKey {
    pub fn new(user_id: &str, permission: Permission, context: &PermissionContext) -> Self {
        Self {
            user_id: user_id.to_string(),
            permission,
            context_hash: context.hash_key(),
        }
    }
}

/// Version read before fetching assignments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStamp {
    epoch: u64,
    sequence: u64,
    taken_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    granted: bool,
    stamp: CacheStamp,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_rejections: u64,
    pub invalidations: u64,
    pub entries: u64,
    /// Users with a live invalidation mark
    pub invalidation_marks: u64,
}

/// TTL cache of permission decisions
pub struct PermissionCache {
    cache: Option<Cache<CacheKey, CachedDecision>>,
    /// Sequence number of each user's latest invalidation
    marks: Option<Cache<String, u64>>,
    ttl: Duration,
    epoch: AtomicU64,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    invalidations: AtomicU64,
}

impl PermissionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_seconds);
        let cache = config.cache_enabled.then(|| {
            Cache::builder()
                .max_capacity(config.cache_max_entries)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build()
        });
        // no capacity bound: evicting a live mark would let a stale entry through
        let marks = config
            .cache_enabled
            .then(|| Cache::builder().time_to_live(ttl).build());
        Self {
            cache,
            marks,
            ttl,
            epoch: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Current version; take it before reading assignments
    pub fn stamp(&self) -> CacheStamp {
        CacheStamp {
            epoch: self.epoch.load(Ordering::Acquire),
            sequence: self.sequence.load(Ordering::Acquire),
            taken_at: Instant::now(),
        }
    }

    fn is_current(&self, user_id: &str, stamp: &CacheStamp) -> bool {
        if stamp.epoch != self.epoch.load(Ordering::Acquire) {
            return false;
        }
        if stamp.taken_at + self.ttl <= Instant::now() {
            return false;
        }
        let invalidated_at = self.marks.as_ref().and_then(|m| m.get(user_id)).unwrap_or(0);
        stamp.sequence >= invalidated_at
    }

    /// Cached decision, if fresh and current
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        let cache = self.cache.as_ref()?;
        let Some(entry) = cache.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if !self.is_current(&key.user_id, &entry.stamp) {
            self.stale.fetch_add(1, Ordering::Relaxed);
            cache.invalidate(key);
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.granted)
    }

    /// Write a fresh decision. Last writer wins.
    pub fn insert(&self, key: CacheKey, granted: bool, stamp: CacheStamp) {
        if let Some(cache) = self.cache.as_ref() {
            cache.insert(key, CachedDecision { granted, stamp });
        }
    }

    /// Drop every entry of one user. Visible to the very next `get`.
    pub fn invalidate_user(&self, user_id: &str) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        let (Some(cache), Some(marks)) = (self.cache.as_ref(), self.marks.as_ref()) else {
            return;
        };
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        marks
            .entry_by_ref(user_id)
            .and_upsert_with(|current| current.map_or(sequence, |e| (*e.value()).max(sequence)));

        let owner = user_id.to_string();
        if let Err(e) = cache.invalidate_entries_if(move |key, _| key.user_id == owner) {
            tracing::warn!(user_id, error = %e, "eager eviction unavailable; stale entries expire with their ttl");
        }
        tracing::debug!(user_id, sequence, "permission cache invalidated for user");
    }

    /// Drop everything
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if let Some(cache) = self.cache.as_ref() {
            cache.invalidate_all();
        }
        if let Some(marks) = self.marks.as_ref() {
            marks.invalidate_all();
        }
        tracing::debug!("permission cache cleared");
    }

    /// Apply pending evictions and expirations now
    pub fn run_pending_tasks(&self) {
        if let Some(cache) = self.cache.as_ref() {
            cache.run_pending_tasks();
        }
        if let Some(marks) = self.marks.as_ref() {
            marks.run_pending_tasks();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_rejections: self.stale.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.cache.as_ref().map_or(0, |c| c.entry_count()),
            invalidation_marks: self.marks.as_ref().map_or(0, |m| m.entry_count()),
        }
    }
}
