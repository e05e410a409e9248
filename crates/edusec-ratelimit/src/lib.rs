//! EduSec Rate Limiting
//!
//! Sliding-window limits on role-change requests:
//! - Explicit user blocks, checked first
//! - Short-window burst protection
//! - Hour / day / week quotas with retry hints
//! - Optional per-IP hourly quota
//! - Reset via a boundary marker (history rows stay append-only)

#![warn(clippy::all)]

pub mod limiter;
pub mod window;

pub use limiter::{
    Cooldown, HorizonStatus, LimitKind, RateLimitResult, RateLimitStatus, RateLimiter, RateLimiterStats,
    MAX_BLOCK_HOURS,
};
pub use window::Horizon;

use serde::{Deserialize, Serialize};

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub hourly_max: u32,
    pub daily_max: u32,
    pub weekly_max: u32,
    /// Requests per source IP per hour; `None` disables the check
    pub ip_hourly_max: Option<u32>,
    pub burst_threshold: u32,
    pub burst_window_seconds: u64,
    pub default_block_duration_hours: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            hourly_max: 10,
            daily_max: 20,
            weekly_max: 50,
            ip_hourly_max: Some(30),
            burst_threshold: 5,
            burst_window_seconds: 300,
            default_block_duration_hours: 24,
        }
    }
}

impl RateLimitConfig {
    pub fn max_for(&self, horizon: Horizon) -> u32 {
        match horizon {
            Horizon::Hour => self.hourly_max,
            Horizon::Day => self.daily_max,
            Horizon::Week => self.weekly_max,
        }
    }
}
