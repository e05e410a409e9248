//! EduSec Engine
//!
//! Application entry point for the role-security engine. Builds one record
//! store handle, one error tracker and one security event logger, and injects
//! them into the rate limiter, escalation prevention and permission services.
//!
//! ```text
//!                 ┌──────────────────────┐
//!   role request ─▶ EscalationPrevention ├──▶ RateLimiter
//!                 └──────────┬───────────┘        │
//!                            │                    │
//!   permission  ─▶ PermissionChecker ◀── cache    │
//!                            │                    │
//!                 ┌──────────▼────────────────────▼──┐
//!                 │       SecurityEventLogger        │──▶ flusher
//!                 └──────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod engine;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineStats, SecurityEngine, TableGaps};

/// Config file used when `EDUSEC_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/edusec/engine.json";
