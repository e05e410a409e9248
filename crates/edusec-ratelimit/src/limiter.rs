//! Role-request rate limiter
//!
//! Checks run in a fixed order: active block, system-admin bypass, burst,
//! then the hour / day / week horizons and the optional per-IP quota. All
//! counts are derived from the append-only history table; nothing is
//! counted in place. Check-then-record is not atomic, so two concurrent
//! requests can both pass before either is recorded.

use crate::window::{count_after, seconds_until_expiry, window_start, Horizon};
use crate::RateLimitConfig;
use chrono::{DateTime, Duration, Utc};
use edusec_audit::{EventContext, SecurityEventLogger, SecurityEventType};
use edusec_common::{
    BlockRecord, ErrorTracker, Order, Query, RateLimitRecord, RateLimitReset, RecordStore, Role,
    RoleDirectory, SecurityError, SecurityResult, StoreResult, Table, SYSTEM_ERROR_REASON,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Longest block `block_user` accepts
pub const MAX_BLOCK_HOURS: u32 = 24 * 365;

/// Which guard produced a denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Blocked,
    Burst,
    Hourly,
    Daily,
    Weekly,
    IpHourly,
    SystemError,
}

impl From<Horizon> for LimitKind {
    fn from(h: Horizon) -> Self {
        match h {
            Horizon::Hour => LimitKind::Hourly,
            Horizon::Day => LimitKind::Daily,
            Horizon::Week => LimitKind::Weekly,
        }
    }
}

/// Rate limit decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Seconds until a retry can succeed
    pub retry_after: Option<u64>,
    pub limited_by: Option<LimitKind>,
}

impl RateLimitResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: None,
            limited_by: None,
        }
    }

    pub fn deny(kind: LimitKind, reason: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            retry_after,
            limited_by: Some(kind),
        }
    }

    /// Convert a denial into the error taxonomy
    pub fn into_error(self) -> Option<SecurityError> {
        (!self.allowed).then(|| SecurityError::RateLimit {
            reason: self.reason.unwrap_or_default(),
            retry_after: self.retry_after,
        })
    }
}

/// Quota usage for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonStatus {
    pub horizon: Horizon,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// When the oldest counted request leaves the window
    pub resets_at: Option<DateTime<Utc>>,
}

/// Active cooldown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cooldown {
    pub kind: LimitKind,
    pub until: DateTime<Utc>,
    pub reason: String,
}

/// Rate limit status for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub user_id: String,
    pub horizons: Vec<HorizonStatus>,
    pub next_reset: Option<DateTime<Utc>>,
    pub cooldowns: Vec<Cooldown>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitStatus {
    pub fn remaining(&self, horizon: Horizon) -> Option<u32> {
        self.horizons.iter().find(|h| h.horizon == horizon).map(|h| h.remaining)
    }

    pub fn is_blocked(&self) -> bool {
        self.cooldowns.iter().any(|c| c.kind == LimitKind::Blocked)
    }
}

#[derive(Debug, Default)]
struct LimiterStats {
    checks: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    system_errors: AtomicU64,
}

/// Snapshot of limiter counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RateLimiterStats {
    pub checks: u64,
    pub allowed: u64,
    pub denied: u64,
    pub system_errors: u64,
}

/// Per-user history loaded once per check
struct History {
    times: Vec<DateTime<Utc>>,
    reset_at: Option<DateTime<Utc>>,
}

/// Sliding-window rate limiter over the shared record store
pub struct RateLimiter {
    store: Arc<dyn RecordStore>,
    directory: RoleDirectory,
    logger: Arc<SecurityEventLogger>,
    errors: Arc<ErrorTracker>,
    config: RateLimitConfig,
    stats: LimiterStats,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        logger: Arc<SecurityEventLogger>,
        errors: Arc<ErrorTracker>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            directory: RoleDirectory::new(Arc::clone(&store)),
            store,
            logger,
            errors,
            config,
            stats: LimiterStats::default(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a role request may proceed. Fails closed.
    pub async fn check_rate_limit(
        &self,
        user_id: &str,
        requested_role: Role,
        institution_id: &str,
        ip_address: Option<&str>,
    ) -> RateLimitResult {
        self.stats.checks.fetch_add(1, Ordering::Relaxed);

        let result = match self.evaluate(user_id, ip_address, Utc::now()).await {
            Ok(result) => result,
            Err(e) => {
                self.stats.system_errors.fetch_add(1, Ordering::Relaxed);
                let err = SecurityError::from(e);
                self.errors.record(&err, "check_rate_limit");
                self.logger
                    .log_system_error(
                        "check_rate_limit",
                        &err,
                        EventContext::user(user_id).institution(institution_id).ip(ip_address),
                    )
                    .await;
                return RateLimitResult::deny(LimitKind::SystemError, SYSTEM_ERROR_REASON, None);
            }
        };

        if result.allowed {
            self.stats.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
            self.log_denial(user_id, requested_role, institution_id, ip_address, &result)
                .await;
        }
        result
    }

    async fn evaluate(&self, user_id: &str, ip_address: Option<&str>, now: DateTime<Utc>) -> StoreResult<RateLimitResult> {
        if let Some(block) = self.active_block(user_id, now).await? {
            return Ok(RateLimitResult::deny(
                LimitKind::Blocked,
                format!("User is blocked: {}", block.reason),
                Some(seconds_until_expiry(block.blocked_until, Duration::zero(), now)),
            ));
        }

        if self.directory.is_system_admin(user_id).await? {
            return Ok(RateLimitResult::allow());
        }

        let history = self.history(user_id, now).await?;

        let burst_window = Duration::seconds(self.config.burst_window_seconds as i64);
        let burst = count_after(&history.times, window_start(now, burst_window, history.reset_at));
        if burst.count >= self.config.burst_threshold as usize {
            let retry = burst.oldest.map(|t| seconds_until_expiry(t, burst_window, now));
            return Ok(RateLimitResult::deny(LimitKind::Burst, "Burst protection triggered", retry));
        }

        for horizon in Horizon::ALL {
            let max = self.config.max_for(horizon);
            let window = horizon.window();
            let counted = count_after(&history.times, window_start(now, window, history.reset_at));
            if counted.count >= max as usize {
                let retry = counted.oldest.map(|t| seconds_until_expiry(t, window, now));
                return Ok(RateLimitResult::deny(
                    horizon.into(),
                    format!("{} limit exceeded ({}/{})", horizon.label(), counted.count, max),
                    retry,
                ));
            }
        }

        if let (Some(ip), Some(max)) = (ip_address, self.config.ip_hourly_max) {
            let window = Horizon::Hour.window();
            let times = self.ip_history(ip, now - window).await?;
            let counted = count_after(&times, now - window);
            if counted.count >= max as usize {
                let retry = counted.oldest.map(|t| seconds_until_expiry(t, window, now));
                return Ok(RateLimitResult::deny(
                    LimitKind::IpHourly,
                    format!("IP hourly limit exceeded ({}/{})", counted.count, max),
                    retry,
                ));
            }
        }

        Ok(RateLimitResult::allow())
    }

    async fn log_denial(
        &self,
        user_id: &str,
        requested_role: Role,
        institution_id: &str,
        ip_address: Option<&str>,
        result: &RateLimitResult,
    ) {
        let event_type = match result.limited_by {
            Some(LimitKind::Burst) => SecurityEventType::BurstActivityDetected,
            _ => SecurityEventType::RateLimitExceeded,
        };
        let reason = result.reason.as_deref().unwrap_or_default();
        tracing::warn!(
            user_id,
            institution_id,
            limited_by = ?result.limited_by,
            retry_after = ?result.retry_after,
            "role request rate limited"
        );
        self.logger
            .log_security_event(
                event_type,
                reason.to_string(),
                json!({
                    "requested_role": requested_role,
                    "limited_by": result.limited_by,
                    "retry_after": result.retry_after,
                }),
                EventContext::user(user_id).institution(institution_id).ip(ip_address),
            )
            .await;
    }

    /// Append one history row; the "record" half of check-then-record
    pub async fn record_request(
        &self,
        user_id: &str,
        requested_role: Role,
        institution_id: &str,
        ip_address: Option<&str>,
    ) -> SecurityResult<RateLimitRecord> {
        let record = RateLimitRecord::new(user_id, requested_role, institution_id, ip_address);
        self.store.insert_records(std::slice::from_ref(&record)).await?;
        tracing::debug!(user_id, role = %requested_role, "role request recorded");
        Ok(record)
    }

    /// Requests since `now - window`, honoring any reset boundary
    pub async fn recent_request_count(&self, user_id: &str, window: Duration) -> StoreResult<usize> {
        let now = Utc::now();
        let reset_at = self.reset_boundary(user_id).await?;
        let start = window_start(now, window, reset_at);
        let query = Query::table(Table::RateLimitHistory)
            .eq("user_id", user_id)
            .gt("created_at", start.timestamp_millis());
        Ok(self.store.select(&query).await?.len())
    }

    /// Remaining quota per horizon, next reset and active cooldowns
    pub async fn get_rate_limit_status(&self, user_id: &str) -> SecurityResult<RateLimitStatus> {
        let now = Utc::now();
        let history = self.history(user_id, now).await?;
        let mut cooldowns = Vec::new();

        if let Some(block) = self.active_block(user_id, now).await? {
            cooldowns.push(Cooldown {
                kind: LimitKind::Blocked,
                until: block.blocked_until,
                reason: block.reason,
            });
        }

        let burst_window = Duration::seconds(self.config.burst_window_seconds as i64);
        let burst = count_after(&history.times, window_start(now, burst_window, history.reset_at));
        if burst.count >= self.config.burst_threshold as usize {
            if let Some(oldest) = burst.oldest {
                cooldowns.push(Cooldown {
                    kind: LimitKind::Burst,
                    until: oldest + burst_window,
                    reason: "Burst protection triggered".into(),
                });
            }
        }

        let mut horizons = Vec::with_capacity(Horizon::ALL.len());
        for horizon in Horizon::ALL {
            let limit = self.config.max_for(horizon);
            let counted = count_after(&history.times, window_start(now, horizon.window(), history.reset_at));
            let used = counted.count as u32;
            let resets_at = counted.oldest.map(|t| t + horizon.window());
            if used >= limit {
                if let Some(until) = resets_at {
                    cooldowns.push(Cooldown {
                        kind: horizon.into(),
                        until,
                        reason: format!("{} limit exceeded", horizon.label()),
                    });
                }
            }
            horizons.push(HorizonStatus {
                horizon,
                used,
                limit,
                remaining: limit.saturating_sub(used),
                resets_at,
            });
        }

        Ok(RateLimitStatus {
            user_id: user_id.to_string(),
            next_reset: horizons.iter().filter_map(|h| h.resets_at).min(),
            horizons,
            cooldowns,
            reset_at: history.reset_at,
        })
    }

    /// Block a user for `hours` (default from config). Replaces any existing block.
    pub async fn block_user(
        &self,
        user_id: &str,
        blocked_by: &str,
        reason: &str,
        hours: Option<u32>,
    ) -> SecurityResult<BlockRecord> {
        let hours = hours.unwrap_or(self.config.default_block_duration_hours);
        if hours == 0 {
            return Err(SecurityError::Validation("block duration must be at least one hour".into()));
        }
        if hours > MAX_BLOCK_HOURS {
            return Err(SecurityError::Validation(format!(
                "block duration must not exceed {MAX_BLOCK_HOURS} hours"
            )));
        }
        if reason.trim().is_empty() {
            return Err(SecurityError::Validation("block reason is required".into()));
        }

        let now = Utc::now();
        let blocked_until = now
            .checked_add_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| SecurityError::Validation("block end is out of range".into()))?;
        let block = BlockRecord {
            user_id: user_id.to_string(),
            blocked_until,
            reason: reason.to_string(),
            blocked_by: blocked_by.to_string(),
            created_at: now,
        };
        self.store
            .upsert_records(&["user_id"], std::slice::from_ref(&block))
            .await?;

        tracing::warn!(user_id, blocked_by, hours, "user blocked from role requests");
        self.logger
            .log_admin_action(
                SecurityEventType::UserBlocked,
                blocked_by,
                "block_user",
                json!({ "reason": reason, "hours": hours, "blocked_until": block.blocked_until }),
                EventContext::default().target(user_id),
            )
            .await;
        Ok(block)
    }

    /// Lift an active block. Returns whether one was in force.
    pub async fn unblock_user(&self, user_id: &str, unblocked_by: &str) -> SecurityResult<bool> {
        let now = Utc::now();
        let query = Query::table(Table::RateLimitBlocks)
            .eq("user_id", user_id)
            .gt("blocked_until", now.timestamp_millis());
        let lifted = self
            .store
            .update(&query, json!({ "blocked_until": now.timestamp_millis() }))
            .await?;

        if lifted > 0 {
            tracing::info!(user_id, unblocked_by, "user unblocked");
            self.logger
                .log_admin_action(
                    SecurityEventType::UserUnblocked,
                    unblocked_by,
                    "unblock_user",
                    json!({}),
                    EventContext::default().target(user_id),
                )
                .await;
        }
        Ok(lifted > 0)
    }

    /// Forget a user's history. Blocks stay in force.
    pub async fn reset_user_rate_limit(&self, user_id: &str, reset_by: &str) -> SecurityResult<()> {
        let marker = RateLimitReset {
            user_id: user_id.to_string(),
            reset_at: Utc::now(),
            reset_by: reset_by.to_string(),
        };
        self.store
            .upsert_records(&["user_id"], std::slice::from_ref(&marker))
            .await?;

        tracing::info!(user_id, reset_by, "rate limit history reset");
        self.logger
            .log_admin_action(
                SecurityEventType::RateLimitReset,
                reset_by,
                "reset_user_rate_limit",
                json!({ "reset_at": marker.reset_at }),
                EventContext::default().target(user_id),
            )
            .await;
        Ok(())
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            checks: self.stats.checks.load(Ordering::Relaxed),
            allowed: self.stats.allowed.load(Ordering::Relaxed),
            denied: self.stats.denied.load(Ordering::Relaxed),
            system_errors: self.stats.system_errors.load(Ordering::Relaxed),
        }
    }

    async fn active_block(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Option<BlockRecord>> {
        let query = Query::table(Table::RateLimitBlocks)
            .eq("user_id", user_id)
            .gt("blocked_until", now.timestamp_millis());
        Ok(self
            .store
            .fetch::<BlockRecord>(&query)
            .await?
            .into_iter()
            .filter(|b| b.is_active_at(now))
            .max_by_key(|b| b.blocked_until))
    }

    async fn reset_boundary(&self, user_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let query = Query::table(Table::RateLimitResets).eq("user_id", user_id);
        Ok(self
            .store
            .fetch::<RateLimitReset>(&query)
            .await?
            .into_iter()
            .map(|r| r.reset_at)
            .max())
    }

    /// One week of history (or less, after a reset), oldest first
    async fn history(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<History> {
        let reset_at = self.reset_boundary(user_id).await?;
        let start = window_start(now, Horizon::Week.window(), reset_at);
        let query = Query::table(Table::RateLimitHistory)
            .eq("user_id", user_id)
            .gt("created_at", start.timestamp_millis())
            .order_by("created_at", Order::Asc);
        let mut times: Vec<_> = self
            .store
            .fetch::<RateLimitRecord>(&query)
            .await?
            .into_iter()
            .map(|r| r.created_at)
            .collect();
        times.sort_unstable();
        Ok(History { times, reset_at })
    }

    async fn ip_history(&self, ip: &str, since: DateTime<Utc>) -> StoreResult<Vec<DateTime<Utc>>> {
        let query = Query::table(Table::RateLimitHistory)
            .eq("ip_address", ip)
            .gt("created_at", since.timestamp_millis());
        let mut times: Vec<_> = self
            .store
            .fetch::<RateLimitRecord>(&query)
            .await?
            .into_iter()
            .map(|r| r.created_at)
            .collect();
        times.sort_unstable();
        Ok(times)
    }
}
