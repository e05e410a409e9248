//! Engine configuration

use edusec_audit::EventLoggerConfig;
use edusec_authz::CacheConfig;
use edusec_common::SecurityError;
use edusec_escalation::EscalationConfig;
use edusec_ratelimit::{RateLimitConfig, MAX_BLOCK_HOURS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Config loading failure
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] SecurityError),
}

/// All component settings in one flat camelCase document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub rate_limit: RateLimitConfig,
    #[serde(flatten)]
    pub cache: CacheConfig,
    #[serde(flatten)]
    pub events: EventLoggerConfig,
    #[serde(flatten)]
    pub escalation: EscalationConfig,
}

impl EngineConfig {
    /// Load and validate a JSON file. Missing keys take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would disable a guard by accident
    pub fn validate(&self) -> Result<(), SecurityError> {
        let rl = &self.rate_limit;
        let checks: [(&str, bool); 11] = [
            ("hourlyMax", rl.hourly_max > 0),
            ("dailyMax", rl.daily_max > 0),
            ("weeklyMax", rl.weekly_max > 0),
            ("ipHourlyMax", rl.ip_hourly_max != Some(0)),
            ("burstThreshold", rl.burst_threshold > 0),
            ("burstWindowSeconds", rl.burst_window_seconds > 0),
            ("defaultBlockDurationHours", rl.default_block_duration_hours > 0),
            ("cacheTtlSeconds", !self.cache.cache_enabled || self.cache.cache_ttl_seconds > 0),
            ("bulkCheckLimit", self.cache.bulk_check_limit > 0),
            ("eventBufferSize", self.events.event_buffer_size > 0),
            ("flushIntervalMs", self.events.flush_interval_ms > 0),
        ];
        if let Some((key, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(SecurityError::Validation(format!("{key} must be greater than zero")));
        }
        if rl.default_block_duration_hours > MAX_BLOCK_HOURS {
            return Err(SecurityError::Validation(format!(
                "defaultBlockDurationHours must not exceed {MAX_BLOCK_HOURS}"
            )));
        }
        if self.escalation.hard_block_threshold > 100 {
            return Err(SecurityError::Validation(
                "hardBlockThreshold must be within 0-100".into(),
            ));
        }
        if rl.hourly_max > rl.daily_max || rl.daily_max > rl.weekly_max {
            return Err(SecurityError::Validation(
                "rate maxima must not shrink with longer horizons".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edusec_common::Role;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.hourly_max, 10);
        assert_eq!(config.cache.cache_ttl_seconds, 300);
        assert_eq!(config.events.flush_interval_ms, 5000);
    }

    #[test]
    fn test_flat_camel_case_keys() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "cacheEnabled": false,
                "hourlyMax": 4,
                "burstWindowSeconds": 60,
                "eventBufferSize": 10,
                "selfServiceMaxRole": "teacher"
            }"#,
        )
        .unwrap();
        assert!(!config.cache.cache_enabled);
        assert_eq!(config.rate_limit.hourly_max, 4);
        assert_eq!(config.rate_limit.daily_max, 20);
        assert_eq!(config.rate_limit.burst_window_seconds, 60);
        assert_eq!(config.events.event_buffer_size, 10);
        assert_eq!(config.escalation.self_service_max_role, Role::Teacher);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["bulkCheckLimit"], 100);
        assert_eq!(json["hardBlockThreshold"], 70);
    }

    #[test]
    fn test_rejects_zero_guards() {
        let mut config = EngineConfig::default();
        config.events.event_buffer_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eventBufferSize"));

        let mut config = EngineConfig::default();
        config.rate_limit.ip_hourly_max = None;
        assert!(config.validate().is_ok());
        config.rate_limit.ip_hourly_max = Some(0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rate_limit.default_block_duration_hours = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cache.cache_enabled = false;
        config.cache.cache_ttl_seconds = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_round_trip() {
        let path = std::env::temp_dir().join(format!("edusec-config-{}.json", std::process::id()));
        let mut config = EngineConfig::default();
        config.rate_limit.weekly_max = 70;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.rate_limit.weekly_max, 70);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Io(_))));
    }
}
