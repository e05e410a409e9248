//! Engine wiring
//!
//! One store, one error tracker and one event logger per process, shared by
//! every service. The logger's flusher runs from `start` until `shutdown`.

use crate::config::EngineConfig;
use edusec_audit::{LoggerStats, SecurityEventLogger};
use edusec_authz::{BulkPermissionService, CheckerStats, PermissionChecker, PermissionTable};
use edusec_common::{ErrorStatistics, ErrorTracker, RecordStore, Role, RoleDirectory, SecurityResult};
use edusec_escalation::{
    DefaultHeuristics, EscalationPreventionService, EscalationRiskScorer, EscalationStats, RoleTransitionPolicy,
    ThreatHeuristics,
};
use edusec_ratelimit::{RateLimiter, RateLimiterStats};
use serde::Serialize;
use std::sync::Arc;

/// Roles missing from the static tables. Missing roles are denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableGaps {
    pub transition_policy: Vec<Role>,
    pub permission_table: Vec<Role>,
}

impl TableGaps {
    pub fn is_empty(&self) -> bool {
        self.transition_policy.is_empty() && self.permission_table.is_empty()
    }
}

/// Counters of every component
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub rate_limiter: RateLimiterStats,
    pub escalation: EscalationStats,
    pub permissions: CheckerStats,
    pub events: LoggerStats,
    pub errors: ErrorStatistics,
}

/// Role-security engine
pub struct SecurityEngine {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    errors: Arc<ErrorTracker>,
    logger: Arc<SecurityEventLogger>,
    limiter: Arc<RateLimiter>,
    escalation: Arc<EscalationPreventionService>,
    permissions: Arc<PermissionChecker>,
    bulk: Arc<BulkPermissionService>,
    gaps: TableGaps,
}

impl SecurityEngine {
    /// Engine with the standard policy, permission table and heuristics
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> SecurityResult<Self> {
        let heuristics: Arc<dyn ThreatHeuristics> = Arc::new(DefaultHeuristics::new()?);
        Self::with_tables(
            store,
            config,
            RoleTransitionPolicy::standard(),
            PermissionTable::standard(),
            heuristics,
        )
    }

    pub fn with_tables(
        store: Arc<dyn RecordStore>,
        config: EngineConfig,
        policy: RoleTransitionPolicy,
        table: PermissionTable,
        heuristics: Arc<dyn ThreatHeuristics>,
    ) -> SecurityResult<Self> {
        config.validate()?;

        let gaps = TableGaps {
            transition_policy: policy.missing_entries(),
            permission_table: table.missing_entries(),
        };
        if !gaps.permission_table.is_empty() {
            tracing::error!(
                missing = ?gaps.permission_table,
                "permission table has no entry for some roles; they will be denied"
            );
        }

        let errors = Arc::new(ErrorTracker::new());
        let logger = Arc::new(SecurityEventLogger::new(Arc::clone(&store), config.events.clone()));
        let directory = RoleDirectory::new(Arc::clone(&store));

        let limiter = Arc::new(RateLimiter::new(
            Arc::clone(&store),
            Arc::clone(&logger),
            Arc::clone(&errors),
            config.rate_limit.clone(),
        ));
        let scorer = EscalationRiskScorer::new(heuristics, config.escalation.frequency_baseline);
        let escalation = Arc::new(EscalationPreventionService::new(
            policy,
            scorer,
            directory.clone(),
            Arc::clone(&limiter),
            Arc::clone(&logger),
            Arc::clone(&errors),
            config.escalation.clone(),
        ));
        let permissions = Arc::new(PermissionChecker::new(
            directory,
            table,
            Arc::clone(&logger),
            Arc::clone(&errors),
            config.cache.clone(),
        ));
        let bulk = Arc::new(BulkPermissionService::new(Arc::clone(&permissions)));

        Ok(Self {
            config,
            store,
            errors,
            logger,
            limiter,
            escalation,
            permissions,
            bulk,
            gaps,
        })
    }

    /// Spawn the event flusher. Needs a tokio runtime.
    pub fn start(&self) {
        self.logger.start();
        tracing::info!(
            hourly_max = self.config.rate_limit.hourly_max,
            cache_enabled = self.config.cache.cache_enabled,
            hard_block_threshold = self.config.escalation.hard_block_threshold,
            "security engine started"
        );
    }

    /// Stop the flusher and persist every buffered event and alert
    pub async fn shutdown(&self) -> SecurityResult<usize> {
        let flushed = self.logger.shutdown().await?;
        tracing::info!(flushed, "security engine stopped");
        Ok(flushed)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn escalation(&self) -> &Arc<EscalationPreventionService> {
        &self.escalation
    }

    pub fn permissions(&self) -> &Arc<PermissionChecker> {
        &self.permissions
    }

    pub fn bulk_permissions(&self) -> &Arc<BulkPermissionService> {
        &self.bulk
    }

    pub fn events(&self) -> &Arc<SecurityEventLogger> {
        &self.logger
    }

    pub fn table_gaps(&self) -> &TableGaps {
        &self.gaps
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            rate_limiter: self.limiter.stats(),
            escalation: self.escalation.stats(),
            permissions: self.permissions.stats(),
            events: self.logger.stats(),
            errors: self.errors.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edusec_audit::{AlertFilter, EventFilter, SecurityEventType};
    use edusec_authz::{Permission, PermissionContext};
    use edusec_common::{InMemoryRecordStore, RoleAssignment, Table};
    use edusec_escalation::{RequestContext, RoleTransitionRequest};
    use std::collections::HashMap;

    fn engine() -> (Arc<InMemoryRecordStore>, SecurityEngine) {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = SecurityEngine::new(store.clone(), EngineConfig::default()).unwrap();
        (store, engine)
    }

    async fn institution_admin(engine: &SecurityEngine) {
        RoleDirectory::new(Arc::clone(engine.store()))
            .save(&RoleAssignment::new("ia", Role::InstitutionAdmin, "i1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_student_requests() {
        let (_, engine) = engine();
        institution_admin(&engine).await;
        engine
            .permissions()
            .assign_role(RoleAssignment::new("u1", Role::Student, "i1"), "ia")
            .await
            .unwrap();

        let teacher = RoleTransitionRequest::new("u1", Role::Student, Role::Teacher, "i1");
        let decision = engine.escalation().validate_role_request(&teacher).await;
        assert!(decision.allowed);
        assert!(decision.requires_approval);
        assert!(decision.risk_score < 30);

        let admin = RoleTransitionRequest::new("u1", Role::Student, Role::SystemAdmin, "i1");
        let decision = engine.escalation().validate_role_request(&admin).await;
        assert!(!decision.allowed);
        assert!(decision.risk_score >= 60);
    }

    #[tokio::test]
    async fn test_block_then_check() {
        let (_, engine) = engine();
        engine
            .rate_limiter()
            .block_user("u1", "admin", "abuse", Some(24))
            .await
            .unwrap();
        let result = engine
            .rate_limiter()
            .check_rate_limit("u1", Role::Teacher, "i1", None)
            .await;
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn test_escalation_attempt_raises_alert() {
        let (_, engine) = engine();
        let request = RoleTransitionRequest::new("u1", Role::Student, Role::SystemAdmin, "i1").with_context(
            RequestContext {
                ip_address: Some("10.0.0.5".into()),
                user_agent: Some("python-requests/2.31".into()),
                session_id: None,
            },
        );
        let decision = engine.escalation().validate_role_request(&request).await;
        engine.escalation().log_escalation_attempt(&request, &decision).await;

        let alerts = engine
            .events()
            .get_security_alerts(&AlertFilter::open())
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "PRIVILEGE_ESCALATION_ATTEMPT");
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffer() {
        let (store, engine) = engine();
        engine.start();
        institution_admin(&engine).await;
        engine
            .permissions()
            .assign_role(RoleAssignment::new("t1", Role::Teacher, "i1"), "ia")
            .await
            .unwrap();
        assert!(
            engine
                .permissions()
                .has_permission("t1", Permission::GradesEdit, &PermissionContext::institution("i1"))
                .await
        );

        let flushed = engine.shutdown().await.unwrap();
        assert!(flushed >= 1);
        assert_eq!(engine.stats().events.pending_events, 0);
        assert!(store.row_count(Table::SecurityEvents) >= 1);

        let assigned = engine
            .events()
            .get_security_events(&EventFilter::of_type(SecurityEventType::RoleAssigned))
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
    }

    #[test]
    fn test_table_gaps_are_reported() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let engine = SecurityEngine::with_tables(
            store,
            EngineConfig::default(),
            RoleTransitionPolicy::from_rules(&[]),
            PermissionTable::from_grants(HashMap::new()),
            Arc::new(DefaultHeuristics::new().unwrap()),
        )
        .unwrap();
        assert_eq!(engine.table_gaps().permission_table.len(), 5);
        assert_eq!(engine.table_gaps().transition_policy.len(), 5);
        assert!(!engine.table_gaps().is_empty());

        // gaps deny at runtime
        let granted = tokio_test::block_on(async {
            RoleDirectory::new(Arc::clone(engine.store()))
                .save(&RoleAssignment::new("t1", Role::Teacher, "i1"))
                .await
                .unwrap();
            engine
                .permissions()
                .has_permission("t1", Permission::CoursesView, &PermissionContext::institution("i1"))
                .await
        });
        assert!(!granted);
        let request = RoleTransitionRequest::new("t1", Role::Teacher, Role::Student, "i1");
        let decision = tokio_test::block_on(engine.escalation().validate_role_request(&request));
        assert!(!decision.allowed);
        assert!(SecurityEngine::new(Arc::new(InMemoryRecordStore::new()), EngineConfig::default())
            .unwrap()
            .table_gaps()
            .is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.rate_limit.hourly_max = 0;
        assert!(SecurityEngine::new(Arc::new(InMemoryRecordStore::new()), config).is_err());
    }
}
