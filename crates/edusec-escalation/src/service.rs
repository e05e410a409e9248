//! Escalation prevention service
//!
//! Orchestrates the transition policy, risk scoring, rate limiting and
//! approver checks. Every outcome is forwarded to the security event log.
//! Any store failure yields a denial with maximum risk.

use crate::policy::RoleTransitionPolicy;
use crate::scorer::{
    EscalationRiskScorer, RequestContext, RiskAssessment, RiskFactor, MAX_RISK, NOT_PERMITTED_BASELINE,
};
use crate::EscalationConfig;
use chrono::{DateTime, Duration, Utc};
use edusec_audit::{EventContext, SecurityEventLogger, SecurityEventType};
use edusec_common::{
    holds_system_admin, ErrorTracker, RateLimitRecord, Role, RoleAssignment, RoleDirectory, SecurityError,
    StoreResult, SYSTEM_ERROR_REASON,
};
use edusec_ratelimit::{LimitKind, RateLimitResult, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A request to move between roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleTransitionRequest {
    pub id: String,
    pub user_id: String,
    pub from_role: Role,
    pub to_role: Role,
    pub institution_id: String,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl RoleTransitionRequest {
    pub fn new(user_id: &str, from_role: Role, to_role: Role, institution_id: &str) -> Self {
        Self {
            id: edusec_common::new_id(),
            user_id: user_id.to_string(),
            from_role,
            to_role,
            institution_id: institution_id.to_string(),
            department_id: None,
            context: RequestContext::default(),
            created_at: Utc::now(),
        }
    }

    pub fn in_department(mut self, department_id: &str) -> Self {
        self.department_id = Some(department_id.to_string());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    fn event_context(&self) -> EventContext {
        let mut ctx = EventContext::user(&self.user_id)
            .institution(&self.institution_id)
            .ip(self.context.ip_address.as_deref())
            .user_agent(self.context.user_agent.as_deref())
            .session(self.context.session_id.as_deref());
        ctx.department_id = self.department_id.clone();
        ctx
    }
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotPermitted,
    RiskTooHigh,
    RateLimited,
    SystemError,
}

/// Verdict on a role request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub risk_score: u8,
    /// Routed to manual review; independent of `allowed`
    pub requires_approval: bool,
    pub denial: Option<DenialKind>,
    #[serde(default)]
    pub factors: Vec<RiskFactor>,
}

impl EscalationDecision {
    fn system_error(requires_approval: bool) -> Self {
        Self {
            allowed: false,
            reason: Some(SYSTEM_ERROR_REASON.to_string()),
            risk_score: MAX_RISK,
            requires_approval,
            denial: Some(DenialKind::SystemError),
            factors: Vec::new(),
        }
    }
}

/// Verdict on an approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl ApprovalDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of the full submission pipeline
#[derive(Debug, Clone)]
pub struct RoleRequestSubmission {
    pub decision: EscalationDecision,
    pub rate_limit: RateLimitResult,
    /// History row written for an accepted request
    pub record: Option<RateLimitRecord>,
}

/// Service counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EscalationStats {
    pub validations: u64,
    pub denials: u64,
    pub system_errors: u64,
}

#[derive(Debug, Default)]
struct ServiceStats {
    validations: AtomicU64,
    denials: AtomicU64,
    system_errors: AtomicU64,
}

/// Role-escalation gatekeeper
pub struct EscalationPreventionService {
    policy: RoleTransitionPolicy,
    scorer: EscalationRiskScorer,
    directory: RoleDirectory,
    limiter: Arc<RateLimiter>,
    logger: Arc<SecurityEventLogger>,
    errors: Arc<ErrorTracker>,
    config: EscalationConfig,
    stats: ServiceStats,
}

impl EscalationPreventionService {
    pub fn new(
        policy: RoleTransitionPolicy,
        scorer: EscalationRiskScorer,
        directory: RoleDirectory,
        limiter: Arc<RateLimiter>,
        logger: Arc<SecurityEventLogger>,
        errors: Arc<ErrorTracker>,
        config: EscalationConfig,
    ) -> Self {
        let missing = policy.missing_entries();
        if !missing.is_empty() {
            tracing::error!(?missing, "transition policy has no entry for some roles; they will be denied");
        }
        Self {
            policy,
            scorer,
            directory,
            limiter,
            logger,
            errors,
            config,
            stats: ServiceStats::default(),
        }
    }

    pub fn policy(&self) -> &RoleTransitionPolicy {
        &self.policy
    }

    /// Targets above the self-service tier go to manual review
    pub fn requires_approval(&self, to_role: Role) -> bool {
        to_role > self.config.self_service_max_role
    }

    /// Allow/deny verdict with risk score. Never allows on internal failure.
    pub async fn validate_role_request(&self, request: &RoleTransitionRequest) -> EscalationDecision {
        self.stats.validations.fetch_add(1, Ordering::Relaxed);
        let decision = match self.evaluate(request).await {
            Ok(decision) => decision,
            Err(e) => {
                self.fail(request, "validate_role_request", SecurityError::from(e)).await
            }
        };
        if !decision.allowed {
            self.stats.denials.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                user_id = %request.user_id,
                from = %request.from_role,
                to = %request.to_role,
                risk = decision.risk_score,
                reason = ?decision.reason,
                "role request denied"
            );
        }
        decision
    }

    async fn evaluate(&self, request: &RoleTransitionRequest) -> StoreResult<EscalationDecision> {
        let requires_approval = self.requires_approval(request.to_role);
        let system_admin = self.directory.is_system_admin(&request.user_id).await?;

        let assessment = if system_admin {
            RiskAssessment::default()
        } else {
            let window = Duration::hours(self.config.frequency_window_hours as i64);
            let recent = self.limiter.recent_request_count(&request.user_id, window).await?;
            self.scorer
                .score(request.from_role, request.to_role, &request.context, recent)
        };

        let Some(_rule) = self.policy.lookup(request.from_role, request.to_role) else {
            return Ok(EscalationDecision {
                allowed: false,
                reason: Some(format!(
                    "Role transition {} -> {} is not permitted",
                    request.from_role, request.to_role
                )),
                risk_score: assessment.score.max(NOT_PERMITTED_BASELINE),
                requires_approval,
                denial: Some(DenialKind::NotPermitted),
                factors: assessment.factors,
            });
        };

        // system admins skip scoring, not the transition table
        if !system_admin && assessment.score > self.config.hard_block_threshold {
            return Ok(EscalationDecision {
                allowed: false,
                reason: Some(format!(
                    "Risk score {} exceeds threshold {}",
                    assessment.score, self.config.hard_block_threshold
                )),
                risk_score: assessment.score,
                requires_approval,
                denial: Some(DenialKind::RiskTooHigh),
                factors: assessment.factors,
            });
        }

        Ok(EscalationDecision {
            allowed: true,
            reason: None,
            risk_score: assessment.score,
            requires_approval,
            denial: None,
            factors: assessment.factors,
        })
    }

    async fn fail(&self, request: &RoleTransitionRequest, operation: &str, err: SecurityError) -> EscalationDecision {
        self.stats.system_errors.fetch_add(1, Ordering::Relaxed);
        self.errors.record(&err, operation);
        self.logger
            .log_system_error(operation, &err, request.event_context())
            .await;
        EscalationDecision::system_error(self.requires_approval(request.to_role))
    }

    /// Whether `approver_id` may act on `request`. Self-approval is always refused.
    pub async fn validate_approver_permission(
        &self,
        approver_id: &str,
        request: &RoleTransitionRequest,
    ) -> ApprovalDecision {
        if approver_id == request.user_id {
            tracing::warn!(user_id = %approver_id, request_id = %request.id, "self-approval attempt");
            self.logger
                .log_security_event(
                    SecurityEventType::SelfApprovalAttempt,
                    "approver attempted to approve own role request",
                    json!({ "request_id": request.id, "requested_role": request.to_role }),
                    request.event_context(),
                )
                .await;
            return ApprovalDecision::deny("Users cannot approve their own role requests");
        }

        let assignments = match self.directory.active_assignments(approver_id).await {
            Ok(assignments) => assignments,
            Err(e) => {
                let err = SecurityError::from(e);
                self.errors.record(&err, "validate_approver_permission");
                self.logger
                    .log_system_error(
                        "validate_approver_permission",
                        &err,
                        EventContext::user(approver_id).institution(&request.institution_id),
                    )
                    .await;
                return ApprovalDecision::deny(SYSTEM_ERROR_REASON);
            }
        };

        if holds_system_admin(&assignments) {
            return ApprovalDecision::allow();
        }

        let in_scope: Vec<&RoleAssignment> = assignments
            .iter()
            .filter(|a| a.role.is_admin() && approver_covers(a, &request.institution_id, request.department_id.as_deref()))
            .collect();

        if in_scope.is_empty() {
            self.logger
                .log_security_event(
                    SecurityEventType::UnauthorizedAccessAttempt,
                    "approver lacks administrative scope",
                    json!({ "request_id": request.id, "requested_role": request.to_role }),
                    EventContext::user(approver_id)
                        .target(&request.user_id)
                        .institution(&request.institution_id),
                )
                .await;
            return ApprovalDecision::deny("Approver has no administrative role covering this institution");
        }

        if in_scope.iter().any(|a| a.role > request.to_role) {
            ApprovalDecision::allow()
        } else {
            ApprovalDecision::deny(format!(
                "Approver role must outrank the requested role {}",
                request.to_role
            ))
        }
    }

    /// Forward an outcome to the security event log
    pub async fn log_escalation_attempt(&self, request: &RoleTransitionRequest, decision: &EscalationDecision) {
        let event_type = match (decision.allowed, decision.denial) {
            (true, _) => SecurityEventType::RoleRequestCreated,
            (false, Some(DenialKind::NotPermitted)) => SecurityEventType::InvalidRoleTransition,
            (false, _) => SecurityEventType::RoleRequestDenied,
        };
        let description = match &decision.reason {
            Some(reason) => format!("{} -> {}: {}", request.from_role, request.to_role, reason),
            None => format!("{} -> {}", request.from_role, request.to_role),
        };
        self.logger
            .log_security_event(
                event_type,
                description,
                json!({
                    "request_id": request.id,
                    "current_role": request.from_role,
                    "requested_role": request.to_role,
                    "allowed": decision.allowed,
                    "risk_score": decision.risk_score,
                    "requires_approval": decision.requires_approval,
                    "denial": decision.denial,
                    "factors": decision.factors,
                }),
                request.event_context(),
            )
            .await;
    }

    /// Rate-limit, validate, record and log a role request
    pub async fn submit_role_request(&self, request: &RoleTransitionRequest) -> RoleRequestSubmission {
        let rate_limit = self
            .limiter
            .check_rate_limit(
                &request.user_id,
                request.to_role,
                &request.institution_id,
                request.context.ip_address.as_deref(),
            )
            .await;
        let mut record = None;

        let decision = if rate_limit.allowed {
            let mut decision = self.validate_role_request(request).await;
            if decision.allowed {
                match self
                    .limiter
                    .record_request(
                        &request.user_id,
                        request.to_role,
                        &request.institution_id,
                        request.context.ip_address.as_deref(),
                    )
                    .await
                {
                    Ok(row) => record = Some(row),
                    Err(e) => decision = self.fail(request, "submit_role_request", e).await,
                }
            }
            decision
        } else {
            self.rate_limited(request, &rate_limit)
        };

        self.log_escalation_attempt(request, &decision).await;
        RoleRequestSubmission {
            decision,
            rate_limit,
            record,
        }
    }

    /// Denial carrying the limiter's verdict. The limiter has already logged its own failure.
    fn rate_limited(&self, request: &RoleTransitionRequest, limit: &RateLimitResult) -> EscalationDecision {
        self.stats.denials.fetch_add(1, Ordering::Relaxed);
        let requires_approval = self.requires_approval(request.to_role);
        if limit.limited_by == Some(LimitKind::SystemError) {
            self.stats.system_errors.fetch_add(1, Ordering::Relaxed);
            return EscalationDecision::system_error(requires_approval);
        }
        let assessment = self
            .scorer
            .score(request.from_role, request.to_role, &request.context, 0);
        tracing::warn!(
            user_id = %request.user_id,
            to = %request.to_role,
            reason = ?limit.reason,
            "role request rate limited"
        );
        EscalationDecision {
            allowed: false,
            reason: limit.reason.clone(),
            risk_score: assessment.score,
            requires_approval,
            denial: Some(DenialKind::RateLimited),
            factors: assessment.factors,
        }
    }

    pub fn stats(&self) -> EscalationStats {
        EscalationStats {
            validations: self.stats.validations.load(Ordering::Relaxed),
            denials: self.stats.denials.load(Ordering::Relaxed),
            system_errors: self.stats.system_errors.load(Ordering::Relaxed),
        }
    }
}

/// Scope check for approvers; department-scoped admins only cover their department
fn approver_covers(assignment: &RoleAssignment, institution_id: &str, department_id: Option<&str>) -> bool {
    if assignment.institution_id != institution_id {
        return false;
    }
    match (assignment.department_id.as_deref(), department_id) {
        (None, _) => true,
        (Some(own), Some(wanted)) => own == wanted,
        (Some(_), None) => false,
    }
}
