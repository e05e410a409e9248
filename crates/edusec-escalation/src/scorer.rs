//! Escalation risk scoring

use crate::heuristics::ThreatHeuristics;
use edusec_common::Role;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Points per privilege tier skipped upward
pub const TIER_WEIGHT: u32 = 10;
/// Loopback / private / reserved origin
pub const SUSPICIOUS_IP_WEIGHT: u32 = 25;
/// CLI, script or crawler user agent
pub const AUTOMATED_AGENT_WEIGHT: u32 = 20;
/// Points per recent request above the frequency baseline
pub const FREQUENCY_STEP: u32 = 5;
/// Cap on the frequency component
pub const FREQUENCY_CAP: u32 = 25;
/// Floor for transitions the policy does not permit
pub const NOT_PERMITTED_BASELINE: u8 = 80;
/// Score for any decision that failed internally
pub const MAX_RISK: u8 = 100;

/// Request metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

/// One contribution to a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "factor", content = "points")]
pub enum RiskFactor {
    TierSkip(u32),
    SuspiciousIp(u32),
    AutomatedAgent(u32),
    RequestFrequency(u32),
}

impl RiskFactor {
    pub fn points(self) -> u32 {
        match self {
            RiskFactor::TierSkip(p)
            | RiskFactor::SuspiciousIp(p)
            | RiskFactor::AutomatedAgent(p)
            | RiskFactor::RequestFrequency(p) => p,
        }
    }
}

/// Score with its breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-100
    pub score: u8,
    pub factors: Vec<RiskFactor>,
}

/// Turns request context into a 0-100 risk score
pub struct EscalationRiskScorer {
    heuristics: Arc<dyn ThreatHeuristics>,
    frequency_baseline: u32,
}

impl EscalationRiskScorer {
    pub fn new(heuristics: Arc<dyn ThreatHeuristics>, frequency_baseline: u32) -> Self {
        Self { heuristics, frequency_baseline }
    }

    /// Score a transition. `recent_requests` comes from rate-limit history.
    pub fn score(&self, from: Role, to: Role, context: &RequestContext, recent_requests: usize) -> RiskAssessment {
        let mut factors = Vec::new();

        let tiers = from.tiers_to(to) as u32;
        if tiers > 0 {
            factors.push(RiskFactor::TierSkip(tiers * TIER_WEIGHT));
        }

        if let Some(ip) = context.ip_address.as_deref() {
            if self.heuristics.is_suspicious_ip(ip) {
                factors.push(RiskFactor::SuspiciousIp(SUSPICIOUS_IP_WEIGHT));
            }
        }

        if let Some(agent) = context.user_agent.as_deref() {
            if self.heuristics.is_automated_agent(agent) {
                factors.push(RiskFactor::AutomatedAgent(AUTOMATED_AGENT_WEIGHT));
            }
        }

        let excess = u32::try_from(recent_requests)
            .unwrap_or(u32::MAX)
            .saturating_sub(self.frequency_baseline);
        if excess > 0 {
            factors.push(RiskFactor::RequestFrequency(
                excess.saturating_mul(FREQUENCY_STEP).min(FREQUENCY_CAP),
            ));
        }

        let total: u32 = factors.iter().map(|f| f.points()).sum();
        RiskAssessment {
            score: total.min(MAX_RISK as u32) as u8,
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::DefaultHeuristics;
    use proptest::prelude::*;

    fn scorer() -> EscalationRiskScorer {
        EscalationRiskScorer::new(Arc::new(DefaultHeuristics::new().unwrap()), 3)
    }

    #[test]
    fn test_tier_component() {
        let s = scorer();
        let ctx = RequestContext::default();
        assert_eq!(s.score(Role::Student, Role::Teacher, &ctx, 0).score, 10);
        assert_eq!(s.score(Role::Student, Role::SystemAdmin, &ctx, 0).score, 40);
        assert_eq!(s.score(Role::InstitutionAdmin, Role::Student, &ctx, 0).score, 0);
    }

    #[test]
    fn test_context_components() {
        let s = scorer();
        let ctx = RequestContext {
            ip_address: Some("127.0.0.1".into()),
            user_agent: Some("curl/8.0".into()),
            session_id: None,
        };
        let assessment = s.score(Role::Student, Role::Teacher, &ctx, 5);
        assert_eq!(assessment.score, 10 + 25 + 20 + 10);
        assert_eq!(assessment.factors.len(), 4);
    }

    #[test]
    fn test_frequency_is_capped() {
        let s = scorer();
        let assessment = s.score(Role::Teacher, Role::Student, &RequestContext::default(), 500);
        assert_eq!(assessment.factors, vec![RiskFactor::RequestFrequency(FREQUENCY_CAP)]);
    }

    #[test]
    fn test_counts_beyond_u32_stay_capped() {
        let s = scorer();
        let huge = usize::try_from(u64::from(u32::MAX) + 3).unwrap_or(usize::MAX);
        for recent in [huge, usize::MAX] {
            let assessment = s.score(Role::Teacher, Role::Student, &RequestContext::default(), recent);
            assert_eq!(assessment.factors, vec![RiskFactor::RequestFrequency(FREQUENCY_CAP)]);
        }
    }

    proptest! {
        #[test]
        fn prop_score_is_bounded(
            from in 0usize..5,
            to in 0usize..5,
            ip in prop::option::of("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}"),
            agent in prop::option::of(".{0,40}"),
            recent in 0usize..1000,
        ) {
            let ctx = RequestContext { ip_address: ip, user_agent: agent, session_id: None };
            let score = scorer().score(Role::ALL[from], Role::ALL[to], &ctx, recent).score;
            prop_assert!(score <= 100);
        }

        #[test]
        fn prop_higher_target_scores_higher(recent in 0usize..20) {
            let s = scorer();
            let ctx = RequestContext::default();
            let teacher = s.score(Role::Student, Role::Teacher, &ctx, recent).score;
            let admin = s.score(Role::Student, Role::SystemAdmin, &ctx, recent).score;
            prop_assert!(teacher < admin);
        }
    }
}
