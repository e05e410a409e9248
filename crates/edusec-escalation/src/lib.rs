//! EduSec Escalation Prevention
//!
//! Decides whether a user may move from one role to another:
//! - Static transition policy, deny by default
//! - Additive 0-100 risk score (tier skip, origin, agent, frequency)
//! - Hard block above a risk threshold
//! - Self-approval refused unconditionally
//! - Fail-closed: any store error is a maximum-risk denial

#![warn(clippy::all)]

pub mod heuristics;
pub mod policy;
pub mod scorer;
pub mod service;

pub use heuristics::{DefaultHeuristics, ThreatHeuristics};
pub use policy::{RoleTransitionPolicy, TransitionRule};
pub use scorer::{EscalationRiskScorer, RequestContext, RiskAssessment, RiskFactor};
pub use service::{
    ApprovalDecision, DenialKind, EscalationDecision, EscalationPreventionService, EscalationStats,
    RoleRequestSubmission, RoleTransitionRequest,
};

use edusec_common::Role;
use serde::{Deserialize, Serialize};

/// Escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EscalationConfig {
    /// Scores above this are denied even when the policy permits
    pub hard_block_threshold: u8,
    /// Highest role reachable without manual review
    pub self_service_max_role: Role,
    /// Trailing window for the frequency component
    pub frequency_window_hours: u32,
    /// Requests in the window before frequency adds risk
    pub frequency_baseline: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            hard_block_threshold: 70,
            self_service_max_role: Role::Student,
            frequency_window_hours: 24,
            frequency_baseline: 3,
        }
    }
}
