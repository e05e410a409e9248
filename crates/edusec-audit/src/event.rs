//! Security event taxonomy
//!
//! Every event type belongs to exactly one category and carries a fixed
//! severity. Severity is looked up, never computed from event contents.

use chrono::{DateTime, Utc};
use edusec_common::{Record, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Contribution of one event to a subject's risk ranking
    pub fn weight(self) -> u64 {
        match self {
            Severity::Info => 1,
            Severity::Low => 2,
            Severity::Medium => 5,
            Severity::High => 10,
            Severity::Critical => 25,
        }
    }

    /// This severity and everything above it
    pub fn at_least(self) -> impl Iterator<Item = Severity> {
        Severity::ALL.into_iter().filter(move |s| *s >= self)
    }
}

/// Event grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Authentication,
    RoleRequest,
    RoleAssignment,
    SuspiciousActivity,
    SecurityViolation,
    Administrative,
    System,
}

/// Fixed event taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    // Authentication
    LoginSuccess,
    LoginFailure,
    Logout,
    PasswordChanged,
    MfaEnabled,
    MfaDisabled,
    SessionExpired,

    // Role request lifecycle
    RoleRequestCreated,
    RoleRequestApproved,
    RoleRequestDenied,
    RoleRequestCancelled,
    RoleRequestExpired,

    // Role assignment lifecycle
    RoleAssigned,
    RoleRevoked,
    RoleExpired,
    RoleModified,

    // Suspicious activity
    SuspiciousPatternDetected,
    PrivilegeEscalationAttempt,
    UnusualAccessLocation,
    MultipleFailedAttempts,
    RateLimitExceeded,
    BurstActivityDetected,

    // Security violations
    UnauthorizedAccessAttempt,
    PermissionDenied,
    SelfApprovalAttempt,
    InvalidRoleTransition,
    CrossInstitutionAccess,

    // Administrative
    AdminActionPerformed,
    UserBlocked,
    UserUnblocked,
    RateLimitReset,
    BulkRoleChange,
    EmergencyAccessGranted,

    // System
    SystemError,
    ConfigurationChanged,
    SecurityPolicyUpdated,
    PermissionCacheCleared,
}

impl SecurityEventType {
    /// Wire name, identical to the serde representation
    pub fn as_str(self) -> &'static str {
        use SecurityEventType::*;
        match self {
            LoginSuccess => "LOGIN_SUCCESS",
            LoginFailure => "LOGIN_FAILURE",
            Logout => "LOGOUT",
            PasswordChanged => "PASSWORD_CHANGED",
            MfaEnabled => "MFA_ENABLED",
            MfaDisabled => "MFA_DISABLED",
            SessionExpired => "SESSION_EXPIRED",
            RoleRequestCreated => "ROLE_REQUEST_CREATED",
            RoleRequestApproved => "ROLE_REQUEST_APPROVED",
            RoleRequestDenied => "ROLE_REQUEST_DENIED",
            RoleRequestCancelled => "ROLE_REQUEST_CANCELLED",
            RoleRequestExpired => "ROLE_REQUEST_EXPIRED",
            RoleAssigned => "ROLE_ASSIGNED",
            RoleRevoked => "ROLE_REVOKED",
            RoleExpired => "ROLE_EXPIRED",
            RoleModified => "ROLE_MODIFIED",
            SuspiciousPatternDetected => "SUSPICIOUS_PATTERN_DETECTED",
            PrivilegeEscalationAttempt => "PRIVILEGE_ESCALATION_ATTEMPT",
            UnusualAccessLocation => "UNUSUAL_ACCESS_LOCATION",
            MultipleFailedAttempts => "MULTIPLE_FAILED_ATTEMPTS",
            RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            BurstActivityDetected => "BURST_ACTIVITY_DETECTED",
            UnauthorizedAccessAttempt => "UNAUTHORIZED_ACCESS_ATTEMPT",
            PermissionDenied => "PERMISSION_DENIED",
            SelfApprovalAttempt => "SELF_APPROVAL_ATTEMPT",
            InvalidRoleTransition => "INVALID_ROLE_TRANSITION",
            CrossInstitutionAccess => "CROSS_INSTITUTION_ACCESS",
            AdminActionPerformed => "ADMIN_ACTION_PERFORMED",
            UserBlocked => "USER_BLOCKED",
            UserUnblocked => "USER_UNBLOCKED",
            RateLimitReset => "RATE_LIMIT_RESET",
            BulkRoleChange => "BULK_ROLE_CHANGE",
            EmergencyAccessGranted => "EMERGENCY_ACCESS_GRANTED",
            SystemError => "SYSTEM_ERROR",
            ConfigurationChanged => "CONFIGURATION_CHANGED",
            SecurityPolicyUpdated => "SECURITY_POLICY_UPDATED",
            PermissionCacheCleared => "PERMISSION_CACHE_CLEARED",
        }
    }

    pub fn category(self) -> EventCategory {
        use SecurityEventType::*;
        match self {
            LoginSuccess | LoginFailure | Logout | PasswordChanged | MfaEnabled | MfaDisabled
            | SessionExpired => EventCategory::Authentication,
            RoleRequestCreated | RoleRequestApproved | RoleRequestDenied | RoleRequestCancelled
            | RoleRequestExpired => EventCategory::RoleRequest,
            RoleAssigned | RoleRevoked | RoleExpired | RoleModified => EventCategory::RoleAssignment,
            SuspiciousPatternDetected | PrivilegeEscalationAttempt | UnusualAccessLocation
            | MultipleFailedAttempts | RateLimitExceeded | BurstActivityDetected => {
                EventCategory::SuspiciousActivity
            }
            UnauthorizedAccessAttempt | PermissionDenied | SelfApprovalAttempt
            | InvalidRoleTransition | CrossInstitutionAccess => EventCategory::SecurityViolation,
            AdminActionPerformed | UserBlocked | UserUnblocked | RateLimitReset | BulkRoleChange
            | EmergencyAccessGranted => EventCategory::Administrative,
            SystemError | ConfigurationChanged | SecurityPolicyUpdated | PermissionCacheCleared => {
                EventCategory::System
            }
        }
    }

    /// Static severity table
    pub fn severity(self) -> Severity {
        use SecurityEventType::*;
        match self {
            LoginSuccess | Logout | SessionExpired | RoleRequestCreated | RoleRequestApproved
            | RoleRequestCancelled | RoleRequestExpired | RoleExpired | PermissionCacheCleared => {
                Severity::Info
            }
            PasswordChanged | MfaEnabled | RoleRequestDenied | RoleAssigned | RoleRevoked
            | RoleModified | AdminActionPerformed | UserUnblocked | RateLimitReset => Severity::Low,
            LoginFailure | MfaDisabled | RateLimitExceeded | BurstActivityDetected
            | PermissionDenied | UnusualAccessLocation | UserBlocked | BulkRoleChange
            | ConfigurationChanged | SecurityPolicyUpdated => Severity::Medium,
            SuspiciousPatternDetected | MultipleFailedAttempts | UnauthorizedAccessAttempt
            | SelfApprovalAttempt | InvalidRoleTransition | CrossInstitutionAccess | SystemError => {
                Severity::High
            }
            PrivilegeEscalationAttempt | EmergencyAccessGranted => Severity::Critical,
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subjects and request metadata attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub user_id: Option<String>,
    pub target_user_id: Option<String>,
    pub institution_id: Option<String>,
    pub department_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl EventContext {
    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn target(mut self, user_id: &str) -> Self {
        self.target_user_id = Some(user_id.to_string());
        self
    }

    pub fn institution(mut self, institution_id: &str) -> Self {
        self.institution_id = Some(institution_id.to_string());
        self
    }

    pub fn department(mut self, department_id: &str) -> Self {
        self.department_id = Some(department_id.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    pub fn user_agent(mut self, agent: Option<&str>) -> Self {
        self.user_agent = agent.map(str::to_string);
        self
    }

    pub fn session(mut self, session: Option<&str>) -> Self {
        self.session_id = session.map(str::to_string);
        self
    }
}

/// Persisted security event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

impl Record for SecurityEvent {
    const TABLE: Table = Table::SecurityEvents;
}

impl SecurityEvent {
    /// Build an event stamped now; severity comes from the type
    pub fn new(event_type: SecurityEventType, description: impl Into<String>, details: Value, context: EventContext) -> Self {
        Self {
            id: edusec_common::new_id(),
            event_type,
            severity: event_type.severity(),
            user_id: context.user_id,
            target_user_id: context.target_user_id,
            institution_id: context.institution_id,
            department_id: context.department_id,
            description: description.into(),
            details,
            ip_address: context.ip_address,
            user_agent: context.user_agent,
            session_id: context.session_id,
            timestamp: Utc::now(),
            resolved: false,
        }
    }

    /// Context carried by this event, for derived events
    pub fn context(&self) -> EventContext {
        EventContext {
            user_id: self.user_id.clone(),
            target_user_id: self.target_user_id.clone(),
            institution_id: self.institution_id.clone(),
            department_id: self.department_id.clone(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            session_id: self.session_id.clone(),
        }
    }

    /// String detail field, if present
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_name_matches_serde() {
        for event_type in [
            SecurityEventType::MfaEnabled,
            SecurityEventType::PrivilegeEscalationAttempt,
            SecurityEventType::RateLimitReset,
            SecurityEventType::PermissionCacheCleared,
        ] {
            let encoded = serde_json::to_value(event_type).unwrap();
            assert_eq!(encoded, json!(event_type.as_str()));
        }
    }

    #[test]
    fn test_severity_table() {
        assert_eq!(SecurityEventType::PrivilegeEscalationAttempt.severity(), Severity::Critical);
        assert_eq!(SecurityEventType::SuspiciousPatternDetected.severity(), Severity::High);
        assert_eq!(SecurityEventType::LoginSuccess.severity(), Severity::Info);
        assert_eq!(SecurityEventType::RoleAssigned.category(), EventCategory::RoleAssignment);
    }

    #[test]
    fn test_event_takes_severity_from_type() {
        let event = SecurityEvent::new(
            SecurityEventType::SelfApprovalAttempt,
            "approver tried own request",
            json!({ "request_id": "r1" }),
            EventContext::user("u1").institution("i1"),
        );
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.detail_str("request_id"), Some("r1"));
        assert_eq!(event.context().institution_id.as_deref(), Some("i1"));
        assert!(!event.resolved);
    }

    #[test]
    fn test_severity_at_least() {
        let high: Vec<_> = Severity::High.at_least().collect();
        assert_eq!(high, vec![Severity::High, Severity::Critical]);
    }
}
