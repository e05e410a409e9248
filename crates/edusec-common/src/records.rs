//! Typed record shapes shared across components
//!
//! Timestamps are stored as epoch milliseconds so range filters compare
//! numerically in any store.

use crate::role::Role;
use crate::store::{Record, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a role assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// In force
    Active,
    /// Awaiting approval
    Pending,
    /// Temporarily disabled
    Suspended,
    /// Withdrawn
    Revoked,
}

impl AssignmentStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Suspended => "suspended",
            AssignmentStatus::Revoked => "revoked",
        }
    }
}

/// Per-assignment restrictions applied after role expansion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentConditions {
    /// Permission wire names this assignment must not grant
    #[serde(default)]
    pub denied_permissions: Vec<String>,
    /// Grant only when the checked resource belongs to the user
    #[serde(default)]
    pub own_resources_only: bool,
}

/// A user's role within an institution (and optionally a department)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Row id
    pub id: String,
    /// Holder
    pub user_id: String,
    /// Granted role
    pub role: Role,
    /// Institution scope
    pub institution_id: String,
    /// Department scope, if narrower than the institution
    #[serde(default)]
    pub department_id: Option<String>,
    /// Lifecycle state
    pub status: AssignmentStatus,
    /// When granted
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub assigned_at: DateTime<Utc>,
    /// Optional expiry
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granting actor
    #[serde(default)]
    pub assigned_by: Option<String>,
    /// Restrictions
    #[serde(default)]
    pub conditions: AssignmentConditions,
}

impl Record for RoleAssignment {
    const TABLE: Table = Table::RoleAssignments;
}

impl RoleAssignment {
    /// Active, institution-wide assignment starting now
    pub fn new(user_id: &str, role: Role, institution_id: &str) -> Self {
        Self {
            id: crate::new_id(),
            user_id: user_id.to_string(),
            role,
            institution_id: institution_id.to_string(),
            department_id: None,
            status: AssignmentStatus::Active,
            assigned_at: Utc::now(),
            expires_at: None,
            assigned_by: None,
            conditions: AssignmentConditions::default(),
        }
    }

    /// Narrow to a department
    pub fn with_department(mut self, department_id: &str) -> Self {
        self.department_id = Some(department_id.to_string());
        self
    }

    /// Set expiry
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Record granting actor
    pub fn assigned_by(mut self, actor: &str) -> Self {
        self.assigned_by = Some(actor.to_string());
        self
    }

    /// Attach restrictions
    pub fn with_conditions(mut self, conditions: AssignmentConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Active and not expired at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AssignmentStatus::Active && self.expires_at.map_or(true, |e| e > now)
    }

    /// Whether this assignment applies to the given institution / department.
    ///
    /// Institution-wide assignments cover every department of the institution.
    pub fn covers(&self, institution_id: Option<&str>, department_id: Option<&str>) -> bool {
        if self.role == Role::SystemAdmin {
            return true;
        }
        if let Some(inst) = institution_id {
            if self.institution_id != inst {
                return false;
            }
        }
        match (department_id, self.department_id.as_deref()) {
            (Some(wanted), Some(own)) => wanted == own,
            _ => true,
        }
    }
}

/// One role-change request, as seen by the rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Row id
    pub id: String,
    /// Requesting user
    pub user_id: String,
    /// Client address, when known
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Requested role
    pub requested_role: Role,
    /// Institution of the request
    pub institution_id: String,
    /// When the request was made
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Record for RateLimitRecord {
    const TABLE: Table = Table::RateLimitHistory;
}

impl RateLimitRecord {
    /// Record made now
    pub fn new(user_id: &str, requested_role: Role, institution_id: &str, ip_address: Option<&str>) -> Self {
        Self {
            id: crate::new_id(),
            user_id: user_id.to_string(),
            ip_address: ip_address.map(str::to_string),
            requested_role,
            institution_id: institution_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Backdate the record
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Explicit user block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Blocked user
    pub user_id: String,
    /// Block end
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub blocked_until: DateTime<Utc>,
    /// Why
    pub reason: String,
    /// Acting administrator
    pub blocked_by: String,
    /// When the block was placed
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Record for BlockRecord {
    const TABLE: Table = Table::RateLimitBlocks;
}

impl BlockRecord {
    /// Block still in force at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until > now
    }
}

/// Reset boundary: history older than `reset_at` is ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitReset {
    /// Reset user
    pub user_id: String,
    /// Boundary
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub reset_at: DateTime<Utc>,
    /// Acting administrator
    pub reset_by: String,
}

impl Record for RateLimitReset {
    const TABLE: Table = Table::RateLimitResets;
}
