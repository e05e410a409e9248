//! Role directory over the record store

use crate::error::StoreResult;
use crate::records::{AssignmentStatus, RoleAssignment};
use crate::role::Role;
use crate::store::{Query, RecordStore, Table};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// Resolves role assignments for users
#[derive(Clone)]
pub struct RoleDirectory {
    store: Arc<dyn RecordStore>,
}

impl RoleDirectory {
    /// Create directory over a store
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Active, unexpired assignments of a user. One store round-trip.
    pub async fn active_assignments(&self, user_id: &str) -> StoreResult<Vec<RoleAssignment>> {
        let query = Query::table(Table::RoleAssignments)
            .eq("user_id", user_id)
            .eq("status", AssignmentStatus::Active.as_str());
        let now = Utc::now();
        Ok(self
            .store
            .fetch::<RoleAssignment>(&query)
            .await?
            .into_iter()
            .filter(|a| a.is_active_at(now))
            .collect())
    }

    /// Whether the user holds an active system-admin assignment
    pub async fn is_system_admin(&self, user_id: &str) -> StoreResult<bool> {
        let assignments = self.active_assignments(user_id).await?;
        Ok(holds_system_admin(&assignments))
    }

    /// Highest active role of a user within an institution
    pub async fn highest_role(&self, user_id: &str, institution_id: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .active_assignments(user_id)
            .await?
            .iter()
            .filter(|a| a.covers(Some(institution_id), None))
            .map(|a| a.role)
            .max())
    }

    /// Create or replace an assignment (keyed by id)
    pub async fn save(&self, assignment: &RoleAssignment) -> StoreResult<()> {
        self.store
            .upsert_records(&["id"], std::slice::from_ref(assignment))
            .await
    }

    /// Revoke every active assignment of `role` for a user in an institution
    pub async fn revoke(&self, user_id: &str, role: Role, institution_id: &str) -> StoreResult<usize> {
        let query = Query::table(Table::RoleAssignments)
            .eq("user_id", user_id)
            .eq("role", role.as_str())
            .eq("institution_id", institution_id)
            .eq("status", AssignmentStatus::Active.as_str());
        self.store
            .update(&query, json!({ "status": AssignmentStatus::Revoked.as_str() }))
            .await
    }
}

/// Whether any assignment in the set is a system-admin grant
pub fn holds_system_admin(assignments: &[RoleAssignment]) -> bool {
    assignments.iter().any(|a| a.role == Role::SystemAdmin)
}
