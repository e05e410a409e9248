//! Role transition policy
//!
//! Static table of permitted `from -> to` moves. Any pair missing from the
//! table is denied.

use edusec_common::Role;
use serde::Serialize;
use std::collections::HashMap;

/// One permitted transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionRule {
    pub from: Role,
    pub to: Role,
    /// Routed to manual review rather than applied directly
    pub requires_approval: bool,
}

/// Role -> permitted target roles
#[derive(Debug, Clone)]
pub struct RoleTransitionPolicy {
    table: HashMap<Role, HashMap<Role, bool>>,
}

impl Default for RoleTransitionPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RoleTransitionPolicy {
    /// The platform's fixed transition table. Nothing targets `system_admin`.
    pub fn standard() -> Self {
        use Role::*;
        Self::from_rules(&[
            (Student, Teacher, true),
            (Teacher, DepartmentAdmin, true),
            (Teacher, Student, false),
            (DepartmentAdmin, InstitutionAdmin, true),
            (DepartmentAdmin, Teacher, false),
            (DepartmentAdmin, Student, false),
            (InstitutionAdmin, DepartmentAdmin, false),
            (InstitutionAdmin, Teacher, false),
            (InstitutionAdmin, Student, false),
        ])
        .with_entry(SystemAdmin)
    }

    pub fn from_rules(rules: &[(Role, Role, bool)]) -> Self {
        let mut table: HashMap<Role, HashMap<Role, bool>> = HashMap::new();
        for &(from, to, approval) in rules {
            table.entry(from).or_default().insert(to, approval);
        }
        Self { table }
    }

    /// Ensure `role` has an entry, possibly with no targets
    pub fn with_entry(mut self, role: Role) -> Self {
        self.table.entry(role).or_default();
        self
    }

    /// Rule for a pair; `None` means denied
    pub fn lookup(&self, from: Role, to: Role) -> Option<TransitionRule> {
        self.table
            .get(&from)
            .and_then(|targets| targets.get(&to))
            .map(|&requires_approval| TransitionRule { from, to, requires_approval })
    }

    pub fn is_permitted(&self, from: Role, to: Role) -> bool {
        self.lookup(from, to).is_some()
    }

    /// Permitted targets of `from`, lowest tier first
    pub fn allowed_targets(&self, from: Role) -> Vec<Role> {
        let mut targets: Vec<Role> = self
            .table
            .get(&from)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        targets.sort();
        targets
    }

    /// Roles without a table entry. Gaps still deny at runtime.
    pub fn missing_entries(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| !self.table.contains_key(r))
            .collect()
    }
}
