//! Fine-grained permissions and the role -> permission table

use edusec_common::Role;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Capability checked by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    // Courses
    CoursesView,
    CoursesCreate,
    CoursesEdit,
    CoursesDelete,

    // Assignments
    AssignmentsView,
    AssignmentsSubmit,
    AssignmentsCreate,
    AssignmentsGrade,

    // Grades
    GradesViewOwn,
    GradesView,
    GradesEdit,

    // Students
    StudentsView,
    StudentsManage,

    // Users and roles
    UsersView,
    UsersManage,
    RolesAssign,
    RolesApprove,

    // Departments
    DepartmentsView,
    DepartmentsManage,

    // Institution
    InstitutionView,
    InstitutionManage,
    BillingManage,
    AnalyticsView,

    // Security
    SecurityEventsView,
    SecurityAlertsManage,
    RateLimitsManage,

    // Platform
    InstitutionsManage,
    SystemConfigure,
}

impl Permission {
    pub const ALL: [Permission; 28] = {
        use Permission::*;
        [
            CoursesView, CoursesCreate, CoursesEdit, CoursesDelete,
            AssignmentsView, AssignmentsSubmit, AssignmentsCreate, AssignmentsGrade,
            GradesViewOwn, GradesView, GradesEdit,
            StudentsView, StudentsManage,
            UsersView, UsersManage, RolesAssign, RolesApprove,
            DepartmentsView, DepartmentsManage,
            InstitutionView, InstitutionManage, BillingManage, AnalyticsView,
            SecurityEventsView, SecurityAlertsManage, RateLimitsManage,
            InstitutionsManage, SystemConfigure,
        ]
    };

    /// Scope string, e.g. `courses:view`
    pub fn as_str(self) -> &'static str {
        use Permission::*;
        match self {
            CoursesView => "courses:view",
            CoursesCreate => "courses:create",
            CoursesEdit => "courses:edit",
            CoursesDelete => "courses:delete",
            AssignmentsView => "assignments:view",
            AssignmentsSubmit => "assignments:submit",
            AssignmentsCreate => "assignments:create",
            AssignmentsGrade => "assignments:grade",
            GradesViewOwn => "grades:view_own",
            GradesView => "grades:view",
            GradesEdit => "grades:edit",
            StudentsView => "students:view",
            StudentsManage => "students:manage",
            UsersView => "users:view",
            UsersManage => "users:manage",
            RolesAssign => "roles:assign",
            RolesApprove => "roles:approve",
            DepartmentsView => "departments:view",
            DepartmentsManage => "departments:manage",
            InstitutionView => "institution:view",
            InstitutionManage => "institution:manage",
            BillingManage => "billing:manage",
            AnalyticsView => "analytics:view",
            SecurityEventsView => "security_events:view",
            SecurityAlertsManage => "security_alerts:manage",
            RateLimitsManage => "rate_limits:manage",
            InstitutionsManage => "institutions:manage",
            SystemConfigure => "system:configure",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission: {s}"))
    }
}

impl TryFrom<String> for Permission {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Permission> for String {
    fn from(p: Permission) -> Self {
        p.as_str().to_string()
    }
}

/// Parse scope strings, skipping unknown ones
pub fn parse_scopes(scopes: &[String]) -> HashSet<Permission> {
    scopes.iter().filter_map(|s| s.parse().ok()).collect()
}

/// Role -> permission set
#[derive(Debug, Clone)]
pub struct PermissionTable {
    grants: HashMap<Role, HashSet<Permission>>,
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PermissionTable {
    /// Cumulative grants: each tier holds everything below it
    pub fn standard() -> Self {
        use Permission::*;
        let student: HashSet<Permission> = [
            CoursesView, AssignmentsView, AssignmentsSubmit, GradesViewOwn,
            DepartmentsView, InstitutionView,
        ]
        .into_iter()
        .collect();

        let mut teacher = student.clone();
        teacher.extend([
            CoursesCreate, CoursesEdit, AssignmentsCreate, AssignmentsGrade,
            GradesView, GradesEdit, StudentsView,
        ]);

        let mut department_admin = teacher.clone();
        department_admin.extend([
            CoursesDelete, StudentsManage, UsersView, RolesAssign, RolesApprove,
            DepartmentsManage, AnalyticsView, SecurityEventsView,
        ]);

        let mut institution_admin = department_admin.clone();
        institution_admin.extend([
            UsersManage, InstitutionManage, BillingManage, SecurityAlertsManage, RateLimitsManage,
        ]);

        let system_admin: HashSet<Permission> = Permission::ALL.into_iter().collect();

        let grants = HashMap::from([
            (Role::Student, student),
            (Role::Teacher, teacher),
            (Role::DepartmentAdmin, department_admin),
            (Role::InstitutionAdmin, institution_admin),
            (Role::SystemAdmin, system_admin),
        ]);
        Self { grants }
    }

    pub fn from_grants(grants: HashMap<Role, HashSet<Permission>>) -> Self {
        Self { grants }
    }

    pub fn grants(&self, role: Role, permission: Permission) -> bool {
        self.grants.get(&role).map_or(false, |set| set.contains(&permission))
    }

    pub fn permissions_for(&self, role: Role) -> impl Iterator<Item = Permission> + '_ {
        self.grants.get(&role).into_iter().flatten().copied()
    }

    /// Roles without an entry. Gaps still deny at runtime.
    pub fn missing_entries(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| !self.grants.contains_key(r))
            .collect()
    }
}
