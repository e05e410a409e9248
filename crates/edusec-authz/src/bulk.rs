//! UI element and feature gating on top of bulk permission checks

use crate::cache::PermissionContext;
use crate::checker::PermissionChecker;
use crate::permission::Permission;
use edusec_common::{SecurityError, SecurityResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How a feature combines its permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementMode {
    /// Every permission (AND)
    All,
    /// At least one permission (OR)
    Any,
}

/// Permissions a feature needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRequirement {
    pub permissions: Vec<Permission>,
    pub mode: RequirementMode,
}

impl FeatureRequirement {
    pub fn all(permissions: impl Into<Vec<Permission>>) -> Self {
        Self { permissions: permissions.into(), mode: RequirementMode::All }
    }

    pub fn any(permissions: impl Into<Vec<Permission>>) -> Self {
        Self { permissions: permissions.into(), mode: RequirementMode::Any }
    }

    fn satisfied_by(&self, granted: &HashMap<Permission, bool>) -> bool {
        let held = |p: &Permission| granted.get(p).copied().unwrap_or(false);
        match self.mode {
            RequirementMode::All => self.permissions.iter().all(held),
            RequirementMode::Any => self.permissions.iter().any(held),
        }
    }
}

/// UI element -> required permission
const UI_ELEMENTS: &[(&str, Permission)] = &[
    ("nav.courses", Permission::CoursesView),
    ("button.create_course", Permission::CoursesCreate),
    ("button.grade_assignment", Permission::AssignmentsGrade),
    ("page.gradebook", Permission::GradesView),
    ("button.edit_grades", Permission::GradesEdit),
    ("page.students", Permission::StudentsView),
    ("page.user_management", Permission::UsersManage),
    ("button.assign_role", Permission::RolesAssign),
    ("page.role_requests", Permission::RolesApprove),
    ("page.department_settings", Permission::DepartmentsManage),
    ("page.institution_settings", Permission::InstitutionManage),
    ("page.billing", Permission::BillingManage),
    ("page.analytics", Permission::AnalyticsView),
    ("page.security_events", Permission::SecurityEventsView),
    ("page.security_alerts", Permission::SecurityAlertsManage),
    ("page.system_settings", Permission::SystemConfigure),
];

fn builtin_features() -> HashMap<String, FeatureRequirement> {
    use Permission::*;
    [
        ("course_management", FeatureRequirement::all([CoursesCreate, CoursesEdit])),
        ("grading", FeatureRequirement::all([AssignmentsGrade, GradesEdit])),
        ("department_administration", FeatureRequirement::any([DepartmentsManage, InstitutionManage])),
        ("security_console", FeatureRequirement::any([SecurityEventsView, SecurityAlertsManage])),
        ("role_administration", FeatureRequirement::all([RolesAssign, RolesApprove])),
        ("platform_administration", FeatureRequirement::all([SystemConfigure, InstitutionsManage])),
    ]
    .into_iter()
    .map(|(name, req)| (name.to_string(), req))
    .collect()
}

/// Maps UI elements and features to booleans with one bulk check per call
pub struct BulkPermissionService {
    checker: Arc<PermissionChecker>,
    ui_elements: HashMap<String, Permission>,
    features: RwLock<HashMap<String, FeatureRequirement>>,
}

impl BulkPermissionService {
    pub fn new(checker: Arc<PermissionChecker>) -> Self {
        Self {
            checker,
            ui_elements: UI_ELEMENTS.iter().map(|(e, p)| (e.to_string(), *p)).collect(),
            features: RwLock::new(builtin_features()),
        }
    }

    /// Visibility per element. Unknown identifiers are hidden.
    pub async fn check_ui_permissions(
        &self,
        user_id: &str,
        elements: &[&str],
        context: &PermissionContext,
    ) -> SecurityResult<BTreeMap<String, bool>> {
        let needed: Vec<Permission> = elements.iter().filter_map(|e| self.ui_elements.get(*e).copied()).collect();
        let granted = self.resolve(user_id, needed, context).await?;

        Ok(elements
            .iter()
            .map(|e| {
                let visible = self
                    .ui_elements
                    .get(*e)
                    .and_then(|p| granted.get(p).copied())
                    .unwrap_or(false);
                (e.to_string(), visible)
            })
            .collect())
    }

    /// Availability per feature. Unknown features are unavailable.
    pub async fn check_feature_permissions(
        &self,
        user_id: &str,
        features: &[&str],
        context: &PermissionContext,
    ) -> SecurityResult<BTreeMap<String, bool>> {
        let requirements: Vec<(String, Option<FeatureRequirement>)> = {
            let registry = self.features.read();
            features
                .iter()
                .map(|f| (f.to_string(), registry.get(*f).cloned()))
                .collect()
        };
        let needed: Vec<Permission> = requirements
            .iter()
            .filter_map(|(_, req)| req.as_ref())
            .flat_map(|req| req.permissions.iter().copied())
            .collect();
        let granted = self.resolve(user_id, needed, context).await?;

        Ok(requirements
            .into_iter()
            .map(|(name, req)| {
                let available = req.map_or(false, |r| r.satisfied_by(&granted));
                (name, available)
            })
            .collect())
    }

    /// Add a custom feature next to the built-in ones
    pub fn register_feature(&self, name: &str, requirement: FeatureRequirement) -> SecurityResult<()> {
        if name.trim().is_empty() {
            return Err(SecurityError::Validation("feature name is required".into()));
        }
        if requirement.permissions.is_empty() {
            return Err(SecurityError::Validation(format!("feature {name} has no permissions")));
        }
        let mut registry = self.features.write();
        if registry.contains_key(name) {
            return Err(SecurityError::Validation(format!("feature {name} already registered")));
        }
        registry.insert(name.to_string(), requirement);
        tracing::debug!(feature = name, "feature registered");
        Ok(())
    }

    pub fn feature(&self, name: &str) -> Option<FeatureRequirement> {
        self.features.read().get(name).cloned()
    }

    pub fn ui_elements(&self) -> impl Iterator<Item = &str> + '_ {
        self.ui_elements.keys().map(String::as_str)
    }

    async fn resolve(
        &self,
        user_id: &str,
        mut needed: Vec<Permission>,
        context: &PermissionContext,
    ) -> SecurityResult<HashMap<Permission, bool>> {
        needed.sort_unstable();
        needed.dedup();
        if needed.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .checker
            .check_bulk_permissions(user_id, &needed, context)
            .await?
            .into_iter()
            .map(|c| (c.permission, c.granted))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, PermissionTable};
    use edusec_audit::{EventLoggerConfig, SecurityEventLogger};
    use edusec_common::{ErrorTracker, InMemoryRecordStore, Role, RoleAssignment, RoleDirectory, Table};

    async fn service() -> (Arc<InMemoryRecordStore>, BulkPermissionService) {
        let store = Arc::new(InMemoryRecordStore::new());
        let directory = RoleDirectory::new(store.clone());
        directory.save(&RoleAssignment::new("t1", Role::Teacher, "i1")).await.unwrap();
        directory.save(&RoleAssignment::new("ia", Role::InstitutionAdmin, "i1")).await.unwrap();

        let checker = PermissionChecker::new(
            directory,
            PermissionTable::standard(),
            Arc::new(SecurityEventLogger::new(store.clone(), EventLoggerConfig::default())),
            Arc::new(ErrorTracker::new()),
            CacheConfig::default(),
        );
        (store, BulkPermissionService::new(Arc::new(checker)))
    }

    fn i1() -> PermissionContext {
        PermissionContext::institution("i1")
    }

    #[tokio::test]
    async fn test_ui_visibility() {
        let (store, svc) = service().await;
        let before = store.select_count(Table::RoleAssignments);
        let visible = svc
            .check_ui_permissions("t1", &["nav.courses", "button.edit_grades", "page.billing", "page.nope"], &i1())
            .await
            .unwrap();

        assert!(visible["nav.courses"]);
        assert!(visible["button.edit_grades"]);
        assert!(!visible["page.billing"]);
        assert!(!visible["page.nope"]);
        assert_eq!(visible.len(), 4);
        assert_eq!(store.select_count(Table::RoleAssignments) - before, 1);
    }

    #[tokio::test]
    async fn test_feature_modes() {
        let (_, svc) = service().await;
        let features = ["grading", "department_administration", "role_administration", "platform_administration", "unknown"];

        let teacher = svc.check_feature_permissions("t1", &features, &i1()).await.unwrap();
        assert!(teacher["grading"]);
        assert!(!teacher["department_administration"]);
        assert!(!teacher["unknown"]);

        let admin = svc.check_feature_permissions("ia", &features, &i1()).await.unwrap();
        assert!(admin["department_administration"]);
        assert!(admin["role_administration"]);
        assert!(!admin["platform_administration"]);
    }

    #[tokio::test]
    async fn test_any_needs_only_one() {
        let (_, svc) = service().await;
        svc.register_feature(
            "teaching_or_billing",
            FeatureRequirement::any([Permission::BillingManage, Permission::CoursesCreate]),
        )
        .unwrap();
        svc.register_feature(
            "teaching_and_billing",
            FeatureRequirement::all([Permission::BillingManage, Permission::CoursesCreate]),
        )
        .unwrap();

        let result = svc
            .check_feature_permissions("t1", &["teaching_or_billing", "teaching_and_billing"], &i1())
            .await
            .unwrap();
        assert!(result["teaching_or_billing"]);
        assert!(!result["teaching_and_billing"]);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_, svc) = service().await;
        assert!(svc.register_feature(" ", FeatureRequirement::all([Permission::CoursesView])).is_err());
        assert!(svc.register_feature("empty", FeatureRequirement::any(Vec::new())).is_err());
        assert!(svc.register_feature("grading", FeatureRequirement::all([Permission::CoursesView])).is_err());
        assert_eq!(svc.feature("grading").map(|f| f.mode), Some(RequirementMode::All));
    }
}
