//! Permission checker
//!
//! Resolves a user's active assignments, expands them through the
//! permission table and applies per-assignment conditions. Decisions are
//! cached per (user, permission, context). Assignment changes made through
//! the checker invalidate the user's entries before returning.

use crate::cache::{CacheKey, CacheStats, PermissionCache, PermissionContext};
use crate::permission::{Permission, PermissionTable};
use crate::CacheConfig;
use edusec_audit::{EventContext, SecurityEventLogger, SecurityEventType};
use edusec_common::{
    holds_system_admin, AdminScope, ErrorTracker, Role, RoleAssignment, RoleDirectory, SecurityError,
    SecurityResult, StoreError, SYSTEM_ERROR_REASON,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NOT_GRANTED: &str = "permission not granted";
const CONDITION_DENIED: &str = "denied by assignment conditions";
const OWN_RESOURCES_ONLY: &str = "restricted to own resources";

/// Outcome of one check in a bulk request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub permission: Permission,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionCheck {
    fn granted(permission: Permission) -> Self {
        Self { permission, granted: true, reason: None }
    }

    fn denied(permission: Permission, reason: &str) -> Self {
        Self {
            permission,
            granted: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct CheckerCounters {
    checks: AtomicU64,
    granted: AtomicU64,
    denied: AtomicU64,
    bulk_requests: AtomicU64,
    assignment_fetches: AtomicU64,
    system_errors: AtomicU64,
}

/// Checker counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CheckerStats {
    pub checks: u64,
    pub granted: u64,
    pub denied: u64,
    pub bulk_requests: u64,
    pub assignment_fetches: u64,
    pub system_errors: u64,
    pub cache: CacheStats,
}

/// Capability lookups over role assignments
pub struct PermissionChecker {
    directory: RoleDirectory,
    cache: PermissionCache,
    table: PermissionTable,
    logger: Arc<SecurityEventLogger>,
    errors: Arc<ErrorTracker>,
    config: CacheConfig,
    counters: CheckerCounters,
}

impl PermissionChecker {
    pub fn new(
        directory: RoleDirectory,
        table: PermissionTable,
        logger: Arc<SecurityEventLogger>,
        errors: Arc<ErrorTracker>,
        config: CacheConfig,
    ) -> Self {
        Self {
            cache: PermissionCache::new(&config),
            directory,
            table,
            logger,
            errors,
            config,
            counters: CheckerCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn table(&self) -> &PermissionTable {
        &self.table
    }

    /// Whether `user_id` holds `permission` in `context`. Fails closed.
    pub async fn has_permission(&self, user_id: &str, permission: Permission, context: &PermissionContext) -> bool {
        self.counters.checks.fetch_add(1, Ordering::Relaxed);
        let key = CacheKey::new(user_id, permission, context);
        if let Some(granted) = self.cache.get(&key) {
            self.count(granted);
            return granted;
        }

        let stamp = self.cache.stamp();
        let assignments = match self.fetch_assignments(user_id).await {
            Ok(assignments) => assignments,
            Err(e) => {
                self.fail("has_permission", user_id, context, e).await;
                self.count(false);
                return false;
            }
        };

        let check = self.evaluate(user_id, &assignments, permission, context);
        self.cache.insert(key, check.granted, stamp);
        self.count(check.granted);
        check.granted
    }

    /// Like `has_permission`, but a denial is an error and is logged as a violation
    pub async fn require_permission(
        &self,
        user_id: &str,
        permission: Permission,
        context: &PermissionContext,
    ) -> SecurityResult<()> {
        if self.has_permission(user_id, permission, context).await {
            return Ok(());
        }
        self.logger
            .log_permission_violation(user_id, permission.as_str(), event_context(user_id, context))
            .await;
        Err(SecurityError::Permission(format!("{permission} required")))
    }

    /// Evaluate many permissions for one user. Assignments are fetched at
    /// most once, whatever the number of checks.
    pub async fn check_bulk_permissions(
        &self,
        user_id: &str,
        permissions: &[Permission],
        context: &PermissionContext,
    ) -> SecurityResult<Vec<PermissionCheck>> {
        if permissions.len() > self.config.bulk_check_limit {
            return Err(SecurityError::Validation(format!(
                "bulk check of {} permissions exceeds limit of {}",
                permissions.len(),
                self.config.bulk_check_limit
            )));
        }
        self.counters.bulk_requests.fetch_add(1, Ordering::Relaxed);

        let mut results: Vec<Option<PermissionCheck>> = Vec::with_capacity(permissions.len());
        let mut misses = Vec::new();
        for (i, &permission) in permissions.iter().enumerate() {
            let cached = self.cache.get(&CacheKey::new(user_id, permission, context));
            results.push(cached.map(|granted| {
                if granted {
                    PermissionCheck::granted(permission)
                } else {
                    PermissionCheck::denied(permission, NOT_GRANTED)
                }
            }));
            if cached.is_none() {
                misses.push(i);
            }
        }

        if !misses.is_empty() {
            let stamp = self.cache.stamp();
            match self.fetch_assignments(user_id).await {
                Ok(assignments) => {
                    for i in misses {
                        let permission = permissions[i];
                        let check = self.evaluate(user_id, &assignments, permission, context);
                        self.cache
                            .insert(CacheKey::new(user_id, permission, context), check.granted, stamp);
                        results[i] = Some(check);
                    }
                }
                Err(e) => {
                    self.fail("check_bulk_permissions", user_id, context, e).await;
                    for i in misses {
                        results[i] = Some(PermissionCheck::denied(permissions[i], SYSTEM_ERROR_REASON));
                    }
                }
            }
        }

        let results: Vec<PermissionCheck> = results
            .into_iter()
            .zip(permissions)
            .map(|(r, &p)| r.unwrap_or_else(|| PermissionCheck::denied(p, NOT_GRANTED)))
            .collect();
        self.counters.checks.fetch_add(results.len() as u64, Ordering::Relaxed);
        for r in &results {
            self.count(r.granted);
        }
        Ok(results)
    }

    /// Whether the user administers `scope`. System admins administer everything.
    ///
    /// A department check with an id needs an assignment narrowed to that
    /// department; an institution check with an id needs an institution admin
    /// assignment in that institution.
    pub async fn is_admin(&self, user_id: &str, scope: AdminScope, scope_id: Option<&str>) -> bool {
        let assignments = match self.fetch_assignments(user_id).await {
            Ok(assignments) => assignments,
            Err(e) => {
                let context = PermissionContext::default();
                self.fail("is_admin", user_id, &context, e).await;
                return false;
            }
        };
        if holds_system_admin(&assignments) {
            return true;
        }

        let minimum = scope.minimum_role();
        assignments.iter().filter(|a| a.role >= minimum).any(|a| match scope {
            AdminScope::System => false,
            AdminScope::Institution => scope_id.map_or(true, |id| a.institution_id == id),
            AdminScope::Department => match scope_id {
                Some(id) => a.department_id.as_deref() == Some(id),
                None => true,
            },
        })
    }

    /// Expanded permission set of a user in `context`
    pub async fn effective_permissions(
        &self,
        user_id: &str,
        context: &PermissionContext,
    ) -> SecurityResult<BTreeSet<Permission>> {
        let assignments = self.fetch_assignments(user_id).await?;
        Ok(Permission::ALL
            .into_iter()
            .filter(|&p| self.evaluate(user_id, &assignments, p, context).granted)
            .collect())
    }

    /// Drop a user's cached decisions. Done when this returns.
    pub fn invalidate_user_cache(&self, user_id: &str) {
        self.cache.invalidate_user(user_id);
    }

    /// Drop every cached decision. Done when this returns.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Grant a role. The actor needs `roles:assign` over the assignment's
    /// scope and a role above the one granted; system admins may grant anything.
    pub async fn assign_role(&self, assignment: RoleAssignment, actor: &str) -> SecurityResult<RoleAssignment> {
        self.authorize_grant(
            actor,
            &assignment.user_id,
            assignment.role,
            &assignment.institution_id,
            assignment.department_id.as_deref(),
            "assign_role",
        )
        .await?;

        let assignment = assignment.assigned_by(actor);
        self.directory.save(&assignment).await?;
        self.cache.invalidate_user(&assignment.user_id);

        tracing::info!(
            user_id = %assignment.user_id,
            role = %assignment.role,
            institution_id = %assignment.institution_id,
            actor,
            "role assigned"
        );
        let mut context = EventContext::default()
            .target(&assignment.user_id)
            .institution(&assignment.institution_id);
        context.department_id = assignment.department_id.clone();
        self.logger
            .log_admin_action(
                SecurityEventType::RoleAssigned,
                actor,
                "assign_role",
                json!({
                    "assignment_id": assignment.id,
                    "role": assignment.role,
                    "expires_at": assignment.expires_at,
                }),
                context,
            )
            .await;
        Ok(assignment)
    }

    /// Revoke every active `role` assignment of a user in an institution
    pub async fn revoke_role(
        &self,
        user_id: &str,
        role: Role,
        institution_id: &str,
        actor: &str,
    ) -> SecurityResult<usize> {
        self.authorize_grant(actor, user_id, role, institution_id, None, "revoke_role")
            .await?;
        let revoked = self.directory.revoke(user_id, role, institution_id).await?;
        if revoked == 0 {
            return Err(SecurityError::NotFound(format!(
                "no active {role} assignment for {user_id} in {institution_id}"
            )));
        }
        self.cache.invalidate_user(user_id);

        tracing::info!(user_id, role = %role, institution_id, actor, revoked, "role revoked");
        self.logger
            .log_admin_action(
                SecurityEventType::RoleRevoked,
                actor,
                "revoke_role",
                json!({ "role": role, "revoked": revoked }),
                EventContext::default().target(user_id).institution(institution_id),
            )
            .await;
        Ok(revoked)
    }

    async fn authorize_grant(
        &self,
        actor: &str,
        target_user_id: &str,
        role: Role,
        institution_id: &str,
        department_id: Option<&str>,
        operation: &str,
    ) -> SecurityResult<()> {
        let assignments = self.fetch_assignments(actor).await?;
        if holds_system_admin(&assignments) {
            return Ok(());
        }

        let allowed = role != Role::SystemAdmin
            && assignments.iter().any(|a| {
                a.role > role
                    && administers(a, institution_id, department_id)
                    && self.table.grants(a.role, Permission::RolesAssign)
                    && !a.conditions.own_resources_only
                    && !a
                        .conditions
                        .denied_permissions
                        .iter()
                        .any(|p| p == Permission::RolesAssign.as_str())
            });
        if allowed {
            return Ok(());
        }

        tracing::warn!(actor, target_user_id, role = %role, institution_id, operation, "role change refused");
        let mut context = EventContext::user(actor)
            .target(target_user_id)
            .institution(institution_id);
        context.department_id = department_id.map(str::to_string);
        self.logger
            .log_security_event(
                SecurityEventType::UnauthorizedAccessAttempt,
                format!("{operation} of {role} without authority"),
                json!({
                    "operation": operation,
                    "target_user_id": target_user_id,
                    "role": role,
                    "actor_roles": assignments.iter().map(|a| a.role).collect::<Vec<_>>(),
                }),
                context,
            )
            .await;
        Err(SecurityError::Permission(format!(
            "{actor} may not {} {role} in {institution_id}",
            if operation == "revoke_role" { "revoke" } else { "assign" }
        )))
    }

    pub fn stats(&self) -> CheckerStats {
        CheckerStats {
            checks: self.counters.checks.load(Ordering::Relaxed),
            granted: self.counters.granted.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            bulk_requests: self.counters.bulk_requests.load(Ordering::Relaxed),
            assignment_fetches: self.counters.assignment_fetches.load(Ordering::Relaxed),
            system_errors: self.counters.system_errors.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }

    fn evaluate(
        &self,
        user_id: &str,
        assignments: &[RoleAssignment],
        permission: Permission,
        context: &PermissionContext,
    ) -> PermissionCheck {
        if holds_system_admin(assignments) {
            return PermissionCheck::granted(permission);
        }

        let mut reason = NOT_GRANTED;
        let scoped = assignments.iter().filter(|a| {
            a.covers(context.institution_id.as_deref(), context.department_id.as_deref())
        });
        for assignment in scoped {
            if !self.table.grants(assignment.role, permission) {
                continue;
            }
            let conditions = &assignment.conditions;
            if conditions.denied_permissions.iter().any(|p| p == permission.as_str()) {
                reason = CONDITION_DENIED;
                continue;
            }
            if conditions.own_resources_only && context.resource_owner_id.as_deref() != Some(user_id) {
                reason = OWN_RESOURCES_ONLY;
                continue;
            }
            return PermissionCheck::granted(permission);
        }
        PermissionCheck::denied(permission, reason)
    }

    async fn fetch_assignments(&self, user_id: &str) -> Result<Vec<RoleAssignment>, StoreError> {
        self.counters.assignment_fetches.fetch_add(1, Ordering::Relaxed);
        self.directory.active_assignments(user_id).await
    }

    async fn fail(&self, operation: &str, user_id: &str, context: &PermissionContext, error: StoreError) {
        let err = SecurityError::from(error);
        self.counters.system_errors.fetch_add(1, Ordering::Relaxed);
        self.errors.record(&err, operation);
        self.logger
            .log_system_error(operation, &err, event_context(user_id, context))
            .await;
    }

    fn count(&self, granted: bool) {
        if granted {
            self.counters.granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.denied.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Admin scope for role changes; department-scoped assignments only reach their department
fn administers(assignment: &RoleAssignment, institution_id: &str, department_id: Option<&str>) -> bool {
    if assignment.institution_id != institution_id {
        return false;
    }
    match (assignment.department_id.as_deref(), department_id) {
        (None, _) => true,
        (Some(own), Some(wanted)) => own == wanted,
        (Some(_), None) => false,
    }
}

fn event_context(user_id: &str, context: &PermissionContext) -> EventContext {
    EventContext {
        institution_id: context.institution_id.clone(),
        department_id: context.department_id.clone(),
        ..EventContext::user(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edusec_audit::{EventFilter, EventLoggerConfig};
    use edusec_common::{AssignmentConditions, InMemoryRecordStore, Table};

    struct Fixture {
        store: Arc<InMemoryRecordStore>,
        logger: Arc<SecurityEventLogger>,
        errors: Arc<ErrorTracker>,
        checker: PermissionChecker,
    }

    fn fixture_with(config: CacheConfig) -> Fixture {
        let store = Arc::new(InMemoryRecordStore::new());
        let logger = Arc::new(SecurityEventLogger::new(store.clone(), EventLoggerConfig::default()));
        let errors = Arc::new(ErrorTracker::new());
        let checker = PermissionChecker::new(
            RoleDirectory::new(store.clone()),
            PermissionTable::standard(),
            logger.clone(),
            errors.clone(),
            config,
        );
        Fixture { store, logger, errors, checker }
    }

    fn fixture() -> Fixture {
        fixture_with(CacheConfig::default())
    }

    impl Fixture {
        async fn grant(&self, assignment: RoleAssignment) {
            RoleDirectory::new(self.store.clone()).save(&assignment).await.unwrap();
        }

        fn fetches(&self) -> u64 {
            self.store.select_count(Table::RoleAssignments)
        }
    }

    fn in_i1() -> PermissionContext {
        PermissionContext::institution("i1")
    }

    #[tokio::test]
    async fn test_role_expansion_and_scope() {
        let f = fixture();
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;

        assert!(f.checker.has_permission("t1", Permission::GradesEdit, &in_i1()).await);
        assert!(!f.checker.has_permission("t1", Permission::UsersManage, &in_i1()).await);
        let elsewhere = PermissionContext::institution("i2");
        assert!(!f.checker.has_permission("t1", Permission::GradesEdit, &elsewhere).await);
    }

    #[tokio::test]
    async fn test_department_scoped_assignment() {
        let f = fixture();
        f.grant(RoleAssignment::new("d1", Role::DepartmentAdmin, "i1").with_department("math")).await;

        let math = in_i1().department("math");
        let physics = in_i1().department("physics");
        assert!(f.checker.has_permission("d1", Permission::DepartmentsManage, &math).await);
        assert!(!f.checker.has_permission("d1", Permission::DepartmentsManage, &physics).await);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let f = fixture();
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;

        assert!(f.checker.has_permission("t1", Permission::CoursesEdit, &in_i1()).await);
        let before = f.fetches();
        assert!(f.checker.has_permission("t1", Permission::CoursesEdit, &in_i1()).await);
        assert_eq!(f.fetches(), before);
        assert_eq!(f.checker.stats().cache.hits, 1);
    }

    #[tokio::test]
    async fn test_revoke_is_visible_to_next_check() {
        let f = fixture();
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;
        f.grant(RoleAssignment::new("admin", Role::InstitutionAdmin, "i1")).await;
        assert!(f.checker.has_permission("t1", Permission::GradesEdit, &in_i1()).await);

        f.checker.revoke_role("t1", Role::Teacher, "i1", "admin").await.unwrap();
        assert!(!f.checker.has_permission("t1", Permission::GradesEdit, &in_i1()).await);

        let err = f.checker.revoke_role("t1", Role::Teacher, "i1", "admin").await.unwrap_err();
        assert!(matches!(err, SecurityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalidate_after_external_change() {
        let f = fixture();
        assert!(!f.checker.has_permission("u1", Permission::CoursesCreate, &in_i1()).await);

        // assignment written behind the checker's back
        f.grant(RoleAssignment::new("u1", Role::Teacher, "i1")).await;
        assert!(!f.checker.has_permission("u1", Permission::CoursesCreate, &in_i1()).await);

        f.checker.invalidate_user_cache("u1");
        assert!(f.checker.has_permission("u1", Permission::CoursesCreate, &in_i1()).await);
    }

    #[tokio::test]
    async fn test_assignment_conditions() {
        let f = fixture();
        let conditions = AssignmentConditions {
            denied_permissions: vec!["grades:edit".into()],
            own_resources_only: false,
        };
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1").with_conditions(conditions)).await;
        f.grant(
            RoleAssignment::new("t2", Role::Teacher, "i1").with_conditions(AssignmentConditions {
                denied_permissions: Vec::new(),
                own_resources_only: true,
            }),
        )
        .await;

        let checks = f
            .checker
            .check_bulk_permissions("t1", &[Permission::GradesEdit, Permission::GradesView], &in_i1())
            .await
            .unwrap();
        assert_eq!(checks[0].reason.as_deref(), Some(CONDITION_DENIED));
        assert!(checks[1].granted);

        assert!(!f.checker.has_permission("t2", Permission::CoursesEdit, &in_i1().owned_by("t9")).await);
        assert!(f.checker.has_permission("t2", Permission::CoursesEdit, &in_i1().owned_by("t2")).await);
    }

    #[tokio::test]
    async fn test_bulk_fetches_assignments_once() {
        let f = fixture();
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;

        let before = f.fetches();
        let checks = f
            .checker
            .check_bulk_permissions("t1", &Permission::ALL, &in_i1())
            .await
            .unwrap();
        assert_eq!(checks.len(), Permission::ALL.len());
        assert_eq!(f.fetches() - before, 1);

        let few = [Permission::CoursesView, Permission::GradesEdit, Permission::BillingManage];
        let fresh = fixture();
        fresh.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;
        let before = fresh.fetches();
        fresh.checker.check_bulk_permissions("t1", &few, &in_i1()).await.unwrap();
        assert_eq!(fresh.fetches() - before, 1);
    }

    #[tokio::test]
    async fn test_bulk_limit() {
        let f = fixture_with(CacheConfig {
            bulk_check_limit: 2,
            ..Default::default()
        });
        let err = f
            .checker
            .check_bulk_permissions("u1", &Permission::ALL[..3], &in_i1())
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let f = fixture();
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;
        f.store.set_unavailable(true);

        assert!(!f.checker.has_permission("t1", Permission::CoursesView, &in_i1()).await);
        let checks = f
            .checker
            .check_bulk_permissions("t1", &[Permission::CoursesView], &in_i1())
            .await
            .unwrap();
        assert_eq!(checks[0].reason.as_deref(), Some(SYSTEM_ERROR_REASON));
        assert!(!f.checker.is_admin("t1", AdminScope::Institution, Some("i1")).await);
        assert_eq!(f.errors.snapshot().total, 3);

        // failures are not cached
        f.store.set_unavailable(false);
        assert!(f.checker.has_permission("t1", Permission::CoursesView, &in_i1()).await);

        let errors = f
            .logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::SystemError))
            .await
            .unwrap();
        assert_eq!(errors.len(), 3);
    }

    #[tokio::test]
    async fn test_system_admin_bypass() {
        let f = fixture();
        f.grant(RoleAssignment::new("root", Role::SystemAdmin, "platform")).await;

        let anywhere = PermissionContext::institution("i7").department("art");
        assert!(f.checker.has_permission("root", Permission::SystemConfigure, &anywhere).await);
        assert!(f.checker.is_admin("root", AdminScope::Department, Some("art")).await);
        assert!(f.checker.is_admin("root", AdminScope::System, None).await);
    }

    #[tokio::test]
    async fn test_admin_scopes() {
        let f = fixture();
        f.grant(RoleAssignment::new("ia", Role::InstitutionAdmin, "i1")).await;
        f.grant(RoleAssignment::new("da", Role::DepartmentAdmin, "i1").with_department("math")).await;

        assert!(f.checker.is_admin("ia", AdminScope::Institution, Some("i1")).await);
        assert!(!f.checker.is_admin("ia", AdminScope::Institution, Some("i2")).await);
        assert!(!f.checker.is_admin("ia", AdminScope::System, None).await);

        assert!(f.checker.is_admin("da", AdminScope::Department, Some("math")).await);
        assert!(!f.checker.is_admin("da", AdminScope::Department, Some("physics")).await);
        assert!(!f.checker.is_admin("da", AdminScope::Institution, Some("i1")).await);
    }

    #[tokio::test]
    async fn test_system_admin_grant_requires_system_admin() {
        let f = fixture();
        f.grant(RoleAssignment::new("ia", Role::InstitutionAdmin, "i1")).await;
        f.grant(RoleAssignment::new("root", Role::SystemAdmin, "platform")).await;

        let err = f
            .checker
            .assign_role(RoleAssignment::new("u1", Role::SystemAdmin, "platform"), "ia")
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Permission(_)));

        let saved = f
            .checker
            .assign_role(RoleAssignment::new("u1", Role::SystemAdmin, "platform"), "root")
            .await
            .unwrap();
        assert_eq!(saved.assigned_by.as_deref(), Some("root"));
        assert!(f.checker.is_admin("u1", AdminScope::System, None).await);

        let assigned = f
            .logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::RoleAssigned))
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
    }

    #[tokio::test]
    async fn test_assign_invalidates_cached_denial() {
        let f = fixture();
        f.grant(RoleAssignment::new("ia", Role::InstitutionAdmin, "i1")).await;
        assert!(!f.checker.has_permission("u1", Permission::CoursesCreate, &in_i1()).await);
        f.checker
            .assign_role(RoleAssignment::new("u1", Role::Teacher, "i1"), "ia")
            .await
            .unwrap();
        assert!(f.checker.has_permission("u1", Permission::CoursesCreate, &in_i1()).await);
    }

    #[tokio::test]
    async fn test_teacher_cannot_grant_institution_admin() {
        let f = fixture();
        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;

        let err = f
            .checker
            .assign_role(RoleAssignment::new("u1", Role::InstitutionAdmin, "i1"), "t1")
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Permission(_)));
        assert!(!f.checker.is_admin("u1", AdminScope::Institution, Some("i1")).await);

        let refused = f
            .logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::UnauthorizedAccessAttempt))
            .await
            .unwrap();
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].user_id.as_deref(), Some("t1"));
        assert_eq!(refused[0].detail_str("target_user_id"), Some("u1"));
        assert!(f
            .logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::RoleAssigned))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_role_changes_need_rank_and_scope() {
        let f = fixture();
        f.grant(RoleAssignment::new("da", Role::DepartmentAdmin, "i1").with_department("math")).await;
        f.grant(RoleAssignment::new("ia", Role::InstitutionAdmin, "i1")).await;

        // department admins grant below their rank inside their department
        let teacher = RoleAssignment::new("u1", Role::Teacher, "i1").with_department("math");
        assert!(f.checker.assign_role(teacher, "da").await.is_ok());
        let elsewhere = RoleAssignment::new("u2", Role::Teacher, "i1").with_department("art");
        assert!(f.checker.assign_role(elsewhere, "da").await.is_err());
        let institution_wide = RoleAssignment::new("u3", Role::Teacher, "i1");
        assert!(f.checker.assign_role(institution_wide, "da").await.is_err());
        let peer = RoleAssignment::new("u4", Role::DepartmentAdmin, "i1").with_department("math");
        assert!(f.checker.assign_role(peer, "da").await.is_err());

        let other_institution = RoleAssignment::new("u5", Role::Teacher, "i2");
        assert!(f.checker.assign_role(other_institution, "ia").await.is_err());
        let peer = RoleAssignment::new("u6", Role::InstitutionAdmin, "i1");
        assert!(f.checker.assign_role(peer, "ia").await.is_err());

        f.grant(RoleAssignment::new("t1", Role::Teacher, "i1")).await;
        let err = f.checker.revoke_role("t1", Role::Teacher, "i1", "da").await.unwrap_err();
        assert!(matches!(err, SecurityError::Permission(_)));
        assert_eq!(f.checker.revoke_role("t1", Role::Teacher, "i1", "ia").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_require_permission_logs_violation() {
        let f = fixture();
        let err = f
            .checker
            .require_permission("u1", Permission::BillingManage, &in_i1())
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Permission(_)));

        let denied = f
            .logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::PermissionDenied))
            .await
            .unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].detail_str("permission"), Some("billing:manage"));
    }

    #[tokio::test]
    async fn test_effective_permissions() {
        let f = fixture();
        f.grant(RoleAssignment::new("s1", Role::Student, "i1")).await;
        let perms = f.checker.effective_permissions("s1", &in_i1()).await.unwrap();
        assert!(perms.contains(&Permission::AssignmentsSubmit));
        assert!(!perms.contains(&Permission::GradesEdit));
        assert_eq!(perms.len(), f.checker.table().permissions_for(Role::Student).count());
    }
}
