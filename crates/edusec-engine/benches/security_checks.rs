//! Security check benchmarks
//!
//! Cached permission lookups, bulk checks and risk scoring.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use edusec_authz::{Permission, PermissionContext};
use edusec_common::{InMemoryRecordStore, Role, RoleAssignment, RoleDirectory};
use edusec_engine::{EngineConfig, SecurityEngine};
use edusec_escalation::{DefaultHeuristics, EscalationRiskScorer, RequestContext};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn setup(rt: &Runtime) -> SecurityEngine {
    let store = Arc::new(InMemoryRecordStore::new());
    let engine = SecurityEngine::new(store.clone(), EngineConfig::default()).unwrap();
    rt.block_on(async {
        RoleDirectory::new(store)
            .save(&RoleAssignment::new("t1", Role::Teacher, "i1"))
            .await
            .unwrap();
    });
    engine
}

fn permission_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = setup(&rt);
    let ctx = PermissionContext::institution("i1");
    let mut group = c.benchmark_group("permission");

    group.bench_function("cached", |b| {
        b.iter(|| {
            rt.block_on(engine.permissions().has_permission("t1", black_box(Permission::GradesEdit), &ctx))
        })
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            engine.permissions().invalidate_user_cache("t1");
            rt.block_on(engine.permissions().has_permission("t1", black_box(Permission::GradesEdit), &ctx))
        })
    });

    for size in [1usize, 8, 28].iter() {
        group.bench_with_input(BenchmarkId::new("bulk_cold", size), size, |b, &size| {
            let perms = &Permission::ALL[..size];
            b.iter(|| {
                engine.permissions().clear_cache();
                rt.block_on(engine.permissions().check_bulk_permissions("t1", black_box(perms), &ctx))
            })
        });
    }

    group.finish();
}

fn risk_benchmark(c: &mut Criterion) {
    let scorer = EscalationRiskScorer::new(Arc::new(DefaultHeuristics::new().unwrap()), 3);
    let ctx = RequestContext {
        ip_address: Some("203.0.113.7".into()),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/126.0".into()),
        session_id: None,
    };

    c.bench_function("risk_score", |b| {
        b.iter(|| scorer.score(black_box(Role::Student), black_box(Role::DepartmentAdmin), &ctx, 4))
    });
}

criterion_group!(benches, permission_benchmark, risk_benchmark);
criterion_main!(benches);
