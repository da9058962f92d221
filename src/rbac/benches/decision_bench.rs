//! Decision Performance Benchmarks
//!
//! Criterion benchmarks for permission checks through deep hierarchies,
//! with and without the decision cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rehab_rbac::{
    AccessControlEngine, AssignmentConfig, Condition, Context, EngineConfig, PermissionConfig,
    RoleConfig,
};
use tokio::runtime::Runtime;

/// Engine with a linear chain `level0 <- level1 <- ... <- level{depth-1}`,
/// each level granting one permission, and `alice` holding the deepest role.
async fn chain_engine(depth: usize, enable_cache: bool) -> AccessControlEngine {
    let config = EngineConfig {
        enable_cache,
        enable_audit: false,
        enable_anomaly: false,
        seed_system_roles: false,
        ..Default::default()
    };
    let engine = AccessControlEngine::new(config).await.unwrap();

    for level in 0..depth {
        let permission = format!("res{}.read", level);
        engine
            .create_permission(&permission, PermissionConfig::new(format!("res{}", level), "read"))
            .await
            .unwrap();

        let mut role = RoleConfig::new(format!("Level {}", level)).with_permissions([permission]);
        if level > 0 {
            role = role.with_parent(format!("level{}", level - 1));
        }
        engine.create_role(&format!("level{}", level), role).await.unwrap();
    }

    engine
        .assign_role_to_user("alice", &format!("level{}", depth - 1), AssignmentConfig::default())
        .await
        .unwrap();
    engine
}

// ============================================================================
// DECISION LATENCY BENCHMARKS
// ============================================================================

fn bench_uncached_decision(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = rt.block_on(chain_engine(4, false));
    let context = Context::new();

    c.bench_function("decision_no_cache", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(engine.has_permission("alice", "res0.read", &context).await.unwrap())
        });
    });
}

fn bench_cached_decision(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = rt.block_on(chain_engine(4, true));
    let context = Context::new();

    // Warm the cache
    rt.block_on(async {
        engine.has_permission("alice", "res0.read", &context).await.unwrap();
    });

    c.bench_function("decision_cache_hit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(engine.has_permission("alice", "res0.read", &context).await.unwrap())
        });
    });
}

fn bench_hierarchy_depth(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hierarchy_depth");

    for depth in [1usize, 4, 16, 64] {
        let engine = rt.block_on(chain_engine(depth, false));
        let context = Context::new();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.to_async(&rt).iter(|| async {
                black_box(engine.has_permission("alice", "res0.read", &context).await.unwrap())
            });
        });
    }

    group.finish();
}

// ============================================================================
// CONDITION BENCHMARKS
// ============================================================================

fn bench_conditional_decision(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let engine = rt.block_on(async {
        let engine = chain_engine(4, false).await;
        engine
            .create_permission(
                "chart.sign",
                PermissionConfig::new("chart", "sign")
                    .with_condition("department", Condition::one_of(["ortho", "neuro", "cardio"])),
            )
            .await
            .unwrap();
        engine
            .assign_permission_to_role("level3", "chart.sign", false)
            .await
            .unwrap();
        engine
    });

    let mut context = Context::new();
    context.insert("department".to_string(), serde_json::json!("neuro"));

    c.bench_function("decision_with_conditions", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(engine.has_permission("alice", "chart.sign", &context).await.unwrap())
        });
    });
}

fn bench_effective_permissions(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = rt.block_on(chain_engine(16, true));
    let context = Context::new();

    c.bench_function("effective_permissions_depth_16", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                engine
                    .get_user_effective_permissions("alice", &context)
                    .await
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_uncached_decision,
    bench_cached_decision,
    bench_hierarchy_depth,
    bench_conditional_decision,
    bench_effective_permissions,
);
criterion_main!(benches);
