//! Gate benchmarks: admission decisions sit on the agent's hot path.
//!
//! - `apply_gates` (pure pipeline):        P99 <5μs
//! - `GateStateComputer::compute_at`:      P99 <50μs against the in-memory store
//! - `Governor::decide_at` (end to end):   P99 <100μs

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use molt_governor::gate::{EngagementDensity, Implication, ObjectivePhase, StabilizationHandle};
use molt_governor::signals::{ActivityEntry, ActivityKind, TopologyEntry};
use molt_governor::{
    apply_gates, Action, Confidence, DecisionContext, GateState, GateStateComputer, Governor,
    GovernorConfig, InMemorySignalStore, Mode, SignalStore, StaticGenerator,
};

const NOW: u64 = 1_700_000_000;

fn calm() -> GateState {
    GateState {
        objective_phase: ObjectivePhase::Mid,
        objective_score: 50,
        ..GateState::baseline(NOW)
    }
}

fn busy() -> GateState {
    GateState {
        engagement_density: EngagementDensity::High,
        last_synthesis_implication: Implication::Correct,
        stabilization_active: true,
        ..calm()
    }
}

async fn seeded_store() -> InMemorySignalStore {
    let store = InMemorySignalStore::new();
    for i in 0..200u64 {
        let kind = if i % 3 == 0 {
            ActivityKind::Post
        } else {
            ActivityKind::Comment
        };
        let _ = store
            .append_activity(ActivityEntry::new(kind, NOW - 30 * i))
            .await;
    }
    for i in 0..50u64 {
        let _ = store
            .upsert_topology(
                &format!("peer-{i}"),
                TopologyEntry {
                    upvotes: i,
                    downvotes: i / 4,
                    replies: i / 2,
                    score: i as f64,
                    quarantined: i % 10 == 0,
                },
            )
            .await;
    }
    store
}

// ═══════════════════════════════════════════════════════════════════════════
// Pure pipeline
// ═══════════════════════════════════════════════════════════════════════════

fn bench_apply_gates(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_gates");
    let contexts = [
        ("post", DecisionContext::new(Action::Post, Confidence::High)),
        (
            "corrective_comment",
            DecisionContext::new(Action::Comment, Confidence::High)
                .with_mode(Mode::Corrective)
                .with_history(Mode::Corrective, 1),
        ),
        ("skip", DecisionContext::new(Action::Skip, Confidence::Low)),
    ];

    for (label, state) in [("calm", calm()), ("busy", busy())] {
        for (ctx_label, ctx) in &contexts {
            group.bench_with_input(
                BenchmarkId::new(label, ctx_label),
                &(state.clone(), ctx.clone()),
                |b, (state, ctx)| b.iter(|| apply_gates(black_box(state), black_box(ctx))),
            );
        }
    }
    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Snapshot and end-to-end decision
// ═══════════════════════════════════════════════════════════════════════════

fn bench_compute_state(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let store = rt.block_on(seeded_store());
    let computer = GateStateComputer::new(
        Arc::new(store),
        &GovernorConfig::default(),
        StabilizationHandle::new(),
    );

    c.bench_function("gate_state_compute", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(computer.compute_at(black_box(NOW)).await) })
    });
}

fn bench_decide(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let store = rt.block_on(seeded_store());
    let governor = Governor::new(
        &GovernorConfig::default(),
        Arc::new(store),
        Arc::new(StaticGenerator::new("RESONANCE_OPTIMAL")),
        "# Identity",
    );
    let ctx = DecisionContext::new(Action::Comment, Confidence::High);

    c.bench_function("governor_decide", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(governor.decide_at(black_box(&ctx), NOW).await) })
    });
}

criterion_group!(benches, bench_apply_gates, bench_compute_state, bench_decide);
criterion_main!(benches);
