//! Self-modification: integration tests
//!
//! Drives the controller through the public API, alone and wired into a
//! [`Governor`], against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use molt_governor::config::{GovernorConfig, SelfModifyConfig};
use molt_governor::generator::{Generation, GenerationOptions, TextGenerator};
use molt_governor::self_modify::Ineligibility;
use molt_governor::signals::{
    ActivityEntry, ActivityKind, PeerSummary, SelfModificationRecord, SynthesisRecord,
    TopologyEntry, TopologyTotals,
};
use molt_governor::{
    Action, Confidence, CycleOutcome, DecisionContext, GateName, Governor, GovernorError,
    GovernorEvent, InMemorySignalStore, SelfModificationController, SignalStore,
    StaticGenerator, StoreError,
};
use tokio::sync::{watch, Notify};

const NOW: u64 = 1_700_000_000;

// ── Helpers ──────────────────────────────────────────────────────────

fn soul(mission: &str) -> String {
    format!(
        "# Identity\nMolty, a curious crustacean who listens first.\n\n\
         ## Role\nCommunity curator and conversation partner.\n\n\
         ## Mission\n{mission}\n\n\
         ## Voice\nWarm, precise, and brief. Prefers examples to slogans.\n\n\
         ## Boundaries\nNo spam, no pile-ons, no self-promotion."
    )
}

fn evolved(body: &str) -> String {
    format!(
        "STATUS: EVOLVED\nRATIONALE: Replies outperform posts.\n\
         DELTA: Mission favours threads.\n<soul>\n{body}\n</soul>"
    )
}

fn controller(store: &InMemorySignalStore, generator: Arc<dyn TextGenerator>) -> SelfModificationController {
    SelfModificationController::new(
        Arc::new(store.clone()),
        generator,
        SelfModifyConfig::default(),
        soul("Connect builders who ship."),
    )
}

async fn checks(store: &InMemorySignalStore) -> Vec<ActivityEntry> {
    store
        .recent_activity(100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == ActivityKind::SelfModifyCheck)
        .collect()
}

/// Blocks inside `generate` until released.
struct GatedGenerator {
    entered: Arc<Notify>,
    release: Arc<Notify>,
    response: String,
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _options: GenerationOptions,
    ) -> Result<Generation, GovernorError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Generation {
            raw_text: self.response.clone(),
        })
    }
}

struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _options: GenerationOptions,
    ) -> Result<Generation, GovernorError> {
        Err(GovernorError::Generation("connection reset".into()))
    }
}

/// Delegates to an in-memory store but refuses the two commit writes.
struct CommitRefusingStore(InMemorySignalStore);

fn refused() -> StoreError {
    StoreError::Unavailable("disk full".into())
}

#[async_trait]
impl SignalStore for CommitRefusingStore {
    async fn count_actions(&self, kinds: &[ActivityKind], since_secs: u64) -> Result<u64, StoreError> {
        self.0.count_actions(kinds, since_secs).await
    }
    async fn count_successful_actions(
        &self,
        kinds: &[ActivityKind],
        since_secs: u64,
    ) -> Result<u64, StoreError> {
        self.0.count_successful_actions(kinds, since_secs).await
    }
    async fn latest_synthesis(&self) -> Result<Option<SynthesisRecord>, StoreError> {
        self.0.latest_synthesis().await
    }
    async fn latest_self_modification_at(&self) -> Result<Option<u64>, StoreError> {
        self.0.latest_self_modification_at().await
    }
    async fn self_modifications(&self, limit: usize) -> Result<Vec<SelfModificationRecord>, StoreError> {
        self.0.self_modifications(limit).await
    }
    async fn sum_topology_scores(&self) -> Result<f64, StoreError> {
        self.0.sum_topology_scores().await
    }
    async fn topology_totals(&self) -> Result<TopologyTotals, StoreError> {
        self.0.topology_totals().await
    }
    async fn count_peers(&self) -> Result<u64, StoreError> {
        self.0.count_peers().await
    }
    async fn count_submolts_created(&self) -> Result<u64, StoreError> {
        self.0.count_submolts_created().await
    }
    async fn count_posts_created(&self) -> Result<u64, StoreError> {
        self.0.count_posts_created().await
    }
    async fn count_comments_created(&self) -> Result<u64, StoreError> {
        self.0.count_comments_created().await
    }
    async fn top_peers(&self, limit: usize) -> Result<Vec<PeerSummary>, StoreError> {
        self.0.top_peers(limit).await
    }
    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        self.0.recent_activity(limit).await
    }
    async fn recent_memories(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        self.0.recent_memories(limit).await
    }
    async fn active_configuration(&self) -> Result<Option<String>, StoreError> {
        self.0.active_configuration().await
    }
    async fn store_active_configuration(&self, _body: &str) -> Result<(), StoreError> {
        Err(refused())
    }
    async fn append_self_modification(&self, _record: SelfModificationRecord) -> Result<(), StoreError> {
        Err(refused())
    }
    async fn append_activity(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        self.0.append_activity(entry).await
    }
    async fn append_synthesis(&self, record: SynthesisRecord) -> Result<(), StoreError> {
        self.0.append_synthesis(record).await
    }
    async fn append_memory(&self, snippet: String) -> Result<(), StoreError> {
        self.0.append_memory(snippet).await
    }
    async fn upsert_topology(&self, peer: &str, entry: TopologyEntry) -> Result<(), StoreError> {
        self.0.upsert_topology(peer, entry).await
    }
}

// ── Commit ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_commit_persists_body_record_and_event() {
    let store = InMemorySignalStore::new();
    let body = soul("Connect builders through replies in existing threads.");
    let c = controller(&store, Arc::new(StaticGenerator::new(evolved(&body))));
    let mut events = c.subscribe();

    let outcome = c.run_cycle_at(true, NOW).await;
    let CycleOutcome::Committed { record_id, repaired } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert!(!repaired);
    assert_eq!(c.current_body(), body);
    assert!(!c.is_running());

    let records = store.self_modifications(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, record_id);
    assert_eq!(records[0].timestamp_secs, NOW);
    assert_eq!(records[0].rationale, "Replies outperform posts.");
    assert_eq!(records[0].delta_summary, "Mission favours threads.");
    assert_eq!(store.active_configuration().await.unwrap().as_deref(), Some(body.as_str()));

    match events.try_recv().unwrap() {
        GovernorEvent::SelfModified { record } => assert_eq!(record, records[0]),
        other => panic!("unexpected event {other:?}"),
    }

    let rows = checks(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, "committed");
    assert!(rows[0].success);
}

#[tokio::test]
async fn test_committed_body_survives_restart() {
    let store = InMemorySignalStore::new();
    let body = soul("Map the builder network one thread at a time.");
    let first = controller(&store, Arc::new(StaticGenerator::new(evolved(&body))));
    assert!(first.run_cycle_at(true, NOW).await.is_committed());

    let restarted = controller(&store, Arc::new(StaticGenerator::new("RESONANCE_OPTIMAL")));
    assert_ne!(restarted.current_body(), body);
    assert!(restarted.load_active_body().await.unwrap());
    assert_eq!(restarted.current_body(), body);
}

#[tokio::test]
async fn test_second_cycle_within_cooldown_is_ineligible() {
    let store = InMemorySignalStore::new();
    let generator = Arc::new(StaticGenerator::new(evolved(&soul(
        "Connect builders through replies in existing threads.",
    ))));
    let c = controller(&store, generator.clone());

    assert!(c.run_cycle_at(true, NOW).await.is_committed());
    let outcome = c.run_cycle_at(false, NOW + 3_600).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Ineligible(Ineligibility::Cooldown { .. })
    ));
    assert_eq!(generator.calls(), 1);
    assert_eq!(checks(&store).await.len(), 1);
}

#[tokio::test]
async fn test_repair_round_trip_commits_repaired_body() {
    let store = InMemorySignalStore::new();
    let broken = "# Identity\nMolty.\n\n## Role\nCurator.";
    let fixed = soul("Connect builders who ship, mostly through replies.");
    let generator = Arc::new(StaticGenerator::sequence([evolved(broken), evolved(&fixed)]));
    let c = controller(&store, generator.clone());

    let outcome = c.run_cycle_at(true, NOW).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Committed { repaired: true, .. }
    ));
    assert_eq!(generator.calls(), 2);
    assert_eq!(c.current_body(), fixed);
}

#[tokio::test]
async fn test_rejected_proposal_leaves_everything_untouched() {
    let store = InMemorySignalStore::new();
    let generator = Arc::new(StaticGenerator::new(evolved("# Identity\ntoo short")));
    let c = controller(&store, generator.clone());
    let before = c.current_body();

    let outcome = c.run_cycle_at(true, NOW).await;
    assert!(matches!(outcome, CycleOutcome::Rejected { .. }));
    assert_eq!(generator.calls(), 2);
    assert_eq!(c.current_body(), before);
    assert!(store.self_modifications(10).await.unwrap().is_empty());
    assert_eq!(store.active_configuration().await.unwrap(), None);
    assert_eq!(checks(&store).await[0].outcome, "rejected");
}

// ── Failure paths ────────────────────────────────────────────────────

#[tokio::test]
async fn test_generation_failure_is_contained() {
    let store = InMemorySignalStore::new();
    let c = controller(&store, Arc::new(FailingGenerator));
    let before = c.current_body();

    let outcome = c.run_cycle_at(true, NOW).await;
    match &outcome {
        CycleOutcome::Failed { reason } => assert!(reason.contains("connection reset")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(c.current_body(), before);
    assert!(!c.is_running());

    let rows = checks(&store).await;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].success);
}

#[tokio::test]
async fn test_persist_failure_at_commit_still_swaps_body() {
    let store = InMemorySignalStore::new();
    let body = soul("Connect builders through replies in existing threads.");
    let c = SelfModificationController::new(
        Arc::new(CommitRefusingStore(store.clone())),
        Arc::new(StaticGenerator::new(evolved(&body))),
        SelfModifyConfig::default(),
        soul("Connect builders who ship."),
    );
    let mut events = c.subscribe();

    let outcome = c.run_cycle_at(true, NOW).await;
    assert!(outcome.is_committed(), "expected commit, got {outcome:?}");
    assert_eq!(c.current_body(), body);
    assert!(matches!(
        events.try_recv().unwrap(),
        GovernorEvent::SelfModified { .. }
    ));

    assert!(store.self_modifications(10).await.unwrap().is_empty());
    assert_eq!(store.active_configuration().await.unwrap(), None);
    assert_eq!(checks(&store).await[0].outcome, "committed");
}

#[tokio::test]
async fn test_concurrent_cycle_is_refused_while_generation_pending() {
    let store = InMemorySignalStore::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let generator = Arc::new(GatedGenerator {
        entered: entered.clone(),
        release: release.clone(),
        response: evolved(&soul("Connect builders through replies in existing threads.")),
    });
    let c = Arc::new(controller(&store, generator));

    let first = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.run_cycle_at(true, NOW).await })
    };
    entered.notified().await;
    assert!(c.is_running());

    assert_eq!(c.run_cycle_at(true, NOW).await, CycleOutcome::AlreadyRunning);
    assert!(!c.run(true).await);

    release.notify_one();
    assert!(first.await.unwrap().is_committed());
    assert!(!c.is_running());
    assert_eq!(store.self_modifications(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_low_activity_nudge_allows_cycle_after_horizon() {
    let store = InMemorySignalStore::new();
    store
        .append_self_modification(molt_governor::signals::SelfModificationRecord {
            id: "seed".into(),
            timestamp_secs: NOW - 10 * 3_600,
            rationale: String::new(),
            delta_summary: String::new(),
            body: String::new(),
        })
        .await
        .unwrap();
    let generator = Arc::new(StaticGenerator::new("STATUS: RESONANCE_OPTIMAL"));
    let c = controller(&store, generator.clone());

    assert!(matches!(
        c.run_cycle_at(false, NOW).await,
        CycleOutcome::Ineligible(Ineligibility::LowActivity { activity: 0, .. })
    ));
    assert_eq!(c.run_cycle_at(false, NOW + 15 * 3_600).await, CycleOutcome::Optimal);
    assert_eq!(generator.calls(), 1);
}

// ── Governor wiring ──────────────────────────────────────────────────

#[tokio::test]
async fn test_commit_activates_self_modification_cooldown_gate() {
    let store = InMemorySignalStore::new();
    let governor = Governor::new(
        &GovernorConfig::default(),
        Arc::new(store.clone()),
        Arc::new(StaticGenerator::new(evolved(&soul(
            "Connect builders through replies in existing threads.",
        )))),
        soul("Connect builders who ship."),
    );

    assert!(governor.controller().run_cycle_at(true, NOW).await.is_committed());

    let post = governor
        .decide_at(&DecisionContext::new(Action::Post, Confidence::High), NOW + 60)
        .await;
    assert_eq!(post.action, Action::Skip);
    assert!(post.triggered(GateName::SelfModificationCooldown));

    let corrective = DecisionContext::new(Action::Comment, Confidence::High)
        .with_mode(molt_governor::Mode::Corrective);
    let comment = governor.decide_at(&corrective, NOW + 60).await;
    assert_eq!(comment.action, Action::Comment);

    let later = governor
        .decide_at(
            &DecisionContext::new(Action::Comment, Confidence::High),
            NOW + 3 * 3_600,
        )
        .await;
    assert!(!later.triggered(GateName::SelfModificationCooldown));
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_runs_cycle_and_stops_on_shutdown() {
    let store = InMemorySignalStore::new();
    let mut config = GovernorConfig::default();
    config.self_modify.cycle_interval_secs = 60;
    let governor = Governor::new(
        &config,
        Arc::new(store.clone()),
        Arc::new(StaticGenerator::new(evolved(&soul(
            "Connect builders through replies in existing threads.",
        )))),
        soul("Connect builders who ship."),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = governor.spawn_self_modify_loop(shutdown_rx);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(store.self_modifications(10).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(store.self_modifications(10).await.unwrap().len(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop exits on shutdown")
        .unwrap();
}
