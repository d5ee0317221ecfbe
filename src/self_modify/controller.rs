//! # Self-Modification Controller
//!
//! One cycle: eligibility, proposal, parse, validate, at most one repair,
//! commit.
//!
//! ## Guarantees
//! - At most one cycle runs per controller; a concurrent call returns
//!   [`CycleOutcome::AlreadyRunning`] without side effects
//! - The in-flight flag is cleared on every exit path (RAII guard)
//! - No record is appended and the body is untouched unless the cycle commits
//! - Every cycle past eligibility appends a `self_modify_check` activity row
//! - Store and generation failures end the cycle as [`CycleOutcome::Failed`];
//!   nothing is propagated to the caller
//!
//! ## NOT Responsible For
//! - Judging whether a structurally valid body is semantically safe

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::parse::{parse_proposal, ProposalStatus};
use super::prompt::{build_proposal_prompt, build_repair_prompt, EvidenceScope, ProposalInputs};
use super::validate::{truncate_chars, validate_body, BodyDefect, BodyRules};
use super::GovernorEvent;
use crate::config::SelfModifyConfig;
use crate::gate::StabilizationHandle;
use crate::generator::{GenerationOptions, TextGenerator};
use crate::signals::{ActivityEntry, ActivityKind, SelfModificationRecord, SignalStore};
use crate::{hours_between, metrics, unix_now, GovernorError};

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// Why a cycle did not get past eligibility.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ineligibility {
    /// Too soon after the last commit.
    Cooldown {
        /// Hours since the last commit.
        hours_since: f64,
        /// Required minimum.
        required_hours: f64,
    },
    /// Too little activity since the last commit and the nudge has not come due.
    LowActivity {
        /// Qualifying actions since the last commit.
        activity: u64,
        /// Required minimum.
        required: u64,
    },
}

/// Result of one controller invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// A new body is active.
    Committed {
        /// Id of the appended record.
        record_id: String,
        /// The body was produced by the repair request.
        repaired: bool,
    },
    /// Another cycle holds the in-flight flag.
    AlreadyRunning,
    /// Eligibility refused the cycle.
    Ineligible(Ineligibility),
    /// The model reported no change needed.
    Optimal,
    /// The proposal and its repair both failed validation.
    Rejected {
        /// The final defect.
        reason: String,
    },
    /// A store or generation call failed.
    Failed {
        /// Error description.
        reason: String,
    },
}

impl CycleOutcome {
    /// Metric and log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Committed { .. } => "committed",
            CycleOutcome::AlreadyRunning => "already_running",
            CycleOutcome::Ineligible(_) => "ineligible",
            CycleOutcome::Optimal => "optimal",
            CycleOutcome::Rejected { .. } => "rejected",
            CycleOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether the cycle changed the active body.
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed { .. })
    }

    fn failed(err: impl std::fmt::Display) -> Self {
        CycleOutcome::Failed {
            reason: err.to_string(),
        }
    }
}

// ─── In-flight guard ─────────────────────────────────────────────────────────

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─── Controller ──────────────────────────────────────────────────────────────

struct Candidate {
    body: String,
    rationale: Option<String>,
    delta: Option<String>,
    repaired: bool,
}

/// Periodically rewrites the agent's configuration body.
pub struct SelfModificationController {
    store: Arc<dyn SignalStore>,
    generator: Arc<dyn TextGenerator>,
    config: SelfModifyConfig,
    rules: BodyRules,
    current_body: RwLock<String>,
    in_flight: AtomicBool,
    stabilization: StabilizationHandle,
    events: broadcast::Sender<GovernorEvent>,
}

impl SelfModificationController {
    /// Build a controller starting from `initial_body`.
    pub fn new(
        store: Arc<dyn SignalStore>,
        generator: Arc<dyn TextGenerator>,
        config: SelfModifyConfig,
        initial_body: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            generator,
            rules: BodyRules::from_config(&config),
            config,
            current_body: RwLock::new(initial_body.into()),
            in_flight: AtomicBool::new(false),
            stabilization: StabilizationHandle::new(),
            events,
        }
    }

    /// Replace the in-memory body with the persisted one, if any.
    ///
    /// Returns whether a persisted body was found.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::Store`] if the read fails.
    pub async fn load_active_body(&self) -> Result<bool, GovernorError> {
        match self.store.active_configuration().await? {
            Some(body) => {
                *self.current_body.write() = body;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The active body.
    pub fn current_body(&self) -> String {
        self.current_body.read().clone()
    }

    /// Shared stabilization deadline read by the gate-state computer.
    pub fn stabilization(&self) -> StabilizationHandle {
        self.stabilization.clone()
    }

    /// Freeze posting for `duration` from now.
    pub fn begin_stabilization(&self, duration: Duration) {
        let now = unix_now();
        self.stabilization.begin(now, duration.as_secs());
        let until = self.stabilization.until().unwrap_or(now);
        info!(until, "stabilization started");
        let _ = self.events.send(GovernorEvent::StabilizationStarted { until_secs: until });
    }

    /// Subscribe to commit and stabilization notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.events.subscribe()
    }

    /// Whether a cycle is in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one cycle; `true` only when a new body was committed.
    pub async fn run(&self, force: bool) -> bool {
        self.run_cycle(force).await.is_committed()
    }

    /// Run one cycle with the wall clock.
    pub async fn run_cycle(&self, force: bool) -> CycleOutcome {
        self.run_cycle_at(force, unix_now()).await
    }

    /// Run one cycle at `now`.
    pub async fn run_cycle_at(&self, force: bool, now: u64) -> CycleOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("self-modification already in flight");
            metrics::inc_self_modify_cycle(CycleOutcome::AlreadyRunning.as_str());
            return CycleOutcome::AlreadyRunning;
        };

        let last_commit = match self.check_eligibility(force, now).await {
            Ok(last_commit) => last_commit,
            Err(outcome) => {
                metrics::inc_self_modify_cycle(outcome.as_str());
                return outcome;
            }
        };

        let outcome = self.propose_and_commit(now, last_commit).await;
        self.record_check(now, &outcome).await;
        metrics::inc_self_modify_cycle(outcome.as_str());
        outcome
    }

    /// `Ok(last_commit_at)` when the cycle may proceed.
    async fn check_eligibility(&self, force: bool, now: u64) -> Result<Option<u64>, CycleOutcome> {
        let last_commit = self
            .store
            .latest_self_modification_at()
            .await
            .map_err(|e| {
                warn!(error = %e, "self-modification history unavailable");
                CycleOutcome::failed(e)
            })?;
        if force {
            return Ok(last_commit);
        }

        let hours_since = last_commit.map_or(f64::INFINITY, |at| hours_between(at, now));
        if hours_since < self.config.min_cooldown_hours {
            debug!(hours_since, "self-modification cooling down");
            return Err(CycleOutcome::Ineligible(Ineligibility::Cooldown {
                hours_since,
                required_hours: self.config.min_cooldown_hours,
            }));
        }

        let activity = self
            .store
            .count_actions(&ActivityKind::ENGAGEMENT, last_commit.unwrap_or(0))
            .await
            .map_err(|e| {
                warn!(error = %e, "activity count unavailable");
                CycleOutcome::failed(e)
            })?;
        if activity < self.config.min_activity_for_nudge
            && hours_since < self.config.nudge_after_hours
        {
            debug!(activity, hours_since, "too little activity for self-modification");
            return Err(CycleOutcome::Ineligible(Ineligibility::LowActivity {
                activity,
                required: self.config.min_activity_for_nudge,
            }));
        }
        Ok(last_commit)
    }

    async fn propose_and_commit(&self, now: u64, last_commit: Option<u64>) -> CycleOutcome {
        let prompt = match self.proposal_prompt(last_commit).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "failed to gather proposal evidence");
                return CycleOutcome::failed(e);
            }
        };

        let first = match self.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "proposal generation failed");
                return CycleOutcome::failed(e);
            }
        };

        let marker = self.rules.leading_marker().to_string();
        let parsed = parse_proposal(&first, &marker, &self.config.optimal_sentinel);
        if parsed.status == ProposalStatus::Optimal {
            info!("configuration reported optimal, no change");
            return CycleOutcome::Optimal;
        }

        let candidate = parsed.body.unwrap_or_default();
        let candidate = match validate_body(&candidate, &self.rules) {
            Ok(()) => Candidate {
                body: candidate,
                rationale: parsed.rationale,
                delta: parsed.delta,
                repaired: false,
            },
            Err(defect) => {
                info!(%defect, source = ?parsed.source, "proposal invalid, requesting repair");
                match self.repair(&first, &candidate, &defect, &marker).await {
                    Ok(Ok(body)) => Candidate {
                        body,
                        rationale: parsed.rationale,
                        delta: parsed.delta,
                        repaired: true,
                    },
                    Ok(Err(defect)) => {
                        warn!(%defect, "repaired proposal invalid, rejecting");
                        return CycleOutcome::Rejected {
                            reason: defect.to_string(),
                        };
                    }
                    Err(e) => {
                        warn!(error = %e, "repair generation failed");
                        return CycleOutcome::failed(e);
                    }
                }
            }
        };

        self.commit(now, candidate).await
    }

    async fn proposal_prompt(&self, last_commit: Option<u64>) -> Result<String, GovernorError> {
        let successes = self
            .store
            .count_successful_actions(&ActivityKind::ENGAGEMENT, last_commit.unwrap_or(0))
            .await?;
        let scope = EvidenceScope::from_successes(successes, self.config.min_successes_for_full);
        let peers = self.store.top_peers(self.config.prompt_peer_limit).await?;
        let activity = self
            .store
            .recent_activity(self.config.prompt_activity_limit)
            .await?;
        let memories = self
            .store
            .recent_memories(self.config.prompt_memory_limit)
            .await?;
        let current_body = self.current_body();
        debug!(scope = scope.as_str(), successes, "building proposal prompt");

        Ok(build_proposal_prompt(
            &ProposalInputs {
                current_body: &current_body,
                peers: &peers,
                activity: &activity,
                memories: &memories,
                scope,
            },
            &self.config,
        ))
    }

    async fn generate(&self, prompt: &str) -> Result<String, GovernorError> {
        let options = GenerationOptions {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system_override: None,
        };
        let started = Instant::now();
        let result = self.generator.generate(prompt, options).await;
        metrics::record_generation_latency(started.elapsed());
        result.map(|g| g.raw_text)
    }

    /// Outer `Err` is a generation failure; inner `Err` is a defect in the repair.
    async fn repair(
        &self,
        first: &str,
        candidate: &str,
        defect: &BodyDefect,
        marker: &str,
    ) -> Result<Result<String, BodyDefect>, GovernorError> {
        let prompt = build_repair_prompt(first, candidate, defect, &self.config);
        let text = self.generate(&prompt).await?;
        let body = parse_proposal(&text, marker, &self.config.optimal_sentinel)
            .body
            .unwrap_or_default();
        Ok(validate_body(&body, &self.rules).map(|()| body))
    }

    async fn commit(&self, now: u64, candidate: Candidate) -> CycleOutcome {
        if candidate.repaired {
            warn!("committing repaired body after structural validation only");
        }
        let record = SelfModificationRecord {
            id: Uuid::new_v4().to_string(),
            timestamp_secs: now,
            rationale: truncate_chars(
                candidate
                    .rationale
                    .as_deref()
                    .unwrap_or("no rationale provided"),
                self.config.max_rationale_chars,
            ),
            delta_summary: truncate_chars(
                candidate.delta.as_deref().unwrap_or("unspecified"),
                self.config.max_delta_chars,
            ),
            body: truncate_chars(&candidate.body, self.config.max_body_chars),
        };

        *self.current_body.write() = record.body.clone();

        if let Err(e) = self.store.store_active_configuration(&record.body).await {
            error!(error = %e, "failed to persist active configuration");
        }
        if let Err(e) = self.store.append_self_modification(record.clone()).await {
            error!(error = %e, record_id = %record.id, "failed to append self-modification record");
        }

        info!(
            record_id = %record.id,
            delta = %record.delta_summary,
            repaired = candidate.repaired,
            "self-modification committed"
        );
        let record_id = record.id.clone();
        let _ = self.events.send(GovernorEvent::SelfModified { record });
        CycleOutcome::Committed {
            record_id,
            repaired: candidate.repaired,
        }
    }

    async fn record_check(&self, now: u64, outcome: &CycleOutcome) {
        let entry = ActivityEntry::new(ActivityKind::SelfModifyCheck, now)
            .with_outcome(outcome.as_str(), !matches!(outcome, CycleOutcome::Failed { .. }));
        if let Err(e) = self.store.append_activity(entry).await {
            error!(error = %e, "failed to record self-modification check");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::StaticGenerator;
    use crate::signals::InMemorySignalStore;

    const NOW: u64 = 1_700_000_000;

    fn valid_body() -> String {
        format!(
            "# Identity\nMolty, a curious crustacean.\n\n## Role\nCommunity curator.\n\n\
             ## Mission\nConnect builders.\n\n## Voice\nWarm, precise.\n\n\
             ## Boundaries\nNo spam.\n\n{}",
            "Detail line about values and habits.\n".repeat(5)
        )
        .trim_end()
        .to_string()
    }

    fn proposal(body: &str) -> String {
        format!("STATUS: EVOLVED\nRATIONALE: sharper mission\nDELTA: mission line\n<soul>\n{body}\n</soul>")
    }

    fn controller(
        store: &InMemorySignalStore,
        generator: Arc<StaticGenerator>,
    ) -> SelfModificationController {
        SelfModificationController::new(
            Arc::new(store.clone()),
            generator,
            SelfModifyConfig::default(),
            "# Identity\noriginal",
        )
    }

    async fn seed_activity(store: &InMemorySignalStore, n: u64) {
        for i in 0..n {
            store
                .append_activity(ActivityEntry::new(ActivityKind::Post, NOW - 100 - i))
                .await
                .unwrap();
        }
    }

    async fn seed_commit(store: &InMemorySignalStore, at: u64) {
        store
            .append_self_modification(SelfModificationRecord {
                id: format!("seed-{at}"),
                timestamp_secs: at,
                rationale: String::new(),
                delta_summary: String::new(),
                body: String::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forced_cycle_commits_valid_proposal() {
        let store = InMemorySignalStore::new();
        let generator = Arc::new(StaticGenerator::new(proposal(&valid_body())));
        let c = controller(&store, generator.clone());
        let mut events = c.subscribe();

        let outcome = c.run_cycle_at(true, NOW).await;
        assert!(matches!(outcome, CycleOutcome::Committed { repaired: false, .. }));
        assert_eq!(c.current_body(), valid_body());
        assert_eq!(store.active_configuration().await.unwrap(), Some(valid_body()));

        let records = store.self_modifications(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rationale, "sharper mission");
        assert_eq!(records[0].delta_summary, "mission line");

        match events.try_recv().unwrap() {
            GovernorEvent::SelfModified { record } => assert_eq!(record.id, records[0].id),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!c.is_running());
    }

    #[tokio::test]
    async fn test_recent_commit_is_ineligible_without_generation() {
        let store = InMemorySignalStore::new();
        seed_commit(&store, NOW - 2 * 3_600).await;
        seed_activity(&store, 20).await;
        let generator = Arc::new(StaticGenerator::new(proposal(&valid_body())));
        let c = controller(&store, generator.clone());

        assert!(!c.run_cycle_at(false, NOW).await.is_committed());
        assert_eq!(generator.calls(), 0);
        assert!(matches!(
            c.run_cycle_at(false, NOW).await,
            CycleOutcome::Ineligible(Ineligibility::Cooldown { .. })
        ));
    }

    #[tokio::test]
    async fn test_low_activity_ineligible_until_nudge() {
        let store = InMemorySignalStore::new();
        seed_commit(&store, NOW - 7 * 3_600).await;
        let generator = Arc::new(StaticGenerator::new("RESONANCE_OPTIMAL"));
        let c = controller(&store, generator.clone());

        assert!(matches!(
            c.run_cycle_at(false, NOW).await,
            CycleOutcome::Ineligible(Ineligibility::LowActivity { activity: 0, required: 3 })
        ));
        assert_eq!(generator.calls(), 0);

        // Past the 24 h nudge the check-in happens regardless of activity.
        let later = NOW + 18 * 3_600;
        assert_eq!(c.run_cycle_at(false, later).await, CycleOutcome::Optimal);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_optimal_sentinel_leaves_state_untouched() {
        let store = InMemorySignalStore::new();
        let generator = Arc::new(StaticGenerator::new("RESONANCE_OPTIMAL"));
        let c = controller(&store, generator);

        assert!(!c.run(true).await);
        assert_eq!(c.current_body(), "# Identity\noriginal");
        assert!(store.self_modifications(10).await.unwrap().is_empty());
        assert_eq!(store.active_configuration().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_proposal_repaired_once() {
        let store = InMemorySignalStore::new();
        let generator = Arc::new(StaticGenerator::sequence([
            proposal("# Identity\ntoo short"),
            format!("<soul>{}</soul>", valid_body()),
        ]));
        let c = controller(&store, generator.clone());

        let outcome = c.run_cycle_at(true, NOW).await;
        assert!(matches!(outcome, CycleOutcome::Committed { repaired: true, .. }));
        assert_eq!(generator.calls(), 2);
        assert!(generator.prompts()[1].contains("too short"));
        // Rationale comes from the first response.
        assert_eq!(
            store.self_modifications(1).await.unwrap()[0].rationale,
            "sharper mission"
        );
    }

    #[tokio::test]
    async fn test_failed_repair_rejects_without_second_attempt() {
        let store = InMemorySignalStore::new();
        let generator = Arc::new(StaticGenerator::new(proposal("# Identity\nshort")));
        let c = controller(&store, generator.clone());

        let outcome = c.run_cycle_at(true, NOW).await;
        assert!(matches!(outcome, CycleOutcome::Rejected { .. }));
        assert_eq!(generator.calls(), 2);
        assert_eq!(c.current_body(), "# Identity\noriginal");
        assert!(store.self_modifications(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_checked_cycle_appends_activity_row() {
        let store = InMemorySignalStore::new();
        let c = controller(&store, Arc::new(StaticGenerator::new("RESONANCE_OPTIMAL")));
        c.run_cycle_at(true, NOW).await;

        let recent = store.recent_activity(1).await.unwrap();
        assert_eq!(recent[0].kind, ActivityKind::SelfModifyCheck);
        assert_eq!(recent[0].outcome, "optimal");
    }

    #[tokio::test]
    async fn test_store_failure_fails_cycle_and_clears_flag() {
        let store = InMemorySignalStore::new();
        store.set_failing(true);
        let c = controller(&store, Arc::new(StaticGenerator::new("x")));
        assert!(matches!(c.run_cycle_at(true, NOW).await, CycleOutcome::Failed { .. }));
        assert!(!c.is_running());
    }

    #[tokio::test]
    async fn test_concurrent_call_returns_already_running() {
        let store = InMemorySignalStore::new();
        let c = controller(&store, Arc::new(StaticGenerator::new("RESONANCE_OPTIMAL")));
        let _held = InFlightGuard::acquire(&c.in_flight).unwrap();
        assert_eq!(c.run_cycle_at(true, NOW).await, CycleOutcome::AlreadyRunning);
        assert!(store.recent_activity(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_truncates_long_fields() {
        let store = InMemorySignalStore::new();
        let long = "r".repeat(2_000);
        let text = format!(
            "STATUS: EVOLVED\nRATIONALE: {long}\nDELTA: d\n<soul>\n{}\n</soul>",
            valid_body()
        );
        let c = controller(&store, Arc::new(StaticGenerator::new(text)));
        c.run_cycle_at(true, NOW).await;
        let record = &store.self_modifications(1).await.unwrap()[0];
        assert_eq!(record.rationale.chars().count(), 500);
    }

    #[tokio::test]
    async fn test_load_active_body_hydrates_from_store() {
        let store = InMemorySignalStore::new();
        store.store_active_configuration("# Identity\npersisted").await.unwrap();
        let c = controller(&store, Arc::new(StaticGenerator::new("x")));
        assert!(c.load_active_body().await.unwrap());
        assert_eq!(c.current_body(), "# Identity\npersisted");
    }

    #[tokio::test]
    async fn test_begin_stabilization_sets_shared_handle() {
        let store = InMemorySignalStore::new();
        let c = controller(&store, Arc::new(StaticGenerator::new("x")));
        let handle = c.stabilization();
        c.begin_stabilization(Duration::from_secs(600));
        assert!(handle.is_active_at(unix_now()));
    }
}
