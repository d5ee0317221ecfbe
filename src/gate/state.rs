//! # Gate State
//!
//! Point-in-time snapshot of the signals the gate pipeline consumes, and the
//! computer that derives it from a [`SignalStore`].
//!
//! ## Responsibility
//! Read engagement density, the latest synthesis, mission-phase inputs,
//! resonance momentum and self-modification history; bucket each into the
//! enumerated values of [`GateState`].
//!
//! ## Guarantees
//! - [`GateStateComputer::compute`] never fails: each signal collapses to its
//!   fail-safe default independently when its read fails
//! - The momentum cache is a field of the computer, single-writer, reset by
//!   constructing a new computer
//! - The snapshot is a plain value; evaluating many contexts against it is safe
//!
//! ## NOT Responsible For
//! - Deciding anything (see [`super::pipeline`])
//! - Writing to the store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{EffectiveEngagement, GateThresholds, GovernorConfig};
use crate::metrics;
use crate::signals::{ActivityKind, SignalStore, StoreError, TopologyTotals};
use crate::{hours_between, unix_now};

// ─── Enumerations ────────────────────────────────────────────────────────────

/// Recent public activity bucketed against the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementDensity {
    /// Below the moderate threshold.
    Low,
    /// At or above moderate, below high.
    Moderate,
    /// At or above the high threshold.
    High,
}

/// What the latest synthesis recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Implication {
    /// Keep doing what works.
    Reinforce,
    /// No strong signal.
    Watch,
    /// Do less of something.
    Deprioritise,
    /// Change course.
    Correct,
}

/// Maturity bucket of the agent's network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectivePhase {
    /// Score below 34.
    Early,
    /// Score below 67.
    Mid,
    /// Score 67 and above.
    Late,
}

/// Direction of the aggregate resonance score since the previous computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResonanceMomentum {
    /// Dropped by more than the delta threshold.
    Declining,
    /// Within the delta threshold, or first observation.
    Stable,
    /// Grew by more than the delta threshold.
    Rising,
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Ephemeral snapshot of every gate input. Recomputed each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    /// Bucketed recent engagement.
    pub engagement_density: EngagementDensity,
    /// Normalised implication of the latest synthesis.
    pub last_synthesis_implication: Implication,
    /// A synthesis was produced within the cooldown window.
    pub synthesis_cooldown_active: bool,
    /// Mission-phase bucket.
    pub objective_phase: ObjectivePhase,
    /// Composite mission-phase score in `[0, 100]`.
    pub objective_score: u8,
    /// Resonance direction.
    pub resonance_momentum: ResonanceMomentum,
    /// A self-modification was committed within the quiet period.
    pub self_modification_cooldown_active: bool,
    /// An operator or incident freeze is in force.
    pub stabilization_active: bool,
    /// Unix timestamp the snapshot was taken at.
    pub computed_at_secs: u64,
}

impl GateState {
    /// The all-defaults snapshot used when every signal read fails.
    pub fn baseline(computed_at_secs: u64) -> Self {
        Self {
            engagement_density: EngagementDensity::Low,
            last_synthesis_implication: Implication::Watch,
            synthesis_cooldown_active: false,
            objective_phase: ObjectivePhase::Early,
            objective_score: 0,
            resonance_momentum: ResonanceMomentum::Stable,
            self_modification_cooldown_active: false,
            stabilization_active: false,
            computed_at_secs,
        }
    }
}

// ─── Pure classifiers ────────────────────────────────────────────────────────

/// Bucket an activity count against ascending thresholds.
pub fn classify_density(count: u64, moderate: u64, high: u64) -> EngagementDensity {
    if count >= high {
        EngagementDensity::High
    } else if count >= moderate {
        EngagementDensity::Moderate
    } else {
        EngagementDensity::Low
    }
}

/// Map a free-text implication label onto [`Implication`].
///
/// Case-insensitive substring match; unknown text is `Watch`.
pub fn normalize_implication(text: &str) -> Implication {
    let lower = text.to_lowercase();
    if lower.contains("reinforce") {
        Implication::Reinforce
    } else if lower.contains("deprioritise") || lower.contains("deprioritize") {
        Implication::Deprioritise
    } else if lower.contains("correct") {
        Implication::Correct
    } else {
        Implication::Watch
    }
}

/// Raw counts feeding the mission-phase score.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseInputs {
    /// Non-quarantined peers.
    pub peers: u64,
    /// Communities created.
    pub submolts: u64,
    /// Posts published.
    pub posts: u64,
    /// Comments published.
    pub comments: u64,
    /// Vote and reply totals.
    pub totals: TopologyTotals,
}

fn capped(weight: f64, count: u64) -> f64 {
    (weight * count as f64).min(100.0)
}

/// Network-growth component in `[0, 100]`.
pub fn structural_score(inputs: &PhaseInputs) -> f64 {
    capped(5.0, inputs.peers) * 0.55
        + capped(25.0, inputs.submolts) * 0.30
        + capped(2.0, inputs.posts) * 0.10
        + capped(1.0, inputs.comments) * 0.05
}

/// Validation-quality component in `[0, 100]`.
pub fn quality_score(totals: &TopologyTotals) -> f64 {
    let up = totals.upvotes as f64;
    let down = totals.downvotes as f64;
    let replies = totals.replies as f64;

    let precision = if up + down > 0.0 { up / (up + down) } else { 0.5 };
    let resonant = up + 2.0 * replies;
    let resonance_ratio = if resonant + down > 0.0 {
        resonant / (resonant + down)
    } else {
        0.5
    };
    (precision * 0.5 + resonance_ratio * 0.5) * 100.0
}

/// Blend the two components into the final rounded score.
pub fn blend_phase_score(structural: f64, quality: f64) -> u8 {
    (structural * 0.55 + quality * 0.45).round().clamp(0.0, 100.0) as u8
}

/// Composite mission-phase score in `[0, 100]`.
pub fn objective_phase_score(inputs: &PhaseInputs) -> u8 {
    blend_phase_score(structural_score(inputs), quality_score(&inputs.totals))
}

/// Bucket a mission-phase score.
pub fn classify_phase(score: u8) -> ObjectivePhase {
    match score {
        0..=33 => ObjectivePhase::Early,
        34..=66 => ObjectivePhase::Mid,
        _ => ObjectivePhase::Late,
    }
}

/// Compare the current resonance sum with the previous one.
///
/// No previous observation is always `Stable`.
pub fn classify_momentum(previous: Option<f64>, current: f64, threshold: f64) -> ResonanceMomentum {
    let Some(previous) = previous else {
        return ResonanceMomentum::Stable;
    };
    let delta = current - previous;
    if delta > threshold {
        ResonanceMomentum::Rising
    } else if delta < -threshold {
        ResonanceMomentum::Declining
    } else {
        ResonanceMomentum::Stable
    }
}

// ─── Stabilization ───────────────────────────────────────────────────────────

/// Shared stabilization deadline.
///
/// Cloning shares the same deadline. Zero means no freeze.
#[derive(Debug, Clone, Default)]
pub struct StabilizationHandle {
    until_secs: Arc<AtomicU64>,
}

impl StabilizationHandle {
    /// A handle with no freeze in force.
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze until `now_secs + duration_secs`. Never shortens an existing freeze.
    pub fn begin(&self, now_secs: u64, duration_secs: u64) {
        let until = now_secs.saturating_add(duration_secs);
        self.until_secs.fetch_max(until, Ordering::SeqCst);
    }

    /// Lift the freeze.
    pub fn clear(&self) {
        self.until_secs.store(0, Ordering::SeqCst);
    }

    /// Deadline of the current freeze, if any was set.
    pub fn until(&self) -> Option<u64> {
        match self.until_secs.load(Ordering::SeqCst) {
            0 => None,
            until => Some(until),
        }
    }

    /// Whether the freeze is in force at `now_secs`.
    pub fn is_active_at(&self, now_secs: u64) -> bool {
        self.until_secs.load(Ordering::SeqCst) > now_secs
    }
}

// ─── Computer ────────────────────────────────────────────────────────────────

/// A signal read that failed, naming the signal.
#[derive(Debug, Error)]
#[error("failed to read {signal}: {source}")]
pub struct ReadFailure {
    /// Which signal could not be read.
    pub signal: &'static str,
    /// The underlying store error.
    #[source]
    pub source: StoreError,
}

fn read<T>(signal: &'static str, result: Result<T, StoreError>) -> Result<T, ReadFailure> {
    result.map_err(|source| ReadFailure { signal, source })
}

/// Derives [`GateState`] snapshots from a [`SignalStore`].
pub struct GateStateComputer {
    store: Arc<dyn SignalStore>,
    engagement: EffectiveEngagement,
    thresholds: GateThresholds,
    quiet_hours: f64,
    stabilization: StabilizationHandle,
    last_resonance_score: Mutex<Option<f64>>,
}

impl GateStateComputer {
    /// Build a computer over `store` using the thresholds in `config`.
    pub fn new(
        store: Arc<dyn SignalStore>,
        config: &GovernorConfig,
        stabilization: StabilizationHandle,
    ) -> Self {
        Self {
            store,
            engagement: config.engagement.effective(),
            thresholds: config.gates.clone(),
            quiet_hours: config.self_modify.post_commit_quiet_hours,
            stabilization,
            last_resonance_score: Mutex::new(None),
        }
    }

    /// The resonance sum observed by the previous computation.
    pub fn last_resonance_score(&self) -> Option<f64> {
        *self.last_resonance_score.lock()
    }

    /// Forget the cached resonance sum.
    pub fn reset_momentum(&self) {
        *self.last_resonance_score.lock() = None;
    }

    /// Compute a snapshot now, with fail-safe defaults for failed reads.
    pub async fn compute(&self) -> GateState {
        self.compute_at(unix_now()).await
    }

    /// Compute a snapshot at `now`, with fail-safe defaults for failed reads.
    pub async fn compute_at(&self, now: u64) -> GateState {
        let baseline = GateState::baseline(now);

        let engagement_density =
            fallback(self.read_density(now).await, baseline.engagement_density);
        let (last_synthesis_implication, synthesis_cooldown_active) = fallback(
            self.read_synthesis(now).await,
            (baseline.last_synthesis_implication, baseline.synthesis_cooldown_active),
        );
        let (objective_phase, objective_score) = fallback(
            self.read_phase().await,
            (baseline.objective_phase, baseline.objective_score),
        );
        let self_modification_cooldown_active = fallback(
            self.read_self_mod_cooldown(now).await,
            baseline.self_modification_cooldown_active,
        );
        let resonance_momentum =
            fallback(self.read_momentum().await, baseline.resonance_momentum);

        let state = GateState {
            engagement_density,
            last_synthesis_implication,
            synthesis_cooldown_active,
            objective_phase,
            objective_score,
            resonance_momentum,
            self_modification_cooldown_active,
            stabilization_active: self.stabilization.is_active_at(now),
            computed_at_secs: now,
        };
        debug!(?state, "gate state computed");
        state
    }

    /// Compute a snapshot at `now`, surfacing the first failed read.
    ///
    /// # Errors
    ///
    /// Returns [`ReadFailure`] naming the first signal whose read failed.
    pub async fn try_compute_at(&self, now: u64) -> Result<GateState, ReadFailure> {
        let engagement_density = self.read_density(now).await?;
        let (last_synthesis_implication, synthesis_cooldown_active) =
            self.read_synthesis(now).await?;
        let (objective_phase, objective_score) = self.read_phase().await?;
        let self_modification_cooldown_active = self.read_self_mod_cooldown(now).await?;
        let resonance_momentum = self.read_momentum().await?;

        Ok(GateState {
            engagement_density,
            last_synthesis_implication,
            synthesis_cooldown_active,
            objective_phase,
            objective_score,
            resonance_momentum,
            self_modification_cooldown_active,
            stabilization_active: self.stabilization.is_active_at(now),
            computed_at_secs: now,
        })
    }

    /// [`try_compute_at`](Self::try_compute_at) with the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`ReadFailure`] naming the first signal whose read failed.
    pub async fn try_compute(&self) -> Result<GateState, ReadFailure> {
        self.try_compute_at(unix_now()).await
    }

    async fn read_density(&self, now: u64) -> Result<EngagementDensity, ReadFailure> {
        let since = now.saturating_sub(self.engagement.window_secs);
        let count = read(
            "engagement_density",
            self.store.count_actions(&ActivityKind::ENGAGEMENT, since).await,
        )?;
        Ok(classify_density(
            count,
            self.engagement.moderate,
            self.engagement.high,
        ))
    }

    async fn read_synthesis(&self, now: u64) -> Result<(Implication, bool), ReadFailure> {
        let latest = read("synthesis", self.store.latest_synthesis().await)?;
        Ok(match latest {
            Some(record) => (
                normalize_implication(&record.implication),
                hours_between(record.timestamp_secs, now)
                    < self.thresholds.synthesis_cooldown_hours,
            ),
            None => (Implication::Watch, false),
        })
    }

    async fn read_phase(&self) -> Result<(ObjectivePhase, u8), ReadFailure> {
        const SIGNAL: &str = "objective_phase";
        let inputs = PhaseInputs {
            peers: read(SIGNAL, self.store.count_peers().await)?,
            submolts: read(SIGNAL, self.store.count_submolts_created().await)?,
            posts: read(SIGNAL, self.store.count_posts_created().await)?,
            comments: read(SIGNAL, self.store.count_comments_created().await)?,
            totals: read(SIGNAL, self.store.topology_totals().await)?,
        };
        let score = objective_phase_score(&inputs);
        Ok((classify_phase(score), score))
    }

    async fn read_self_mod_cooldown(&self, now: u64) -> Result<bool, ReadFailure> {
        let latest = read(
            "self_modification_cooldown",
            self.store.latest_self_modification_at().await,
        )?;
        Ok(latest.is_some_and(|at| hours_between(at, now) < self.quiet_hours))
    }

    async fn read_momentum(&self) -> Result<ResonanceMomentum, ReadFailure> {
        let current = read("resonance_momentum", self.store.sum_topology_scores().await)?;
        let previous = self.last_resonance_score.lock().replace(current);
        Ok(classify_momentum(
            previous,
            current,
            self.thresholds.momentum_delta_threshold,
        ))
    }
}

fn fallback<T>(result: Result<T, ReadFailure>, default: T) -> T {
    result.unwrap_or_else(|failure| {
        warn!(
            signal = failure.signal,
            error = %failure.source,
            "signal read failed, using fail-safe default"
        );
        metrics::inc_signal_read_failure(failure.signal);
        default
    })
}
