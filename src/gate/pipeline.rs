//! # Decision Gate Pipeline
//!
//! Pure, total function from a [`GateState`] snapshot and a caller-supplied
//! [`DecisionContext`] to a [`GateDecision`]. Gates run in a fixed order and
//! can only downgrade the desired action to [`Action::Skip`]:
//!
//! 1. Stabilization / self-modification cooldown
//! 2. Conversational saturation
//! 3. Corrective cooldown
//! 4. Engagement density
//! 5. Implication
//! 6. Synthesis cooldown
//! 7. Objective phase
//! 8. Resonance momentum
//! 9. Uncertainty (only when every earlier gate passed)
//!
//! Gates 1–8 all judge the *desired* action so the audit trail lists every
//! rule that objected. Gates 2–3 share the `conversation` category and gates
//! 5–6 share the `synthesis` category; within a category only the first gate
//! that fires is recorded.
//!
//! ## Invariant
//! A non-empty `gates_triggered` always means the final action is `Skip`.
//! Observations that do not downgrade (a corrective comment permitted under
//! a `Correct` implication) go to `advisories` instead.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::state::{EngagementDensity, GateState, Implication, ObjectivePhase, ResonanceMomentum};
use crate::config::GateThresholds;
use crate::hours_between;

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// A public action the agent may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Reply to an existing thread.
    Comment,
    /// Start a new thread.
    Post,
    /// Do nothing this cycle.
    Skip,
}

impl Action {
    /// Stable uppercase name, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Comment => "COMMENT",
            Action::Post => "POST",
            Action::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream classifier confidence. Ordered `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Weak evidence.
    Low,
    /// Adequate evidence.
    Medium,
    /// Strong evidence.
    High,
}

/// Conversational register of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Pushes back on or corrects the counterpart.
    Corrective,
    /// Informational, no stance.
    Neutral,
    /// Agrees with or amplifies the counterpart.
    Supportive,
    /// Asks questions or opens a new direction.
    Exploratory,
}

/// Evidence about one candidate action, assembled by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    /// What the agent wants to do.
    pub desired_action: Action,
    /// How sure the upstream classifier is.
    pub confidence: Confidence,
    /// Register of the candidate content.
    pub mode: Option<Mode>,
    /// The surrounding thread is ambiguous.
    pub context_ambiguous: bool,
    /// The candidate draws on more than one independent source.
    pub multi_source_context: bool,
    /// The candidate adds something new to the conversation.
    pub novelty: bool,
    /// Operator override: permit low-novelty posts in the early phase.
    pub allow_low_novelty: bool,
    /// Operator override: ignore the synthesis cooldown for this post.
    pub ignore_synthesis_cooldown: bool,
    /// Unix timestamp of the agent's last post.
    pub last_post_at: Option<u64>,
    /// Prior exchanges with this counterpart in the thread.
    pub counterparty_interactions: u32,
    /// Register of the agent's previous reply to this counterpart.
    pub last_mode: Option<Mode>,
    /// The candidate reframes the discussion rather than repeating a point.
    pub new_frame: bool,
}

impl DecisionContext {
    /// A context with every optional signal unset.
    pub fn new(desired_action: Action, confidence: Confidence) -> Self {
        Self {
            desired_action,
            confidence,
            mode: None,
            context_ambiguous: false,
            multi_source_context: false,
            novelty: false,
            allow_low_novelty: false,
            ignore_synthesis_cooldown: false,
            last_post_at: None,
            counterparty_interactions: 0,
            last_mode: None,
            new_frame: false,
        }
    }

    /// Set the register of the candidate content.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the register of the previous reply and the exchange count.
    pub fn with_history(mut self, last_mode: Mode, counterparty_interactions: u32) -> Self {
        self.last_mode = Some(last_mode);
        self.counterparty_interactions = counterparty_interactions;
        self
    }
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// Name of a gate, as recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateName {
    /// Post-incident freeze is in force.
    #[serde(rename = "StabilizationGate")]
    Stabilization,
    /// A self-modification was committed recently.
    #[serde(rename = "SelfModificationCooldownGate")]
    SelfModificationCooldown,
    /// Too many corrective exchanges with one counterpart.
    #[serde(rename = "ConversationalSaturationGate")]
    ConversationalSaturation,
    /// Back-to-back corrective replies without a new frame.
    #[serde(rename = "CorrectiveCooldownGate")]
    CorrectiveCooldown,
    /// Global throttle under high engagement.
    #[serde(rename = "EngagementDensityGate")]
    EngagementDensity,
    /// Latest synthesis says the agent should correct course.
    #[serde(rename = "ImplicationGate")]
    Implication,
    /// A synthesis was produced recently.
    #[serde(rename = "SynthesisCooldownGate")]
    SynthesisCooldown,
    /// Early-phase posts need novelty and multi-source grounding.
    #[serde(rename = "ObjectivePhaseGate")]
    ObjectivePhase,
    /// Declining resonance and a recent post.
    #[serde(rename = "ResonanceMomentumGate")]
    ResonanceMomentum,
    /// Confidence too low or context ambiguous.
    #[serde(rename = "UncertaintyGate")]
    Uncertainty,
    /// Time-based cooldown, daily limit, or platform backoff.
    #[serde(rename = "RateLimiterGate")]
    RateLimiter,
}

impl GateName {
    /// Audit-trail name.
    pub fn as_str(self) -> &'static str {
        match self {
            GateName::Stabilization => "StabilizationGate",
            GateName::SelfModificationCooldown => "SelfModificationCooldownGate",
            GateName::ConversationalSaturation => "ConversationalSaturationGate",
            GateName::CorrectiveCooldown => "CorrectiveCooldownGate",
            GateName::EngagementDensity => "EngagementDensityGate",
            GateName::Implication => "ImplicationGate",
            GateName::SynthesisCooldown => "SynthesisCooldownGate",
            GateName::ObjectivePhase => "ObjectivePhaseGate",
            GateName::ResonanceMomentum => "ResonanceMomentumGate",
            GateName::Uncertainty => "UncertaintyGate",
            GateName::RateLimiter => "RateLimiterGate",
        }
    }
}

impl fmt::Display for GateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running the gate pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// The action the agent may take.
    pub action: Action,
    /// Gates that downgraded the action, in pipeline order.
    pub gates_triggered: Vec<GateName>,
    /// Gates that observed the action but let it through.
    pub advisories: Vec<GateName>,
    /// Human-readable summary; use `gates_triggered` for detail.
    pub rationale: String,
}

impl GateDecision {
    /// A decision that downgrades to `Skip` because of `gates`.
    pub fn constrained(gates: Vec<GateName>, advisories: Vec<GateName>) -> Self {
        let names: Vec<&str> = gates.iter().map(|g| g.as_str()).collect();
        Self {
            action: Action::Skip,
            rationale: format!("constrained by autonomy gates: {}", names.join(", ")),
            gates_triggered: gates,
            advisories,
        }
    }

    /// Whether any gate downgraded the action.
    pub fn is_constrained(&self) -> bool {
        !self.gates_triggered.is_empty()
    }

    /// Whether `gate` is in the audit trail.
    pub fn triggered(&self, gate: GateName) -> bool {
        self.gates_triggered.contains(&gate)
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// The ordered gate pipeline, parameterised by its thresholds.
#[derive(Debug, Clone, Default)]
pub struct GatePipeline {
    thresholds: GateThresholds,
}

impl GatePipeline {
    /// Create a pipeline using the given thresholds.
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in force.
    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Run every gate against `ctx`.
    ///
    /// Never panics; always returns a decision.
    pub fn apply(&self, state: &GateState, ctx: &DecisionContext) -> GateDecision {
        let desired = ctx.desired_action;
        if desired == Action::Skip {
            return GateDecision {
                action: Action::Skip,
                gates_triggered: Vec::new(),
                advisories: Vec::new(),
                rationale: "no action requested".to_string(),
            };
        }

        let is_post = desired == Action::Post;
        let is_comment = desired == Action::Comment;
        let mut triggered = Vec::new();
        let mut advisories = Vec::new();

        // 1. Stabilization takes precedence over the self-modification cooldown.
        if state.stabilization_active || state.self_modification_cooldown_active {
            let exempt_comment = is_comment
                && matches!(ctx.mode, Some(Mode::Corrective | Mode::Neutral))
                && ctx.confidence == Confidence::High;
            if is_post || !exempt_comment {
                triggered.push(if state.stabilization_active {
                    GateName::Stabilization
                } else {
                    GateName::SelfModificationCooldown
                });
            }
        }

        // 2–3. Conversation category.
        let last_was_corrective = ctx.last_mode == Some(Mode::Corrective);
        if is_comment && ctx.counterparty_interactions >= 2 && last_was_corrective {
            triggered.push(GateName::ConversationalSaturation);
        } else if is_comment
            && last_was_corrective
            && ctx.mode == Some(Mode::Corrective)
            && !ctx.new_frame
        {
            triggered.push(GateName::CorrectiveCooldown);
        }

        // 4. Global throttle.
        if state.engagement_density == EngagementDensity::High {
            triggered.push(GateName::EngagementDensity);
        }

        // 5–6. Synthesis category.
        if state.last_synthesis_implication == Implication::Correct {
            if is_post || ctx.mode != Some(Mode::Corrective) {
                triggered.push(GateName::Implication);
            } else {
                advisories.push(GateName::Implication);
            }
        } else if is_post && state.synthesis_cooldown_active && !ctx.ignore_synthesis_cooldown {
            triggered.push(GateName::SynthesisCooldown);
        }

        // 7. Early phase demands novelty and grounding.
        if is_post
            && state.objective_phase == ObjectivePhase::Early
            && !((ctx.novelty || ctx.allow_low_novelty) && ctx.multi_source_context)
        {
            triggered.push(GateName::ObjectivePhase);
        }

        // 8. Declining resonance right after a post.
        if is_post && state.resonance_momentum == ResonanceMomentum::Declining {
            let recent_post = ctx.last_post_at.is_some_and(|at| {
                hours_between(at, state.computed_at_secs)
                    < self.thresholds.declining_post_cooldown_hours
            });
            if recent_post {
                triggered.push(GateName::ResonanceMomentum);
            }
        }

        // 9. Final safety net for whatever survived.
        if triggered.is_empty()
            && (ctx.confidence < self.thresholds.confidence_threshold || ctx.context_ambiguous)
        {
            triggered.push(GateName::Uncertainty);
        }

        if triggered.is_empty() {
            GateDecision {
                action: desired,
                gates_triggered: triggered,
                advisories,
                rationale: format!("{desired} approved"),
            }
        } else {
            GateDecision::constrained(triggered, advisories)
        }
    }
}

/// Run the pipeline with default thresholds.
pub fn apply_gates(state: &GateState, ctx: &DecisionContext) -> GateDecision {
    GatePipeline::default().apply(state, ctx)
}
