//! Autonomy gates: the signal snapshot and the ordered pipeline that turns a
//! desired action into a permitted one.
//!
//! [`state::GateStateComputer`] reads the store; [`pipeline::GatePipeline`] is
//! pure and synchronous.

pub mod pipeline;
pub mod state;

pub use pipeline::{
    apply_gates, Action, Confidence, DecisionContext, GateDecision, GateName, GatePipeline, Mode,
};
pub use state::{
    classify_density, classify_momentum, classify_phase, normalize_implication,
    objective_phase_score, EngagementDensity, GateState, GateStateComputer, Implication,
    ObjectivePhase, PhaseInputs, ReadFailure, ResonanceMomentum, StabilizationHandle,
};
