//! # Self-Modification
//!
//! Periodic proposal, validation and commit of the agent's configuration
//! body.
//!
//! ## Module map
//! - [`prompt`]: proposal and repair prompts
//! - [`parse`]: layered extraction of status, rationale, delta, body
//! - [`validate`]: structural body rules and char-safe truncation
//! - [`controller`]: the single-flight cycle state machine

pub mod controller;
pub mod parse;
pub mod prompt;
pub mod validate;

use serde::Serialize;

use crate::signals::SelfModificationRecord;

pub use controller::{CycleOutcome, Ineligibility, SelfModificationController};
pub use parse::{normalize_status, parse_proposal, BodySource, ParsedProposal, ProposalStatus};
pub use prompt::{build_proposal_prompt, build_repair_prompt, EvidenceScope, ProposalInputs};
pub use validate::{truncate_chars, validate_body, BodyDefect, BodyRules};

/// Notifications broadcast by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernorEvent {
    /// A new configuration body was committed.
    SelfModified {
        /// The committed record.
        record: SelfModificationRecord,
    },
    /// A stabilization freeze began.
    StabilizationStarted {
        /// Unix timestamp the freeze lasts until.
        until_secs: u64,
    },
}
