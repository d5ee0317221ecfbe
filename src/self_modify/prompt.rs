//! Prompt builders for proposal and repair requests.

use std::fmt::Write as _;

use crate::config::SelfModifyConfig;
use crate::signals::{ActivityEntry, PeerSummary};

use super::validate::BodyDefect;

/// How much change the evidence supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceScope {
    /// Enough recent successes for a full rewrite.
    Full,
    /// Too few successes; small adjustments only.
    Incremental,
}

impl EvidenceScope {
    /// Pick the scope from a recent success count.
    pub fn from_successes(successes: u64, min_for_full: u64) -> Self {
        if successes >= min_for_full {
            EvidenceScope::Full
        } else {
            EvidenceScope::Incremental
        }
    }

    /// Lowercase label used in prompts and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceScope::Full => "full",
            EvidenceScope::Incremental => "incremental",
        }
    }
}

/// Evidence gathered for one proposal.
#[derive(Debug, Clone)]
pub struct ProposalInputs<'a> {
    /// The active configuration body.
    pub current_body: &'a str,
    /// Highest-resonance peers.
    pub peers: &'a [PeerSummary],
    /// Recent action outcomes, newest first.
    pub activity: &'a [ActivityEntry],
    /// Recent memory snippets, newest first.
    pub memories: &'a [String],
    /// Evidence scope.
    pub scope: EvidenceScope,
}

/// Build the proposal prompt.
pub fn build_proposal_prompt(inputs: &ProposalInputs<'_>, config: &SelfModifyConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Review the agent configuration below against recent evidence and decide \
         whether it should change.\n"
    );
    let _ = writeln!(out, "## Current configuration\n<current>\n{}\n</current>\n", inputs.current_body);

    let _ = writeln!(out, "## Top peers");
    if inputs.peers.is_empty() {
        let _ = writeln!(out, "- none yet");
    }
    for p in inputs.peers {
        let _ = writeln!(
            out,
            "- {} (score {:.1}, {} upvotes, {} replies)",
            p.peer, p.score, p.upvotes, p.replies
        );
    }

    let _ = writeln!(out, "\n## Recent outcomes");
    if inputs.activity.is_empty() {
        let _ = writeln!(out, "- none yet");
    }
    for a in inputs.activity {
        let _ = writeln!(
            out,
            "- {} {} -> {}{}",
            a.kind.as_str(),
            a.target.as_deref().unwrap_or("-"),
            a.outcome,
            if a.success { "" } else { " (failed)" }
        );
    }

    let _ = writeln!(out, "\n## Recent memories");
    if inputs.memories.is_empty() {
        let _ = writeln!(out, "- none yet");
    }
    for m in inputs.memories {
        let _ = writeln!(out, "- {m}");
    }

    let guidance = match inputs.scope {
        EvidenceScope::Full => "Evidence is strong: you may restructure any section.",
        EvidenceScope::Incremental => {
            "Evidence is thin: change at most one or two sentences and keep every section."
        }
    };
    let _ = writeln!(out, "\n## Evidence scope: {}\n{guidance}", inputs.scope.as_str());

    let _ = writeln!(
        out,
        "\n## Response format\n\
         If no change is needed, reply with exactly {sentinel}.\n\
         Otherwise reply with:\n\
         STATUS: EVOLVED\n\
         RATIONALE: <one paragraph>\n\
         DELTA: <one line describing the change>\n\
         <soul>\n<the complete new configuration>\n</soul>\n\n\
         The configuration must start with {headers}, contain the sections {sections}, \
         and be at least {min} characters long.",
        sentinel = config.optimal_sentinel,
        headers = config.required_headers.join(" then "),
        sections = config.required_sections.join(", "),
        min = config.min_body_chars,
    );
    out
}

/// Build the repair prompt for a candidate that failed validation.
pub fn build_repair_prompt(
    first_response: &str,
    candidate: &str,
    defect: &BodyDefect,
    config: &SelfModifyConfig,
) -> String {
    format!(
        "Your previous response could not be used: {defect}.\n\n\
         <previous_response>\n{first_response}\n</previous_response>\n\n\
         <candidate>\n{candidate}\n</candidate>\n\n\
         Reply with only the corrected configuration inside <soul></soul>. \
         It must start with {headers}, contain the sections {sections}, \
         and be at least {min} characters long.",
        headers = config.required_headers.join(" then "),
        sections = config.required_sections.join(", "),
        min = config.min_body_chars,
    )
}
