//! Layered extraction of a proposal from unstructured model output.
//!
//! The body is taken from the first pattern that matches:
//! 1. `<soul>…</soul>`
//! 2. `SOUL:` label followed by a fenced block
//! 3. any fenced block containing the leading marker
//! 4. `SOUL:` label to the end of the text
//! 5. the text from the first occurrence of the leading marker
//!
//! Status, rationale and delta come from `<status>`-style tags or
//! `STATUS:`-style lines. Status text is normalised by case-insensitive
//! substring rules; see [`normalize_status`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[allow(clippy::panic)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid proposal regex {pattern}: {err}"))
}

static SOUL_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<soul>\s*(.*?)\s*</soul>"));
static SOUL_LABEL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?is)SOUL:\s*```[a-z]*[ \t]*\r?\n(.*?)```"));
static FENCE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)```[a-zA-Z]*[ \t]*\r?\n(.*?)```"));
static SOUL_LABEL_TAIL: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)SOUL:[ \t]*(.+)$"));

/// Which pattern produced the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySource {
    /// `<soul>` block.
    Tagged,
    /// `SOUL:` label with a fenced block.
    LabelledFence,
    /// Fenced block containing the leading marker.
    MarkerFence,
    /// `SOUL:` label to end of text.
    LabelledTail,
    /// Scan from the leading marker.
    MarkerScan,
}

/// Normalised proposal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// No change needed.
    Optimal,
    /// A replacement body is proposed.
    Evolved,
    /// Status missing or unrecognised.
    Unknown,
}

/// Everything extracted from one model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedProposal {
    /// Normalised status.
    pub status: ProposalStatus,
    /// Why the change is proposed.
    pub rationale: Option<String>,
    /// What changed.
    pub delta: Option<String>,
    /// Candidate replacement body. Always `None` when `status` is `Optimal`.
    pub body: Option<String>,
    /// Pattern that produced `body`.
    pub source: Option<BodySource>,
}

/// Map free-text status onto [`ProposalStatus`].
///
/// Contains the sentinel or "optimal" → `Optimal`; contains "evolv",
/// "modif", "updat" or "chang" → `Evolved`; otherwise `Unknown`.
pub fn normalize_status(text: &str, sentinel: &str) -> ProposalStatus {
    let lower = text.to_lowercase();
    if lower.contains(&sentinel.to_lowercase()) || lower.contains("optimal") {
        ProposalStatus::Optimal
    } else if ["evolv", "modif", "updat", "chang"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ProposalStatus::Evolved
    } else {
        ProposalStatus::Unknown
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Value of `<name>…</name>` or of a `NAME:` line, tag preferred.
fn field(text: &str, name: &str) -> Option<String> {
    let tag = Regex::new(&format!(r"(?is)<{name}>\s*(.*?)\s*</{name}>")).ok()?;
    if let Some(value) = tag.captures(text).and_then(|c| c.get(1)) {
        if let Some(v) = non_empty(value.as_str()) {
            return Some(v);
        }
    }
    let line = Regex::new(&format!(r"(?im)^[ \t*_]*{name}[*_]*:[ \t]*(.+)$")).ok()?;
    line.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| non_empty(m.as_str()))
}

fn strip_trailing_fence(s: &str) -> &str {
    let trimmed = s.trim_end();
    trimmed.strip_suffix("```").unwrap_or(trimmed)
}

fn extract_body(text: &str, leading_marker: &str) -> Option<(String, BodySource)> {
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| non_empty(m.as_str()))
    };

    if let Some(body) = capture(&SOUL_TAG) {
        return Some((body, BodySource::Tagged));
    }
    if let Some(body) = capture(&SOUL_LABEL_FENCE) {
        return Some((body, BodySource::LabelledFence));
    }
    if let Some(body) = FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find(|m| m.as_str().contains(leading_marker))
        .and_then(|m| non_empty(m.as_str()))
    {
        return Some((body, BodySource::MarkerFence));
    }
    if let Some(body) = SOUL_LABEL_TAIL
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| non_empty(strip_trailing_fence(m.as_str())))
    {
        return Some((body, BodySource::LabelledTail));
    }
    text.find(leading_marker)
        .and_then(|idx| non_empty(strip_trailing_fence(&text[idx..])))
        .map(|body| (body, BodySource::MarkerScan))
}

/// Extract status, rationale, delta and body from `text`.
///
/// `leading_marker` is the header every valid body starts with. A response
/// with no status field that mentions `sentinel` is treated as `Optimal`.
pub fn parse_proposal(text: &str, leading_marker: &str, sentinel: &str) -> ParsedProposal {
    let status = match field(text, "status") {
        Some(raw) => normalize_status(&raw, sentinel),
        None if text.to_lowercase().contains(&sentinel.to_lowercase()) => ProposalStatus::Optimal,
        None => ProposalStatus::Unknown,
    };
    let rationale = field(text, "rationale");
    let delta = field(text, "delta");

    let (body, source) = if status == ProposalStatus::Optimal {
        (None, None)
    } else {
        match extract_body(text, leading_marker) {
            Some((body, source)) => (Some(body), Some(source)),
            None => (None, None),
        }
    };

    ParsedProposal {
        status,
        rationale,
        delta,
        body,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "# Identity";
    const SENTINEL: &str = "RESONANCE_OPTIMAL";

    fn parse(text: &str) -> ParsedProposal {
        parse_proposal(text, MARKER, SENTINEL)
    }

    #[test]
    fn test_tagged_block_with_tagged_fields() {
        let p = parse(
            "<status>EVOLVED</status>\n<rationale>tone drift</rationale>\n\
             <delta>softer voice</delta>\n<soul>\n# Identity\nbody\n</soul>",
        );
        assert_eq!(p.status, ProposalStatus::Evolved);
        assert_eq!(p.rationale.as_deref(), Some("tone drift"));
        assert_eq!(p.delta.as_deref(), Some("softer voice"));
        assert_eq!(p.body.as_deref(), Some("# Identity\nbody"));
        assert_eq!(p.source, Some(BodySource::Tagged));
    }

    #[test]
    fn test_label_lines_and_labelled_fence() {
        let p = parse(
            "STATUS: evolved\nRATIONALE: more focus\nDELTA: tightened mission\n\
             SOUL:\n```markdown\n# Identity\nx\n```\ntrailing chatter",
        );
        assert_eq!(p.status, ProposalStatus::Evolved);
        assert_eq!(p.rationale.as_deref(), Some("more focus"));
        assert_eq!(p.body.as_deref(), Some("# Identity\nx"));
        assert_eq!(p.source, Some(BodySource::LabelledFence));
    }

    #[test]
    fn test_fence_without_label_must_contain_marker() {
        let p = parse(
            "STATUS: changed\n```\nnot it\n```\n\n```md\n# Identity\nreal\n```",
        );
        assert_eq!(p.body.as_deref(), Some("# Identity\nreal"));
        assert_eq!(p.source, Some(BodySource::MarkerFence));
    }

    #[test]
    fn test_label_to_end_of_text() {
        let p = parse("STATUS: evolved\nSOUL: # Identity\n## Role\nrest");
        assert_eq!(p.body.as_deref(), Some("# Identity\n## Role\nrest"));
        assert_eq!(p.source, Some(BodySource::LabelledTail));
    }

    #[test]
    fn test_last_resort_marker_scan() {
        let p = parse("Here you go:\n\n# Identity\n## Role\nagent");
        assert_eq!(p.status, ProposalStatus::Unknown);
        assert_eq!(p.body.as_deref(), Some("# Identity\n## Role\nagent"));
        assert_eq!(p.source, Some(BodySource::MarkerScan));
    }

    #[test]
    fn test_bare_sentinel_is_optimal_without_body() {
        let p = parse("RESONANCE_OPTIMAL");
        assert_eq!(p.status, ProposalStatus::Optimal);
        assert!(p.body.is_none());
    }

    #[test]
    fn test_optimal_status_discards_body() {
        let p = parse("<status>optimal</status><soul># Identity\nbody</soul>");
        assert_eq!(p.status, ProposalStatus::Optimal);
        assert!(p.body.is_none());
        assert!(p.source.is_none());
    }

    #[test]
    fn test_nothing_extractable() {
        let p = parse("I am not sure what you want.");
        assert_eq!(p.status, ProposalStatus::Unknown);
        assert!(p.body.is_none());
    }

    #[test]
    fn test_normalize_status_rules() {
        assert_eq!(normalize_status("Resonance_Optimal", SENTINEL), ProposalStatus::Optimal);
        assert_eq!(normalize_status("already optimal", SENTINEL), ProposalStatus::Optimal);
        assert_eq!(normalize_status("EVOLVED", SENTINEL), ProposalStatus::Evolved);
        assert_eq!(normalize_status("Modified", SENTINEL), ProposalStatus::Evolved);
        assert_eq!(normalize_status("updated", SENTINEL), ProposalStatus::Evolved);
        assert_eq!(normalize_status("???", SENTINEL), ProposalStatus::Unknown);
    }

    #[test]
    fn test_markdown_bold_label_line() {
        let p = parse("**RATIONALE**: bold label\n<soul># Identity</soul>");
        assert_eq!(p.rationale.as_deref(), Some("bold label"));
    }
}
