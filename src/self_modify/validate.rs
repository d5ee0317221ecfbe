//! Structural validation of candidate configuration bodies.

use thiserror::Error;

use crate::config::SelfModifyConfig;

/// Why a candidate body was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BodyDefect {
    /// No body could be extracted at all.
    #[error("no configuration body found")]
    Missing,

    /// Shorter than the configured minimum.
    #[error("body too short: {len} chars, need at least {min}")]
    TooShort {
        /// Actual length in chars.
        len: usize,
        /// Required minimum.
        min: usize,
    },

    /// A required leading header is absent or out of order.
    #[error("missing leading header '{0}'")]
    MissingHeader(String),

    /// A required section marker is absent.
    #[error("missing section '{0}'")]
    MissingSection(String),
}

/// Structural rules a body must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyRules {
    /// Minimum length in chars.
    pub min_chars: usize,
    /// Headers the body must open with, in order.
    pub required_headers: Vec<String>,
    /// Section markers that must start some line.
    pub required_sections: Vec<String>,
}

impl BodyRules {
    /// Rules taken from the self-modification config.
    pub fn from_config(config: &SelfModifyConfig) -> Self {
        Self {
            min_chars: config.min_body_chars,
            required_headers: config.required_headers.clone(),
            required_sections: config.required_sections.clone(),
        }
    }

    /// The header every body must start with.
    pub fn leading_marker(&self) -> &str {
        self.required_headers
            .first()
            .map_or("# Identity", String::as_str)
    }
}

fn starts_line(line: &str, marker: &str) -> bool {
    line.trim_start().starts_with(marker)
}

/// An ATX markdown header: one or more `#` then whitespace or end of line.
fn is_markdown_header(line: &str) -> bool {
    let line = line.trim_start();
    let rest = line.trim_start_matches('#');
    rest.len() < line.len() && (rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// Check `body` against `rules`.
///
/// The first header must be the first non-blank line; each further required
/// header must be the next markdown header after the previous one.
///
/// # Errors
///
/// Returns the first [`BodyDefect`] found.
pub fn validate_body(body: &str, rules: &BodyRules) -> Result<(), BodyDefect> {
    let len = body.trim().chars().count();
    if len == 0 {
        return Err(BodyDefect::Missing);
    }
    if len < rules.min_chars {
        return Err(BodyDefect::TooShort {
            len,
            min: rules.min_chars,
        });
    }

    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let mut headers = rules.required_headers.iter();
    if let Some(first) = headers.next() {
        if !lines.next().is_some_and(|l| starts_line(l, first)) {
            return Err(BodyDefect::MissingHeader(first.clone()));
        }
    }
    let mut header_lines = lines.filter(|l| is_markdown_header(l));
    for header in headers {
        if !header_lines.next().is_some_and(|l| starts_line(l, header)) {
            return Err(BodyDefect::MissingHeader(header.clone()));
        }
    }

    for section in &rules.required_sections {
        if !body.lines().any(|l| starts_line(l, section)) {
            return Err(BodyDefect::MissingSection(section.clone()));
        }
    }
    Ok(())
}

/// Cut `s` to at most `max` chars on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
