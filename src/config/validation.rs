//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`GovernorConfig`] that cannot
//! be expressed through the type system alone (ascending thresholds, clamp
//! bounds, positive factors).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value

use super::GovernorConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "engagement.high_threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`GovernorConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns every violation found.
pub fn validate(config: &GovernorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Engagement ───────────────────────────────────────────────────
    let eng = &config.engagement;
    if eng.window_minutes == 0 {
        errors.push(invalid("engagement.window_minutes", 0, "must be at least 1"));
    }
    if eng.moderate_threshold >= eng.high_threshold {
        errors.push(invalid(
            "engagement.moderate_threshold",
            eng.moderate_threshold,
            "must be < high_threshold",
        ));
    }
    if eng.rapid.window_minutes == 0 {
        errors.push(invalid("engagement.rapid.window_minutes", 0, "must be at least 1"));
    }
    if eng.rapid.moderate_threshold >= eng.rapid.high_threshold {
        errors.push(invalid(
            "engagement.rapid.moderate_threshold",
            eng.rapid.moderate_threshold,
            "must be < rapid.high_threshold",
        ));
    }

    // ── Gates ────────────────────────────────────────────────────────
    let gates = &config.gates;
    if gates.synthesis_cooldown_hours < 0.0 {
        errors.push(invalid(
            "gates.synthesis_cooldown_hours",
            gates.synthesis_cooldown_hours,
            "must not be negative",
        ));
    }
    if gates.declining_post_cooldown_hours < 0.0 {
        errors.push(invalid(
            "gates.declining_post_cooldown_hours",
            gates.declining_post_cooldown_hours,
            "must not be negative",
        ));
    }
    if gates.momentum_delta_threshold < 0.0 {
        errors.push(invalid(
            "gates.momentum_delta_threshold",
            gates.momentum_delta_threshold,
            "must not be negative",
        ));
    }

    // ── Rate limiting ────────────────────────────────────────────────
    let adaptive = &config.rate_limit.adaptive;
    if adaptive.window_minutes == 0 {
        errors.push(invalid("rate_limit.adaptive.window_minutes", 0, "must be at least 1"));
    }
    if adaptive.low_engagement_threshold > adaptive.high_engagement_threshold {
        errors.push(invalid(
            "rate_limit.adaptive.low_engagement_threshold",
            adaptive.low_engagement_threshold,
            "must be \u{2264} high_engagement_threshold",
        ));
    }
    for (field, factor) in [
        ("rate_limit.adaptive.silence_factor", adaptive.silence_factor),
        ("rate_limit.adaptive.high_factor", adaptive.high_factor),
        ("rate_limit.adaptive.low_factor", adaptive.low_factor),
    ] {
        if !(factor > 0.0 && factor.is_finite()) {
            errors.push(invalid(field, factor, "must be a positive finite number"));
        }
    }
    if adaptive.post_min_secs > adaptive.post_max_secs {
        errors.push(invalid(
            "rate_limit.adaptive.post_min_secs",
            adaptive.post_min_secs,
            "must be \u{2264} post_max_secs",
        ));
    }
    if adaptive.comment_min_secs > adaptive.comment_max_secs {
        errors.push(invalid(
            "rate_limit.adaptive.comment_min_secs",
            adaptive.comment_min_secs,
            "must be \u{2264} comment_max_secs",
        ));
    }

    // ── Self-modification ────────────────────────────────────────────
    let sm = &config.self_modify;
    if sm.min_cooldown_hours < 0.0 {
        errors.push(invalid(
            "self_modify.min_cooldown_hours",
            sm.min_cooldown_hours,
            "must not be negative",
        ));
    }
    if sm.nudge_after_hours < 0.0 {
        errors.push(invalid(
            "self_modify.nudge_after_hours",
            sm.nudge_after_hours,
            "must not be negative",
        ));
    }
    if !(0.0..=2.0).contains(&sm.temperature) {
        errors.push(invalid(
            "self_modify.temperature",
            sm.temperature,
            "must be between 0.0 and 2.0",
        ));
    }
    if sm.max_tokens == 0 {
        errors.push(invalid("self_modify.max_tokens", 0, "must be at least 1"));
    }
    if sm.required_headers.is_empty() {
        errors.push(invalid(
            "self_modify.required_headers",
            "[]",
            "at least the identity header is required",
        ));
    }
    if sm.required_headers.iter().any(|h| h.trim().is_empty()) {
        errors.push(invalid(
            "self_modify.required_headers",
            format!("{:?}", sm.required_headers),
            "headers must not be blank",
        ));
    }
    for (field, limit) in [
        ("self_modify.max_rationale_chars", sm.max_rationale_chars),
        ("self_modify.max_delta_chars", sm.max_delta_chars),
        ("self_modify.max_body_chars", sm.max_body_chars),
    ] {
        if limit == 0 {
            errors.push(invalid(field, 0, "must be at least 1"));
        }
    }
    if sm.max_body_chars < sm.min_body_chars {
        errors.push(invalid(
            "self_modify.max_body_chars",
            sm.max_body_chars,
            "must be \u{2265} min_body_chars",
        ));
    }
    if sm.optimal_sentinel.trim().is_empty() {
        errors.push(invalid(
            "self_modify.optimal_sentinel",
            String::new(),
            "sentinel must not be empty",
        ));
    }
    if sm.cycle_interval_secs == 0 {
        errors.push(invalid("self_modify.cycle_interval_secs", 0, "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
