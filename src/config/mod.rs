//! # Governor Configuration
//!
//! ## Responsibility
//! Parse, validate, and hot-reload the TOML file holding every operating
//! parameter of the governor: engagement windows and thresholds, gate
//! cooldowns, adaptive rate limiting, and self-modification policy.
//!
//! ## Guarantees
//! - Total: every field has a documented default, so an empty file is valid
//! - Validated: semantic constraints are checked before a config is accepted
//! - Hot-reloadable: file changes are detected and validated before applying
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Applying a reloaded config to running components (callers decide)
//! - Storage of signals or the configuration body (that belongs to `signals`)

pub mod loader;
pub mod validation;
pub mod watcher;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::gate::Confidence;

// ── Default value functions ──────────────────────────────────────────────

/// Default engagement look-back window: 60 minutes.
fn default_engagement_window_minutes() -> u64 {
    60
}

/// Default synthesis cooldown: 6 hours.
fn default_synthesis_cooldown_hours() -> f64 {
    6.0
}

/// Default post cooldown after a declining-momentum signal: 12 hours.
fn default_declining_post_cooldown_hours() -> f64 {
    12.0
}

/// Default minimum hours between committed self-modifications.
fn default_min_cooldown_hours() -> f64 {
    6.0
}

/// Default configuration-body header lines, in required order.
fn default_required_headers() -> Vec<String> {
    vec!["# Identity".to_string(), "## Role".to_string()]
}

/// Default section markers every configuration body must contain.
fn default_required_sections() -> Vec<String> {
    vec![
        "## Mission".to_string(),
        "## Voice".to_string(),
        "## Boundaries".to_string(),
    ]
}

/// Default response marker meaning "no change needed".
fn default_optimal_sentinel() -> String {
    "RESONANCE_OPTIMAL".to_string()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a governor instance.
///
/// # Example
///
/// ```toml
/// [engagement]
/// window_minutes = 30
/// moderate_threshold = 2
/// high_threshold = 4
///
/// [self_modify]
/// min_cooldown_hours = 8.0
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GovernorConfig {
    /// Engagement-density window and thresholds.
    pub engagement: EngagementConfig,
    /// Cooldowns and thresholds used by the gate pipeline.
    pub gates: GateThresholds,
    /// Action cooldowns, daily limits, and adaptive scaling.
    pub rate_limit: RateLimitConfig,
    /// Self-modification cycle policy.
    pub self_modify: SelfModifyConfig,
    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

// ── Engagement ───────────────────────────────────────────────────────────

/// Engagement-density look-back window and bucket thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EngagementConfig {
    /// Look-back window for counting recent posts and comments.
    pub window_minutes: u64,
    /// Action count at or above which density is `moderate`.
    pub moderate_threshold: u64,
    /// Action count at or above which density is `high`.
    pub high_threshold: u64,
    /// Use the `rapid` overrides instead of the values above.
    pub rapid_mode: bool,
    /// Shortened window and thresholds for fast-iteration testing.
    pub rapid: RapidOverrides,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_engagement_window_minutes(),
            moderate_threshold: 3,
            high_threshold: 6,
            rapid_mode: false,
            rapid: RapidOverrides::default(),
        }
    }
}

/// Rapid-mode replacements for the engagement window and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RapidOverrides {
    /// Rapid-mode look-back window.
    pub window_minutes: u64,
    /// Rapid-mode `moderate` threshold.
    pub moderate_threshold: u64,
    /// Rapid-mode `high` threshold.
    pub high_threshold: u64,
}

impl Default for RapidOverrides {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            moderate_threshold: 2,
            high_threshold: 4,
        }
    }
}

/// Engagement parameters after rapid-mode resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveEngagement {
    /// Look-back window in seconds.
    pub window_secs: u64,
    /// `moderate` bucket threshold.
    pub moderate: u64,
    /// `high` bucket threshold.
    pub high: u64,
}

impl EngagementConfig {
    /// Resolve the window and thresholds in force, honouring `rapid_mode`.
    pub fn effective(&self) -> EffectiveEngagement {
        if self.rapid_mode {
            EffectiveEngagement {
                window_secs: self.rapid.window_minutes * 60,
                moderate: self.rapid.moderate_threshold,
                high: self.rapid.high_threshold,
            }
        } else {
            EffectiveEngagement {
                window_secs: self.window_minutes * 60,
                moderate: self.moderate_threshold,
                high: self.high_threshold,
            }
        }
    }
}

// ── Gates ────────────────────────────────────────────────────────────────

/// Thresholds read by the gate-state computer and the gate pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GateThresholds {
    /// A synthesis younger than this keeps the synthesis cooldown active.
    pub synthesis_cooldown_hours: f64,
    /// Minimum hours since the last post while resonance is declining.
    pub declining_post_cooldown_hours: f64,
    /// Confidence below this level downgrades any action.
    pub confidence_threshold: Confidence,
    /// Absolute change in summed topology score that counts as momentum.
    pub momentum_delta_threshold: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            synthesis_cooldown_hours: default_synthesis_cooldown_hours(),
            declining_post_cooldown_hours: default_declining_post_cooldown_hours(),
            confidence_threshold: Confidence::Medium,
            momentum_delta_threshold: 5.0,
        }
    }
}

// ── Rate limiting ────────────────────────────────────────────────────────

/// Base action cooldowns, daily limit, and backoff defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Base seconds between posts.
    pub post_cooldown_secs: u64,
    /// Base seconds between comments.
    pub comment_cooldown_secs: u64,
    /// Maximum comments per UTC calendar day.
    pub daily_comment_limit: u32,
    /// Backoff applied when a rejection carries no retry hint.
    pub default_backoff_secs: u64,
    /// Engagement-driven cooldown scaling.
    pub adaptive: AdaptiveConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            post_cooldown_secs: 1_800,
            comment_cooldown_secs: 20,
            daily_comment_limit: 50,
            default_backoff_secs: 300,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

/// Adaptive cooldown scaling driven by recent engagement volume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Whether cooldowns scale with engagement at all.
    pub enabled: bool,
    /// Window over which recent actions are counted.
    pub window_minutes: u64,
    /// Action count at or above which the `high_factor` applies.
    pub high_engagement_threshold: u64,
    /// Action count at or below which the `low_factor` applies (zero excluded).
    pub low_engagement_threshold: u64,
    /// Multiplier when no actions happened in the window.
    pub silence_factor: f64,
    /// Multiplier under high engagement.
    pub high_factor: f64,
    /// Multiplier under low engagement.
    pub low_factor: f64,
    /// Lower clamp for the scaled post cooldown.
    pub post_min_secs: u64,
    /// Upper clamp for the scaled post cooldown.
    pub post_max_secs: u64,
    /// Lower clamp for the scaled comment cooldown.
    pub comment_min_secs: u64,
    /// Upper clamp for the scaled comment cooldown.
    pub comment_max_secs: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_minutes: 60,
            high_engagement_threshold: 6,
            low_engagement_threshold: 1,
            silence_factor: 0.75,
            high_factor: 1.5,
            low_factor: 0.8,
            post_min_secs: 600,
            post_max_secs: 7_200,
            comment_min_secs: 10,
            comment_max_secs: 120,
        }
    }
}

// ── Self-modification ────────────────────────────────────────────────────

/// Policy for the periodic self-modification cycle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct SelfModifyConfig {
    /// Minimum hours between committed modifications (unless forced).
    pub min_cooldown_hours: f64,
    /// Hours after a commit during which the gate pipeline treats the agent
    /// as cooling down.
    pub post_commit_quiet_hours: f64,
    /// Hours after which a check-in runs even without enough activity.
    pub nudge_after_hours: f64,
    /// Qualifying actions needed before the nudge horizon is reached.
    pub min_activity_for_nudge: u64,
    /// Qualifying actions needed for a full-strength (non-incremental) rewrite.
    pub min_successes_for_full: u64,
    /// Token budget for the proposal and the repair request.
    pub max_tokens: u32,
    /// Sampling temperature for both requests.
    pub temperature: f32,
    /// Shortest acceptable configuration body, in characters.
    pub min_body_chars: usize,
    /// Header lines the body must open with, in order.
    pub required_headers: Vec<String>,
    /// Section markers the body must contain somewhere.
    pub required_sections: Vec<String>,
    /// Truncation limit for the committed rationale.
    pub max_rationale_chars: usize,
    /// Truncation limit for the committed delta summary.
    pub max_delta_chars: usize,
    /// Truncation limit for the committed body.
    pub max_body_chars: usize,
    /// Response status meaning "no change needed".
    pub optimal_sentinel: String,
    /// Seconds between scheduled cycles.
    pub cycle_interval_secs: u64,
    /// Peers summarised in the proposal prompt.
    pub prompt_peer_limit: usize,
    /// Recent actions summarised in the proposal prompt.
    pub prompt_activity_limit: usize,
    /// Memory snippets embedded in the proposal prompt.
    pub prompt_memory_limit: usize,
}

impl Default for SelfModifyConfig {
    fn default() -> Self {
        Self {
            min_cooldown_hours: default_min_cooldown_hours(),
            post_commit_quiet_hours: 2.0,
            nudge_after_hours: 24.0,
            min_activity_for_nudge: 3,
            min_successes_for_full: 10,
            max_tokens: 2_048,
            temperature: 0.2,
            min_body_chars: 200,
            required_headers: default_required_headers(),
            required_sections: default_required_sections(),
            max_rationale_chars: 500,
            max_delta_chars: 1_000,
            max_body_chars: 20_000,
            optimal_sentinel: default_optimal_sentinel(),
            cycle_interval_secs: 3_600,
            prompt_peer_limit: 5,
            prompt_activity_limit: 10,
            prompt_memory_limit: 5,
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging and metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format.
    pub log_format: LogFormat,
    /// Whether Prometheus counters are registered at startup.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Pick the format from a `LOG_FORMAT` value, falling back to
    /// `configured` when the variable is unset.
    ///
    /// Any set value other than `"json"` selects [`LogFormat::Pretty`].
    pub fn resolve(env: Option<&str>, configured: LogFormat) -> LogFormat {
        match env {
            Some("json") => LogFormat::Json,
            Some(_) => LogFormat::Pretty,
            None => configured,
        }
    }
}

/// Export the JSON Schema for [`GovernorConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_json_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(GovernorConfig);
    serde_json::to_string_pretty(&schema)
}
