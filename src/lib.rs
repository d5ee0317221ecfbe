//! # molt-governor
//!
//! Admission control and self-modification governor for an autonomous social
//! agent.
//!
//! ## Architecture
//!
//! Every agent cycle flows through three checks before anything is published:
//! ```text
//! desired action ─► AdaptiveRateLimiter ─► GateStateComputer ─► GatePipeline ─► final action
//!                    (time-based)           (signal snapshot)     (ordered gates)
//! ```
//! On a slower period the [`SelfModificationController`] runs its own
//! eligibility → propose → parse → validate → repair → commit cycle against
//! the agent's configuration body ("soul").
//!
//! ## Module map
//! - [`config`]: TOML configuration, validation, hot reload
//! - [`signals`]: the `SignalStore` collaborator and an in-memory store
//! - [`gate`]: gate-state computation and the decision gate pipeline
//! - [`rate_limit`]: engagement-scaled action cooldowns and backoff
//! - [`generator`]: the text-generation collaborator
//! - [`self_modify`]: the self-modification controller
//! - [`governor`]: facade wiring all components together
//! - [`metrics`]: Prometheus counters for decisions and cycles

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

pub mod config;
pub mod gate;
pub mod generator;
pub mod governor;
pub mod metrics;
pub mod rate_limit;
pub mod self_modify;
pub mod signals;

// Re-exports for convenience
pub use config::GovernorConfig;
pub use gate::{
    apply_gates, Action, Confidence, DecisionContext, GateDecision, GateName, GatePipeline,
    GateState, GateStateComputer, Mode,
};
pub use generator::{Generation, GenerationOptions, OpenAiGenerator, StaticGenerator, TextGenerator};
pub use governor::Governor;
pub use rate_limit::{AdaptiveRateLimiter, RetryAfter};
pub use self_modify::{CycleOutcome, GovernorEvent, SelfModificationController};
pub use signals::{InMemorySignalStore, SignalStore, StoreError};

/// Initialise the global tracing subscriber from the environment.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`GovernorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), GovernorError> {
    init_tracing_with(LogFormat::Pretty)
}

/// Initialise the global tracing subscriber with a configured format.
///
/// A set `LOG_FORMAT` still wins over `configured`; see
/// [`LogFormat::resolve`].
///
/// # Errors
///
/// Returns [`GovernorError::Other`] if the global subscriber has already
/// been set.
pub fn init_tracing_with(configured: LogFormat) -> Result<(), GovernorError> {
    let env = std::env::var("LOG_FORMAT").ok();

    let result = match LogFormat::resolve(env.as_deref(), configured) {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| GovernorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level governor errors.
///
/// Component boundaries collapse most of these into fail-safe defaults; they
/// surface to callers only from constructors and explicit store operations.
#[derive(Error, Debug)]
pub enum GovernorError {
    /// A signal store read or write failed.
    #[error("signal store error: {0}")]
    Store(#[from] StoreError),

    /// A text-generation call failed (transport, API, or response shape).
    #[error("generation failed: {0}")]
    Generation(String),

    /// A configuration value is missing or invalid (e.g., missing env var).
    ///
    /// Returned at construction time so misconfiguration surfaces before the
    /// first cycle runs.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Current Unix time in whole seconds.
///
/// A clock before the epoch reads as `0`.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Seconds in one hour.
pub(crate) const HOUR_SECS: u64 = 3_600;

/// Hours elapsed between `since` and `now`, as a fraction.
///
/// Timestamps in the future read as zero elapsed hours.
pub(crate) fn hours_between(since: u64, now: u64) -> f64 {
    now.saturating_sub(since) as f64 / HOUR_SECS as f64
}
