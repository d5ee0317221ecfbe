//! Prometheus metrics for the governor.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_gate_triggered`, `inc_decision`, …) are no-ops if `init_metrics` was
//! never called, so the governor is always safe to run and observability
//! simply degrades.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `governor_gate_triggered_total` | Counter | `gate` |
//! | `governor_decisions_total` | Counter | `action` |
//! | `governor_self_modify_cycles_total` | Counter | `outcome` |
//! | `governor_signal_read_failures_total` | Counter | `signal` |
//! | `governor_cooldown_seconds` | Gauge | `action` |
//! | `governor_generation_duration_seconds` | Histogram | |

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    core::Collector, CounterVec, Encoder, Histogram, HistogramOpts, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::GovernorError;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All governor metrics, stored together in a single [`OnceLock`].
pub struct Metrics {
    /// Registry that owns every descriptor below.
    pub registry: Registry,
    /// Gate firings by gate name.
    pub gate_triggered: CounterVec,
    /// Final decisions by action.
    pub decisions: CounterVec,
    /// Self-modification cycles by outcome.
    pub self_modify_cycles: CounterVec,
    /// Signal reads that fell back to a fail-safe default.
    pub signal_read_failures: CounterVec,
    /// Effective cooldown per action kind.
    pub cooldown_seconds: IntGaugeVec,
    /// Latency of self-modification generation calls.
    pub generation_duration: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C>(registry: &Registry, collector: C) -> Result<C, GovernorError>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| GovernorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn counter(name: &str, help: &str, label: &str) -> Result<CounterVec, GovernorError> {
    CounterVec::new(Opts::new(name, help), &[label])
        .map_err(|e| GovernorError::Other(format!("metrics init failed: {e}")))
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op.
///
/// # Errors
///
/// Returns [`GovernorError::Other`] if metric construction or registration
/// fails.
pub fn init_metrics() -> Result<(), GovernorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let gate_triggered = register(
        &registry,
        counter(
            "governor_gate_triggered_total",
            "Decisions downgraded by each gate",
            "gate",
        )?,
    )?;
    let decisions = register(
        &registry,
        counter("governor_decisions_total", "Final decisions by action", "action")?,
    )?;
    let self_modify_cycles = register(
        &registry,
        counter(
            "governor_self_modify_cycles_total",
            "Self-modification cycles by outcome",
            "outcome",
        )?,
    )?;
    let signal_read_failures = register(
        &registry,
        counter(
            "governor_signal_read_failures_total",
            "Signal reads that fell back to a fail-safe default",
            "signal",
        )?,
    )?;
    let cooldown_seconds = register(
        &registry,
        IntGaugeVec::new(
            Opts::new("governor_cooldown_seconds", "Effective cooldown per action"),
            &["action"],
        )
        .map_err(|e| GovernorError::Other(format!("metrics init failed: {e}")))?,
    )?;
    let generation_duration = register(
        &registry,
        Histogram::with_opts(HistogramOpts::new(
            "governor_generation_duration_seconds",
            "Latency of self-modification generation calls",
        ))
        .map_err(|e| GovernorError::Other(format!("metrics init failed: {e}")))?,
    )?;

    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(Metrics {
        registry,
        gate_triggered,
        decisions,
        self_modify_cycles,
        signal_read_failures,
        cooldown_seconds,
        generation_duration,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn inc(vec: impl FnOnce(&Metrics) -> &CounterVec, label: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = vec(m).get_metric_with_label_values(&[label]) {
            c.inc();
        }
    }
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one firing of `gate`. No-op before [`init_metrics`].
pub fn inc_gate_triggered(gate: &str) {
    inc(|m| &m.gate_triggered, gate);
}

/// Count one final decision. No-op before [`init_metrics`].
pub fn inc_decision(action: &str) {
    inc(|m| &m.decisions, action);
}

/// Count one self-modification cycle outcome. No-op before [`init_metrics`].
pub fn inc_self_modify_cycle(outcome: &str) {
    inc(|m| &m.self_modify_cycles, outcome);
}

/// Count one signal read that fell back to its default. No-op before
/// [`init_metrics`].
pub fn inc_signal_read_failure(signal: &str) {
    inc(|m| &m.signal_read_failures, signal);
}

/// Publish the effective cooldown for `action`. No-op before [`init_metrics`].
pub fn set_cooldown_seconds(action: &str, secs: u64) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.cooldown_seconds.get_metric_with_label_values(&[action]) {
            g.set(i64::try_from(secs).unwrap_or(i64::MAX));
        }
    }
}

/// Record the latency of one generation call. No-op before [`init_metrics`].
pub fn record_generation_latency(d: Duration) {
    if let Some(m) = metrics() {
        m.generation_duration.observe(d.as_secs_f64());
    }
}

/// Gather all registered metric families. Empty before [`init_metrics`].
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics are not initialised or encoding fails.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Counter values keyed by label, for logs and the demo binary.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Gate firings keyed by gate name.
    pub gates_triggered: HashMap<String, u64>,
    /// Decisions keyed by action.
    pub decisions: HashMap<String, u64>,
    /// Self-modification cycles keyed by outcome.
    pub self_modify_cycles: HashMap<String, u64>,
}

fn collect_by_label(vec: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

/// Structured snapshot of the counters. Zeroed before [`init_metrics`].
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    MetricsSummary {
        gates_triggered: collect_by_label(&m.gate_triggered, "gate"),
        decisions: collect_by_label(&m.decisions, "action"),
        self_modify_cycles: collect_by_label(&m.self_modify_cycles, "outcome"),
    }
}
