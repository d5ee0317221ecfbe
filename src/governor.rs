//! # Governor
//!
//! Facade that wires the store, rate limiter, gate-state computer, gate
//! pipeline and self-modification controller together.
//!
//! ## Control flow
//! ```text
//! decide(ctx)
//!   ├─ SKIP requested ─────────────► gate-free SKIP
//!   ├─ rate limiter refuses ───────► SKIP [RateLimiterGate]
//!   └─ compute GateState ─► GatePipeline::apply ─► decision
//! ```
//! The controller runs independently on its own interval
//! ([`Governor::spawn_self_modify_loop`]).
//!
//! Cloning a `Governor` shares every component.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::GovernorConfig;
use crate::gate::{Action, DecisionContext, GateDecision, GateName, GatePipeline, GateStateComputer};
use crate::generator::TextGenerator;
use crate::rate_limit::AdaptiveRateLimiter;
use crate::self_modify::SelfModificationController;
use crate::signals::{ActivityEntry, ActivityKind, SignalStore};
use crate::{metrics, unix_now, GovernorError};

/// All governor components, built once per process.
#[derive(Clone)]
pub struct Governor {
    store: Arc<dyn SignalStore>,
    limiter: AdaptiveRateLimiter,
    computer: Arc<GateStateComputer>,
    pipeline: GatePipeline,
    controller: Arc<SelfModificationController>,
    cycle_interval: Duration,
}

impl Governor {
    /// Build every component from `config`.
    ///
    /// The gate-state computer reads the controller's stabilization handle.
    pub fn new(
        config: &GovernorConfig,
        store: Arc<dyn SignalStore>,
        generator: Arc<dyn TextGenerator>,
        initial_body: impl Into<String>,
    ) -> Self {
        let controller = Arc::new(SelfModificationController::new(
            Arc::clone(&store),
            generator,
            config.self_modify.clone(),
            initial_body,
        ));
        let computer = Arc::new(GateStateComputer::new(
            Arc::clone(&store),
            config,
            controller.stabilization(),
        ));
        let limiter = AdaptiveRateLimiter::new(Arc::clone(&store), config.rate_limit.clone());

        Self {
            store,
            limiter,
            computer,
            pipeline: GatePipeline::new(config.gates.clone()),
            controller,
            cycle_interval: Duration::from_secs(config.self_modify.cycle_interval_secs.max(1)),
        }
    }

    /// The rate limiter.
    pub fn rate_limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    /// The gate-state computer.
    pub fn gate_state_computer(&self) -> &GateStateComputer {
        &self.computer
    }

    /// The self-modification controller.
    pub fn controller(&self) -> &Arc<SelfModificationController> {
        &self.controller
    }

    /// Decide on `ctx` with the wall clock.
    pub async fn decide(&self, ctx: &DecisionContext) -> GateDecision {
        self.decide_at(ctx, unix_now()).await
    }

    /// Decide on `ctx` at `now`. Always returns a decision.
    ///
    /// When the caller does not supply `last_post_at`, the rate limiter's
    /// record is used.
    pub async fn decide_at(&self, ctx: &DecisionContext, now: u64) -> GateDecision {
        let allowed = match ctx.desired_action {
            Action::Post => self.limiter.can_post_at(now).await,
            Action::Comment => self.limiter.can_comment_at(now).await,
            Action::Skip => true,
        };

        let decision = if allowed {
            let mut ctx = ctx.clone();
            if ctx.last_post_at.is_none() {
                ctx.last_post_at = self.limiter.last_post_at();
            }
            let state = self.computer.compute_at(now).await;
            self.pipeline.apply(&state, &ctx)
        } else {
            GateDecision::constrained(vec![GateName::RateLimiter], Vec::new())
        };

        for gate in &decision.gates_triggered {
            metrics::inc_gate_triggered(gate.as_str());
        }
        metrics::inc_decision(decision.action.as_str());

        if decision.is_constrained() {
            info!(
                desired = %ctx.desired_action,
                gates = ?decision.gates_triggered,
                "action constrained"
            );
        } else {
            debug!(
                action = %decision.action,
                advisories = ?decision.advisories,
                "action permitted"
            );
        }
        decision
    }

    /// Record a published action with the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::Store`] if the activity row cannot be appended.
    pub async fn record_action(&self, action: Action) -> Result<(), GovernorError> {
        self.record_action_at(action, None, unix_now()).await
    }

    /// Record a published action at `now`, optionally directed at `target`.
    ///
    /// `Skip` records nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::Store`] if the activity row cannot be appended.
    pub async fn record_action_at(
        &self,
        action: Action,
        target: Option<&str>,
        now: u64,
    ) -> Result<(), GovernorError> {
        let kind = match action {
            Action::Post => {
                self.limiter.record_post_at(now);
                ActivityKind::Post
            }
            Action::Comment => {
                self.limiter.record_comment_at(now);
                ActivityKind::Comment
            }
            Action::Skip => return Ok(()),
        };
        let mut entry = ActivityEntry::new(kind, now);
        if let Some(target) = target {
            entry = entry.with_target(target);
        }
        self.store.append_activity(entry).await?;
        Ok(())
    }

    /// Run the controller every `cycle_interval_secs` until `shutdown` flips
    /// to `true` or its sender is dropped.
    ///
    /// The first cycle runs one interval after spawning.
    pub fn spawn_self_modify_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let controller = Arc::clone(&self.controller);
        let period = self.cycle_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            info!(period_secs = period.as_secs(), "self-modification loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = controller.run_cycle(false).await;
                        debug!(outcome = outcome.as_str(), "self-modification tick");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("self-modification loop exited");
        })
    }
}
