//! # Adaptive Rate Limiter
//!
//! Coarse, time-based admission check that runs before the gate pipeline.
//!
//! ## Responsibility
//! Track the last post and comment timestamps, a per-UTC-day comment counter,
//! and an externally-set backoff deadline. Scale the base cooldowns by recent
//! engagement when adaptive mode is on.
//!
//! ## Guarantees
//! - Scaled cooldowns are clamped to the configured `[min, max]` bounds
//! - A store failure while counting engagement yields a multiplier of `1.0`
//! - `can_post` / `can_comment` are false while backoff is active
//!
//! ## NOT Responsible For
//! - Detecting platform rate-limit responses (callers report them via
//!   [`AdaptiveRateLimiter::set_backoff`])

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::metrics;
use crate::signals::{ActivityKind, SignalStore};
use crate::unix_now;

/// How long the platform asked the agent to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAfter {
    /// Wait this many seconds.
    Seconds(u64),
    /// Wait this many minutes.
    Minutes(u64),
}

impl RetryAfter {
    /// The wait in seconds.
    pub fn as_secs(self) -> u64 {
        match self {
            RetryAfter::Seconds(s) => s,
            RetryAfter::Minutes(m) => m.saturating_mul(60),
        }
    }
}

/// Snapshot of the limiter, for logs and operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    /// Effective post cooldown in seconds.
    pub post_cooldown_secs: u64,
    /// Effective comment cooldown in seconds.
    pub comment_cooldown_secs: u64,
    /// Engagement multiplier in force.
    pub multiplier: f64,
    /// Comments recorded on the current UTC day.
    pub comments_today: u32,
    /// Configured daily comment limit.
    pub daily_comment_limit: u32,
    /// Seconds of backoff remaining, zero when inactive.
    pub backoff_remaining_secs: u64,
    /// Seconds until a post is allowed by cooldown alone.
    pub post_wait_secs: u64,
    /// Seconds until a comment is allowed by cooldown alone.
    pub comment_wait_secs: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    last_post_at: Option<u64>,
    last_comment_at: Option<u64>,
    comment_day: Option<NaiveDate>,
    comments_today: u32,
    backoff_until: Option<u64>,
}

impl LimiterState {
    fn comments_on(&self, day: Option<NaiveDate>) -> u32 {
        if self.comment_day == day {
            self.comments_today
        } else {
            0
        }
    }

    fn backoff_remaining(&self, now: u64) -> u64 {
        self.backoff_until
            .map_or(0, |until| until.saturating_sub(now))
    }
}

fn utc_day(ts: u64) -> Option<NaiveDate> {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.date_naive())
}

fn wait_remaining(last: Option<u64>, cooldown: u64, now: u64) -> u64 {
    last.map_or(0, |at| at.saturating_add(cooldown).saturating_sub(now))
}

/// Cooldown tracker with engagement-driven scaling.
///
/// Cloning shares state.
#[derive(Clone)]
pub struct AdaptiveRateLimiter {
    store: Arc<dyn SignalStore>,
    config: RateLimitConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl AdaptiveRateLimiter {
    /// Build a limiter reading engagement from `store`.
    pub fn new(store: Arc<dyn SignalStore>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            state: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    /// Configuration in force.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    // ── Scaling ──────────────────────────────────────────────────────

    /// Multiplier applied to base cooldowns at `now`.
    ///
    /// `1.0` when adaptive mode is off or the engagement count cannot be read.
    pub async fn engagement_multiplier_at(&self, now: u64) -> f64 {
        let adaptive = &self.config.adaptive;
        if !adaptive.enabled {
            return 1.0;
        }
        let since = now.saturating_sub(adaptive.window_minutes.saturating_mul(60));
        let count = match self
            .store
            .count_actions(&ActivityKind::ENGAGEMENT, since)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "engagement count failed, using neutral multiplier");
                metrics::inc_signal_read_failure("rate_limit_engagement");
                return 1.0;
            }
        };

        let multiplier = if count == 0 {
            adaptive.silence_factor
        } else if count >= adaptive.high_engagement_threshold {
            adaptive.high_factor
        } else if count <= adaptive.low_engagement_threshold {
            adaptive.low_factor
        } else {
            1.0
        };
        debug!(count, multiplier, "engagement multiplier computed");
        multiplier
    }

    /// [`engagement_multiplier_at`](Self::engagement_multiplier_at) with the wall clock.
    pub async fn engagement_multiplier(&self) -> f64 {
        self.engagement_multiplier_at(unix_now()).await
    }

    fn scale(&self, base: u64, multiplier: f64, min: u64, max: u64) -> u64 {
        if !self.config.adaptive.enabled {
            return base;
        }
        let scaled = (base as f64 * multiplier).round();
        let scaled = if scaled.is_finite() && scaled > 0.0 {
            scaled as u64
        } else {
            0
        };
        scaled.max(min).min(max)
    }

    /// Effective post cooldown in seconds at `now`.
    pub async fn post_cooldown_at(&self, now: u64) -> u64 {
        let m = self.engagement_multiplier_at(now).await;
        let adaptive = &self.config.adaptive;
        let secs = self.scale(
            self.config.post_cooldown_secs,
            m,
            adaptive.post_min_secs,
            adaptive.post_max_secs,
        );
        metrics::set_cooldown_seconds("post", secs);
        secs
    }

    /// Effective comment cooldown in seconds at `now`.
    pub async fn comment_cooldown_at(&self, now: u64) -> u64 {
        let m = self.engagement_multiplier_at(now).await;
        let adaptive = &self.config.adaptive;
        let secs = self.scale(
            self.config.comment_cooldown_secs,
            m,
            adaptive.comment_min_secs,
            adaptive.comment_max_secs,
        );
        metrics::set_cooldown_seconds("comment", secs);
        secs
    }

    /// Effective post cooldown now.
    pub async fn post_cooldown(&self) -> u64 {
        self.post_cooldown_at(unix_now()).await
    }

    /// Effective comment cooldown now.
    pub async fn comment_cooldown(&self) -> u64 {
        self.comment_cooldown_at(unix_now()).await
    }

    // ── Admission ────────────────────────────────────────────────────

    /// Whether a post is allowed at `now`.
    pub async fn can_post_at(&self, now: u64) -> bool {
        let cooldown = self.post_cooldown_at(now).await;
        let state = self.state.lock();
        if state.backoff_remaining(now) > 0 {
            debug!("post refused: backoff active");
            return false;
        }
        wait_remaining(state.last_post_at, cooldown, now) == 0
    }

    /// Whether a comment is allowed at `now`.
    pub async fn can_comment_at(&self, now: u64) -> bool {
        let cooldown = self.comment_cooldown_at(now).await;
        let state = self.state.lock();
        if state.backoff_remaining(now) > 0 {
            debug!("comment refused: backoff active");
            return false;
        }
        if state.comments_on(utc_day(now)) >= self.config.daily_comment_limit {
            debug!(limit = self.config.daily_comment_limit, "comment refused: daily limit");
            return false;
        }
        wait_remaining(state.last_comment_at, cooldown, now) == 0
    }

    /// Whether a post is allowed now.
    pub async fn can_post(&self) -> bool {
        self.can_post_at(unix_now()).await
    }

    /// Whether a comment is allowed now.
    pub async fn can_comment(&self) -> bool {
        self.can_comment_at(unix_now()).await
    }

    // ── Recording ────────────────────────────────────────────────────

    /// Record a post published at `now`.
    pub fn record_post_at(&self, now: u64) {
        self.state.lock().last_post_at = Some(now);
    }

    /// Record a comment published at `now`, rolling the daily counter on a
    /// new UTC date.
    pub fn record_comment_at(&self, now: u64) {
        let day = utc_day(now);
        let mut state = self.state.lock();
        if state.comment_day != day {
            state.comment_day = day;
            state.comments_today = 0;
        }
        state.comments_today = state.comments_today.saturating_add(1);
        state.last_comment_at = Some(now);
    }

    /// Record a post published now.
    pub fn record_post(&self) {
        self.record_post_at(unix_now());
    }

    /// Record a comment published now.
    pub fn record_comment(&self) {
        self.record_comment_at(unix_now());
    }

    /// Timestamp of the last recorded post.
    pub fn last_post_at(&self) -> Option<u64> {
        self.state.lock().last_post_at
    }

    // ── Backoff ──────────────────────────────────────────────────────

    /// Refuse every action until `now + retry`.
    pub fn set_backoff_at(&self, now: u64, retry: RetryAfter) {
        let until = now.saturating_add(retry.as_secs());
        self.state.lock().backoff_until = Some(until);
        info!(retry_secs = retry.as_secs(), until, "platform backoff set");
    }

    /// Refuse every action for `retry` from now.
    pub fn set_backoff(&self, retry: RetryAfter) {
        self.set_backoff_at(unix_now(), retry);
    }

    /// Set backoff from the retry hints of a platform rejection.
    ///
    /// Seconds win over minutes; with neither, the configured default applies.
    pub fn set_backoff_from_headers_at(&self, now: u64, seconds: Option<u64>, minutes: Option<u64>) {
        let retry = match (seconds, minutes) {
            (Some(s), _) => RetryAfter::Seconds(s),
            (None, Some(m)) => RetryAfter::Minutes(m),
            (None, None) => RetryAfter::Seconds(self.config.default_backoff_secs),
        };
        self.set_backoff_at(now, retry);
    }

    /// [`set_backoff_from_headers_at`](Self::set_backoff_from_headers_at) with the wall clock.
    pub fn set_backoff_from_headers(&self, seconds: Option<u64>, minutes: Option<u64>) {
        self.set_backoff_from_headers_at(unix_now(), seconds, minutes);
    }

    /// Lift any backoff.
    pub fn clear_backoff(&self) {
        self.state.lock().backoff_until = None;
        debug!("platform backoff cleared");
    }

    /// Whether backoff is in force at `now`.
    pub fn backoff_active_at(&self, now: u64) -> bool {
        self.state.lock().backoff_remaining(now) > 0
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Full snapshot at `now`.
    pub async fn status_at(&self, now: u64) -> RateLimitStatus {
        let multiplier = self.engagement_multiplier_at(now).await;
        let post_cooldown_secs = self.post_cooldown_at(now).await;
        let comment_cooldown_secs = self.comment_cooldown_at(now).await;
        let state = self.state.lock();
        RateLimitStatus {
            post_cooldown_secs,
            comment_cooldown_secs,
            multiplier,
            comments_today: state.comments_on(utc_day(now)),
            daily_comment_limit: self.config.daily_comment_limit,
            backoff_remaining_secs: state.backoff_remaining(now),
            post_wait_secs: wait_remaining(state.last_post_at, post_cooldown_secs, now),
            comment_wait_secs: wait_remaining(state.last_comment_at, comment_cooldown_secs, now),
        }
    }

    /// Full snapshot now.
    pub async fn status(&self) -> RateLimitStatus {
        self.status_at(unix_now()).await
    }
}
