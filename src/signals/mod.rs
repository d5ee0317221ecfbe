//! # Signal Store
//!
//! The read/write surface the governor needs from durable storage: the
//! append-only activity log, the per-peer topology table, synthesis records,
//! the self-modification history, and the active configuration body.
//!
//! The store carries no business logic. Backing technology is the
//! implementor's choice; [`InMemorySignalStore`] is the reference
//! implementation used by the demo binary and the test suite.
//!
//! ## Failure contract
//! Every operation can fail with [`StoreError`]. Callers in this crate never
//! propagate a read failure to the host; each component collapses it into a
//! fail-safe default at its own boundary.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemorySignalStore;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors produced by a signal store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not serve the request (I/O, connection, injected fault).
    #[error("signal store unavailable: {0}")]
    Unavailable(String),

    /// A write was refused because it would break an append-only invariant.
    #[error("signal store rejected write: {0}")]
    Rejected(String),
}

// ─── Records ──────────────────────────────────────────────────────────────────

/// Kind of an activity-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A top-level post published by the agent.
    Post,
    /// A comment or reply published by the agent.
    Comment,
    /// A vote cast by the agent.
    Vote,
    /// A community (submolt) created by the agent.
    SubmoltCreated,
    /// A self-modification cycle that got past eligibility.
    SelfModifyCheck,
}

impl ActivityKind {
    /// The kinds that count as public engagement.
    pub const ENGAGEMENT: [ActivityKind; 2] = [ActivityKind::Post, ActivityKind::Comment];

    /// Stable lowercase name, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Post => "post",
            ActivityKind::Comment => "comment",
            ActivityKind::Vote => "vote",
            ActivityKind::SubmoltCreated => "submolt_created",
            ActivityKind::SelfModifyCheck => "self_modify_check",
        }
    }
}

/// One row of the append-only activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// What happened.
    pub kind: ActivityKind,
    /// Unix timestamp of the action.
    pub timestamp_secs: u64,
    /// Peer identity the action was directed at, if any.
    pub target: Option<String>,
    /// Free-text outcome (e.g. "accepted", "optimal", "rejected: too short").
    pub outcome: String,
    /// Whether the action landed successfully.
    pub success: bool,
}

impl ActivityEntry {
    /// A successful action with no target.
    pub fn new(kind: ActivityKind, timestamp_secs: u64) -> Self {
        Self {
            kind,
            timestamp_secs,
            target: None,
            outcome: "ok".to_string(),
            success: true,
        }
    }

    /// Attach the peer identity the action was directed at.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Replace the outcome text and success flag.
    pub fn with_outcome(mut self, outcome: impl Into<String>, success: bool) -> Self {
        self.outcome = outcome.into();
        self.success = success;
        self
    }
}

/// A periodic analytical summary of recent signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRecord {
    /// Unix timestamp when the synthesis was produced.
    pub timestamp_secs: u64,
    /// Free-text implication label, normalised by the gate-state computer.
    pub implication: String,
    /// Summary text.
    pub summary: String,
}

/// Persisted record of a committed self-modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfModificationRecord {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Unix timestamp of the commit.
    pub timestamp_secs: u64,
    /// Why the change was made.
    pub rationale: String,
    /// Short description of what changed.
    pub delta_summary: String,
    /// The configuration body that became active.
    pub body: String,
}

/// Cumulative engagement counters for one peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyEntry {
    /// Upvotes received from or exchanged with this peer.
    pub upvotes: u64,
    /// Downvotes received from or exchanged with this peer.
    pub downvotes: u64,
    /// Replies exchanged with this peer.
    pub replies: u64,
    /// Resonance score.
    pub score: f64,
    /// Quarantined peers are excluded from every aggregate.
    pub quarantined: bool,
}

/// Vote and reply totals across all non-quarantined peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyTotals {
    /// Sum of upvotes.
    pub upvotes: u64,
    /// Sum of downvotes.
    pub downvotes: u64,
    /// Sum of replies.
    pub replies: u64,
}

/// Short description of a peer for prompt building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Peer identity.
    pub peer: String,
    /// Resonance score.
    pub score: f64,
    /// Upvotes.
    pub upvotes: u64,
    /// Replies.
    pub replies: u64,
}

// ─── Store trait ──────────────────────────────────────────────────────────────

/// Storage collaborator for the governor.
///
/// Implementations must be thread-safe (`Send + Sync`). The trait is
/// object-safe so components share it as `Arc<dyn SignalStore>`.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Count activity rows of the given kinds at or after `since_secs`.
    async fn count_actions(&self, kinds: &[ActivityKind], since_secs: u64)
        -> Result<u64, StoreError>;

    /// Like [`count_actions`](Self::count_actions), restricted to successful rows.
    async fn count_successful_actions(
        &self,
        kinds: &[ActivityKind],
        since_secs: u64,
    ) -> Result<u64, StoreError>;

    /// The most recent synthesis record, if any.
    async fn latest_synthesis(&self) -> Result<Option<SynthesisRecord>, StoreError>;

    /// Timestamp of the most recent committed self-modification, if any.
    async fn latest_self_modification_at(&self) -> Result<Option<u64>, StoreError>;

    /// The most recent committed self-modifications, newest first.
    async fn self_modifications(&self, limit: usize)
        -> Result<Vec<SelfModificationRecord>, StoreError>;

    /// Sum of `score` over non-quarantined topology entries.
    async fn sum_topology_scores(&self) -> Result<f64, StoreError>;

    /// Vote and reply totals over non-quarantined topology entries.
    async fn topology_totals(&self) -> Result<TopologyTotals, StoreError>;

    /// Number of non-quarantined peers.
    async fn count_peers(&self) -> Result<u64, StoreError>;

    /// Lifetime number of communities the agent has created.
    async fn count_submolts_created(&self) -> Result<u64, StoreError>;

    /// Lifetime number of posts the agent has published.
    ///
    /// Never decreases; retention limits on the activity log do not apply.
    async fn count_posts_created(&self) -> Result<u64, StoreError>;

    /// Lifetime number of comments the agent has published.
    async fn count_comments_created(&self) -> Result<u64, StoreError>;

    /// Highest-scoring non-quarantined peers, best first.
    async fn top_peers(&self, limit: usize) -> Result<Vec<PeerSummary>, StoreError>;

    /// The most recent activity rows, newest first.
    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError>;

    /// The most recent free-text memory snippets, newest first.
    async fn recent_memories(&self, limit: usize) -> Result<Vec<String>, StoreError>;

    /// The persisted active configuration body, if one was ever stored.
    async fn active_configuration(&self) -> Result<Option<String>, StoreError>;

    /// Replace the persisted active configuration body.
    async fn store_active_configuration(&self, body: &str) -> Result<(), StoreError>;

    /// Append a committed self-modification record.
    async fn append_self_modification(
        &self,
        record: SelfModificationRecord,
    ) -> Result<(), StoreError>;

    /// Append a row to the activity log.
    async fn append_activity(&self, entry: ActivityEntry) -> Result<(), StoreError>;

    /// Append a synthesis record.
    async fn append_synthesis(&self, record: SynthesisRecord) -> Result<(), StoreError>;

    /// Append a free-text memory snippet.
    async fn append_memory(&self, snippet: String) -> Result<(), StoreError>;

    /// Insert or replace the topology entry for `peer`.
    async fn upsert_topology(&self, peer: &str, entry: TopologyEntry) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_kind_serializes_to_snake_case() {
        let json = serde_json::to_string(&ActivityKind::SubmoltCreated).unwrap();
        assert_eq!(json, "\"submolt_created\"");
    }

    #[test]
    fn test_activity_kind_as_str_matches_serde_name() {
        for kind in [
            ActivityKind::Post,
            ActivityKind::Comment,
            ActivityKind::Vote,
            ActivityKind::SubmoltCreated,
            ActivityKind::SelfModifyCheck,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.as_str());
        }
    }

    #[test]
    fn test_activity_entry_builders() {
        let entry = ActivityEntry::new(ActivityKind::Comment, 10)
            .with_target("peer-a")
            .with_outcome("downvoted", false);
        assert_eq!(entry.target.as_deref(), Some("peer-a"));
        assert!(!entry.success);
        assert_eq!(entry.outcome, "downvoted");
    }
}
