//! # In-Memory Signal Store
//!
//! Reference [`SignalStore`] backed by `parking_lot::Mutex`-guarded
//! collections. Clone is cheap (Arc-backed); clones share state.
//!
//! ## Bounds
//! The activity log, memory snippets, and self-modification history are
//! capped; the oldest rows are evicted first. Creation totals are kept as
//! separate lifetime counters so eviction never lowers them.
//!
//! ## Fault injection
//! [`set_failing`](InMemorySignalStore::set_failing) makes every operation
//! return [`StoreError::Unavailable`], which is how the fail-safe paths of the
//! governor are exercised in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ActivityEntry, ActivityKind, PeerSummary, SelfModificationRecord, SignalStore, StoreError,
    SynthesisRecord, TopologyEntry, TopologyTotals,
};

/// Default cap on retained activity rows.
pub const DEFAULT_MAX_ACTIVITY: usize = 10_000;
/// Default cap on retained memory snippets and self-modification records.
pub const DEFAULT_MAX_HISTORY: usize = 1_024;

struct StoreInner {
    activity: VecDeque<ActivityEntry>,
    syntheses: VecDeque<SynthesisRecord>,
    modifications: VecDeque<SelfModificationRecord>,
    topology: HashMap<String, TopologyEntry>,
    memories: VecDeque<String>,
    active_configuration: Option<String>,
    max_activity: usize,
    max_history: usize,
    created: CreationTotals,
}

/// Lifetime creation counts, independent of log eviction.
#[derive(Default)]
struct CreationTotals {
    submolts: u64,
    posts: u64,
    comments: u64,
}

impl CreationTotals {
    fn observe(&mut self, entry: &ActivityEntry) {
        match entry.kind {
            ActivityKind::SubmoltCreated => self.submolts += 1,
            ActivityKind::Post if entry.success => self.posts += 1,
            ActivityKind::Comment if entry.success => self.comments += 1,
            _ => {}
        }
    }
}

/// In-memory, thread-safe signal store.
#[derive(Clone)]
pub struct InMemorySignalStore {
    inner: Arc<Mutex<StoreInner>>,
    failing: Arc<AtomicBool>,
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySignalStore {
    /// Create an empty store with default caps.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ACTIVITY, DEFAULT_MAX_HISTORY)
    }

    /// Create an empty store with explicit caps.
    pub fn with_capacity(max_activity: usize, max_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                activity: VecDeque::new(),
                syntheses: VecDeque::new(),
                modifications: VecDeque::new(),
                topology: HashMap::new(),
                memories: VecDeque::new(),
                active_configuration: None,
                max_activity: max_activity.max(1),
                max_history: max_history.max(1),
                created: CreationTotals::default(),
            })),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of activity rows currently retained.
    pub fn activity_len(&self) -> usize {
        self.inner.lock().activity.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn count_where(&self, pred: impl Fn(&ActivityEntry) -> bool) -> Result<u64, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.activity.iter().filter(|e| pred(e)).count() as u64)
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn count_actions(
        &self,
        kinds: &[ActivityKind],
        since_secs: u64,
    ) -> Result<u64, StoreError> {
        self.count_where(|e| kinds.contains(&e.kind) && e.timestamp_secs >= since_secs)
    }

    async fn count_successful_actions(
        &self,
        kinds: &[ActivityKind],
        since_secs: u64,
    ) -> Result<u64, StoreError> {
        self.count_where(|e| e.success && kinds.contains(&e.kind) && e.timestamp_secs >= since_secs)
    }

    async fn latest_synthesis(&self) -> Result<Option<SynthesisRecord>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .syntheses
            .iter()
            .max_by_key(|s| s.timestamp_secs)
            .cloned())
    }

    async fn latest_self_modification_at(&self) -> Result<Option<u64>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.modifications.iter().map(|r| r.timestamp_secs).max())
    }

    async fn self_modifications(
        &self,
        limit: usize,
    ) -> Result<Vec<SelfModificationRecord>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.modifications.iter().rev().take(limit).cloned().collect())
    }

    async fn sum_topology_scores(&self) -> Result<f64, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .topology
            .values()
            .filter(|t| !t.quarantined)
            .map(|t| t.score)
            .sum())
    }

    async fn topology_totals(&self) -> Result<TopologyTotals, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .topology
            .values()
            .filter(|t| !t.quarantined)
            .fold(TopologyTotals::default(), |acc, t| TopologyTotals {
                upvotes: acc.upvotes + t.upvotes,
                downvotes: acc.downvotes + t.downvotes,
                replies: acc.replies + t.replies,
            }))
    }

    async fn count_peers(&self) -> Result<u64, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.topology.values().filter(|t| !t.quarantined).count() as u64)
    }

    async fn count_submolts_created(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.inner.lock().created.submolts)
    }

    async fn count_posts_created(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.inner.lock().created.posts)
    }

    async fn count_comments_created(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.inner.lock().created.comments)
    }

    async fn top_peers(&self, limit: usize) -> Result<Vec<PeerSummary>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut peers: Vec<PeerSummary> = inner
            .topology
            .iter()
            .filter(|(_, t)| !t.quarantined)
            .map(|(peer, t)| PeerSummary {
                peer: peer.clone(),
                score: t.score,
                upvotes: t.upvotes,
                replies: t.replies,
            })
            .collect();
        peers.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.peer.cmp(&b.peer))
        });
        peers.truncate(limit);
        Ok(peers)
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.activity.iter().rev().take(limit).cloned().collect())
    }

    async fn recent_memories(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.memories.iter().rev().take(limit).cloned().collect())
    }

    async fn active_configuration(&self) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().active_configuration.clone())
    }

    async fn store_active_configuration(&self, body: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lock().active_configuration = Some(body.to_string());
        Ok(())
    }

    async fn append_self_modification(
        &self,
        record: SelfModificationRecord,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.modifications.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Rejected(format!(
                "self-modification record '{}' already exists",
                record.id
            )));
        }
        if inner.modifications.len() >= inner.max_history {
            inner.modifications.pop_front();
        }
        inner.modifications.push_back(record);
        Ok(())
    }

    async fn append_activity(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.activity.len() >= inner.max_activity {
            inner.activity.pop_front();
        }
        inner.created.observe(&entry);
        inner.activity.push_back(entry);
        Ok(())
    }

    async fn append_synthesis(&self, record: SynthesisRecord) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.syntheses.len() >= inner.max_history {
            inner.syntheses.pop_front();
        }
        inner.syntheses.push_back(record);
        Ok(())
    }

    async fn append_memory(&self, snippet: String) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.memories.len() >= inner.max_history {
            inner.memories.pop_front();
        }
        inner.memories.push_back(snippet);
        Ok(())
    }

    async fn upsert_topology(&self, peer: &str, entry: TopologyEntry) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lock().topology.insert(peer.to_string(), entry);
        Ok(())
    }
}
