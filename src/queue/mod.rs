//! Per-agent execution queue.
//!
//! Serializes concurrent execution requests so the downstream agent runtime
//! observes at most one in-flight task per agent. The running slot is a
//! compare-and-set key with a TTL (crash recovery); waiting entries form a
//! bounded FIFO list. There is no coordination across agents.

use crate::config::QueueConfig;
use crate::models::{MessageSource, QueueEntry, QueueEntryStatus};
use crate::store::QueueStore;
use crate::{FleetError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a submitted entry landed.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The entry claimed the running slot; the caller must execute it and
    /// call [`ExecutionQueue::complete`] on every exit path.
    Running(QueueEntry),
    /// The entry joined the wait list at `position` (0-based).
    Queued { position: usize, entry: QueueEntry },
}

impl SubmitOutcome {
    /// Wire label: `"running"` or `"queued:N"`.
    pub fn label(&self) -> String {
        match self {
            SubmitOutcome::Running(_) => "running".to_string(),
            SubmitOutcome::Queued { position, .. } => format!("queued:{position}"),
        }
    }

    pub fn entry(&self) -> &QueueEntry {
        match self {
            SubmitOutcome::Running(entry) => entry,
            SubmitOutcome::Queued { entry, .. } => entry,
        }
    }
}

/// Snapshot of one agent's queue.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub agent_name: String,
    pub running: Option<QueueEntry>,
    pub waiting: Vec<QueueEntry>,
}

impl QueueStatus {
    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }
}

#[derive(Clone)]
pub struct ExecutionQueue {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
}

impl ExecutionQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// Allocates a queue entry without touching the store.
    pub fn create(
        &self,
        agent_name: &str,
        message: impl Into<String>,
        source: MessageSource,
    ) -> QueueEntry {
        QueueEntry::new(agent_name, message, source)
    }

    /// Submits an entry for execution.
    ///
    /// Never blocks waiting for the slot: the entry either becomes the
    /// running entry, joins the wait list (`wait_if_busy`), or the call
    /// fails with [`FleetError::QueueFull`] / [`FleetError::AgentBusy`].
    pub async fn submit(&self, entry: QueueEntry, wait_if_busy: bool) -> Result<SubmitOutcome> {
        let agent = entry.agent_name.clone();

        let mut running = entry.clone();
        running.status = QueueEntryStatus::Running;
        running.started_at = Some(Utc::now());
        let serialized = serde_json::to_string(&running)?;

        if self
            .store
            .slot_set_if_empty(&agent, &serialized, self.config.execution_ttl_secs)
            .await?
        {
            info!(agent = %agent, entry = %running.id, "Entry took the running slot");
            return Ok(SubmitOutcome::Running(running));
        }

        if !wait_if_busy {
            let current = match self.store.slot_get(&agent).await? {
                Some(raw) => serde_json::from_str::<QueueEntry>(&raw)
                    .map(|e| e.id)
                    .unwrap_or_else(|_| "unknown".to_string()),
                None => "unknown".to_string(),
            };
            return Err(FleetError::AgentBusy { agent, current });
        }

        let queue_length = self.store.wait_len(&agent).await?;
        if queue_length >= self.config.max_queue_size {
            return Err(FleetError::QueueFull {
                agent,
                queue_length,
            });
        }

        let queued = serde_json::to_string(&entry)?;
        let new_length = self.store.wait_push(&agent, &queued).await?;
        let position = new_length.saturating_sub(1);
        info!(agent = %agent, entry = %entry.id, position, "Entry queued behind running execution");
        Ok(SubmitOutcome::Queued { position, entry })
    }

    /// Releases the running slot and promotes the head of the wait list.
    ///
    /// Idempotent: completing an idle agent is a no-op. Entries that waited
    /// longer than the configured wait timeout are discarded instead of
    /// promoted. Returns the promoted entry, which the caller now owns and
    /// must execute.
    pub async fn complete(&self, agent_name: &str, success: bool) -> Result<Option<QueueEntry>> {
        let had_running = self.store.slot_clear(agent_name).await?;
        if had_running {
            debug!(agent = %agent_name, success, "Running slot released");
        }

        loop {
            let Some(raw) = self.store.wait_pop(agent_name).await? else {
                return Ok(None);
            };
            let entry: QueueEntry = serde_json::from_str(&raw)?;

            if self.wait_expired(&entry) {
                warn!(
                    agent = %agent_name,
                    entry = %entry.id,
                    queued_at = %entry.queued_at,
                    status = ?QueueEntryStatus::Timeout,
                    "Discarding entry that exceeded the wait timeout"
                );
                continue;
            }

            let mut promoted = entry;
            promoted.status = QueueEntryStatus::Running;
            promoted.started_at = Some(Utc::now());
            let serialized = serde_json::to_string(&promoted)?;

            if self
                .store
                .slot_set_if_empty(agent_name, &serialized, self.config.execution_ttl_secs)
                .await?
            {
                info!(agent = %agent_name, entry = %promoted.id, "Promoted entry from wait list");
                return Ok(Some(promoted));
            }

            // A concurrent submit claimed the slot between clear and set;
            // the entry keeps its place at the head.
            self.store.wait_push_front(agent_name, &raw).await?;
            return Ok(None);
        }
    }

    pub async fn status(&self, agent_name: &str) -> Result<QueueStatus> {
        let running = match self.store.slot_get(agent_name).await? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        let mut waiting = Vec::new();
        for raw in self.store.wait_entries(agent_name).await? {
            waiting.push(serde_json::from_str(&raw)?);
        }
        Ok(QueueStatus {
            agent_name: agent_name.to_string(),
            running,
            waiting,
        })
    }

    pub async fn is_busy(&self, agent_name: &str) -> Result<bool> {
        Ok(self.store.slot_get(agent_name).await?.is_some())
    }

    /// Drops the entire wait list; the running slot is untouched.
    pub async fn clear_queue(&self, agent_name: &str) -> Result<usize> {
        let cleared = self.store.wait_clear(agent_name).await?;
        if cleared > 0 {
            info!(agent = %agent_name, cleared, "Cleared wait list");
        }
        Ok(cleared)
    }

    /// Emergency release of the running slot regardless of state.
    pub async fn force_release(&self, agent_name: &str) -> Result<bool> {
        let released = self.store.slot_clear(agent_name).await?;
        if released {
            warn!(agent = %agent_name, "Force-released running slot");
        }
        Ok(released)
    }

    fn wait_expired(&self, entry: &QueueEntry) -> bool {
        if self.config.wait_timeout_secs == 0 {
            return false;
        }
        let age = Utc::now() - entry.queued_at;
        age.num_seconds() >= self.config.wait_timeout_secs as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> (ExecutionQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = QueueConfig {
            max_queue_size: 3,
            execution_ttl_secs: 600,
            wait_timeout_secs: 120,
        };
        (ExecutionQueue::new(store.clone(), config), store)
    }

    #[tokio::test]
    async fn four_submits_then_queue_full() {
        let (queue, _) = queue();

        let first = queue.create("alice", "one", MessageSource::User);
        let outcome = queue.submit(first, true).await.unwrap();
        assert_eq!(outcome.label(), "running");

        for expected in 0..3 {
            let entry = queue.create("alice", format!("wait {expected}"), MessageSource::User);
            let outcome = queue.submit(entry, true).await.unwrap();
            assert_eq!(outcome.label(), format!("queued:{expected}"));
        }

        let overflow = queue.create("alice", "too many", MessageSource::User);
        match queue.submit(overflow, true).await {
            Err(FleetError::QueueFull {
                agent,
                queue_length,
            }) => {
                assert_eq!(agent, "alice");
                assert_eq!(queue_length, 3);
            }
            other => panic!("expected QueueFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn busy_without_wait_is_rejected() {
        let (queue, _) = queue();

        let first = queue.create("alice", "one", MessageSource::User);
        let running = match queue.submit(first, true).await.unwrap() {
            SubmitOutcome::Running(entry) => entry,
            other => panic!("expected running, got {other:?}"),
        };

        let second = queue.create("alice", "two", MessageSource::Agent);
        match queue.submit(second, false).await {
            Err(FleetError::AgentBusy { agent, current }) => {
                assert_eq!(agent, "alice");
                assert_eq!(current, running.id);
            }
            other => panic!("expected AgentBusy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_promotes_in_fifo_order() {
        let (queue, _) = queue();

        let first = queue.create("alice", "first", MessageSource::User);
        queue.submit(first, true).await.unwrap();

        let second = queue.create("alice", "second", MessageSource::User);
        let second_id = second.id.clone();
        queue.submit(second, true).await.unwrap();

        let third = queue.create("alice", "third", MessageSource::User);
        let third_id = third.id.clone();
        queue.submit(third, true).await.unwrap();

        let promoted = queue.complete("alice", true).await.unwrap().unwrap();
        assert_eq!(promoted.id, second_id);
        assert_eq!(promoted.status, QueueEntryStatus::Running);
        assert!(promoted.started_at.is_some());

        let promoted = queue.complete("alice", true).await.unwrap().unwrap();
        assert_eq!(promoted.id, third_id);

        assert!(queue.complete("alice", true).await.unwrap().is_none());
        assert!(!queue.is_busy("alice").await.unwrap());
    }

    #[tokio::test]
    async fn complete_on_idle_agent_is_noop() {
        let (queue, _) = queue();
        assert!(queue.complete("alice", true).await.unwrap().is_none());
        assert!(queue.complete("alice", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submit_complete_round_trip_leaves_queue_empty() {
        let (queue, _) = queue();

        let entry = queue.create("alice", "ping", MessageSource::User);
        queue.submit(entry, true).await.unwrap();
        assert!(queue.complete("alice", true).await.unwrap().is_none());

        let status = queue.status("alice").await.unwrap();
        assert!(status.running.is_none());
        assert!(status.waiting.is_empty());
    }

    #[tokio::test]
    async fn force_release_frees_busy_agent() {
        let (queue, _) = queue();

        let entry = queue.create("alice", "stuck", MessageSource::User);
        queue.submit(entry, true).await.unwrap();
        assert!(queue.is_busy("alice").await.unwrap());

        assert!(queue.force_release("alice").await.unwrap());
        assert!(!queue.is_busy("alice").await.unwrap());
        assert!(!queue.force_release("alice").await.unwrap());
    }

    #[tokio::test]
    async fn clear_queue_drops_waiters_but_not_running() {
        let (queue, _) = queue();

        let running = queue.create("alice", "running", MessageSource::User);
        queue.submit(running, true).await.unwrap();
        for i in 0..2 {
            let entry = queue.create("alice", format!("wait {i}"), MessageSource::User);
            queue.submit(entry, true).await.unwrap();
        }

        assert_eq!(queue.clear_queue("alice").await.unwrap(), 2);
        let status = queue.status("alice").await.unwrap();
        assert!(status.running.is_some());
        assert!(status.waiting.is_empty());
    }

    #[tokio::test]
    async fn expired_waiters_are_discarded_at_promotion() {
        let (queue, _) = queue();

        let running = queue.create("alice", "running", MessageSource::User);
        queue.submit(running, true).await.unwrap();

        let mut stale = queue.create("alice", "stale", MessageSource::User);
        stale.queued_at = Utc::now() - chrono::Duration::seconds(600);
        queue.submit(stale, true).await.unwrap();

        let fresh = queue.create("alice", "fresh", MessageSource::User);
        let fresh_id = fresh.id.clone();
        queue.submit(fresh, true).await.unwrap();

        let promoted = queue.complete("alice", true).await.unwrap().unwrap();
        assert_eq!(promoted.id, fresh_id);
    }

    #[tokio::test]
    async fn queues_are_independent_per_agent() {
        let (queue, _) = queue();

        let a = queue.create("alice", "a", MessageSource::User);
        let b = queue.create("bob", "b", MessageSource::User);
        assert_eq!(queue.submit(a, true).await.unwrap().label(), "running");
        assert_eq!(queue.submit(b, true).await.unwrap().label(), "running");
    }
}
