//! Backing-store contracts for the execution plane.
//!
//! The plane does not mandate a schema; it requires compare-and-set on a
//! per-agent running slot, list push/pop for the wait list, a lock primitive
//! with a TTL lease, pub/sub for events, and access to the schedule and
//! execution records. Production deployments back the primitives with Redis
//! ([`RedisStore`]); tests and single-node deployments use [`MemoryStore`].

use crate::models::{AgentSharedFolderConfig, Execution, Schedule};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Per-agent running slot and wait list.
///
/// Entries are serialized [`crate::models::QueueEntry`] documents; the store
/// never interprets them. The running slot carries a TTL so an executor that
/// crashes without releasing it eventually frees the agent.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Claims the running slot iff it is empty. Compare-and-set: exactly one
    /// of any number of concurrent callers succeeds.
    async fn slot_set_if_empty(&self, agent: &str, entry: &str, ttl_secs: u64) -> Result<bool>;

    async fn slot_get(&self, agent: &str) -> Result<Option<String>>;

    /// Clears the slot. Clearing an empty slot is a no-op; returns whether a
    /// value was present.
    async fn slot_clear(&self, agent: &str) -> Result<bool>;

    /// Appends at the tail; returns the new wait-list length.
    async fn wait_push(&self, agent: &str, entry: &str) -> Result<usize>;

    /// Pops the head of the wait list.
    async fn wait_pop(&self, agent: &str) -> Result<Option<String>>;

    /// Restores an entry at the head (used when a promotion loses the slot
    /// race and the entry must keep its position).
    async fn wait_push_front(&self, agent: &str, entry: &str) -> Result<usize>;

    async fn wait_len(&self, agent: &str) -> Result<usize>;

    /// Snapshot of the wait list, head first.
    async fn wait_entries(&self, agent: &str) -> Result<Vec<String>>;

    /// Drops the entire wait list; returns how many entries were dropped.
    async fn wait_clear(&self, agent: &str) -> Result<usize>;
}

/// Distributed mutex with a TTL lease.
///
/// Callers receive an opaque token on acquisition and must present it on
/// release, so an expired holder cannot release a lock re-acquired by
/// another worker.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_acquire(&self, key: &str, lease_secs: u64) -> Result<Option<String>>;

    /// Releases the lock iff `token` still owns it.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}

/// Publish side of the store's pub/sub channel.
#[async_trait]
pub trait PubSubStore: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

/// Access to control-plane records the execution plane reads and writes.
///
/// The scheduler only ever writes execution rows and schedule bookkeeping
/// fields; schedule configuration is owned by the control plane.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn enabled_schedules(&self) -> Result<Vec<Schedule>>;

    async fn schedule(&self, id: &str) -> Result<Option<Schedule>>;

    async fn update_schedule_run_times(
        &self,
        id: &str,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn insert_execution(&self, execution: &Execution) -> Result<()>;

    async fn update_execution(&self, execution: &Execution) -> Result<()>;

    async fn execution(&self, id: &str) -> Result<Option<Execution>>;

    /// Whether the agent may be driven without a human in the loop.
    /// Scheduled and manual firings are skipped when this is false.
    async fn autonomy_enabled(&self, agent: &str) -> Result<bool>;

    async fn shared_folder_config(&self, agent: &str) -> Result<AgentSharedFolderConfig>;

    /// Peers this agent holds calling permission for.
    async fn callable_peers(&self, agent: &str) -> Result<Vec<String>>;
}
