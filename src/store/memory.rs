use super::{LockStore, PubSubStore, QueueStore, RecordStore};
use crate::models::{AgentSharedFolderConfig, Execution, Schedule};
use crate::{FleetError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Value with a wall-clock lease; consulted lazily on access.
#[derive(Debug, Clone)]
struct Leased {
    value: String,
    expires_at: Instant,
}

impl Leased {
    fn new(value: String, ttl_secs: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory implementation of every store contract.
///
/// Backs the test suite and single-node deployments. Lock ordering is
/// uniform (one mutex per concern, never nested) so the implementation
/// stays deadlock-free.
#[derive(Clone)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, Leased>>>,
    wait_lists: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    locks: Arc<Mutex<HashMap<String, Leased>>>,
    events: broadcast::Sender<(String, String)>,
    schedules: Arc<Mutex<HashMap<String, Schedule>>>,
    executions: Arc<Mutex<HashMap<String, Execution>>>,
    autonomy: Arc<Mutex<HashMap<String, bool>>>,
    shared_folders: Arc<Mutex<HashMap<String, AgentSharedFolderConfig>>>,
    call_permissions: Arc<Mutex<HashMap<String, HashSet<String>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            wait_lists: Arc::new(Mutex::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            events,
            schedules: Arc::new(Mutex::new(HashMap::new())),
            executions: Arc::new(Mutex::new(HashMap::new())),
            autonomy: Arc::new(Mutex::new(HashMap::new())),
            shared_folders: Arc::new(Mutex::new(HashMap::new())),
            call_permissions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribes to published events as `(channel, payload)` pairs.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.events.subscribe()
    }

    pub async fn insert_schedule(&self, schedule: Schedule) {
        self.schedules
            .lock()
            .await
            .insert(schedule.id.clone(), schedule);
    }

    pub async fn remove_schedule(&self, id: &str) {
        self.schedules.lock().await.remove(id);
    }

    pub async fn set_autonomy(&self, agent: &str, enabled: bool) {
        self.autonomy.lock().await.insert(agent.to_string(), enabled);
    }

    pub async fn set_shared_folder_config(&self, config: AgentSharedFolderConfig) {
        self.shared_folders
            .lock()
            .await
            .insert(config.agent_name.clone(), config);
    }

    /// Grants `from` permission to call `to`.
    pub async fn allow_call(&self, from: &str, to: &str) {
        self.call_permissions
            .lock()
            .await
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub async fn executions_for_schedule(&self, schedule_id: &str) -> Vec<Execution> {
        self.executions
            .lock()
            .await
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn slot_set_if_empty(&self, agent: &str, entry: &str, ttl_secs: u64) -> Result<bool> {
        let mut slots = self.slots.lock().await;
        match slots.get(agent) {
            Some(existing) if !existing.expired() => Ok(false),
            _ => {
                slots.insert(agent.to_string(), Leased::new(entry.to_string(), ttl_secs));
                Ok(true)
            }
        }
    }

    async fn slot_get(&self, agent: &str) -> Result<Option<String>> {
        let mut slots = self.slots.lock().await;
        match slots.get(agent) {
            Some(existing) if existing.expired() => {
                slots.remove(agent);
                Ok(None)
            }
            Some(existing) => Ok(Some(existing.value.clone())),
            None => Ok(None),
        }
    }

    async fn slot_clear(&self, agent: &str) -> Result<bool> {
        let mut slots = self.slots.lock().await;
        match slots.remove(agent) {
            Some(existing) => Ok(!existing.expired()),
            None => Ok(false),
        }
    }

    async fn wait_push(&self, agent: &str, entry: &str) -> Result<usize> {
        let mut lists = self.wait_lists.lock().await;
        let list = lists.entry(agent.to_string()).or_default();
        list.push_back(entry.to_string());
        Ok(list.len())
    }

    async fn wait_pop(&self, agent: &str) -> Result<Option<String>> {
        let mut lists = self.wait_lists.lock().await;
        Ok(lists.get_mut(agent).and_then(|list| list.pop_front()))
    }

    async fn wait_push_front(&self, agent: &str, entry: &str) -> Result<usize> {
        let mut lists = self.wait_lists.lock().await;
        let list = lists.entry(agent.to_string()).or_default();
        list.push_front(entry.to_string());
        Ok(list.len())
    }

    async fn wait_len(&self, agent: &str) -> Result<usize> {
        let lists = self.wait_lists.lock().await;
        Ok(lists.get(agent).map(|list| list.len()).unwrap_or(0))
    }

    async fn wait_entries(&self, agent: &str) -> Result<Vec<String>> {
        let lists = self.wait_lists.lock().await;
        Ok(lists
            .get(agent)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn wait_clear(&self, agent: &str) -> Result<usize> {
        let mut lists = self.wait_lists.lock().await;
        Ok(lists.remove(agent).map(|list| list.len()).unwrap_or(0))
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(&self, key: &str, lease_secs: u64) -> Result<Option<String>> {
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some(held) if !held.expired() => Ok(None),
            _ => {
                let token = Uuid::new_v4().to_string();
                locks.insert(key.to_string(), Leased::new(token.clone(), lease_secs));
                Ok(Some(token))
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some(held) if held.value == token && !held.expired() => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PubSubStore for MemoryStore {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No subscribers is not an error; events are best-effort.
        let _ = self
            .events
            .send((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn enabled_schedules(&self) -> Result<Vec<Schedule>> {
        let schedules = self.schedules.lock().await;
        Ok(schedules.values().filter(|s| s.enabled).cloned().collect())
    }

    async fn schedule(&self, id: &str) -> Result<Option<Schedule>> {
        Ok(self.schedules.lock().await.get(id).cloned())
    }

    async fn update_schedule_run_times(
        &self,
        id: &str,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut schedules = self.schedules.lock().await;
        let schedule = schedules.get_mut(id).ok_or_else(|| {
            FleetError::NotFound(format!("schedule {id}"))
        })?;
        if let Some(last_run) = last_run_at {
            schedule.last_run_at = Some(last_run);
        }
        schedule.next_run_at = next_run_at;
        Ok(())
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<()> {
        self.executions
            .lock()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.lock().await;
        if !executions.contains_key(&execution.id) {
            return Err(FleetError::NotFound(format!("execution {}", execution.id)));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn execution(&self, id: &str) -> Result<Option<Execution>> {
        Ok(self.executions.lock().await.get(id).cloned())
    }

    async fn autonomy_enabled(&self, agent: &str) -> Result<bool> {
        Ok(*self.autonomy.lock().await.get(agent).unwrap_or(&true))
    }

    async fn shared_folder_config(&self, agent: &str) -> Result<AgentSharedFolderConfig> {
        Ok(self
            .shared_folders
            .lock()
            .await
            .get(agent)
            .cloned()
            .unwrap_or_else(|| AgentSharedFolderConfig::disabled(agent)))
    }

    async fn callable_peers(&self, agent: &str) -> Result<Vec<String>> {
        let permissions = self.call_permissions.lock().await;
        let mut peers: Vec<String> = permissions
            .get(agent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        peers.sort();
        Ok(peers)
    }
}
