use crate::clients::{ActivityClient, ActivityStart, AgentClient};
use crate::config::SchedulerConfig;
use crate::constants::ACTIVITY_SCHEDULE_START;
use crate::events::{EventPublisher, SchedulerEvent};
use crate::models::{Execution, ExecutionStatus, Schedule, TriggeredBy};
use crate::scheduler::cron::compute_next_run;
use crate::store::{LockStore, RecordStore};
use crate::{FleetError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const LOCK_RETRY_INTERVAL_MS: u64 = 250;

/// Runs one schedule firing end to end.
///
/// Every firing is an independent failure domain: errors are captured on the
/// execution record, surfaced through events and activity state, and never
/// escape into the scheduler loop. The per-agent distributed lock serializes
/// firings across scheduler replicas and against manual triggers.
pub struct ScheduleExecutor {
    records: Arc<dyn RecordStore>,
    locks: Arc<dyn LockStore>,
    agent_client: AgentClient,
    activity: ActivityClient,
    events: EventPublisher,
    config: SchedulerConfig,
}

impl ScheduleExecutor {
    pub fn new(
        records: Arc<dyn RecordStore>,
        locks: Arc<dyn LockStore>,
        agent_client: AgentClient,
        activity: ActivityClient,
        events: EventPublisher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            records,
            locks,
            agent_client,
            activity,
            events,
            config,
        }
    }

    /// Fires `schedule` under the agent lock. Never returns an error; all
    /// failures end up on the execution record or in the log.
    pub async fn fire(&self, schedule: &Schedule, triggered_by: TriggeredBy) {
        let lock_key = format!("agent:{}", schedule.agent_name);
        let lease_secs = self.config.lock_lease_secs(schedule.timeout_seconds);

        let token = match self.acquire_lock(&lock_key, lease_secs).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.handle_lock_contention(schedule, triggered_by).await;
                return;
            }
            Err(e) => {
                error!(
                    schedule = %schedule.id,
                    agent = %schedule.agent_name,
                    "Lock acquisition failed: {e}"
                );
                return;
            }
        };

        if let Err(e) = self.fire_locked(schedule, triggered_by).await {
            error!(
                schedule = %schedule.id,
                agent = %schedule.agent_name,
                "Schedule firing aborted: {e}"
            );
        }

        match self.locks.release(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(
                agent = %schedule.agent_name,
                "Lock lease expired before release; another worker may have fired"
            ),
            Err(e) => warn!(agent = %schedule.agent_name, "Lock release failed: {e}"),
        }
    }

    /// Bounded acquisition: polls until the acquire timeout elapses, then
    /// treats the lock as held by another instance.
    async fn acquire_lock(&self, key: &str, lease_secs: u64) -> Result<Option<String>> {
        let deadline =
            Instant::now() + Duration::from_secs(self.config.lock_acquire_timeout_secs);
        loop {
            if let Some(token) = self.locks.try_acquire(key, lease_secs).await? {
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS)).await;
        }
    }

    /// A cron firing that loses the lock skips silently; the next tick is
    /// the retry. A manual trigger records the refusal so the caller can
    /// see why nothing ran.
    async fn handle_lock_contention(&self, schedule: &Schedule, triggered_by: TriggeredBy) {
        match triggered_by {
            TriggeredBy::Schedule => {
                debug!(
                    schedule = %schedule.id,
                    agent = %schedule.agent_name,
                    "Another instance holds the agent lock, skipping this firing"
                );
            }
            TriggeredBy::Manual => {
                let mut execution = Execution::begin(schedule, triggered_by);
                execution.finish(
                    ExecutionStatus::Failed,
                    Some("agent is locked by another execution".to_string()),
                );
                if let Err(e) = self.records.insert_execution(&execution).await {
                    error!(schedule = %schedule.id, "Failed to record locked manual trigger: {e}");
                }
            }
        }
    }

    async fn fire_locked(&self, schedule: &Schedule, triggered_by: TriggeredBy) -> Result<()> {
        if !self.records.autonomy_enabled(&schedule.agent_name).await? {
            match triggered_by {
                TriggeredBy::Schedule => {
                    info!(
                        schedule = %schedule.id,
                        agent = %schedule.agent_name,
                        "Autonomy disabled, skipping scheduled execution"
                    );
                }
                TriggeredBy::Manual => {
                    let mut execution = Execution::begin(schedule, triggered_by);
                    execution.finish(
                        ExecutionStatus::Failed,
                        Some("agent autonomy is disabled".to_string()),
                    );
                    self.records.insert_execution(&execution).await?;
                }
            }
            return Ok(());
        }

        // The execution record exists before any activity tracking so that
        // related_execution_id links always resolve.
        let mut execution = Execution::begin(schedule, triggered_by);
        self.records.insert_execution(&execution).await?;

        self.events
            .publish(&SchedulerEvent::ScheduleExecutionStarted {
                agent: schedule.agent_name.clone(),
                schedule_id: schedule.id.clone(),
                execution_id: execution.id.clone(),
                schedule_name: schedule.name.clone(),
            })
            .await;

        let activity_id = self
            .activity
            .track(ActivityStart {
                agent_name: schedule.agent_name.clone(),
                activity_type: ACTIVITY_SCHEDULE_START.to_string(),
                user_id: (!schedule.owner_id.is_empty()).then(|| schedule.owner_id.clone()),
                triggered_by: Some(
                    match triggered_by {
                        TriggeredBy::Schedule => "schedule",
                        TriggeredBy::Manual => "manual",
                    }
                    .to_string(),
                ),
                related_execution_id: Some(execution.id.clone()),
                details: serde_json::json!({
                    "schedule_id": schedule.id,
                    "schedule_name": schedule.name,
                }),
            })
            .await;

        self.dispatch(schedule, &mut execution).await;

        self.records.update_execution(&execution).await?;

        let failed = execution.status == ExecutionStatus::Failed;
        if let Some(activity_id) = activity_id {
            self.activity
                .complete(&activity_id, failed, execution.error.as_deref())
                .await;
        }

        self.events
            .publish(&SchedulerEvent::ScheduleExecutionCompleted {
                agent: schedule.agent_name.clone(),
                schedule_id: schedule.id.clone(),
                execution_id: execution.id.clone(),
                status: execution.status,
                error: execution.error.clone(),
            })
            .await;

        let next_run = compute_next_run(schedule, Utc::now());
        self.records
            .update_schedule_run_times(&schedule.id, Some(Utc::now()), next_run)
            .await?;

        info!(
            schedule = %schedule.id,
            execution = %execution.id,
            status = ?execution.status,
            duration_ms = ?execution.duration_ms,
            "Schedule firing finished"
        );
        Ok(())
    }

    /// Dispatches to the agent runtime and folds the outcome into the
    /// execution record. The task is aborted at `timeout_seconds`; the HTTP
    /// client's own budget sits slightly above as a backstop.
    async fn dispatch(&self, schedule: &Schedule, execution: &mut Execution) {
        let outcome = tokio::time::timeout(
            Duration::from_secs(schedule.timeout_seconds),
            self.agent_client.run_task(
                &schedule.agent_name,
                &schedule.message,
                schedule.timeout_seconds,
                schedule.allowed_tools.as_deref(),
                &execution.id,
            ),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                execution.response = Some(truncate_utf8(
                    &response.response_text,
                    self.config.response_truncate_bytes,
                ));
                execution.context_used = response.metrics.context_used;
                execution.context_max = response.metrics.context_max;
                execution.cost = response.metrics.cost_usd;
                execution.tool_calls = response.metrics.tool_calls_json.map(|v| v.to_string());
                execution.execution_log =
                    response.metrics.execution_log_json.map(|v| v.to_string());
                execution.finish(ExecutionStatus::Success, None);
            }
            Ok(Err(e)) => {
                let message = match e {
                    FleetError::Dispatch { message, .. } => message,
                    other => other.to_string(),
                };
                warn!(
                    schedule = %schedule.id,
                    agent = %schedule.agent_name,
                    "Dispatch failed: {message}"
                );
                execution.finish(ExecutionStatus::Failed, Some(message));
            }
            Err(_) => {
                let message = format!(
                    "execution timed out after {}s",
                    schedule.timeout_seconds
                );
                warn!(schedule = %schedule.id, agent = %schedule.agent_name, "{message}");
                execution.finish(ExecutionStatus::Failed, Some(message));
            }
        }
    }
}

/// Truncates to at most `max_bytes`, backing off to the nearest UTF-8
/// boundary. No marker is appended.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, InternalApiConfig, RuntimeConfig};
    use crate::store::{LockStore, MemoryStore, RecordStore};

    fn executor_with(
        store: Arc<MemoryStore>,
        runtime_url: String,
        config: SchedulerConfig,
    ) -> ScheduleExecutor {
        ScheduleExecutor::new(
            store.clone(),
            store.clone(),
            AgentClient::new(RuntimeConfig {
                url_template: runtime_url,
            })
            .unwrap(),
            ActivityClient::new(InternalApiConfig {
                // Nothing listens here; activity tracking is best-effort.
                base_url: "http://127.0.0.1:1".to_string(),
            }),
            EventPublisher::new(store, true),
            config,
        )
    }

    fn test_config() -> SchedulerConfig {
        let mut config = Config::default().scheduler;
        config.lock_acquire_timeout_secs = 0;
        config
    }

    #[tokio::test]
    async fn successful_firing_records_metrics_events_and_bookkeeping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/task")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "response_text": "pong",
                    "metrics": {"context_used": 100, "context_max": 200000, "cost_usd": 0.001},
                    "raw": {}
                }"#,
            )
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let mut schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        schedule.owner_id = "user-1".to_string();
        store.insert_schedule(schedule.clone()).await;

        let mut events = store.subscribe();
        let executor = executor_with(store.clone(), server.url(), test_config());
        executor.fire(&schedule, TriggeredBy::Schedule).await;

        let executions = store.executions_for_schedule(&schedule.id).await;
        assert_eq!(executions.len(), 1);
        let execution = &executions[0];
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.response.as_deref(), Some("pong"));
        assert_eq!(execution.cost, Some(0.001));
        assert_eq!(execution.context_used, Some(100));
        assert!(execution.completed_at.unwrap() >= execution.started_at);
        assert!(execution.duration_ms.unwrap() >= 0);

        let stored = store.schedule(&schedule.id).await.unwrap().unwrap();
        assert!(stored.last_run_at.is_some());
        assert!(stored.next_run_at.unwrap() > Utc::now());

        let (_, started) = events.recv().await.unwrap();
        let started: SchedulerEvent = serde_json::from_str(&started).unwrap();
        assert!(matches!(
            started,
            SchedulerEvent::ScheduleExecutionStarted { .. }
        ));
        let (_, completed) = events.recv().await.unwrap();
        match serde_json::from_str(&completed).unwrap() {
            SchedulerEvent::ScheduleExecutionCompleted { status, error, .. } => {
                assert_eq!(status, ExecutionStatus::Success);
                assert!(error.is_none());
            }
            other => panic!("expected completion event, got {other:?}"),
        }

        // The lock was released.
        assert!(store
            .try_acquire("agent:alice", 10)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unreachable_agent_fails_the_execution() {
        let store = Arc::new(MemoryStore::new());
        let schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        store.insert_schedule(schedule.clone()).await;

        let executor =
            executor_with(store.clone(), "http://127.0.0.1:1".to_string(), test_config());
        executor.fire(&schedule, TriggeredBy::Schedule).await;

        let executions = store.executions_for_schedule(&schedule.id).await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Agent not reachable"));
    }

    #[tokio::test]
    async fn non_2xx_from_agent_fails_with_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/task")
            .with_status(500)
            .with_body("kaboom")
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        store.insert_schedule(schedule.clone()).await;

        let executor = executor_with(store.clone(), server.url(), test_config());
        executor.fire(&schedule, TriggeredBy::Schedule).await;

        let executions = store.executions_for_schedule(&schedule.id).await;
        let error = executions[0].error.as_deref().unwrap();
        assert!(error.contains("500"));
        assert!(error.contains("kaboom"));
    }

    #[tokio::test]
    async fn hung_agent_times_out() {
        let store = Arc::new(MemoryStore::new());
        let mut schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        // A zero task budget elapses before any response can arrive.
        schedule.timeout_seconds = 0;
        store.insert_schedule(schedule.clone()).await;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/task")
            .with_status(200)
            .with_body(r#"{"response_text": "late"}"#)
            .create_async()
            .await;

        let executor = executor_with(store.clone(), server.url(), test_config());
        executor.fire(&schedule, TriggeredBy::Schedule).await;

        let executions = store.executions_for_schedule(&schedule.id).await;
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cron_firing_skips_silently_when_lock_is_held() {
        let store = Arc::new(MemoryStore::new());
        let schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        store.insert_schedule(schedule.clone()).await;

        // Another replica holds the agent lock.
        store.try_acquire("agent:alice", 120).await.unwrap().unwrap();

        let executor =
            executor_with(store.clone(), "http://127.0.0.1:1".to_string(), test_config());
        executor.fire(&schedule, TriggeredBy::Schedule).await;

        assert!(store.executions_for_schedule(&schedule.id).await.is_empty());
    }

    #[tokio::test]
    async fn locked_manual_trigger_records_a_failed_execution() {
        let store = Arc::new(MemoryStore::new());
        let schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        store.insert_schedule(schedule.clone()).await;
        store.try_acquire("agent:alice", 120).await.unwrap().unwrap();

        let executor =
            executor_with(store.clone(), "http://127.0.0.1:1".to_string(), test_config());
        executor.fire(&schedule, TriggeredBy::Manual).await;

        let executions = store.executions_for_schedule(&schedule.id).await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error.as_deref().unwrap().contains("locked"));
    }

    #[tokio::test]
    async fn autonomy_gate_skips_cron_and_fails_manual() {
        let store = Arc::new(MemoryStore::new());
        let schedule = Schedule::new("alice", "ping", "*/5 * * * *", "ping");
        store.insert_schedule(schedule.clone()).await;
        store.set_autonomy("alice", false).await;

        let executor =
            executor_with(store.clone(), "http://127.0.0.1:1".to_string(), test_config());

        executor.fire(&schedule, TriggeredBy::Schedule).await;
        assert!(store.executions_for_schedule(&schedule.id).await.is_empty());

        // Gated firings leave last_run_at untouched.
        let stored = store.schedule(&schedule.id).await.unwrap().unwrap();
        assert!(stored.last_run_at.is_none());

        executor.fire(&schedule, TriggeredBy::Manual).await;
        let executions = store.executions_for_schedule(&schedule.id).await;
        assert_eq!(executions.len(), 1);
        assert!(executions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("autonomy"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries_without_marker() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        // 'é' is two bytes; cutting through it backs off.
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("héllo", 3), "hé");
    }
}
