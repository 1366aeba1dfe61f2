use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cron-defined plan to dispatch a given message to a given agent.
///
/// Schedules are created and edited by the control plane; the scheduler only
/// writes the bookkeeping fields `last_run_at` and `next_run_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub agent_name: String,
    pub name: String,
    /// Standard 5-field expression: minute hour day month day-of-week.
    pub cron_expression: String,
    pub message: String,
    pub enabled: bool,
    /// IANA timezone name; firings are computed in this zone.
    pub timezone: String,
    pub timeout_seconds: u64,
    /// `None` = unrestricted, `Some(vec![])` = no tools allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(
        agent_name: impl Into<String>,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            message: message.into(),
            enabled: true,
            timezone: "UTC".to_string(),
            timeout_seconds: crate::constants::DEFAULT_TIMEOUT_SECS,
            allowed_tools: None,
            owner_id: String::new(),
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at: None,
        }
    }

    /// The fields whose change requires a registered cron job to be
    /// re-triggered during reconciliation.
    pub fn trigger_fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:?}",
            self.cron_expression, self.timezone, self.timeout_seconds, self.allowed_tools
        )
    }
}

/// Status of one recorded execution. Progresses monotonically
/// pending -> running -> success | failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failed)
    }
}

/// What initiated an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Schedule,
    Manual,
}

/// Record of one schedule or manual firing against an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub schedule_id: String,
    pub agent_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub message: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub triggered_by: TriggeredBy,
    pub context_used: Option<u64>,
    pub context_max: Option<u64>,
    pub cost: Option<f64>,
    /// Serialized list of tool invocations, as reported by the runtime.
    pub tool_calls: Option<String>,
    /// Raw stream-json transcript for the log viewer.
    pub execution_log: Option<String>,
}

impl Execution {
    /// Creates a running execution for a firing of `schedule`.
    ///
    /// The record is created before activity tracking so that
    /// `related_execution_id` links always resolve.
    pub fn begin(schedule: &Schedule, triggered_by: TriggeredBy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            agent_name: schedule.agent_name.clone(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            message: schedule.message.clone(),
            response: None,
            error: None,
            triggered_by,
            context_used: None,
            context_max: None,
            cost: None,
            tool_calls: None,
            execution_log: None,
        }
    }

    /// Transitions the record to a terminal status, stamping `completed_at`
    /// and `duration_ms`.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }
}

/// Origin of a queued message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Schedule,
    Agent,
}

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueEntryStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

/// One message waiting for, or holding, an agent's running slot.
///
/// Entries are ephemeral: they live in the queue's backing store and are
/// bounded by the running-slot TTL, never persisted as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub agent_name: String,
    pub source: MessageSource,
    pub source_agent: Option<String>,
    pub source_user_id: Option<String>,
    pub source_user_email: Option<String>,
    pub message: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub status: QueueEntryStatus,
}

impl QueueEntry {
    pub fn new(
        agent_name: impl Into<String>,
        message: impl Into<String>,
        source: MessageSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            source,
            source_agent: None,
            source_user_id: None,
            source_user_email: None,
            message: message.into(),
            queued_at: Utc::now(),
            started_at: None,
            status: QueueEntryStatus::Queued,
        }
    }

    pub fn from_user(mut self, user_id: impl Into<String>, email: Option<String>) -> Self {
        self.source_user_id = Some(user_id.into());
        self.source_user_email = email;
        self
    }

    pub fn from_agent(mut self, peer: impl Into<String>) -> Self {
        self.source_agent = Some(peer.into());
        self
    }
}

/// State of an activity record behind the internal observability API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Started,
    Completed,
    Failed,
}

/// Declared shared-folder topology for one agent.
///
/// `expose_enabled` mounts the agent's own volume at `/shared-out`;
/// `consume_enabled` mounts every permitted exposing peer at
/// `/shared-in/{peer}`. A running container whose mounts diverge from this
/// declaration is recreated on the next start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSharedFolderConfig {
    pub agent_name: String,
    pub expose_enabled: bool,
    pub consume_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSharedFolderConfig {
    pub fn disabled(agent_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_name: agent_name.into(),
            expose_enabled: false,
            consume_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }
}
