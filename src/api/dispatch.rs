use crate::clients::{ActivityClient, ActivityStart, AgentClient};
use crate::constants::{ACTIVITY_AGENT_COLLABORATION, ACTIVITY_CHAT_START};
use crate::models::{MessageSource, QueueEntry};
use crate::queue::{ExecutionQueue, SubmitOutcome};
use crate::Result;
use tracing::{error, info, warn};

/// Routes inbound messages through the execution queue and drives the
/// stateful chat dispatch for whichever entry holds the running slot.
///
/// When an execution completes, the promoted wait-list entry (if any) is
/// executed by the same task, so a burst of messages drains in FIFO order
/// without the original callers waiting around.
#[derive(Clone)]
pub struct MessageDispatcher {
    queue: ExecutionQueue,
    client: AgentClient,
    activity: ActivityClient,
    timeout_secs: u64,
}

/// How a message was admitted.
#[derive(Debug, Clone)]
pub enum DispatchAccepted {
    Started { entry_id: String },
    Queued { entry_id: String, position: usize },
}

impl MessageDispatcher {
    pub fn new(
        queue: ExecutionQueue,
        client: AgentClient,
        activity: ActivityClient,
        timeout_secs: u64,
    ) -> Self {
        Self {
            queue,
            client,
            activity,
            timeout_secs,
        }
    }

    /// Submits the entry; on claiming the running slot, execution proceeds
    /// in the background. Queue-full and busy conditions surface as typed
    /// errors for the HTTP layer to map.
    pub async fn dispatch(&self, entry: QueueEntry) -> Result<DispatchAccepted> {
        match self.queue.submit(entry, true).await? {
            SubmitOutcome::Running(entry) => {
                let entry_id = entry.id.clone();
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.drive(entry).await;
                });
                Ok(DispatchAccepted::Started { entry_id })
            }
            SubmitOutcome::Queued { position, entry } => Ok(DispatchAccepted::Queued {
                entry_id: entry.id,
                position,
            }),
        }
    }

    /// Executes `entry`, then keeps executing whatever `complete` promotes
    /// until the agent's queue is drained.
    async fn drive(&self, mut entry: QueueEntry) {
        loop {
            let success = self.execute(&entry).await;
            match self.queue.complete(&entry.agent_name, success).await {
                Ok(Some(promoted)) => entry = promoted,
                Ok(None) => break,
                Err(e) => {
                    // The TTL on the running slot recovers from this.
                    error!(agent = %entry.agent_name, "Queue completion failed: {e}");
                    break;
                }
            }
        }
    }

    async fn execute(&self, entry: &QueueEntry) -> bool {
        let activity_type = match entry.source {
            MessageSource::Agent => ACTIVITY_AGENT_COLLABORATION,
            _ => ACTIVITY_CHAT_START,
        };
        let activity_id = self
            .activity
            .track(ActivityStart {
                agent_name: entry.agent_name.clone(),
                activity_type: activity_type.to_string(),
                user_id: entry.source_user_id.clone(),
                triggered_by: entry.source_agent.clone(),
                related_execution_id: None,
                details: serde_json::json!({ "entry_id": entry.id }),
            })
            .await;

        let result = self
            .client
            .chat(
                &entry.agent_name,
                &entry.message,
                entry.source_user_id.as_deref(),
                self.timeout_secs,
            )
            .await;

        let success = match result {
            Ok(_) => {
                info!(agent = %entry.agent_name, entry = %entry.id, "Chat dispatch completed");
                true
            }
            Err(e) => {
                warn!(agent = %entry.agent_name, entry = %entry.id, "Chat dispatch failed: {e}");
                false
            }
        };

        if let Some(activity_id) = activity_id {
            self.activity
                .complete(&activity_id, !success, None)
                .await;
        }
        success
    }
}
