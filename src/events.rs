use crate::constants::EVENTS_CHANNEL;
use crate::models::ExecutionStatus;
use crate::store::PubSubStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Events the scheduler publishes onto the `scheduler:events` channel.
///
/// The UI-facing process subscribes and fans these out to browsers; the
/// scheduler itself never reads them back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    ScheduleExecutionStarted {
        agent: String,
        schedule_id: String,
        execution_id: String,
        schedule_name: String,
    },
    ScheduleExecutionCompleted {
        agent: String,
        schedule_id: String,
        execution_id: String,
        status: ExecutionStatus,
        error: Option<String>,
    },
}

/// Publishes scheduler events through the store's pub/sub primitive.
///
/// Publication is best-effort: a failed publish is logged and never fails
/// the execution it describes.
#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn PubSubStore>,
    enabled: bool,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn PubSubStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub async fn publish(&self, event: &SchedulerEvent) {
        if !self.enabled {
            return;
        }
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize scheduler event: {e}");
                return;
            }
        };
        if let Err(e) = self.store.publish(EVENTS_CHANNEL, &payload).await {
            warn!("Failed to publish scheduler event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn events_serialize_to_the_documented_wire_format() {
        let started = SchedulerEvent::ScheduleExecutionStarted {
            agent: "alice".to_string(),
            schedule_id: "sched-1".to_string(),
            execution_id: "exec-1".to_string(),
            schedule_name: "nightly".to_string(),
        };
        let value = serde_json::to_value(&started).unwrap();
        assert_eq!(value["type"], "schedule_execution_started");
        assert_eq!(value["agent"], "alice");
        assert_eq!(value["schedule_name"], "nightly");

        let completed = SchedulerEvent::ScheduleExecutionCompleted {
            agent: "alice".to_string(),
            schedule_id: "sched-1".to_string(),
            execution_id: "exec-1".to_string(),
            status: ExecutionStatus::Success,
            error: None,
        };
        let value = serde_json::to_value(&completed).unwrap();
        assert_eq!(value["type"], "schedule_execution_completed");
        assert_eq!(value["status"], "success");
        // A null error field is present, not omitted.
        assert!(value.as_object().unwrap().contains_key("error"));
    }

    #[tokio::test]
    async fn disabled_publisher_stays_silent() {
        let store = Arc::new(MemoryStore::new());
        let mut rx = store.subscribe();
        let publisher = EventPublisher::new(store.clone(), false);

        publisher
            .publish(&SchedulerEvent::ScheduleExecutionStarted {
                agent: "alice".to_string(),
                schedule_id: "s".to_string(),
                execution_id: "e".to_string(),
                schedule_name: "n".to_string(),
            })
            .await;

        assert!(rx.try_recv().is_err());
    }
}
