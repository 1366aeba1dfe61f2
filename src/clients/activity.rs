use crate::config::InternalApiConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const ACTIVITY_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for the control plane's internal activities API.
///
/// Activity tracking is best-effort observability: every failure here is
/// logged and swallowed, because the execution record remains the
/// authoritative ledger.
#[derive(Debug, Clone)]
pub struct ActivityClient {
    http: reqwest::Client,
    base_url: String,
}

/// Payload for `POST /internal/activities/track`.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityStart {
    pub agent_name: String,
    pub activity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_execution_id: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    activity_id: String,
}

#[derive(Debug, Serialize)]
struct CompleteRequest<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    details: serde_json::Value,
}

impl ActivityClient {
    pub fn new(config: InternalApiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url,
        }
    }

    /// Opens an activity record; returns its id, or `None` when the
    /// internal API is unavailable.
    pub async fn track(&self, start: ActivityStart) -> Option<String> {
        let url = format!("{}/internal/activities/track", self.base_url);
        let result = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(ACTIVITY_REQUEST_TIMEOUT_SECS))
            .json(&start)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<TrackResponse>().await {
                    Ok(tracked) => Some(tracked.activity_id),
                    Err(e) => {
                        warn!("Activity track response unreadable: {e}");
                        None
                    }
                }
            }
            Ok(response) => {
                warn!(
                    status = %response.status(),
                    activity_type = %start.activity_type,
                    "Activity track rejected"
                );
                None
            }
            Err(e) => {
                warn!(activity_type = %start.activity_type, "Activity track failed: {e}");
                None
            }
        }
    }

    /// Closes an activity record with a terminal state.
    pub async fn complete(&self, activity_id: &str, failed: bool, error: Option<&str>) {
        let url = format!("{}/internal/activities/{}/complete", self.base_url, activity_id);
        let body = CompleteRequest {
            status: if failed { "failed" } else { "completed" },
            error,
            details: serde_json::Value::Null,
        };
        let result = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(ACTIVITY_REQUEST_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    activity_id,
                    status = %response.status(),
                    "Activity completion rejected"
                );
            }
            Err(e) => {
                warn!(activity_id, "Activity completion failed: {e}");
            }
        }
    }
}
