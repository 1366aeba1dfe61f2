use crate::config::RuntimeConfig;
use crate::constants::{DISPATCH_TIMEOUT_MARGIN_SECS, SESSION_PROBE_TIMEOUT_SECS};
use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for the per-agent runtime HTTP server.
///
/// Every agent container exposes the same private API: `POST /api/task`
/// (stateless, returns the raw stream-json log), `POST /api/chat`
/// (stateful conversation), and `GET /api/session` (context usage probe).
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    config: RuntimeConfig,
}

#[derive(Debug, Serialize)]
struct TaskRequestBody<'a> {
    message: &'a str,
    timeout_seconds: u64,
    /// Absent means unrestricted; an empty list means no tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_tools: Option<&'a [String]>,
    execution_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

/// Execution metrics reported by the runtime alongside the response text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskMetrics {
    pub context_used: Option<u64>,
    pub context_max: Option<u64>,
    pub context_percent: Option<f64>,
    pub cost_usd: Option<f64>,
    pub tool_calls_json: Option<serde_json::Value>,
    pub execution_log_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskResponse {
    pub response_text: String,
    #[serde(default)]
    pub metrics: TaskMetrics,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub context_used: Option<u64>,
    pub context_max: Option<u64>,
    pub context_percent: Option<f64>,
}

impl AgentClient {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(FleetError::AgentApi)?;
        Ok(Self { http, config })
    }

    /// Dispatches a stateless task. The HTTP budget is the task timeout plus
    /// a fixed margin; callers enforce the task timeout itself.
    pub async fn run_task(
        &self,
        agent_name: &str,
        message: &str,
        timeout_seconds: u64,
        allowed_tools: Option<&[String]>,
        execution_id: &str,
    ) -> Result<TaskResponse> {
        let url = format!("{}/api/task", self.config.base_url(agent_name));
        debug!(agent = %agent_name, execution = %execution_id, "Dispatching task to runtime");

        let body = TaskRequestBody {
            message,
            timeout_seconds,
            allowed_tools,
            execution_id,
        };
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(
                timeout_seconds + DISPATCH_TIMEOUT_MARGIN_SECS,
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::map_send_error(agent_name, e))?;

        Self::parse_response(agent_name, response).await
    }

    /// Sends a stateful chat message; the runtime threads it into the
    /// agent's live conversation.
    pub async fn chat(
        &self,
        agent_name: &str,
        message: &str,
        user_id: Option<&str>,
        timeout_seconds: u64,
    ) -> Result<TaskResponse> {
        let url = format!("{}/api/chat", self.config.base_url(agent_name));
        let body = ChatRequestBody { message, user_id };
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(
                timeout_seconds + DISPATCH_TIMEOUT_MARGIN_SECS,
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::map_send_error(agent_name, e))?;

        Self::parse_response(agent_name, response).await
    }

    /// Probes the agent's context usage.
    pub async fn session(&self, agent_name: &str) -> Result<SessionInfo> {
        let url = format!("{}/api/session", self.config.base_url(agent_name));
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(SESSION_PROBE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| Self::map_send_error(agent_name, e))?;

        Self::parse_response(agent_name, response).await
    }

    fn map_send_error(agent_name: &str, error: reqwest::Error) -> FleetError {
        if error.is_timeout() {
            FleetError::Timeout {
                message: format!("request to agent {agent_name} timed out: {error}"),
            }
        } else if error.is_connect() {
            FleetError::Dispatch {
                agent: agent_name.to_string(),
                message: format!("Agent not reachable: {error}"),
            }
        } else {
            FleetError::AgentApi(error)
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        agent_name: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(FleetError::Dispatch {
                agent: agent_name.to_string(),
                message: format!("agent returned HTTP {status}: {snippet}"),
            });
        }
        Ok(response.json().await?)
    }
}
