use crate::api::dispatch::{DispatchAccepted, MessageDispatcher};
use crate::config::{ApiConfig, Config};
use crate::lifecycle::{ContainerManager, StartOutcome};
use crate::models::{MessageSource, QueueEntry};
use crate::queue::{ExecutionQueue, QueueStatus};
use crate::{FleetError, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Message admission and queue-driving logic
pub mod dispatch;

const SERVICE_NAME: &str = "fleet-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/health";
const ROUTE_AGENT_MESSAGES: &str = "/agents/{agent_name}/messages";
const ROUTE_AGENT_QUEUE: &str = "/agents/{agent_name}/queue";
const ROUTE_AGENT_QUEUE_CLEAR: &str = "/agents/{agent_name}/queue/clear";
const ROUTE_AGENT_QUEUE_RELEASE: &str = "/agents/{agent_name}/queue/release";
const ROUTE_AGENT_START: &str = "/agents/{agent_name}/start";
const ROUTE_AGENT_STOP: &str = "/agents/{agent_name}/stop";
const ROUTE_AGENT_CONTAINER: &str = "/agents/{agent_name}/container";

const ERROR_INTERNAL_SERVER: &str = "Internal server error";

/// Hint returned with 429 responses while the agent's queue is full.
const RETRY_AFTER_SECS: u64 = 30;

/// Control-plane HTTP server: message dispatch through the execution queue,
/// queue inspection, and container lifecycle operations.
#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    queue: ExecutionQueue,
    dispatcher: MessageDispatcher,
    lifecycle: Option<Arc<ContainerManager>>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub source: Option<MessageSource>,
    pub source_agent: Option<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub entry_id: String,
    /// `"running"` or `"queued:N"`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueFullResponse {
    pub error: String,
    pub queue_length: usize,
    pub retry_after_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearQueueResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

#[derive(Debug, Serialize)]
pub struct StartAgentResponse {
    pub outcome: StartOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiServer {
    pub fn new(config: Config, queue: ExecutionQueue, dispatcher: MessageDispatcher) -> Self {
        Self {
            config: config.api,
            queue,
            dispatcher,
            lifecycle: None,
        }
    }

    /// Attaches the container lifecycle controller; without it the start
    /// endpoint reports the capability as unavailable.
    pub fn with_lifecycle(mut self, lifecycle: Arc<ContainerManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!(
            "{}:{}",
            self.config.host, self.config.port
        ))
        .await
        .map_err(|e| FleetError::Internal(e.into()))?;

        info!(
            "Control-plane API listening on {}:{}",
            self.config.host, self.config.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;
        Ok(())
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_AGENT_MESSAGES, post(send_message))
            .route(ROUTE_AGENT_QUEUE, get(get_queue_status))
            .route(ROUTE_AGENT_QUEUE_CLEAR, post(clear_queue))
            .route(ROUTE_AGENT_QUEUE_RELEASE, post(force_release))
            .route(ROUTE_AGENT_START, post(start_agent))
            .route(ROUTE_AGENT_STOP, post(stop_agent))
            .route(ROUTE_AGENT_CONTAINER, get(get_container_status))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION
    }))
}

/// Admits a message into the agent's execution queue.
///
/// A full queue maps to 429 with the current length and a retry hint; the
/// caller is expected to back off rather than wait on an open connection.
async fn send_message(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> std::result::Result<(StatusCode, Json<SendMessageResponse>), axum::response::Response> {
    use axum::response::IntoResponse;

    let source = request.source.unwrap_or(MessageSource::User);
    let mut entry = QueueEntry::new(&agent_name, request.message, source);
    entry.source_user_id = request.user_id;
    entry.source_user_email = request.user_email;
    entry.source_agent = request.source_agent;

    match api.dispatcher.dispatch(entry).await {
        Ok(DispatchAccepted::Started { entry_id }) => Ok((
            StatusCode::OK,
            Json(SendMessageResponse {
                entry_id,
                status: "running".to_string(),
                position: None,
            }),
        )),
        Ok(DispatchAccepted::Queued { entry_id, position }) => Ok((
            StatusCode::ACCEPTED,
            Json(SendMessageResponse {
                entry_id,
                status: format!("queued:{position}"),
                position: Some(position),
            }),
        )),
        Err(FleetError::QueueFull {
            agent,
            queue_length,
        }) => {
            warn!(agent = %agent, queue_length, "Message rejected, queue full");
            Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(QueueFullResponse {
                    error: format!("Agent queue full ({queue_length} waiting)"),
                    queue_length,
                    retry_after_seconds: RETRY_AFTER_SECS,
                }),
            )
                .into_response())
        }
        Err(e) => {
            warn!(agent = %agent_name, "Message dispatch failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            )
                .into_response())
        }
    }
}

async fn get_queue_status(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
) -> std::result::Result<Json<QueueStatus>, (StatusCode, Json<ErrorResponse>)> {
    match api.queue.status(&agent_name).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => {
            warn!(agent = %agent_name, "Queue status failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

async fn clear_queue(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
) -> std::result::Result<Json<ClearQueueResponse>, (StatusCode, Json<ErrorResponse>)> {
    match api.queue.clear_queue(&agent_name).await {
        Ok(cleared) => Ok(Json(ClearQueueResponse { cleared })),
        Err(e) => {
            warn!(agent = %agent_name, "Queue clear failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

async fn force_release(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
) -> std::result::Result<Json<ReleaseResponse>, (StatusCode, Json<ErrorResponse>)> {
    match api.queue.force_release(&agent_name).await {
        Ok(released) => Ok(Json(ReleaseResponse { released })),
        Err(e) => {
            warn!(agent = %agent_name, "Force release failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

/// Starts the agent's container, converging shared-folder mounts first.
async fn start_agent(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
) -> std::result::Result<Json<StartAgentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(lifecycle) = api.lifecycle.as_ref() else {
        return Err(lifecycle_unavailable());
    };

    match lifecycle.start(&agent_name).await {
        Ok(outcome) => {
            info!(agent = %agent_name, ?outcome, "Agent start completed");
            Ok(Json(StartAgentResponse { outcome }))
        }
        Err(FleetError::Container { agent, message }) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Agent {agent}: {message}"),
                details: None,
            }),
        )),
        Err(e) => {
            warn!(agent = %agent_name, "Agent start failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

async fn stop_agent(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
) -> std::result::Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let Some(lifecycle) = api.lifecycle.as_ref() else {
        return Err(lifecycle_unavailable());
    };
    match lifecycle.stop(&agent_name).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            warn!(agent = %agent_name, "Agent stop failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

async fn get_container_status(
    State(api): State<ApiServer>,
    Path(agent_name): Path<String>,
) -> std::result::Result<Json<crate::lifecycle::ContainerStatus>, (StatusCode, Json<ErrorResponse>)>
{
    let Some(lifecycle) = api.lifecycle.as_ref() else {
        return Err(lifecycle_unavailable());
    };
    match lifecycle.status(&agent_name).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => {
            warn!(agent = %agent_name, "Container status failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: ERROR_INTERNAL_SERVER.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

fn lifecycle_unavailable() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "Container lifecycle is not available".to_string(),
            details: None,
        }),
    )
}
