use crate::scheduler::{JobInfo, SchedulerService};
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

const SERVICE_NAME: &str = "fleet-scheduler";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/api/health";
const ROUTE_TRIGGER: &str = "/api/schedules/{schedule_id}/trigger";
const ROUTE_JOBS: &str = "/api/jobs";

/// HTTP surface of the scheduler: liveness, the manual trigger, and an
/// operator snapshot of the live job table.
#[derive(Clone)]
pub struct SchedulerApi {
    host: String,
    port: u16,
    service: Arc<SchedulerService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub status: String,
}

impl SchedulerApi {
    pub fn new(host: impl Into<String>, port: u16, service: Arc<SchedulerService>) -> Self {
        Self {
            host: host.into(),
            port,
            service,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.host, self.port))
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        info!("Scheduler API listening on {}:{}", self.host, self.port);

        axum::serve(listener, app)
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;
        Ok(())
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_TRIGGER, post(trigger_schedule))
            .route(ROUTE_JOBS, get(list_jobs))
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

/// Accepts the trigger and returns immediately; the firing itself runs in
/// the background under the agent lock.
async fn trigger_schedule(
    State(api): State<SchedulerApi>,
    Path(schedule_id): Path<String>,
) -> std::result::Result<Json<TriggerResponse>, (StatusCode, Json<ErrorResponse>)> {
    match api.service.trigger_now(&schedule_id).await {
        Ok(true) => Ok(Json(TriggerResponse {
            status: "triggered".to_string(),
        })),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Schedule not found".to_string(),
                details: Some(format!("Schedule ID: {schedule_id}")),
            }),
        )),
        Err(e) => {
            warn!(schedule = %schedule_id, "Manual trigger failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Internal server error".to_string(),
                    details: None,
                }),
            ))
        }
    }
}

async fn list_jobs(State(api): State<SchedulerApi>) -> Json<Vec<JobInfo>> {
    Json(api.service.jobs_snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ActivityClient, AgentClient};
    use crate::config::{Config, InternalApiConfig, RuntimeConfig};
    use crate::events::EventPublisher;
    use crate::models::Schedule;
    use crate::scheduler::ScheduleExecutor;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn api_with(store: Arc<MemoryStore>) -> SchedulerApi {
        let config = Config::default().scheduler;
        let executor = Arc::new(ScheduleExecutor::new(
            store.clone(),
            store.clone(),
            AgentClient::new(RuntimeConfig {
                url_template: "http://127.0.0.1:1".to_string(),
            })
            .unwrap(),
            ActivityClient::new(InternalApiConfig {
                base_url: "http://127.0.0.1:1".to_string(),
            }),
            EventPublisher::new(store.clone(), false),
            config.clone(),
        ));
        let service = Arc::new(SchedulerService::new(store, executor, config));
        SchedulerApi::new("127.0.0.1", 0, service)
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let api = api_with(Arc::new(MemoryStore::new()));
        let response = api
            .build_router()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["service"], "fleet-scheduler");
    }

    #[tokio::test]
    async fn trigger_unknown_schedule_is_404() {
        let api = api_with(Arc::new(MemoryStore::new()));
        let response = api
            .build_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/schedules/nope/trigger")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_known_schedule_returns_immediately() {
        let store = Arc::new(MemoryStore::new());
        let schedule = Schedule::new("alice", "nightly", "0 3 * * *", "ping");
        store.insert_schedule(schedule.clone()).await;

        let api = api_with(store);
        let response = api
            .build_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/schedules/{}/trigger", schedule.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "triggered");
    }
}
