/// Internal activities API client (best-effort observability)
pub mod activity;
/// Agent runtime HTTP client
pub mod runtime;

pub use activity::{ActivityClient, ActivityStart};
pub use runtime::{AgentClient, TaskMetrics, TaskResponse};
