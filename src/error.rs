use thiserror::Error;

/// Convenience type alias for Results with FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for Fleet Core
///
/// This enum represents all possible errors that can occur within
/// the execution plane, providing detailed error context for
/// debugging and error handling.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Agent runtime request error: {0}")]
    AgentApi(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid cron expression: {0}")]
    Cron(String),

    #[error("Agent {agent} queue is full ({queue_length} waiting)")]
    QueueFull { agent: String, queue_length: usize },

    #[error("Agent {agent} is busy (running entry {current})")]
    AgentBusy { agent: String, current: String },

    #[error("Dispatch to agent {agent} failed: {message}")]
    Dispatch { agent: String, message: String },

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Container error: {agent} - {message}")]
    Container { agent: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
