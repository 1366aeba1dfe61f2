//! # Fleet Core
//!
//! Fleet Core is the execution plane for a fleet of long-running, containerized
//! LLM agents. Each agent accepts task messages from interactive chat, cron
//! schedules, and peer agents, and must process them one at a time to preserve
//! in-memory conversation state.
//!
//! ## Architecture
//!
//! The system consists of:
//! - **Execution Queue**: per-agent serializer backed by a shared store
//!   (compare-and-set running slot plus a bounded FIFO wait list)
//! - **Scheduler Service**: standalone process that reconciles cron jobs with
//!   the schedule table and fires them under a per-agent distributed lock
//! - **Lifecycle Controller**: starts agent containers, converging their
//!   volume mounts with the declared shared-folder configuration
//! - **Activity & Events**: unified observability records and a pub/sub
//!   event stream consumed by the UI-facing process
//!
//! ## Usage
//!
//! Two binaries share this library: `fleet-core` (control-plane server: queue
//! dispatch and container lifecycle) and `fleet-scheduler` (cron firing).

/// HTTP API for the control-plane server
pub mod api;
/// HTTP clients for the agent runtime and the internal activities API
pub mod clients;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Error types and handling
pub mod error;
/// Scheduler event stream
pub mod events;
/// Container lifecycle and mount convergence
pub mod lifecycle;
/// Core data models
pub mod models;
/// Per-agent execution queue
pub mod queue;
/// Cron scheduler service
pub mod scheduler;
/// Backing store primitives and record access
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{FleetError, Result};
