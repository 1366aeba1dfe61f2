//! System-wide constants and default configuration values.

// Queue defaults
/// Maximum entries allowed in an agent's wait list.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 3;
/// TTL on the running slot; recovers agents whose executor crashed
/// without calling `complete`.
pub const DEFAULT_EXECUTION_TTL_SECS: u64 = 600;
/// Entries queued longer than this are discarded at promotion time.
pub const DEFAULT_QUEUE_WAIT_TIMEOUT_SECS: u64 = 120;

// Scheduler defaults
/// Interval between reconciliation passes over the schedule table.
pub const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;
pub const MIN_TIMEOUT_SECS: u64 = 300;
pub const MAX_TIMEOUT_SECS: u64 = 7200;
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS: u64 = 5;
/// Stored responses are truncated to this many bytes (UTF-8 boundary,
/// no marker appended).
pub const DEFAULT_RESPONSE_TRUNCATE_BYTES: usize = 10240;

/// Lock lease = max(timeout, LOCK_MIN_LEASE) + LOCK_SAFETY_MARGIN.
pub const LOCK_MIN_LEASE_SECS: u64 = 60;
pub const LOCK_SAFETY_MARGIN_SECS: u64 = 60;

/// HTTP client budget on top of the task timeout; the task itself is
/// aborted at `timeout_seconds`.
pub const DISPATCH_TIMEOUT_MARGIN_SECS: u64 = 10;
/// Timeout for the lightweight `GET /api/session` context probe.
pub const SESSION_PROBE_TIMEOUT_SECS: u64 = 5;

// Event bus
/// Pub/sub channel all scheduler events are published onto.
pub const EVENTS_CHANNEL: &str = "scheduler:events";

// Activity types
pub const ACTIVITY_SCHEDULE_START: &str = "schedule_start";
pub const ACTIVITY_CHAT_START: &str = "chat_start";
pub const ACTIVITY_AGENT_COLLABORATION: &str = "agent_collaboration";

// Shared-folder mount topology
pub const SHARED_OUT_TARGET: &str = "/shared-out";
pub const SHARED_IN_PREFIX: &str = "/shared-in";

// Container lifecycle
/// Grace period handed to Docker when stopping a container.
pub const DEFAULT_STOP_GRACE_SECS: i64 = 10;
/// Image used by the one-shot helper that chowns a freshly created
/// shared volume to the agent's non-root user.
pub const DEFAULT_HELPER_IMAGE: &str = "busybox:stable";
/// uid:gid owning shared volumes inside agent containers.
pub const SHARED_VOLUME_OWNER: &str = "1000:1000";
