use crate::{constants, FleetError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub internal_api: InternalApiConfig,
    pub docker: DockerConfig,
}

/// Control-plane HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub port: u16,
    pub reload_interval_secs: u64,
    pub lock_acquire_timeout_secs: u64,
    pub publish_events: bool,
    pub response_truncate_bytes: usize,
    pub default_timeout_secs: u64,
    pub min_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

impl SchedulerConfig {
    /// Lease on the per-agent lock for one firing. The margin covers
    /// finalization and event publication after the dispatch returns.
    pub fn lock_lease_secs(&self, timeout_secs: u64) -> u64 {
        timeout_secs.max(constants::LOCK_MIN_LEASE_SECS) + constants::LOCK_SAFETY_MARGIN_SECS
    }

    /// Rejects out-of-range task timeouts at write time so they never
    /// reach the firing path.
    pub fn validate_timeout(&self, timeout_secs: u64) -> Result<()> {
        if timeout_secs < self.min_timeout_secs || timeout_secs > self.max_timeout_secs {
            return Err(FleetError::Configuration(format!(
                "timeout_seconds {} out of range ({}..={})",
                timeout_secs, self.min_timeout_secs, self.max_timeout_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub execution_ttl_secs: u64,
    pub wait_timeout_secs: u64,
}

/// Which backend serves the queue/lock/pub-sub primitives.
///
/// `memory` is the single-node mode; `redis` is required whenever more
/// than one replica shares the execution plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// How to reach an agent's private runtime HTTP server.
///
/// The template's `{name}` placeholder is replaced with the agent name;
/// the default resolves through the container network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub url_template: String,
}

impl RuntimeConfig {
    pub fn base_url(&self, agent_name: &str) -> String {
        self.url_template.replace("{name}", agent_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalApiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub helper_image: String,
    pub stop_grace_secs: i64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded .env file from: {:?}", path),
            Err(_) => tracing::debug!("No .env file found, using process environment"),
        }

        let api = ApiConfig {
            host: env_or("API_HOST", "127.0.0.1"),
            port: env_parse("API_PORT", 3000),
        };

        let scheduler = SchedulerConfig {
            port: env_parse("SCHEDULER_PORT", 3100),
            reload_interval_secs: env_parse(
                "RELOAD_INTERVAL_SECONDS",
                constants::DEFAULT_RELOAD_INTERVAL_SECS,
            ),
            lock_acquire_timeout_secs: env_parse(
                "LOCK_ACQUIRE_TIMEOUT_SECONDS",
                constants::DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS,
            ),
            publish_events: env_bool("PUBLISH_EVENTS", true),
            response_truncate_bytes: env_parse(
                "RESPONSE_TRUNCATE_BYTES",
                constants::DEFAULT_RESPONSE_TRUNCATE_BYTES,
            ),
            default_timeout_secs: env_parse(
                "DEFAULT_TIMEOUT_SECONDS",
                constants::DEFAULT_TIMEOUT_SECS,
            ),
            min_timeout_secs: env_parse("MIN_TIMEOUT_SECONDS", constants::MIN_TIMEOUT_SECS),
            max_timeout_secs: env_parse("MAX_TIMEOUT_SECONDS", constants::MAX_TIMEOUT_SECS),
        };

        if scheduler.min_timeout_secs > scheduler.max_timeout_secs {
            return Err(FleetError::Configuration(format!(
                "MIN_TIMEOUT_SECONDS ({}) exceeds MAX_TIMEOUT_SECONDS ({})",
                scheduler.min_timeout_secs, scheduler.max_timeout_secs
            )));
        }
        scheduler.validate_timeout(scheduler.default_timeout_secs)?;

        let queue = QueueConfig {
            max_queue_size: env_parse("MAX_QUEUE_SIZE", constants::DEFAULT_MAX_QUEUE_SIZE),
            execution_ttl_secs: env_parse(
                "EXECUTION_TTL_SECONDS",
                constants::DEFAULT_EXECUTION_TTL_SECS,
            ),
            wait_timeout_secs: env_parse(
                "QUEUE_WAIT_TIMEOUT_SECONDS",
                constants::DEFAULT_QUEUE_WAIT_TIMEOUT_SECS,
            ),
        };

        if queue.max_queue_size == 0 {
            return Err(FleetError::Configuration(
                "MAX_QUEUE_SIZE must be at least 1".to_string(),
            ));
        }

        let store = StoreConfig {
            backend: match env_or("STORE_BACKEND", "memory").to_ascii_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(FleetError::Configuration(format!(
                        "unknown STORE_BACKEND: {other} (expected memory or redis)"
                    )))
                }
            },
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
        };

        let runtime = RuntimeConfig {
            url_template: env_or("AGENT_RUNTIME_URL_TEMPLATE", "http://agent-{name}:8000"),
        };

        let internal_api = InternalApiConfig {
            base_url: env_or("INTERNAL_API_BASE", "http://127.0.0.1:8080"),
        };

        let docker = DockerConfig {
            helper_image: env_or("FLEET_HELPER_IMAGE", constants::DEFAULT_HELPER_IMAGE),
            stop_grace_secs: env_parse(
                "CONTAINER_STOP_GRACE_SECONDS",
                constants::DEFAULT_STOP_GRACE_SECS,
            ),
        };

        Ok(Config {
            api,
            scheduler,
            queue,
            store,
            runtime,
            internal_api,
            docker,
        })
    }
}

impl Default for Config {
    /// Built-in defaults, used by tests that must not read the environment.
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            scheduler: SchedulerConfig {
                port: 3100,
                reload_interval_secs: constants::DEFAULT_RELOAD_INTERVAL_SECS,
                lock_acquire_timeout_secs: constants::DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS,
                publish_events: true,
                response_truncate_bytes: constants::DEFAULT_RESPONSE_TRUNCATE_BYTES,
                default_timeout_secs: constants::DEFAULT_TIMEOUT_SECS,
                min_timeout_secs: constants::MIN_TIMEOUT_SECS,
                max_timeout_secs: constants::MAX_TIMEOUT_SECS,
            },
            queue: QueueConfig {
                max_queue_size: constants::DEFAULT_MAX_QUEUE_SIZE,
                execution_ttl_secs: constants::DEFAULT_EXECUTION_TTL_SECS,
                wait_timeout_secs: constants::DEFAULT_QUEUE_WAIT_TIMEOUT_SECS,
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                redis_url: "redis://127.0.0.1:6379".to_string(),
            },
            runtime: RuntimeConfig {
                url_template: "http://agent-{name}:8000".to_string(),
            },
            internal_api: InternalApiConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
            },
            docker: DockerConfig {
                helper_image: constants::DEFAULT_HELPER_IMAGE.to_string(),
                stop_grace_secs: constants::DEFAULT_STOP_GRACE_SECS,
            },
        }
    }
}
