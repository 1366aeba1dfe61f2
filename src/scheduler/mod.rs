//! Cron scheduler service.
//!
//! Owns cron-based firing for every enabled schedule across the fleet. The
//! service keeps an in-memory job table that a periodic reconciliation pass
//! converges with the schedule table in the store, so configuration changes
//! never require a restart. Firings run as independent spawned tasks under
//! the per-agent distributed lock.

/// Scheduler HTTP endpoints (manual trigger, health, job snapshot)
pub mod api;
/// Cron parsing and next-run computation
pub mod cron;
/// The lock-guarded fire pipeline
pub mod executor;

pub use api::SchedulerApi;
pub use cron::{compute_next_run, validate_schedule, CronSpec};
pub use executor::ScheduleExecutor;

use crate::config::SchedulerConfig;
use crate::models::{Schedule, TriggeredBy};
use crate::store::RecordStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Floor on the idle sleep so a clock hiccup never spins the loop.
const MIN_IDLE_SLEEP: Duration = Duration::from_millis(200);

/// One registered cron job.
struct CronJob {
    schedule: Schedule,
    spec: CronSpec,
    fingerprint: String,
    next_fire: DateTime<Utc>,
}

/// Operator-facing snapshot of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub schedule_id: String,
    pub schedule_name: String,
    pub agent_name: String,
    pub next_fire: DateTime<Utc>,
}

pub struct SchedulerService {
    records: Arc<dyn RecordStore>,
    executor: Arc<ScheduleExecutor>,
    config: SchedulerConfig,
    jobs: Arc<RwLock<HashMap<String, CronJob>>>,
}

impl SchedulerService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        executor: Arc<ScheduleExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            records,
            executor,
            config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Drives discovery, firing, and reconciliation forever. Errors inside
    /// one pass are logged and never stop the loop.
    pub async fn run(&self) -> Result<()> {
        info!("Starting scheduler service");
        if let Err(e) = self.reconcile().await {
            error!("Initial schedule discovery failed: {e}");
        }

        let reload = Duration::from_secs(self.config.reload_interval_secs);
        let mut next_reload = Instant::now() + reload;

        loop {
            self.fire_due().await;

            if Instant::now() >= next_reload {
                if let Err(e) = self.reconcile().await {
                    error!("Schedule reconciliation failed: {e}");
                }
                next_reload = Instant::now() + reload;
            }

            let sleep_for = self.time_until_next_work(next_reload).await;
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Converges the in-memory job table with the enabled schedules in the
    /// store: new ids are added, vanished ids removed, and jobs whose
    /// trigger configuration (cron, timezone, timeout, allowed tools)
    /// changed are re-registered.
    pub async fn reconcile(&self) -> Result<()> {
        let enabled = self.records.enabled_schedules().await?;
        let known: HashSet<String> = enabled.iter().map(|s| s.id.clone()).collect();

        let mut jobs = self.jobs.write().await;

        jobs.retain(|id, job| {
            if known.contains(id) {
                true
            } else {
                info!(
                    schedule = %id,
                    name = %job.schedule.name,
                    "Removing schedule from the live job table"
                );
                false
            }
        });

        for schedule in enabled {
            let id = schedule.id.clone();
            let fingerprint = schedule.trigger_fingerprint();
            let needs_build = match jobs.get(&id) {
                None => {
                    info!("Adding new schedule {} ({})", id, schedule.name);
                    true
                }
                Some(existing) if existing.fingerprint != fingerprint => {
                    info!("Re-registering schedule {} after trigger configuration change", id);
                    true
                }
                Some(_) => false,
            };

            if needs_build {
                match Self::build_job(schedule) {
                    Some(job) => {
                        jobs.insert(id, job);
                    }
                    None => {
                        jobs.remove(&id);
                    }
                }
            } else if let Some(existing) = jobs.get_mut(&id) {
                // Non-trigger edits (name, message, owner) take effect
                // without re-registering.
                existing.schedule = schedule;
            }
        }

        debug!(jobs = jobs.len(), "Reconciliation pass complete");
        Ok(())
    }

    fn build_job(schedule: Schedule) -> Option<CronJob> {
        let spec = match CronSpec::parse(&schedule.cron_expression, &schedule.timezone) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(schedule = %schedule.id, "Skipping unparseable schedule: {e}");
                return None;
            }
        };
        let next_fire = spec.next_after(Utc::now())?;
        let fingerprint = schedule.trigger_fingerprint();
        Some(CronJob {
            schedule,
            spec,
            fingerprint,
            next_fire,
        })
    }

    /// Spawns a firing task for every job whose instant has arrived and
    /// advances its `next_fire` past now. An instant that falls inside an
    /// in-flight execution of the same agent is absorbed by the lock.
    async fn fire_due(&self) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            let mut exhausted = Vec::new();
            for (id, job) in jobs.iter_mut() {
                if job.next_fire <= now {
                    due.push(job.schedule.clone());
                    match job.spec.next_after(now) {
                        Some(next) => job.next_fire = next,
                        None => exhausted.push(id.clone()),
                    }
                }
            }
            for id in exhausted {
                jobs.remove(&id);
            }
        }

        for schedule in due {
            debug!(schedule = %schedule.id, agent = %schedule.agent_name, "Cron instant reached");
            let executor = self.executor.clone();
            tokio::spawn(async move {
                executor.fire(&schedule, TriggeredBy::Schedule).await;
            });
        }
    }

    async fn time_until_next_work(&self, next_reload: Instant) -> Duration {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        let until_fire = jobs
            .values()
            .map(|job| (job.next_fire - now).to_std().unwrap_or(Duration::ZERO))
            .min();

        let mut wait = next_reload.saturating_duration_since(Instant::now());
        if let Some(until_fire) = until_fire {
            wait = wait.min(until_fire);
        }
        wait.min(Duration::from_secs(self.config.reload_interval_secs))
            .max(MIN_IDLE_SLEEP)
    }

    /// Fires a schedule now, in the background, with `triggered_by=manual`.
    /// Returns whether the schedule exists; the caller answers immediately
    /// while the firing proceeds under the agent lock.
    pub async fn trigger_now(&self, schedule_id: &str) -> Result<bool> {
        let Some(schedule) = self.records.schedule(schedule_id).await? else {
            return Ok(false);
        };
        info!(schedule = %schedule.id, agent = %schedule.agent_name, "Manual trigger accepted");
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.fire(&schedule, TriggeredBy::Manual).await;
        });
        Ok(true)
    }

    pub async fn jobs_snapshot(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        let mut snapshot: Vec<JobInfo> = jobs
            .values()
            .map(|job| JobInfo {
                schedule_id: job.schedule.id.clone(),
                schedule_name: job.schedule.name.clone(),
                agent_name: job.schedule.agent_name.clone(),
                next_fire: job.next_fire,
            })
            .collect();
        snapshot.sort_by(|a, b| a.next_fire.cmp(&b.next_fire));
        snapshot
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}
