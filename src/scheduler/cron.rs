//! Five-field cron parsing and timezone-aware next-run computation.
//!
//! Schedules carry standard `minute hour day month day-of-week` expressions
//! with day-of-week numbered 0=Sun..6=Sat. The `cron` crate engine expects a
//! seconds field and Quartz-style day-of-week ordinals (1=Sun..7=Sat), so
//! expressions are normalized before parsing.

use crate::models::Schedule;
use crate::{FleetError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// A parsed cron expression bound to its schedule timezone.
#[derive(Debug, Clone)]
pub struct CronSpec {
    schedule: CronSchedule,
    timezone: Tz,
}

impl CronSpec {
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| FleetError::Cron(format!("unknown timezone: {timezone}")))?;
        let normalized = normalize_expression(expression)?;
        let schedule = CronSchedule::from_str(&normalized)
            .map_err(|e| FleetError::Cron(format!("{expression}: {e}")))?;
        Ok(Self {
            schedule,
            timezone: tz,
        })
    }

    /// The first firing instant strictly after `after`, computed in the
    /// schedule's timezone and returned in UTC.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Computes `next_run_at` for a schedule: `Some` iff the schedule is enabled
/// and its expression parses. The control plane calls this at write time;
/// the scheduler calls it again after each fire.
pub fn compute_next_run(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !schedule.enabled {
        return None;
    }
    CronSpec::parse(&schedule.cron_expression, &schedule.timezone)
        .ok()
        .and_then(|spec| spec.next_after(after))
}

/// Write-time validation: cron expression, timezone, and timeout range.
/// Rejected schedules never reach the firing path.
pub fn validate_schedule(
    schedule: &Schedule,
    config: &crate::config::SchedulerConfig,
) -> Result<()> {
    CronSpec::parse(&schedule.cron_expression, &schedule.timezone)?;
    config.validate_timeout(schedule.timeout_seconds)?;
    Ok(())
}

/// Validates the 5-field shape, remaps day-of-week ordinals, and pins the
/// seconds field to `0`.
fn normalize_expression(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(FleetError::Cron(format!(
            "expected 5 fields (minute hour day month day-of-week), got {}",
            fields.len()
        )));
    }
    let day_of_week = remap_day_of_week(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

/// Rewrites Unix day-of-week ordinals (0=Sun..6=Sat, 7=Sun) to the engine's
/// 1=Sun..7=Sat. Step counts after `/` and symbolic names pass through.
fn remap_day_of_week(field: &str) -> Result<String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let remapped_range = if range == "*" {
            range.to_string()
        } else if let Some((start, end)) = range.split_once('-') {
            format!("{}-{}", remap_dow_value(start)?, remap_dow_value(end)?)
        } else {
            remap_dow_value(range)?
        };
        match step {
            Some(step) => items.push(format!("{remapped_range}/{step}")),
            None => items.push(remapped_range),
        }
    }
    Ok(items.join(","))
}

fn remap_dow_value(value: &str) -> Result<String> {
    match value.parse::<u8>() {
        Ok(n) if n <= 7 => Ok(((n % 7) + 1).to_string()),
        Ok(n) => Err(FleetError::Cron(format!(
            "day-of-week value {n} out of range (0-7)"
        ))),
        // Symbolic names (SUN, MON, ...) are understood by the engine as-is.
        Err(_) => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn every_five_minutes_lands_on_multiples() {
        let spec = CronSpec::parse("*/5 * * * *", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 2, 30).unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn next_is_strictly_in_the_future() {
        let spec = CronSpec::parse("*/5 * * * *", "UTC").unwrap();
        // Exactly on a firing instant: the next one is five minutes later.
        let on_boundary = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap();
        let next = spec.next_after(on_boundary).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 10, 0).unwrap());
    }

    #[test]
    fn unix_sunday_zero_is_accepted() {
        let spec = CronSpec::parse("0 9 * * 0", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn weekday_range_excludes_weekends() {
        let spec = CronSpec::parse("30 8 * * 1-5", "UTC").unwrap();
        // Saturday morning: the next firing is Monday.
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 10, 0, 0).unwrap();
        let next = spec.next_after(saturday).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (8, 30));
    }

    #[test]
    fn ranges_with_steps_survive_remapping() {
        let spec = CronSpec::parse("0 0 * * 1-5/2", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        // Mon/Wed/Fri only.
        let mut current = after;
        for _ in 0..5 {
            let next = spec.next_after(current).unwrap();
            assert!(matches!(
                next.weekday(),
                Weekday::Mon | Weekday::Wed | Weekday::Fri
            ));
            current = next;
        }
    }

    #[test]
    fn firings_follow_the_schedule_timezone() {
        let spec = CronSpec::parse("0 12 * * *", "America/New_York").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let next = spec.next_after(after).unwrap();
        // Noon Eastern in June is 16:00 UTC (DST).
        assert_eq!(next.hour(), 16);
    }

    #[test]
    fn rejects_wrong_field_counts() {
        assert!(CronSpec::parse("* * * *", "UTC").is_err());
        assert!(CronSpec::parse("0 * * * * *", "UTC").is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(CronSpec::parse("* * * * *", "Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn rejects_out_of_range_day_of_week() {
        assert!(CronSpec::parse("0 0 * * 9", "UTC").is_err());
    }

    #[test]
    fn compute_next_run_is_none_when_disabled_or_unparseable() {
        let mut schedule = Schedule::new("alice", "nightly", "0 3 * * *", "ping");
        let now = Utc::now();
        assert!(compute_next_run(&schedule, now).is_some());

        schedule.enabled = false;
        assert!(compute_next_run(&schedule, now).is_none());

        schedule.enabled = true;
        schedule.cron_expression = "not a cron".to_string();
        assert!(compute_next_run(&schedule, now).is_none());
    }

    #[test]
    fn validate_schedule_checks_expression_timezone_and_timeout() {
        let config = crate::config::Config::default().scheduler;
        let mut schedule = Schedule::new("alice", "nightly", "0 3 * * *", "ping");
        assert!(validate_schedule(&schedule, &config).is_ok());

        schedule.timeout_seconds = 10;
        assert!(validate_schedule(&schedule, &config).is_err());

        schedule.timeout_seconds = 900;
        schedule.timezone = "Nowhere/Here".to_string();
        assert!(validate_schedule(&schedule, &config).is_err());
    }
}
