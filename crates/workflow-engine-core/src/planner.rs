//! Recurrence planner (spec §4.6): pure function from a schedule configuration to the next
//! fire instant. Delegates cron parsing to the `cron` crate over `chrono-tz`-resolved
//! timezones, the same way the teacher's cron block does, rather than hand-rolling DST rules.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// Starter sub-block fields the planner consumes. Extracted by the caller from the
/// starter block's resolved `subBlocks` (the planner itself has no notion of a `Block`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub schedule_type: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub minutes_interval: Option<u32>,
    #[serde(default)]
    pub minutes_starting_at: Option<String>,
    #[serde(default)]
    pub hourly_minute: Option<u32>,
    #[serde(default)]
    pub daily_time: Option<String>,
    #[serde(default)]
    pub weekly_day: Option<String>,
    #[serde(default)]
    pub weekly_day_time: Option<String>,
    #[serde(default)]
    pub monthly_day: Option<u32>,
    #[serde(default)]
    pub monthly_time: Option<String>,
}

impl ScheduleConfig {
    fn tz(&self) -> Result<Tz, PlannerError> {
        match &self.timezone {
            None => Ok(Tz::UTC),
            Some(name) => Tz::from_str(name).map_err(|_| PlannerError::UnknownTimezone(name.clone())),
        }
    }
}

/// Compute the next fire instant. `schedule_cron_expression` is `schedule.cronExpression`
/// (case 1 in §4.6); it takes priority over `config.schedule_type` dispatch.
pub fn next_run_time(
    schedule_cron_expression: Option<&str>,
    config: &ScheduleConfig,
    last_ran_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, PlannerError> {
    let tz = config.tz()?;

    if let Some(expr) = schedule_cron_expression.filter(|e| !e.is_empty()) {
        return next_cron_occurrence(expr, tz, now);
    }

    match config.schedule_type.as_str() {
        "minutes" => next_minutes(config, last_ran_at, now, tz),
        "hourly" => next_hourly(config, now, tz),
        "daily" => next_daily(config, now, tz),
        "weekly" => next_weekly(config, now, tz),
        "monthly" => next_monthly(config, now, tz),
        "custom" => {
            let expr = config
                .cron_expression
                .as_deref()
                .filter(|e| !e.is_empty())
                .ok_or_else(|| PlannerError::InvalidCronExpression {
                    expression: String::new(),
                    cause: "custom schedule has no cron expression".to_string(),
                })?;
            next_cron_occurrence(expr, tz, now)
        }
        other => Err(PlannerError::UnsupportedScheduleType(other.to_string())),
    }
}

/// Widen a standard 5-field cron expression (minute hour dom month dow) to the 6-field
/// seconds-prefixed form the `cron` crate expects, then find the earliest occurrence
/// strictly after `now` in `tz`.
fn next_cron_occurrence(expr: &str, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>, PlannerError> {
    let fields = expr.split_whitespace().count();
    let with_seconds = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    let schedule = CronSchedule::from_str(&with_seconds).map_err(|e| PlannerError::InvalidCronExpression {
        expression: expr.to_string(),
        cause: e.to_string(),
    })?;
    let now_tz = now.with_timezone(&tz);
    let next = schedule
        .after(&now_tz)
        .next()
        .ok_or_else(|| PlannerError::InvalidCronExpression {
            expression: expr.to_string(),
            cause: "cron schedule produced no upcoming occurrence".to_string(),
        })?;
    Ok(next.with_timezone(&Utc))
}

fn parse_time(raw: &str) -> Result<NaiveTime, PlannerError> {
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| PlannerError::InvalidTimeOfDay(raw.to_string()))
}

fn parse_weekday(raw: &str) -> Result<Weekday, PlannerError> {
    match raw.to_ascii_uppercase().as_str() {
        "MON" => Ok(Weekday::Mon),
        "TUE" => Ok(Weekday::Tue),
        "WED" => Ok(Weekday::Wed),
        "THU" => Ok(Weekday::Thu),
        "FRI" => Ok(Weekday::Fri),
        "SAT" => Ok(Weekday::Sat),
        "SUN" => Ok(Weekday::Sun),
        _ => Err(PlannerError::InvalidTimeOfDay(raw.to_string())),
    }
}

/// Last valid day-of-month for `(year, month)`.
fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid month");
    first_of_next.pred_opt().expect("valid date").day()
}

fn clamp_to_month(year: i32, month: u32, day: u32) -> NaiveDate {
    let clamped = day.min(days_in_month(year, month)).max(1);
    NaiveDate::from_ymd_opt(year, month, clamped).expect("clamped day is valid")
}

/// Resolve a local `(date, time)` pair to a UTC instant, in the given timezone. DST gaps
/// (the local time does not exist) resolve to the later of the two surrounding offsets, since
/// `cron`-adjacent scheduling should never silently fire twice for an ambiguous local time.
fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(_, later) => later.with_timezone(&Utc),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
    }
}

fn next_minutes(
    config: &ScheduleConfig,
    last_ran_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<DateTime<Utc>, PlannerError> {
    let interval = config.minutes_interval.unwrap_or(15).max(1) as i64;

    if let Some(last_ran_at) = last_ran_at {
        let mut candidate = last_ran_at + Duration::minutes(interval);
        while candidate <= now {
            candidate += Duration::minutes(interval);
        }
        return Ok(candidate);
    }

    let starting_at = match &config.minutes_starting_at {
        Some(raw) => parse_time(raw)?,
        None => NaiveTime::from_hms_opt(0, 0, 0).expect("valid time"),
    };
    let now_local = now.with_timezone(&tz);
    let mut candidate = local_to_utc(tz, now_local.date_naive(), starting_at);
    while candidate <= now {
        candidate += Duration::minutes(interval);
    }
    Ok(candidate)
}

fn next_hourly(config: &ScheduleConfig, now: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, PlannerError> {
    let minute = config.hourly_minute.unwrap_or(0);
    let now_local = now.with_timezone(&tz);
    let candidate_time = NaiveTime::from_hms_opt(now_local.hour(), minute, 0)
        .ok_or_else(|| PlannerError::InvalidTimeOfDay(format!("{minute}")))?;
    let mut candidate = local_to_utc(tz, now_local.date_naive(), candidate_time);
    if candidate <= now {
        candidate += Duration::hours(1);
    }
    Ok(candidate)
}

fn next_daily(config: &ScheduleConfig, now: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, PlannerError> {
    let time = match &config.daily_time {
        Some(raw) => parse_time(raw)?,
        None => NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
    };
    let now_local = now.with_timezone(&tz);
    let mut candidate = local_to_utc(tz, now_local.date_naive(), time);
    if candidate <= now {
        candidate = local_to_utc(tz, now_local.date_naive() + Duration::days(1), time);
    }
    Ok(candidate)
}

fn next_weekly(config: &ScheduleConfig, now: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, PlannerError> {
    let target_day = match &config.weekly_day {
        Some(raw) => parse_weekday(raw)?,
        None => Weekday::Mon,
    };
    let time = match &config.weekly_day_time {
        Some(raw) => parse_time(raw)?,
        None => NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
    };
    let now_local = now.with_timezone(&tz);
    let today = now_local.date_naive();
    let mut days_ahead = (target_day.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let mut candidate_date = today + Duration::days(days_ahead);
    let mut candidate = local_to_utc(tz, candidate_date, time);
    if candidate <= now {
        days_ahead += 7;
        candidate_date = today + Duration::days(days_ahead);
        candidate = local_to_utc(tz, candidate_date, time);
    }
    Ok(candidate)
}

fn next_monthly(config: &ScheduleConfig, now: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>, PlannerError> {
    let day = config.monthly_day.unwrap_or(1).clamp(1, 31);
    let time = match &config.monthly_time {
        Some(raw) => parse_time(raw)?,
        None => NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
    };
    let now_local = now.with_timezone(&tz);
    let (year, month) = (now_local.year(), now_local.month());
    let candidate_date = clamp_to_month(year, month, day);
    let mut candidate = local_to_utc(tz, candidate_date, time);
    if candidate <= now {
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let candidate_date = clamp_to_month(next_year, next_month, day);
        candidate = local_to_utc(tz, candidate_date, time);
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn cron_every_five_minutes() {
        let next = next_cron_occurrence("*/5 * * * *", Tz::UTC, utc(2024, 1, 1, 12, 7, 30)).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 12, 10, 0));
    }

    #[test]
    fn daily_future_today() {
        let config = ScheduleConfig {
            schedule_type: "daily".into(),
            daily_time: Some("09:00".into()),
            ..Default::default()
        };
        let next = next_run_time(None, &config, None, utc(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 9, 0, 0));
    }

    #[test]
    fn daily_rolls_to_tomorrow() {
        let config = ScheduleConfig {
            schedule_type: "daily".into(),
            daily_time: Some("09:00".into()),
            ..Default::default()
        };
        let next = next_run_time(None, &config, None, utc(2024, 1, 1, 10, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 9, 0, 0));
    }

    #[test]
    fn minutes_cold_start_steps_from_starting_at() {
        let config = ScheduleConfig {
            schedule_type: "minutes".into(),
            minutes_interval: Some(15),
            minutes_starting_at: Some("09:00".into()),
            ..Default::default()
        };
        let next = next_run_time(None, &config, None, utc(2024, 6, 1, 9, 7, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 1, 9, 15, 0));
    }

    #[test]
    fn minutes_warm_advances_from_last_ran_at() {
        let config = ScheduleConfig {
            schedule_type: "minutes".into(),
            minutes_interval: Some(15),
            minutes_starting_at: Some("09:00".into()),
            ..Default::default()
        };
        let next = next_run_time(
            None,
            &config,
            Some(utc(2024, 6, 1, 9, 15, 0)),
            utc(2024, 6, 1, 9, 16, 0),
        )
        .unwrap();
        assert_eq!(next, utc(2024, 6, 1, 9, 30, 0));
    }

    #[test]
    fn monthly_clamps_to_last_day_of_shorter_month() {
        let config = ScheduleConfig {
            schedule_type: "monthly".into(),
            monthly_day: Some(31),
            monthly_time: Some("09:00".into()),
            ..Default::default()
        };
        // April has 30 days; scheduled for the 31st, so it should clamp to April 30.
        let next = next_run_time(None, &config, None, utc(2024, 4, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 4, 30, 9, 0, 0));
    }

    #[test]
    fn weekly_exact_boundary_is_not_yet_due() {
        let config = ScheduleConfig {
            schedule_type: "weekly".into(),
            weekly_day: Some("MON".into()),
            weekly_day_time: Some("09:00".into()),
            ..Default::default()
        };
        // 2024-01-01 is a Monday.
        let next = next_run_time(None, &config, None, utc(2024, 1, 1, 9, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 9, 0, 0));
    }

    #[test]
    fn planning_is_idempotent() {
        let config = ScheduleConfig {
            schedule_type: "hourly".into(),
            hourly_minute: Some(30),
            ..Default::default()
        };
        let now = utc(2024, 1, 1, 10, 5, 0);
        let a = next_run_time(None, &config, None, now).unwrap();
        let b = next_run_time(None, &config, None, now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unsupported_schedule_type_fails() {
        let config = ScheduleConfig {
            schedule_type: "fortnightly".into(),
            ..Default::default()
        };
        let err = next_run_time(None, &config, None, utc(2024, 1, 1, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, PlannerError::UnsupportedScheduleType(t) if t == "fortnightly"));
    }
}
