use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;

/// Longest list `preview` returns.
pub const MAX_PREVIEW_RUNS: usize = 1_000;

/// When the scheduled monitoring sweep fires. Times are UTC.
#[derive(Debug, Clone)]
pub struct MonitoringSchedule {
    expression: String,
    schedule: CronSchedule,
}

/// Accept classic 5-field crontab lines by prepending a seconds field.
pub fn normalize_expression(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

impl MonitoringSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let expression = normalize_expression(expr);
        let schedule = CronSchedule::from_str(&expression)
            .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expr, e))?;
        Ok(Self {
            expression,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Every occurrence in the next `hours` hours, at most [`MAX_PREVIEW_RUNS`].
    pub fn preview(&self, from: DateTime<Utc>, hours: u64) -> Vec<DateTime<Utc>> {
        let end = i64::try_from(hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|span| from.checked_add_signed(span))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.schedule
            .after(&from)
            .take_while(|t| *t <= end)
            .take(MAX_PREVIEW_RUNS)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_five_field_expressions_gain_seconds() {
        assert_eq!(normalize_expression("0 8 * * *"), "0 0 8 * * *");
        assert_eq!(normalize_expression(" 0 0 8 * * * "), "0 0 8 * * *");
    }

    #[test]
    fn test_daily_schedule() {
        let schedule = MonitoringSchedule::parse("0 8 * * *").unwrap();
        let next = schedule.next_after(at("2026-03-01T09:00:00Z")).unwrap();
        assert_eq!(next, at("2026-03-02T08:00:00Z"));
    }

    #[test]
    fn test_preview_window() {
        let schedule = MonitoringSchedule::parse("0 0 */6 * * *").unwrap();
        let runs = schedule.preview(at("2026-03-01T00:30:00Z"), 24);
        assert_eq!(runs.len(), 4);
        assert_eq!(runs[0], at("2026-03-01T06:00:00Z"));
    }

    #[test]
    fn test_preview_with_unbounded_horizon() {
        let schedule = MonitoringSchedule::parse("0 8 * * *").unwrap();
        let runs = schedule.preview(at("2026-03-01T09:00:00Z"), u64::MAX);
        assert_eq!(runs[0], at("2026-03-02T08:00:00Z"));
        assert!(runs.len() <= MAX_PREVIEW_RUNS);
    }

    #[test]
    fn test_invalid_expression() {
        assert!(MonitoringSchedule::parse("every morning").is_err());
    }
}
