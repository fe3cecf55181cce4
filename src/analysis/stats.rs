use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{format_timestamp, MonitoredSite, TestResult, TestStatus};

/// Dashboard figures over a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub period_days: u32,
    pub total_tests: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    pub critical_issues: usize,
    pub average_performance: u32,
    pub average_load_time: u64,
    pub tests_by_day: BTreeMap<String, usize>,
    pub error_types: BTreeMap<String, usize>,
}

/// Latest known state of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub id: String,
    pub name: String,
    pub url: String,
    /// A [`TestStatus`] value, or `unknown` before the first run.
    pub status: String,
    pub last_test: Option<String>,
    pub performance_score: Option<u8>,
    pub load_time_ms: Option<u64>,
    pub error_count: usize,
    pub warning_count: usize,
}

/// Start of a trailing window; windows reaching before the representable range start at its minimum.
pub fn window_start(period_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    Duration::try_days(i64::from(period_days))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn rounded_mean(values: impl Iterator<Item = u64>) -> u64 {
    let (sum, count) = values.fold((0u64, 0u64), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0
    } else {
        (sum as f64 / count as f64).round() as u64
    }
}

pub fn compute_stats(results: &[TestResult], period_days: u32, now: DateTime<Utc>) -> DashboardStats {
    let since = window_start(period_days, now);
    let window: Vec<&TestResult> = results.iter().filter(|r| r.timestamp >= since).collect();

    let mut stats = DashboardStats {
        period_days,
        total_tests: window.len(),
        ..Default::default()
    };

    for r in &window {
        if r.status.is_success() {
            stats.successful_tests += 1;
        } else {
            stats.failed_tests += 1;
        }
        if r.status == TestStatus::Critical {
            stats.critical_issues += 1;
        }

        let day = r.timestamp.format("%Y-%m-%d").to_string();
        *stats.tests_by_day.entry(day).or_default() += 1;

        for issue in &r.errors {
            *stats.error_types.entry(issue.kind.to_string()).or_default() += 1;
        }
    }

    stats.average_performance =
        rounded_mean(window.iter().map(|r| u64::from(r.performance_score))) as u32;
    stats.average_load_time =
        rounded_mean(window.iter().map(|r| r.load_time_ms).filter(|&ms| ms > 0));

    stats
}

pub fn current_status(site: &MonitoredSite, latest: Option<&TestResult>) -> SiteStatus {
    SiteStatus {
        id: site.id.clone(),
        name: site.display_name.clone(),
        url: site.url.clone(),
        status: latest.map_or_else(|| "unknown".to_string(), |r| r.status.to_string()),
        last_test: latest.map(|r| format_timestamp(&r.timestamp)),
        performance_score: latest.map(|r| r.performance_score),
        load_time_ms: latest.map(|r| r.load_time_ms),
        error_count: latest.map_or(0, |r| r.errors.len()),
        warning_count: latest.map_or(0, |r| r.warnings.len()),
    }
}

/// Non-success results in the window for which an alert went out.
pub fn alerts(results: &[TestResult], days: u32, now: DateTime<Utc>) -> Vec<TestResult> {
    let since = window_start(days, now);
    results
        .iter()
        .filter(|r| r.timestamp >= since && !r.status.is_success() && r.alert_sent)
        .cloned()
        .collect()
}
