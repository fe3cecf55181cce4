//! Aggregations over stored results: dashboard statistics, per-site status,
//! the alert list and the scheduled-run summary.

pub mod stats;

use serde::{Deserialize, Serialize};

use crate::model::{MonitoredSite, TestResult, TestStatus};

pub use self::stats::{alerts, compute_stats, current_status, DashboardStats, SiteStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelIssue {
    pub name: String,
    pub url: String,
    pub status: String,
}

/// Outcome of one monitoring sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSummary {
    pub total_tests: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    pub critical_issues: usize,
    pub average_performance: u32,
    pub tunnels_with_issues: Vec<TunnelIssue>,
}

/// Summarise a sweep. A site with no result (the run itself failed) counts as
/// a failed test with status `error` and is left out of the average.
pub fn summarize_run(outcomes: &[(MonitoredSite, Option<TestResult>)]) -> MonitoringSummary {
    let mut summary = MonitoringSummary {
        total_tests: outcomes.len(),
        ..Default::default()
    };
    let mut score_sum = 0u64;
    let mut scored = 0u64;

    for (site, result) in outcomes {
        let status = result.as_ref().map_or(TestStatus::Error, |r| r.status);
        if let Some(r) = result {
            score_sum += u64::from(r.performance_score);
            scored += 1;
        }

        if status.is_success() {
            summary.successful_tests += 1;
            continue;
        }
        summary.failed_tests += 1;
        if status == TestStatus::Critical {
            summary.critical_issues += 1;
        }
        summary.tunnels_with_issues.push(TunnelIssue {
            name: site.display_name.clone(),
            url: site.url.clone(),
            status: status.to_string(),
        });
    }

    if scored > 0 {
        summary.average_performance = (score_sum as f64 / scored as f64).round() as u32;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str) -> MonitoredSite {
        MonitoredSite {
            id: id.into(),
            url: format!("https://{}.example", id),
            display_name: id.to_uppercase(),
            check_frequency: "daily".into(),
            status: None,
            alert_email: None,
            priority: None,
        }
    }

    fn result(status: TestStatus, score: u8) -> TestResult {
        let mut r = TestResult::blank("x", "https://x.example");
        r.status = status;
        r.performance_score = score;
        r
    }

    #[test]
    fn test_summarize_run() {
        let outcomes = vec![
            (site("a"), Some(result(TestStatus::Success, 95))),
            (site("b"), Some(result(TestStatus::Critical, 30))),
            (site("c"), None),
        ];
        let summary = summarize_run(&outcomes);

        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.successful_tests, 1);
        assert_eq!(summary.failed_tests, 2);
        assert_eq!(summary.critical_issues, 1);
        assert_eq!(summary.average_performance, 63);
        assert_eq!(summary.tunnels_with_issues.len(), 2);
        assert_eq!(summary.tunnels_with_issues[1].status, "error");
        assert_eq!(summary.tunnels_with_issues[0].name, "B");
    }

    #[test]
    fn test_summarize_empty_run() {
        assert_eq!(summarize_run(&[]), MonitoringSummary::default());
    }
}
