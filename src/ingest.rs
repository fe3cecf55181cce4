//! Probe reports posted by an external runner (CI workflow).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::model::{now_millis, Issue, IssueKind, MonitoredSite, TestResult};
use crate::probes::score::derive_status;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReport {
    pub tunnel_id: String,
    #[serde(default)]
    pub tunnel_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub status: String,
    #[serde(default)]
    pub performance_score: f64,
    #[serde(default)]
    pub load_time: f64,
    #[serde(default)]
    pub mobile_load_time: Option<f64>,
    #[serde(default)]
    pub forms_valid: bool,
    #[serde(default)]
    pub ctas_valid: bool,
    #[serde(default)]
    pub tracking_pixels: Vec<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn count_at(details: &Map<String, Value>, flat: &str, nested: (&str, &str)) -> u64 {
    details
        .get(flat)
        .and_then(Value::as_u64)
        .or_else(|| details.get(nested.0)?.get(nested.1)?.as_u64())
        .unwrap_or(0)
}

impl ExternalReport {
    /// Anything but an explicit `error` means the runner reached the page.
    pub fn navigation_succeeded(&self) -> bool {
        !self.status.eq_ignore_ascii_case("error")
    }

    pub fn forms_count(&self) -> u64 {
        count_at(&self.details, "formsCount", ("forms", "formsCount"))
    }

    pub fn cta_count(&self) -> u64 {
        count_at(&self.details, "ctaCount", ("ctas", "total"))
    }

    /// Site record to alert with when the store does not know the tunnel.
    pub fn fallback_site(&self) -> MonitoredSite {
        MonitoredSite {
            id: self.tunnel_id.clone(),
            url: self.url.clone().unwrap_or_default(),
            display_name: self
                .tunnel_name
                .clone()
                .unwrap_or_else(|| self.tunnel_id.clone()),
            check_frequency: "daily".to_string(),
            status: None,
            alert_email: None,
            priority: None,
        }
    }

    /// Convert to a result; the status is re-derived, never trusted.
    pub fn to_result(&self, site_url: &str) -> TestResult {
        let url = self.url.as_deref().unwrap_or(site_url);
        let mut result = TestResult::blank(&self.tunnel_id, url);

        result.timestamp = self
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| chrono::SubsecRound::trunc_subsecs(t.with_timezone(&Utc), 3))
            .unwrap_or_else(now_millis);
        result.performance_score = if self.navigation_succeeded() {
            self.performance_score.clamp(0.0, 100.0).round() as u8
        } else {
            0
        };
        result.load_time_ms = self.load_time.max(0.0).round() as u64;
        result.mobile_load_time_ms = self.mobile_load_time.map(|ms| ms.max(0.0).round() as u64);
        result.forms_valid = self.forms_valid;
        result.ctas_valid = self.ctas_valid;
        result.tracking_pixels = self.tracking_pixels.clone();

        if let Some(err) = self.error.as_deref().filter(|e| !e.is_empty()) {
            result.errors.push(Issue::new(IssueKind::Test, err));
        }

        result.raw_metrics.insert("source".into(), json!("external"));
        result
            .raw_metrics
            .insert("reportedStatus".into(), json!(self.status));
        if let Some(perf) = self.details.get("performance") {
            result.raw_metrics.insert("performance".into(), perf.clone());
        }
        if !self.details.is_empty() {
            result
                .raw_metrics
                .insert("details".into(), Value::Object(self.details.clone()));
        }

        result.status = derive_status(
            result.performance_score,
            result.errors.len(),
            self.navigation_succeeded(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestStatus;

    fn report(body: Value) -> ExternalReport {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_status_is_rederived() {
        let r = report(json!({
            "tunnelId": "rec1",
            "url": "https://example.com",
            "status": "success",
            "performanceScore": 45,
            "loadTime": 7200,
            "trackingPixels": ["Facebook Pixel"],
            "details": {"formsCount": 2}
        }));
        let result = r.to_result("https://ignored.example");

        assert_eq!(result.status, TestStatus::Critical);
        assert_eq!(result.url, "https://example.com");
        assert_eq!(result.load_time_ms, 7200);
        assert_eq!(r.forms_count(), 2);
    }

    #[test]
    fn test_error_report_becomes_test_error() {
        let r = report(json!({
            "tunnelId": "rec1",
            "timestamp": "2026-02-01T10:00:00.123456Z",
            "status": "error",
            "performanceScore": 0,
            "error": "net::ERR_NAME_NOT_RESOLVED"
        }));
        let result = r.to_result("https://example.com");

        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.errors, vec![Issue::new(IssueKind::Test, "net::ERR_NAME_NOT_RESOLVED")]);
        assert_eq!(result.url, "https://example.com");
        assert_eq!(
            crate::model::format_timestamp(&result.timestamp),
            "2026-02-01T10:00:00.123Z"
        );
    }

    #[test]
    fn test_error_report_scores_zero() {
        let r = report(json!({
            "tunnelId": "rec1",
            "status": "error",
            "performanceScore": 85,
            "loadTime": 900
        }));
        let result = r.to_result("https://example.com");

        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.performance_score, 0);
    }

    #[test]
    fn test_nested_detail_counts() {
        let r = report(json!({
            "tunnelId": "rec1",
            "status": "success",
            "details": {"forms": {"formsCount": 1}, "ctas": {"total": 4}}
        }));
        assert_eq!(r.forms_count(), 1);
        assert_eq!(r.cta_count(), 4);
    }

    #[test]
    fn test_out_of_range_score_is_clamped() {
        let r = report(json!({"tunnelId": "rec1", "status": "success", "performanceScore": 140}));
        assert_eq!(r.to_result("https://x").performance_score, 100);
    }
}
