//! Core domain records: monitored sites, test results, and their issues.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// A landing page under watch ("tunnel").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredSite {
    pub id: String,
    pub url: String,
    pub display_name: String,
    pub check_frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// The fields an operator may change on a site. Anything else in an update
/// request is dropped during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUpdate {
    #[serde(default, alias = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, alias = "Check_Frequency", skip_serializing_if = "Option::is_none")]
    pub check_frequency: Option<String>,
    #[serde(default, alias = "Alert_Email", skip_serializing_if = "Option::is_none")]
    pub alert_email: Option<String>,
    #[serde(default, alias = "Priority", skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl SiteUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.check_frequency.is_none()
            && self.alert_email.is_none()
            && self.priority.is_none()
    }

    /// Apply the present fields to `site`.
    pub fn apply_to(&self, site: &mut MonitoredSite) {
        if let Some(status) = &self.status {
            site.status = Some(status.clone());
        }
        if let Some(freq) = &self.check_frequency {
            site.check_frequency = freq.clone();
        }
        if let Some(email) = &self.alert_email {
            site.alert_email = Some(email.clone());
        }
        if let Some(priority) = &self.priority {
            site.priority = Some(priority.clone());
        }
    }
}

/// Outcome classification of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Success,
    Warning,
    Error,
    Critical,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Success => "success",
            TestStatus::Warning => "warning",
            TestStatus::Error => "error",
            TestStatus::Critical => "critical",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Success)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(TestStatus::Success),
            "warning" => Ok(TestStatus::Warning),
            "error" => Ok(TestStatus::Error),
            "critical" => Ok(TestStatus::Critical),
            other => Err(format!("unknown test status '{}'", other)),
        }
    }
}

/// Category of a recorded error or warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Navigation,
    Http,
    Console,
    Form,
    Cta,
    Tracking,
    BrokenLink,
    MissingImage,
    Mobile,
    Test,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Navigation => "navigation",
            IssueKind::Http => "http",
            IssueKind::Console => "console",
            IssueKind::Form => "form",
            IssueKind::Cta => "cta",
            IssueKind::Tracking => "tracking",
            IssueKind::BrokenLink => "broken_link",
            IssueKind::MissingImage => "missing_image",
            IssueKind::Mobile => "mobile",
            IssueKind::Test => "test",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(alias = "type")]
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One probe run against one site. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub site_id: String,
    pub url: String,
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub status: TestStatus,
    pub performance_score: u8,
    pub load_time_ms: u64,
    #[serde(default)]
    pub mobile_load_time_ms: Option<u64>,
    pub forms_valid: bool,
    pub ctas_valid: bool,
    #[serde(default)]
    pub tracking_pixels: Vec<String>,
    #[serde(default)]
    pub broken_link_count: u32,
    #[serde(default)]
    pub missing_image_count: u32,
    #[serde(default)]
    pub errors: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Issue>,
    #[serde(default)]
    pub raw_metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub alert_sent: bool,
}

impl TestResult {
    /// An empty result stamped with a fresh id and the current time.
    pub fn blank(site_id: &str, url: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            url: url.to_string(),
            timestamp: now_millis(),
            status: TestStatus::Error,
            performance_score: 0,
            load_time_ms: 0,
            mobile_load_time_ms: None,
            forms_valid: false,
            ctas_valid: false,
            tracking_pixels: Vec::new(),
            broken_link_count: 0,
            missing_image_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            raw_metrics: BTreeMap::new(),
            alert_sent: false,
        }
    }
}

/// Current time truncated to millisecond precision, matching what the stores
/// and exports can represent.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Canonical textual form of a result timestamp.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub mod rfc3339_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_update_ignores_unknown_fields() {
        let update: SiteUpdate = serde_json::from_str(
            r#"{"Status": "paused", "url": "https://evil.example", "priority": "high"}"#,
        )
        .unwrap();

        assert_eq!(update.status.as_deref(), Some("paused"));
        assert_eq!(update.priority.as_deref(), Some("high"));
        assert!(update.check_frequency.is_none());
    }

    #[test]
    fn test_site_update_apply() {
        let mut site = MonitoredSite {
            id: "rec1".into(),
            url: "https://example.com".into(),
            display_name: "Example".into(),
            check_frequency: "daily".into(),
            status: None,
            alert_email: None,
            priority: None,
        };
        let update = SiteUpdate {
            check_frequency: Some("hourly".into()),
            alert_email: Some("ops@example.com".into()),
            ..Default::default()
        };
        update.apply_to(&mut site);

        assert_eq!(site.check_frequency, "hourly");
        assert_eq!(site.alert_email.as_deref(), Some("ops@example.com"));
        assert_eq!(site.url, "https://example.com");
    }

    #[test]
    fn test_issue_accepts_type_alias() {
        let issue: Issue =
            serde_json::from_str(r#"{"type": "broken_link", "message": "404"}"#).unwrap();
        assert_eq!(issue.kind, IssueKind::BrokenLink);
    }

    #[test]
    fn test_timestamp_serializes_with_millis() {
        let mut result = TestResult::blank("rec1", "https://example.com");
        result.timestamp = DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["timestamp"], "2026-03-01T08:00:00.000Z");
        assert_eq!(json["status"], "error");
        assert_eq!(json["siteId"], "rec1");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Critical".parse::<TestStatus>().unwrap(), TestStatus::Critical);
        assert!("OK".parse::<TestStatus>().is_err());
    }
}
