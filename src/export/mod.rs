//! History exports: CSV for spreadsheets, JSON for everything else.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{format_timestamp, TestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

/// One CSV line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Tunnel ID")]
    pub tunnel_id: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Performance Score")]
    pub performance_score: u8,
    #[serde(rename = "Load Time (ms)")]
    pub load_time_ms: u64,
    #[serde(rename = "Errors Count")]
    pub errors_count: usize,
    #[serde(rename = "Warnings Count")]
    pub warnings_count: usize,
    #[serde(rename = "Alert Sent")]
    pub alert_sent: String,
}

impl From<&TestResult> for ExportRow {
    fn from(r: &TestResult) -> Self {
        Self {
            date: format_timestamp(&r.timestamp),
            tunnel_id: r.site_id.clone(),
            status: r.status.to_string(),
            performance_score: r.performance_score,
            load_time_ms: r.load_time_ms,
            errors_count: r.errors.len(),
            warnings_count: r.warnings.len(),
            alert_sent: if r.alert_sent { "Yes" } else { "No" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: String,
    pub period: String,
    pub tunnel_id: String,
    pub total_records: usize,
    pub data: Vec<TestResult>,
}

pub fn to_csv(results: &[TestResult]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());

    if results.is_empty() {
        // serialize() only emits headers with the first record.
        writer.write_record([
            "Date",
            "Tunnel ID",
            "Status",
            "Performance Score",
            "Load Time (ms)",
            "Errors Count",
            "Warnings Count",
            "Alert Sent",
        ])?;
    }
    for r in results {
        writer.serialize(ExportRow::from(r))?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output was not UTF-8")
}

pub fn to_document(
    results: Vec<TestResult>,
    days: u32,
    site_id: Option<&str>,
    now: DateTime<Utc>,
) -> ExportDocument {
    ExportDocument {
        export_date: format_timestamp(&now),
        period: format!("{} days", days),
        tunnel_id: site_id.unwrap_or("all").to_string(),
        total_records: results.len(),
        data: results,
    }
}

/// `tunnel-monitoring-YYYY-MM-DD.<ext>`
pub fn file_name(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "tunnel-monitoring-{}.{}",
        now.format("%Y-%m-%d"),
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, IssueKind, TestStatus};

    fn sample() -> Vec<TestResult> {
        let mut a = TestResult::blank("rec1", "https://a.example");
        a.status = TestStatus::Warning;
        a.performance_score = 66;
        a.load_time_ms = 3_100;
        a.warnings = vec![Issue::new(IssueKind::Cta, "No call to action found")];
        a.alert_sent = true;

        let mut b = TestResult::blank("rec2", "https://b.example");
        b.status = TestStatus::Success;
        b.performance_score = 100;
        vec![a, b]
    }

    #[test]
    fn test_csv_headers_and_rows() {
        let csv = to_csv(&sample()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Date,Tunnel ID,Status,Performance Score,Load Time (ms),Errors Count,Warnings Count,Alert Sent"
        );
        let first = lines.next().unwrap();
        assert!(first.ends_with(",rec1,warning,66,3100,0,1,Yes"), "{}", first);
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_empty_csv_still_has_headers() {
        let csv = to_csv(&[]).unwrap();
        assert!(csv.starts_with("Date,Tunnel ID"));
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_csv_and_json_agree() {
        let results = sample();
        let csv = to_csv(&results).unwrap();
        let doc = to_document(results.clone(), 30, None, crate::model::now_millis());

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<ExportRow> = reader.deserialize().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), doc.total_records);
        for (row, result) in rows.iter().zip(&doc.data) {
            assert_eq!(row.date, format_timestamp(&result.timestamp));
            assert_eq!(row.status, result.status.to_string());
        }
        assert_eq!(doc.tunnel_id, "all");
        assert_eq!(doc.period, "30 days");
    }

    #[test]
    fn test_file_name() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(file_name(ExportFormat::Csv, now), "tunnel-monitoring-2026-03-01.csv");
    }
}
