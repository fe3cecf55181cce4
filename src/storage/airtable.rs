//! Airtable REST backend.
//!
//! Sites live in one table (`URL`, `Nom`, plus the editable fields), results
//! in a history table keyed by `Tunnel_ID`. Status is written twice: the
//! canonical value in `Statut_Systeme` and the legacy label in `Statut`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{sort_newest_first, RecordStore, StoreError};
use crate::config::AirtableConfig;
use crate::model::{
    format_timestamp, Issue, IssueKind, MonitoredSite, SiteUpdate, TestResult, TestStatus,
};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirtableRecord {
    pub id: String,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

pub struct AirtableStore {
    client: Client,
    base_url: String,
    api_key: String,
    sites_table: String,
    history_table: String,
    max_records: usize,
}

impl AirtableStore {
    pub fn new(config: &AirtableConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("Airtable store needs an API key (AIRTABLE_API_KEY)")?;
        let base_id = config
            .base_id
            .clone()
            .context("Airtable store needs a base id (AIRTABLE_BASE_ID)")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Airtable HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("{}/{}", config.api_url.trim_end_matches('/'), base_id),
            api_key,
            sites_table: config.sites_table.clone(),
            history_table: config.history_table.clone(),
            max_records: config.max_records,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    /// `{table}/{id}` with the id as one percent-encoded path segment.
    fn record_url(&self, table: &str, id: &str) -> Result<url::Url, StoreError> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let mut url = url::Url::parse(&self.table_url(table))
            .map_err(|e| StoreError::Remote(format!("invalid Airtable URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Remote("Airtable URL cannot take a record id".to_string()))?
            .push(id);
        Ok(url)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, StoreError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound("record".to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Remote(format!("HTTP {}: {}", status, body)));
        }
        resp.json().await.map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Follow `offset` pagination until exhausted or `max` records are collected.
    async fn select(
        &self,
        table: &str,
        query: &[(&str, String)],
        max: Option<usize>,
    ) -> Result<Vec<AirtableRecord>, StoreError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = query.to_vec();
            params.push(("pageSize", PAGE_SIZE.to_string()));
            if let Some(max) = max {
                params.push(("maxRecords", max.to_string()));
            }
            if let Some(off) = &offset {
                params.push(("offset", off.clone()));
            }

            let value = self
                .send(self.client.get(self.table_url(table)).query(&params))
                .await?;
            let page: RecordPage =
                serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))?;
            debug!(table, count = page.records.len(), "Fetched Airtable page");
            records.extend(page.records);

            if let Some(max) = max {
                if records.len() >= max {
                    records.truncate(max);
                    break;
                }
            }
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(records)
    }

    async fn history_records(
        &self,
        formula: String,
        max: Option<usize>,
    ) -> Result<Vec<TestResult>, StoreError> {
        let query = [
            ("filterByFormula", formula),
            ("sort[0][field]", "Date_Test".to_string()),
            ("sort[0][direction]", "desc".to_string()),
        ];
        let records = self.select(&self.history_table, &query, max).await?;
        let mut results = records
            .iter()
            .map(record_to_result)
            .collect::<Result<Vec<_>, _>>()?;
        sort_newest_first(&mut results);
        Ok(results)
    }
}

#[async_trait::async_trait]
impl RecordStore for AirtableStore {
    fn backend_name(&self) -> &'static str {
        "airtable"
    }

    async fn list_sites(&self) -> Result<Vec<MonitoredSite>, StoreError> {
        let query = [("filterByFormula", "{URL} != ''".to_string())];
        let records = self
            .select(&self.sites_table, &query, Some(self.max_records))
            .await?;
        Ok(records.iter().filter_map(record_to_site).collect())
    }

    async fn get_site(&self, id: &str) -> Result<MonitoredSite, StoreError> {
        let url = self.record_url(&self.sites_table, id)?;
        let value = self
            .send(self.client.get(url))
            .await
            .map_err(|e| not_found_as(e, id))?;
        let record: AirtableRecord =
            serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))?;
        record_to_site(&record).ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_site(
        &self,
        id: &str,
        update: &SiteUpdate,
    ) -> Result<MonitoredSite, StoreError> {
        let url = self.record_url(&self.sites_table, id)?;
        let body = json!({ "fields": site_update_fields(update) });
        let value = self
            .send(self.client.patch(url).json(&body))
            .await
            .map_err(|e| not_found_as(e, id))?;
        let record: AirtableRecord =
            serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))?;
        record_to_site(&record).ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn append_result(&self, result: &TestResult) -> Result<(), StoreError> {
        let body = json!({
            "records": [{ "fields": result_to_fields(result) }],
            "typecast": true,
        });
        self.send(self.client.post(self.table_url(&self.history_table)).json(&body))
            .await?;
        Ok(())
    }

    async fn history(&self, site_id: &str, limit: usize) -> Result<Vec<TestResult>, StoreError> {
        let formula = format!("{{Tunnel_ID}} = '{}'", escape_formula(site_id));
        self.history_records(formula, Some(limit)).await
    }

    async fn results_since(
        &self,
        since: DateTime<Utc>,
        site_id: Option<&str>,
    ) -> Result<Vec<TestResult>, StoreError> {
        let window = if since == DateTime::<Utc>::MIN_UTC {
            "TRUE()".to_string()
        } else {
            format!(
                "NOT(IS_BEFORE({{Date_Test}}, '{}'))",
                format_timestamp(&since)
            )
        };
        let formula = match site_id {
            Some(id) => format!("AND({}, {{Tunnel_ID}} = '{}')", window, escape_formula(id)),
            None => window,
        };
        self.history_records(formula, None).await
    }
}

fn not_found_as(err: StoreError, id: &str) -> StoreError {
    match err {
        StoreError::NotFound(_) => StoreError::NotFound(id.to_string()),
        other => other,
    }
}

fn escape_formula(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(fields: &Map<String, Value>, key: &str) -> u64 {
    match fields.get(key) {
        Some(Value::Number(n)) => n.as_f64().map_or(0, |f| f.max(0.0).round() as u64),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "oui" | "yes"),
        _ => false,
    }
}

/// `None` for rows without a URL; those are not monitorable.
pub fn record_to_site(record: &AirtableRecord) -> Option<MonitoredSite> {
    let f = &record.fields;
    Some(MonitoredSite {
        id: record.id.clone(),
        url: text(f, "URL")?,
        display_name: text(f, "Nom").unwrap_or_else(|| "Untitled".to_string()),
        check_frequency: text(f, "Check_Frequency").unwrap_or_else(|| "daily".to_string()),
        status: text(f, "Status"),
        alert_email: text(f, "Alert_Email"),
        priority: text(f, "Priority"),
    })
}

pub fn site_update_fields(update: &SiteUpdate) -> Map<String, Value> {
    let mut fields = Map::new();
    let pairs = [
        ("Status", &update.status),
        ("Check_Frequency", &update.check_frequency),
        ("Alert_Email", &update.alert_email),
        ("Priority", &update.priority),
    ];
    for (name, value) in pairs {
        if let Some(v) = value {
            fields.insert(name.to_string(), json!(v));
        }
    }
    fields
}

pub fn legacy_status(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Success => "OK",
        TestStatus::Warning => "Warning",
        TestStatus::Error | TestStatus::Critical => "Erreur",
    }
}

fn parse_legacy_status(label: &str) -> Option<TestStatus> {
    match label {
        "OK" => Some(TestStatus::Success),
        "Warning" => Some(TestStatus::Warning),
        "Erreur" => Some(TestStatus::Error),
        _ => None,
    }
}

pub fn result_to_fields(result: &TestResult) -> Map<String, Value> {
    let performance = result
        .raw_metrics
        .get("performance")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let mut fields = Map::new();
    let mut put = |k: &str, v: Value| {
        fields.insert(k.to_string(), v);
    };
    put("Result_ID", json!(result.id));
    put("Tunnel_ID", json!(result.site_id));
    put("URL", json!(result.url));
    put("Date_Test", json!(format_timestamp(&result.timestamp)));
    put("Statut", json!(legacy_status(result.status)));
    put("Statut_Systeme", json!(result.status.as_str()));
    put("Temps_Chargement_Desktop", json!(result.load_time_ms));
    put("Temps_Chargement_Mobile", json!(result.mobile_load_time_ms.unwrap_or(0)));
    put("Formulaires_OK", json!(u8::from(result.forms_valid)));
    put("CTA_OK", json!(u8::from(result.ctas_valid)));
    put("Erreurs", json!(to_json_text(&result.errors)));
    put("Warnings", json!(to_json_text(&result.warnings)));
    put("Tracking_Pixels", json!(!result.tracking_pixels.is_empty()));
    put("Tracking_Pixels_Details", json!(to_json_text(&result.tracking_pixels)));
    put("Liens_Casses", json!(result.broken_link_count));
    put("Images_Manquantes", json!(result.missing_image_count));
    put("Performance_Score", json!(result.performance_score));
    put("Performance_Metrics", json!(to_json_text(&performance)));
    put("Raw_Metrics", json!(to_json_text(&result.raw_metrics)));
    put("Alerte_Envoyee", json!(result.alert_sent));
    fields
}

fn to_json_text<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn issues(fields: &Map<String, Value>, key: &str) -> Vec<Issue> {
    let Some(raw) = text(fields, key) else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|_| vec![Issue::new(IssueKind::Test, raw)])
}

pub fn record_to_result(record: &AirtableRecord) -> Result<TestResult, StoreError> {
    let f = &record.fields;

    let stamp = text(f, "Date_Test")
        .or_else(|| record.created_time.clone())
        .ok_or_else(|| StoreError::Decode(format!("record {} has no Date_Test", record.id)))?;
    let timestamp = DateTime::parse_from_rfc3339(&stamp)
        .map_err(|e| StoreError::Decode(format!("record {}: {}", record.id, e)))?
        .with_timezone(&Utc);

    let status = text(f, "Statut_Systeme")
        .and_then(|s| s.parse().ok())
        .or_else(|| text(f, "Statut").and_then(|s| parse_legacy_status(&s)))
        .unwrap_or(TestStatus::Error);

    let tracking_pixels = text(f, "Tracking_Pixels_Details")
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    let mut raw_metrics: BTreeMap<String, Value> = text(f, "Raw_Metrics")
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    if !raw_metrics.contains_key("performance") {
        if let Some(perf) = text(f, "Performance_Metrics").and_then(|s| serde_json::from_str(&s).ok()) {
            raw_metrics.insert("performance".to_string(), perf);
        }
    }

    let mobile = number(f, "Temps_Chargement_Mobile");

    Ok(TestResult {
        id: text(f, "Result_ID").unwrap_or_else(|| record.id.clone()),
        site_id: text(f, "Tunnel_ID").unwrap_or_default(),
        url: text(f, "URL").unwrap_or_default(),
        timestamp: timestamp.trunc_subsecs(3),
        status,
        performance_score: number(f, "Performance_Score").min(100) as u8,
        load_time_ms: number(f, "Temps_Chargement_Desktop"),
        mobile_load_time_ms: (mobile > 0).then_some(mobile),
        forms_valid: flag(f, "Formulaires_OK"),
        ctas_valid: flag(f, "CTA_OK"),
        tracking_pixels,
        broken_link_count: number(f, "Liens_Casses") as u32,
        missing_image_count: number(f, "Images_Manquantes") as u32,
        errors: issues(f, "Erreurs"),
        warnings: issues(f, "Warnings"),
        raw_metrics,
        alert_sent: flag(f, "Alerte_Envoyee"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn record(id: &str, fields: Value) -> AirtableRecord {
        serde_json::from_value(json!({"id": id, "fields": fields})).unwrap()
    }

    #[test]
    fn test_site_mapping_skips_rows_without_url() {
        let site = record_to_site(&record("rec1", json!({"URL": "https://a.example", "Nom": "A"})))
            .unwrap();
        assert_eq!(site.display_name, "A");
        assert_eq!(site.check_frequency, "daily");

        assert!(record_to_site(&record("rec2", json!({"Nom": "No url"}))).is_none());
        assert!(record_to_site(&record("rec3", json!({"URL": ""}))).is_none());
    }

    #[test]
    fn test_result_fields_write_both_status_vocabularies() {
        let mut result = TestResult::blank("rec1", "https://a.example");
        result.status = TestStatus::Critical;
        result.tracking_pixels = vec!["Google Analytics".into()];

        let fields = result_to_fields(&result);
        assert_eq!(fields["Statut"], "Erreur");
        assert_eq!(fields["Statut_Systeme"], "critical");
        assert_eq!(fields["Tunnel_ID"], "rec1");
        assert_eq!(fields["Tracking_Pixels"], true);
    }

    #[test]
    fn test_result_mapping_roundtrip() {
        let mut result = TestResult::blank("rec1", "https://a.example");
        result.status = TestStatus::Warning;
        result.performance_score = 64;
        result.load_time_ms = 3120;
        result.mobile_load_time_ms = Some(2900);
        result.forms_valid = true;
        result.warnings = vec![Issue::new(IssueKind::Cta, "No call to action found")];
        result.raw_metrics.insert("performance".into(), json!({"firstPaint": 200}));

        let rec = AirtableRecord {
            id: "recXYZ".into(),
            created_time: None,
            fields: result_to_fields(&result),
        };
        assert_eq!(record_to_result(&rec).unwrap(), result);
    }

    #[test]
    fn test_legacy_rows_fall_back_to_old_status() {
        let rec = record(
            "recOld",
            json!({
                "URL": "https://a.example",
                "Date_Test": "2025-11-02T08:00:00.000Z",
                "Statut": "Warning",
                "Erreurs": "timeout on load",
                "Formulaires_OK": 1
            }),
        );
        let result = record_to_result(&rec).unwrap();
        assert_eq!(result.id, "recOld");
        assert_eq!(result.status, TestStatus::Warning);
        assert!(result.forms_valid);
        assert_eq!(result.errors, vec![Issue::new(IssueKind::Test, "timeout on load")]);
    }

    #[test]
    fn test_update_fields_use_table_names() {
        let fields = site_update_fields(&SiteUpdate {
            check_frequency: Some("hourly".into()),
            ..Default::default()
        });
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["Check_Frequency"], "hourly");
    }

    #[test]
    fn test_formula_escaping() {
        assert_eq!(escape_formula("it's"), "it\\'s");
    }

    #[tokio::test]
    async fn test_list_sites_follows_pagination() {
        let app = Router::new().route(
            "/v0/appTest/URL_A_SURVEILLER",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("offset").map(String::as_str) {
                    None => Json(json!({
                        "records": [{"id": "rec1", "fields": {"URL": "https://a.example", "Nom": "A"}}],
                        "offset": "page2"
                    })),
                    Some(_) => Json(json!({
                        "records": [
                            {"id": "rec2", "fields": {"URL": "https://b.example", "Nom": "B"}},
                            {"id": "rec3", "fields": {"Nom": "draft"}}
                        ]
                    })),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = AirtableConfig {
            api_url: format!("http://{}/v0", addr),
            api_key: Some("key".into()),
            base_id: Some("appTest".into()),
            ..Default::default()
        };
        let store = AirtableStore::new(&config).unwrap();
        let sites = store.list_sites().await.unwrap();

        let ids: Vec<_> = sites.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["rec1", "rec2"]);
        assert!(matches!(
            store.add_site(crate::storage::NewSite {
                display_name: "x".into(),
                url: "https://x".into(),
                check_frequency: "daily".into(),
            })
            .await,
            Err(StoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_record_id_is_one_encoded_segment() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let paths = seen.clone();
        let app = Router::new().fallback(move |uri: axum::http::Uri| {
            let paths = paths.clone();
            async move {
                paths.lock().unwrap().push(uri.path().to_string());
                axum::http::StatusCode::NOT_FOUND
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = AirtableConfig {
            api_url: format!("http://{}/v0", addr),
            api_key: Some("key".into()),
            base_id: Some("appTest".into()),
            ..Default::default()
        };
        let store = AirtableStore::new(&config).unwrap();

        let err = store.get_site("rec1/../x?y#z").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "rec1/../x?y#z"));
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["/v0/appTest/URL_A_SURVEILLER/rec1%2F..%2Fx%3Fy%23z".to_string()]
        );

        assert!(matches!(store.get_site("..").await, Err(StoreError::NotFound(_))));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        assert!(AirtableStore::new(&AirtableConfig::default()).is_err());
    }
}
