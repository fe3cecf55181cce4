//! Outbound webhook alerts (n8n-compatible JSON).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::MonitoringSummary;
use crate::config::AlertConfig;
use crate::model::{format_timestamp, now_millis, Issue, MonitoredSite, TestResult, TestStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEnvelope {
    pub timestamp: String,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub severity: Severity,
    #[serde(flatten)]
    pub event: AlertEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Info,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    TestFailure {
        tunnel: TunnelRef,
        test: TestSnapshot,
    },
    DailySummary {
        summary: MonitoringSummary,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TunnelRef {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSnapshot {
    pub status: TestStatus,
    pub performance_score: u8,
    pub load_time: u64,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

pub struct AlertDispatcher {
    client: Client,
    webhook_url: Option<String>,
    webhook_key: Option<String>,
    environment: String,
}

impl AlertDispatcher {
    pub fn new(config: &AlertConfig, environment: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone().filter(|u| !u.is_empty()),
            webhook_key: config.webhook_key.clone().filter(|k| !k.is_empty()),
            environment: environment.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn envelope(&self, severity: Severity, event: AlertEvent) -> AlertEnvelope {
        AlertEnvelope {
            timestamp: format_timestamp(&now_millis()),
            environment: self.environment.clone(),
            key: self.webhook_key.clone(),
            severity,
            event,
        }
    }

    pub fn test_failure_envelope(&self, site: &MonitoredSite, result: &TestResult) -> AlertEnvelope {
        let severity = if result.status == TestStatus::Critical {
            Severity::High
        } else {
            Severity::Medium
        };
        self.envelope(
            severity,
            AlertEvent::TestFailure {
                tunnel: TunnelRef {
                    id: site.id.clone(),
                    name: site.display_name.clone(),
                    url: site.url.clone(),
                },
                test: TestSnapshot {
                    status: result.status,
                    performance_score: result.performance_score,
                    load_time: result.load_time_ms,
                    errors: result.errors.clone(),
                    warnings: result.warnings.clone(),
                },
            },
        )
    }

    /// Returns whether the webhook accepted the alert.
    pub async fn send_test_failure(&self, site: &MonitoredSite, result: &TestResult) -> bool {
        let envelope = self.test_failure_envelope(site, result);
        self.post(&envelope).await
    }

    pub async fn send_daily_summary(&self, summary: &MonitoringSummary) -> bool {
        let envelope = self.envelope(
            Severity::Info,
            AlertEvent::DailySummary {
                summary: summary.clone(),
            },
        );
        self.post(&envelope).await
    }

    async fn post(&self, envelope: &AlertEnvelope) -> bool {
        let Some(url) = &self.webhook_url else {
            warn!("Webhook URL not configured, skipping alert");
            return false;
        };

        match self.client.post(url).json(envelope).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(status = %resp.status(), severity = ?envelope.severity, "Alert sent");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Webhook rejected alert");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to send webhook alert");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn site() -> MonitoredSite {
        MonitoredSite {
            id: "rec1".into(),
            url: "https://example.com".into(),
            display_name: "Example".into(),
            check_frequency: "daily".into(),
            status: None,
            alert_email: None,
            priority: None,
        }
    }

    type Inbox = Arc<Mutex<Vec<Value>>>;

    async fn spawn_receiver() -> (String, Inbox) {
        let inbox: Inbox = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(|State(inbox): State<Inbox>, Json(body): Json<Value>| async move {
                    inbox.lock().unwrap().push(body);
                    "ok"
                }),
            )
            .with_state(inbox.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), inbox)
    }

    #[test]
    fn test_failure_envelope_shape() {
        let config = AlertConfig {
            webhook_key: Some("s3cret".into()),
            ..Default::default()
        };
        let dispatcher = AlertDispatcher::new(&config, "production").unwrap();
        let mut result = TestResult::blank("rec1", "https://example.com");
        result.status = TestStatus::Critical;

        let json = serde_json::to_value(dispatcher.test_failure_envelope(&site(), &result)).unwrap();
        assert_eq!(json["type"], "test_failure");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["key"], "s3cret");
        assert_eq!(json["environment"], "production");
        assert_eq!(json["tunnel"]["name"], "Example");
        assert_eq!(json["test"]["status"], "critical");
        assert_eq!(json["test"]["loadTime"], 0);
    }

    #[tokio::test]
    async fn test_unconfigured_dispatcher_returns_false() {
        let dispatcher = AlertDispatcher::new(&AlertConfig::default(), "test").unwrap();
        assert!(!dispatcher.is_configured());
        let result = TestResult::blank("rec1", "https://example.com");
        assert!(!dispatcher.send_test_failure(&site(), &result).await);
    }

    #[tokio::test]
    async fn test_alerts_are_delivered() {
        let (url, inbox) = spawn_receiver().await;
        let config = AlertConfig {
            webhook_url: Some(url),
            ..Default::default()
        };
        let dispatcher = AlertDispatcher::new(&config, "test").unwrap();

        let mut result = TestResult::blank("rec1", "https://example.com");
        result.status = TestStatus::Warning;
        assert!(dispatcher.send_test_failure(&site(), &result).await);
        assert!(dispatcher.send_daily_summary(&MonitoringSummary::default()).await);

        let received = inbox.lock().unwrap().clone();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0]["severity"], "medium");
        assert!(received[0].get("key").is_none());
        assert_eq!(received[1]["type"], "daily_summary");
        assert_eq!(received[1]["severity"], "info");
        assert_eq!(received[1]["summary"]["totalTests"], 0);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_returns_false() {
        let config = AlertConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            timeout_ms: 500,
            ..Default::default()
        };
        let dispatcher = AlertDispatcher::new(&config, "test").unwrap();
        assert!(!dispatcher.send_daily_summary(&MonitoringSummary::default()).await);
    }
}
