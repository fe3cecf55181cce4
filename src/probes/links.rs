use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;

/// Outcome of checking one link target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReport {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl LinkReport {
    pub fn is_broken(&self) -> bool {
        self.error.is_some() || self.status.map_or(true, |s| s >= 400)
    }

    pub fn describe(&self) -> String {
        match (&self.error, self.status) {
            (Some(err), _) => format!("{} unreachable: {}", self.url, err),
            (None, Some(status)) => format!("{} returned HTTP {}", self.url, status),
            (None, None) => format!("{} gave no response", self.url),
        }
    }
}

/// HEAD-first link checker with a per-request timeout.
#[derive(Debug, Clone)]
pub struct LinkChecker {
    client: Client,
}

impl LinkChecker {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("funnelwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build link-check HTTP client")?;
        Ok(Self { client })
    }

    pub async fn check(&self, url: &str) -> LinkReport {
        let start = Instant::now();

        let mut response = self.client.head(url).send().await;
        // Some servers refuse HEAD outright; retry those with GET.
        if let Ok(resp) = &response {
            if matches!(
                resp.status(),
                StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
            ) {
                response = self.client.get(url).send().await;
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match response {
            Ok(resp) => LinkReport {
                url: url.to_string(),
                status: Some(resp.status().as_u16()),
                error: None,
                elapsed_ms,
            },
            Err(e) => LinkReport {
                url: url.to_string(),
                status: None,
                error: Some(if e.is_timeout() {
                    "timed out".to_string()
                } else {
                    e.to_string()
                }),
                elapsed_ms,
            },
        }
    }

    /// Check every URL concurrently; reports keep input order.
    pub async fn check_all(&self, urls: &[String]) -> Vec<LinkReport> {
        futures::future::join_all(urls.iter().map(|u| self.check(u))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxStatus, routing::get, Router};

    async fn spawn_site() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/gone", get(|| async { AxStatus::NOT_FOUND }))
            .route(
                "/get-only",
                get(|| async { "body" }).head(|| async { AxStatus::METHOD_NOT_ALLOWED }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_link_statuses() {
        let base = spawn_site().await;
        let checker = LinkChecker::new(Duration::from_secs(2)).unwrap();

        let urls = vec![
            format!("{}/ok", base),
            format!("{}/gone", base),
            format!("{}/get-only", base),
        ];
        let reports = checker.check_all(&urls).await;

        assert_eq!(reports.len(), 3);
        assert!(!reports[0].is_broken());
        assert!(reports[1].is_broken());
        assert_eq!(reports[1].status, Some(404));
        assert_eq!(reports[2].status, Some(200), "HEAD 405 should fall back to GET");
    }

    #[tokio::test]
    async fn test_unreachable_link_is_broken() {
        let checker = LinkChecker::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) is almost never listening locally.
        let report = checker.check("http://127.0.0.1:9/").await;
        assert!(report.is_broken());
        assert!(report.error.is_some());
    }
}
