//! Resolves a site, probes it, alerts on failure and records the result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::queue::{JobQueue, JobRunner};
use crate::alerts::AlertDispatcher;
use crate::analysis::{summarize_run, MonitoringSummary};
use crate::ingest::ExternalReport;
use crate::model::{MonitoredSite, TestResult, TestStatus};
use crate::probes::{FunnelProbe, ProbeTarget};
use crate::storage::{RecordStore, StoreError};
use crate::stream::{LogLevel, ProgressHub, ProgressSink};

pub struct SiteRunner {
    store: Arc<dyn RecordStore>,
    probe: Arc<FunnelProbe>,
    alerts: Arc<AlertDispatcher>,
    hub: ProgressHub,
}

impl SiteRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        probe: Arc<FunnelProbe>,
        alerts: Arc<AlertDispatcher>,
        hub: ProgressHub,
    ) -> Self {
        Self {
            store,
            probe,
            alerts,
            hub,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    async fn resolve(&self, site_id: &str, sink: &ProgressSink) -> Result<MonitoredSite> {
        match self.store.get_site(site_id).await {
            Ok(site) => Ok(site),
            Err(e) => {
                sink.error(format!("Tunnel not found: {}", e));
                sink.complete(TestStatus::Error);
                Err(e).with_context(|| format!("Cannot test site {}", site_id))
            }
        }
    }

    /// Alert when the run failed, then append the result once.
    async fn alert_and_store(
        &self,
        site: &MonitoredSite,
        result: &mut TestResult,
        sink: &ProgressSink,
    ) -> Result<(), StoreError> {
        if !result.status.is_success() {
            sink.info("Sending failure alert...");
            result.alert_sent = self.alerts.send_test_failure(site, result).await;
        }

        sink.info("Saving results...");
        self.store.append_result(result).await?;
        sink.success("Results saved");
        Ok(())
    }

    /// Queue-driven run: store and alert failures are logged, never raised.
    async fn run_queued(&self, job_id: Uuid, site_id: &str) -> Result<TestResult> {
        let sink = self.hub.sink(job_id, site_id);
        let site = self.resolve(site_id, &sink).await?;

        let mut result = self
            .probe
            .run(&ProbeTarget::new(&site.id, &site.url), &sink)
            .await;

        if let Err(e) = self.alert_and_store(&site, &mut result, &sink).await {
            error!(site = %site.id, error = %e, "Failed to save test result");
            sink.warning(format!("Results could not be saved: {}", e));
        }

        sink.complete(result.status);
        Ok(result)
    }

    /// Direct run for the CLI: a store failure is returned to the caller.
    pub async fn run_direct(&self, site_id: &str) -> Result<TestResult> {
        let sink = self.hub.sink(Uuid::new_v4(), site_id);
        let site = self.resolve(site_id, &sink).await?;

        let mut result = self
            .probe
            .run(&ProbeTarget::new(&site.id, &site.url), &sink)
            .await;

        let stored = self.alert_and_store(&site, &mut result, &sink).await;
        sink.complete(result.status);
        stored.context("Failed to save test result")?;
        Ok(result)
    }

    /// Record a report produced elsewhere: stream it under its own job id,
    /// alert, then append. Live streams of local runs are left alone.
    pub async fn record_external(
        &self,
        site: &MonitoredSite,
        report: &ExternalReport,
    ) -> Result<TestResult, StoreError> {
        let mut result = report.to_result(&site.url);

        let sink = self.hub.sink(Uuid::new_v4(), &site.id);
        sink.info("Test finished on the external runner");
        let level = if result.status.is_success() {
            LogLevel::Success
        } else {
            LogLevel::Error
        };
        sink.log(
            level,
            format!("Status: {}", result.status),
            Some(json!({
                "performanceScore": result.performance_score,
                "loadTime": result.load_time_ms,
                "formsValid": result.forms_valid,
                "ctasValid": result.ctas_valid,
            })),
        );
        if report.forms_count() > 0 {
            sink.success(format!("{} form(s) found", report.forms_count()));
        }
        if report.cta_count() > 0 {
            sink.success(format!("{} call(s) to action found", report.cta_count()));
        }
        if !result.tracking_pixels.is_empty() {
            sink.success(format!(
                "Tracking detected: {}",
                result.tracking_pixels.join(", ")
            ));
        }
        sink.complete(result.status);

        self.alert_and_store(site, &mut result, &ProgressSink::detached(&site.id))
            .await?;
        info!(site = %site.id, status = %result.status, "External result recorded");
        Ok(result)
    }

    /// Test every site through the queue, one after another, then send the summary.
    pub async fn sweep(&self, queue: &JobQueue, delay_between: Duration) -> Result<MonitoringSummary> {
        let sites = self
            .store
            .list_sites()
            .await
            .context("Failed to list sites for monitoring")?;
        info!(count = sites.len(), "Starting scheduled monitoring run");

        let mut outcomes = Vec::with_capacity(sites.len());
        for (i, site) in sites.into_iter().enumerate() {
            if i > 0 && !delay_between.is_zero() {
                tokio::time::sleep(delay_between).await;
            }

            let outcome = match queue.enqueue(&site.id) {
                Ok(handle) => handle.result().await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(result) => outcomes.push((site, Some(result))),
                Err(e) => {
                    warn!(site = %site.id, error = %e, "Scheduled run failed");
                    outcomes.push((site, None));
                }
            }
        }

        let summary = summarize_run(&outcomes);
        self.alerts.send_daily_summary(&summary).await;
        info!(
            total = summary.total_tests,
            failed = summary.failed_tests,
            critical = summary.critical_issues,
            average = summary.average_performance,
            "Monitoring run completed"
        );
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl JobRunner for SiteRunner {
    async fn run(&self, job_id: Uuid, site_id: &str) -> Result<TestResult> {
        self.run_queued(job_id, site_id).await
    }
}
