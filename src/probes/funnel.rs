//! The end-to-end landing-page probe.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};

use super::detect::{self, CtaScan, FillReport, FormScan, ImageScan, ViewportMeta};
use super::links::LinkChecker;
use super::score::{derive_status, final_score};
use super::ProbeTarget;
use crate::browser::{
    BrowserError, BrowserSession, DeviceProfile, NavigationOutcome, PageScript, SessionFactory,
    WaitCondition,
};
use crate::config::ProbeConfig;
use crate::model::{Issue, IssueKind, TestResult, TestStatus};
use crate::stream::{LogLevel, ProgressSink};

/// At most this many missing images are itemised; the count stays exact.
const MAX_IMAGE_ISSUES: usize = 10;
/// Hard ceiling on sampled links regardless of configuration.
const MAX_LINKS: usize = 10;

pub struct FunnelProbe {
    sessions: Arc<dyn SessionFactory>,
    links: LinkChecker,
    config: ProbeConfig,
}

impl FunnelProbe {
    pub fn new(sessions: Arc<dyn SessionFactory>, config: ProbeConfig) -> Result<Self> {
        let links = LinkChecker::new(config.link_timeout())?;
        Ok(Self {
            sessions,
            links,
            config,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe one page. Never fails: every problem ends up in the result.
    pub async fn run(&self, target: &ProbeTarget, progress: &ProgressSink) -> TestResult {
        let mut result = TestResult::blank(&target.site_id, &target.url);
        let started = Instant::now();
        info!(site = %target.site_id, url = %target.url, "Probe started");
        progress.info(format!("Starting test of {}", target.url));

        if let Err(e) = self.run_checks(target, progress, &mut result).await {
            warn!(site = %target.site_id, error = %e, "Probe aborted");
            progress.error(format!("Test failed: {}", e));
            result.errors.push(Issue::new(IssueKind::Test, e.to_string()));
            result.status = TestStatus::Error;
            result.performance_score = 0;
        }

        let elapsed = started.elapsed().as_millis() as u64;
        result.raw_metrics.insert("probeDurationMs".into(), json!(elapsed));
        info!(
            site = %target.site_id,
            status = %result.status,
            score = result.performance_score,
            load_ms = result.load_time_ms,
            duration_ms = elapsed,
            "Probe finished"
        );
        result
    }

    async fn run_checks(
        &self,
        target: &ProbeTarget,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) -> Result<(), BrowserError> {
        if let Err(reason) = validate_url(&target.url) {
            progress.error(reason.clone());
            record_navigation_failure(result, reason);
            return Ok(());
        }

        progress.info("Launching desktop browser...");
        let mut session = self.sessions.open(&DeviceProfile::desktop()).await?;
        let navigated = self
            .desktop_checks(session.as_mut(), target, progress, result)
            .await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "Desktop session close failed");
        }

        if !navigated {
            return Ok(());
        }

        if self.config.check_mobile {
            self.mobile_check(target, progress, result).await;
        }

        result.performance_score = final_score(
            self.config.score_policy,
            &self.config.slow_load,
            result.load_time_ms,
            result.errors.len(),
            result.warnings.len(),
        );
        result.status = derive_status(result.performance_score, result.errors.len(), true);
        progress.info(format!(
            "Performance score: {}/100 ({} errors, {} warnings)",
            result.performance_score,
            result.errors.len(),
            result.warnings.len()
        ));
        Ok(())
    }

    async fn navigate_with_retries(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        progress: &ProgressSink,
    ) -> Result<(NavigationOutcome, Duration), BrowserError> {
        let attempts = self.config.navigation_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let wait = if attempt == 1 {
                WaitCondition::NetworkIdle
            } else {
                WaitCondition::DomReady
            };
            let timeout = self.config.timeout() * attempt;
            progress.info(format!(
                "Loading page (attempt {}/{}, waiting for {}, timeout {}ms)",
                attempt,
                attempts,
                wait,
                timeout.as_millis()
            ));

            let started = Instant::now();
            match session.navigate(url, wait, timeout).await {
                Ok(outcome) => return Ok((outcome, started.elapsed())),
                Err(e) => {
                    warn!(url, attempt, error = %e, "Navigation attempt failed");
                    progress.warning(format!("Attempt {} failed: {}", attempt, e));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BrowserError::Navigation {
            url: url.to_string(),
            reason: "no navigation attempted".to_string(),
        }))
    }

    /// Everything done in the desktop session. Returns whether navigation succeeded.
    async fn desktop_checks(
        &self,
        session: &mut dyn BrowserSession,
        target: &ProbeTarget,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) -> bool {
        if let Err(e) = session.preload(&PageScript::InstallErrorCapture).await {
            debug!(error = %e, "Could not preload page error capture");
        }

        let (outcome, elapsed) = match self
            .navigate_with_retries(session, &target.url, progress)
            .await
        {
            Ok(ok) => ok,
            Err(e) => {
                progress.error(format!("Page could not be loaded: {}", e));
                record_navigation_failure(result, e.to_string());
                return false;
            }
        };

        result.load_time_ms = elapsed.as_millis() as u64;
        progress.success(format!("Page loaded in {}ms", result.load_time_ms));

        if let Some(status) = outcome.http_status {
            result.raw_metrics.insert("httpStatus".into(), json!(status));
            if status >= 400 {
                progress.error(format!("HTTP status {}", status));
                result
                    .errors
                    .push(Issue::new(IssueKind::Http, format!("HTTP {}", status)));
            }
        }
        if let Some(final_url) = outcome.final_url {
            result.raw_metrics.insert("finalUrl".into(), json!(final_url));
        }

        match session.evaluate(&PageScript::NavigationTiming).await {
            Ok(timing) => {
                progress.log(
                    LogLevel::Info,
                    "Collected navigation timing",
                    Some(timing.clone()),
                );
                result.raw_metrics.insert("performance".into(), timing);
            }
            Err(e) => debug!(error = %e, "Navigation timing unavailable"),
        }

        // No-op when the preload already installed it.
        if let Err(e) = session.evaluate(&PageScript::InstallErrorCapture).await {
            debug!(error = %e, "Could not install page error capture");
        }
        tokio::time::sleep(self.config.settle_delay()).await;

        self.check_forms(session, progress, result).await;
        self.check_ctas(session, progress, result).await;
        self.check_tracking(session, progress, result).await;
        self.collect_page_errors(session, progress, result).await;
        if self.config.check_links {
            self.check_links(session, progress, result).await;
        }
        if self.config.check_images {
            self.check_images(session, progress, result).await;
        }
        self.capture_screenshot(session, target, progress).await;

        true
    }

    async fn check_forms(
        &self,
        session: &mut dyn BrowserSession,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        progress.info("Checking forms...");
        let scan: FormScan = match session.evaluate(&PageScript::FormScan).await {
            Ok(v) => detect::decode(v),
            Err(e) => {
                progress.warning("Form detection failed");
                result.warnings.push(Issue::new(
                    IssueKind::Form,
                    format!("Form detection failed: {}", e),
                ));
                return;
            }
        };

        result.forms_valid = scan.is_valid();
        result.raw_metrics.insert("forms".into(), json!(scan));
        if !result.forms_valid {
            progress.warning("No form or lead-capture field found");
            result.warnings.push(Issue::new(
                IssueKind::Form,
                "No form or lead-capture field found",
            ));
            return;
        }
        progress.success(format!(
            "{} form(s), {} email field(s), {} name field(s)",
            scan.forms, scan.email_inputs, scan.text_inputs
        ));

        if !self.config.interact_forms {
            return;
        }
        match session.evaluate(&PageScript::FillInputs).await {
            Ok(v) => {
                let report: FillReport = detect::decode(v);
                progress.info(format!(
                    "Filled {} field(s) with submission blocked",
                    report.filled.len()
                ));
                result
                    .raw_metrics
                    .insert("formInteraction".into(), json!(report));
            }
            Err(e) => {
                progress.warning("Form interaction failed");
                result.warnings.push(Issue::new(
                    IssueKind::Form,
                    format!("Form interaction failed: {}", e),
                ));
            }
        }
    }

    async fn check_ctas(
        &self,
        session: &mut dyn BrowserSession,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        progress.info("Checking calls to action...");
        let scan: CtaScan = match session.evaluate(&PageScript::CtaScan).await {
            Ok(v) => detect::decode(v),
            Err(e) => {
                progress.warning("CTA detection failed");
                result.warnings.push(Issue::new(
                    IssueKind::Cta,
                    format!("CTA detection failed: {}", e),
                ));
                return;
            }
        };

        result.ctas_valid = scan.is_valid();
        result.raw_metrics.insert("ctas".into(), json!(scan));
        if result.ctas_valid {
            progress.success(format!("{} call(s) to action found", scan.total()));
        } else {
            progress.warning("No call to action found");
            result
                .warnings
                .push(Issue::new(IssueKind::Cta, "No call to action found"));
        }
    }

    async fn check_tracking(
        &self,
        session: &mut dyn BrowserSession,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        progress.info("Checking tracking pixels...");
        match session.evaluate(&PageScript::Tracking).await {
            Ok(v) => {
                result.tracking_pixels = detect::decode(v);
                if result.tracking_pixels.is_empty() {
                    progress.info("No tracking pixel detected");
                } else {
                    progress.success(format!(
                        "Tracking detected: {}",
                        result.tracking_pixels.join(", ")
                    ));
                }
            }
            Err(e) => {
                progress.warning("Tracking detection failed");
                result.warnings.push(Issue::new(
                    IssueKind::Tracking,
                    format!("Tracking detection failed: {}", e),
                ));
            }
        }
    }

    async fn collect_page_errors(
        &self,
        session: &mut dyn BrowserSession,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        let errors: Vec<String> = match session.evaluate(&PageScript::PageErrors).await {
            Ok(v) => detect::decode(v),
            Err(e) => {
                debug!(error = %e, "Page errors unavailable");
                return;
            }
        };
        if errors.is_empty() {
            return;
        }

        progress.warning(format!("{} script error(s) on the page", errors.len()));
        result
            .raw_metrics
            .insert("pageErrorCount".into(), json!(errors.len()));
        result.errors.extend(
            errors
                .into_iter()
                .take(self.config.max_console_errors)
                .map(|msg| Issue::new(IssueKind::Console, msg)),
        );
    }

    async fn check_links(
        &self,
        session: &mut dyn BrowserSession,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        let limit = self.config.max_links.min(MAX_LINKS);
        let urls: Vec<String> = match session
            .evaluate(&PageScript::CollectLinks { limit })
            .await
        {
            Ok(v) => detect::decode(v),
            Err(e) => {
                debug!(error = %e, "Link collection failed");
                return;
            }
        };
        if urls.is_empty() {
            return;
        }

        progress.info(format!("Checking {} link(s)...", urls.len()));
        let reports = self.links.check_all(&urls).await;
        let broken: Vec<_> = reports.iter().filter(|r| r.is_broken()).collect();
        result.broken_link_count = broken.len() as u32;
        for report in &broken {
            result
                .warnings
                .push(Issue::new(IssueKind::BrokenLink, report.describe()));
        }
        result.raw_metrics.insert("links".into(), json!(reports));

        if broken.is_empty() {
            progress.success("All sampled links respond");
        } else {
            progress.warning(format!("{} broken link(s)", broken.len()));
        }
    }

    async fn check_images(
        &self,
        session: &mut dyn BrowserSession,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        let scan: ImageScan = match session.evaluate(&PageScript::ImageScan).await {
            Ok(v) => detect::decode(v),
            Err(e) => {
                debug!(error = %e, "Image scan failed");
                return;
            }
        };

        result.missing_image_count = scan.broken.len() as u32;
        result.raw_metrics.insert(
            "images".into(),
            json!({"total": scan.total, "missing": scan.broken.len()}),
        );
        if scan.broken.is_empty() {
            return;
        }

        progress.warning(format!("{} image(s) failed to load", scan.broken.len()));
        for src in scan.broken.iter().take(MAX_IMAGE_ISSUES) {
            result.warnings.push(Issue::new(
                IssueKind::MissingImage,
                format!("Image not loaded: {}", src),
            ));
        }
    }

    async fn capture_screenshot(
        &self,
        session: &mut dyn BrowserSession,
        target: &ProbeTarget,
        progress: &ProgressSink,
    ) {
        let Some(dir) = &self.config.screenshot_dir else {
            return;
        };

        let png = match session.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!(site = %target.site_id, error = %e, "Screenshot failed");
                return;
            }
        };

        let path = dir.join(format!("screenshot-{}.png", target.artifact_key));
        match write_artifact(dir, &path, &png).await {
            Ok(()) => progress.success(format!("Screenshot saved to {}", path.display())),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not write screenshot"),
        }
    }

    async fn mobile_check(
        &self,
        target: &ProbeTarget,
        progress: &ProgressSink,
        result: &mut TestResult,
    ) {
        progress.info("Testing mobile rendering...");
        let mut session = match self.sessions.open(&DeviceProfile::mobile()).await {
            Ok(s) => s,
            Err(e) => {
                progress.warning("Mobile session unavailable");
                result.warnings.push(Issue::new(
                    IssueKind::Mobile,
                    format!("Mobile test failed: {}", e),
                ));
                return;
            }
        };

        let started = Instant::now();
        match session
            .navigate(&target.url, WaitCondition::NetworkIdle, self.config.timeout())
            .await
        {
            Ok(_) => {
                let ms = started.elapsed().as_millis() as u64;
                result.mobile_load_time_ms = Some(ms);
                progress.success(format!("Mobile page loaded in {}ms", ms));

                let meta: ViewportMeta = match session.evaluate(&PageScript::ViewportMeta).await {
                    Ok(v) => detect::decode(v),
                    Err(e) => {
                        debug!(error = %e, "Viewport check failed");
                        ViewportMeta::default()
                    }
                };
                result.raw_metrics.insert(
                    "mobile".into(),
                    json!({"loadTimeMs": ms, "viewportMeta": meta.present, "viewport": meta.content}),
                );
                if !meta.present {
                    progress.warning("No viewport meta tag");
                    result.warnings.push(Issue::new(
                        IssueKind::Mobile,
                        "No viewport meta tag; page may not be mobile friendly",
                    ));
                }
            }
            Err(e) => {
                progress.warning(format!("Mobile load failed: {}", e));
                result.warnings.push(Issue::new(
                    IssueKind::Mobile,
                    format!("Mobile test failed: {}", e),
                ));
            }
        }

        if let Err(e) = session.close().await {
            debug!(error = %e, "Mobile session close failed");
        }
    }
}

fn record_navigation_failure(result: &mut TestResult, reason: String) {
    result.status = TestStatus::Error;
    result.performance_score = 0;
    result.load_time_ms = 0;
    result.errors.push(Issue::new(IssueKind::Navigation, reason));
}

/// Accept only absolute http(s) URLs with a host.
pub fn validate_url(raw: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(format!("Unsupported URL '{}': only http(s) pages can be tested", raw)),
    }
}

async fn write_artifact(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, bytes).await
}
