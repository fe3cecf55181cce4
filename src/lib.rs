//! funnelwatch -- headless-browser health monitoring for marketing landing pages.
//!
//! This crate provides the core library: the funnel probe, the single-slot job
//! queue, result storage, dashboard aggregation, alerting and the HTTP API.

pub mod alerts;
pub mod analysis;
pub mod api;
pub mod browser;
pub mod config;
pub mod export;
pub mod ingest;
pub mod model;
pub mod probes;
pub mod scheduler;
pub mod storage;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::alerts::AlertDispatcher;
use crate::browser::webdriver::WebDriverFactory;
use crate::browser::SessionFactory;
use crate::config::AppConfig;
use crate::probes::FunnelProbe;
use crate::scheduler::{JobQueue, MonitoringSchedule, SiteRunner};
use crate::storage::RecordStore;
use crate::stream::ProgressHub;

/// Everything a run needs, wired once from the configuration.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RecordStore>,
    pub probe: Arc<FunnelProbe>,
    pub hub: ProgressHub,
    pub queue: JobQueue,
    pub runner: Arc<SiteRunner>,
}

impl Services {
    /// Wire services with a WebDriver-backed browser.
    pub fn build(config: AppConfig) -> Result<Self> {
        let sessions: Arc<dyn SessionFactory> = Arc::new(WebDriverFactory::new(&config.probe));
        let store = storage::open_store(&config.store)?;
        Self::with_parts(config, store, sessions)
    }

    /// Wire services around an existing store and browser.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        let probe = Arc::new(
            FunnelProbe::new(sessions, config.probe.clone()).context("Failed to build probe")?,
        );
        let alerts = Arc::new(
            AlertDispatcher::new(&config.alerts, &config.server.environment)
                .context("Failed to build alert dispatcher")?,
        );
        let hub = ProgressHub::new();
        let queue = JobQueue::new(config.queue.max_pending);
        let runner = Arc::new(SiteRunner::new(
            store.clone(),
            probe.clone(),
            alerts,
            hub.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            probe,
            hub,
            queue,
            runner,
        })
    }

    /// Start the queue worker on the current runtime.
    pub fn spawn_queue_worker(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let runner: Arc<dyn scheduler::JobRunner> = self.runner.clone();
        let poll = Duration::from_millis(self.config.queue.poll_interval_ms.max(1));
        tokio::spawn(scheduler::run_queue_loop(queue, runner, poll))
    }

    pub fn app_state(&self) -> api::state::AppState {
        api::state::AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            queue: self.queue.clone(),
            hub: self.hub.clone(),
            runner: self.runner.clone(),
        }
    }

    pub fn sweep_delay(&self) -> Duration {
        Duration::from_millis(self.config.monitoring.delay_between_sites_ms)
    }
}

/// Start the funnelwatch daemon: API server, queue worker and scheduled monitoring.
pub async fn serve(config: AppConfig) -> Result<()> {
    let bind = config.server.bind.clone();
    tracing::info!(
        store = ?config.store.backend,
        webdriver = %config.probe.webdriver_url,
        "Initializing services"
    );
    let services = Services::build(config)?;

    services.spawn_queue_worker();

    if services.config.monitoring.enabled {
        let schedule = MonitoringSchedule::parse(&services.config.monitoring.cron)?;
        tokio::spawn(scheduler::run_monitoring_loop(
            schedule,
            services.runner.clone(),
            services.queue.clone(),
            services.sweep_delay(),
        ));
    } else {
        tracing::info!("Scheduled monitoring disabled");
    }

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;
    let app = api::router(services.app_state());

    tracing::info!(%addr, "funnelwatch listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("funnelwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
