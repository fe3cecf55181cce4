use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::cron::MonitoringSchedule;
use super::queue::{JobQueue, JobRunner};
use super::runner::SiteRunner;

/// Queue worker loop. Polls every `poll` and runs at most one job at a time.
pub async fn run_queue_loop(queue: JobQueue, runner: Arc<dyn JobRunner>, poll: Duration) {
    info!(poll_ms = poll.as_millis() as u64, "Queue worker started");

    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        queue.tick(runner.as_ref()).await;
    }
}

/// Sleep until each cron occurrence, then sweep every site.
pub async fn run_monitoring_loop(
    schedule: MonitoringSchedule,
    runner: Arc<SiteRunner>,
    queue: JobQueue,
    delay_between: Duration,
) {
    info!(cron = %schedule.expression(), "Scheduled monitoring enabled");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(cron = %schedule.expression(), "Schedule has no future occurrences, stopping");
            return;
        };
        info!(next = %next.to_rfc3339(), "Next monitoring run");

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        if let Err(e) = runner.sweep(&queue, delay_between).await {
            error!("Monitoring run failed: {:#}", e);
        }
    }
}
