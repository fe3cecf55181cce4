//! Live progress events for probe runs.
//!
//! Each subscriber gets its own unbounded channel keyed by the job id of the
//! run it watches. Sends never block the probe; a subscriber whose receiver
//! is gone is dropped on the next publish. A `Complete` event ends every
//! subscription for its job, and runs of the same site never see each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::model::TestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Log {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Complete {
        status: TestStatus,
    },
}

type Subscribers = HashMap<Uuid, Vec<mpsc::UnboundedSender<StreamEvent>>>;

/// Fan-out point shared by the API and the runners.
#[derive(Debug, Clone, Default)]
pub struct ProgressHub {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Listen to the run that will execute as `job_id`.
    pub fn subscribe(&self, job_id: Uuid) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().entry(job_id).or_default().push(tx);
        rx
    }

    /// Drop every subscription for a job that will never run.
    pub fn unsubscribe(&self, job_id: Uuid) {
        self.lock().remove(&job_id);
    }

    pub fn publish(&self, job_id: Uuid, event: StreamEvent) {
        let mut subs = self.lock();
        let Some(list) = subs.get_mut(&job_id) else {
            return;
        };

        let terminal = matches!(event, StreamEvent::Complete { .. });
        list.retain(|tx| tx.send(event.clone()).is_ok());

        if terminal || list.is_empty() {
            subs.remove(&job_id);
        }
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.lock().get(&job_id).map_or(0, Vec::len)
    }

    /// Total open subscriptions across all jobs.
    pub fn open_subscriptions(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn sink(&self, job_id: Uuid, site_id: &str) -> ProgressSink {
        ProgressSink {
            hub: Some(self.clone()),
            job_id,
            site_id: site_id.to_string(),
        }
    }
}

/// Per-run handle the probe writes progress to.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    hub: Option<ProgressHub>,
    job_id: Uuid,
    site_id: String,
}

impl ProgressSink {
    /// A sink that only mirrors to the log.
    pub fn detached(site_id: &str) -> Self {
        Self {
            hub: None,
            job_id: Uuid::nil(),
            site_id: site_id.to_string(),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, details: Option<Value>) {
        let message = message.into();
        debug!(site = %self.site_id, job = %self.job_id, ?level, "{}", message);
        if let Some(hub) = &self.hub {
            hub.publish(
                self.job_id,
                StreamEvent::Log {
                    level,
                    message,
                    details,
                },
            );
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message, None);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn complete(&self, status: TestStatus) {
        debug!(site = %self.site_id, job = %self.job_id, %status, "Run complete");
        if let Some(hub) = &self.hub {
            hub.publish(self.job_id, StreamEvent::Complete { status });
        }
    }
}
