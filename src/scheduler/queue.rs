//! Single-slot FIFO job queue.
//!
//! Jobs wait in arrival order; the worker loop starts the oldest one only
//! when nothing is running, so at most one probe drives a browser at a time.
//! No priorities, no deduplication, nothing persisted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{now_millis, rfc3339_millis, TestResult};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full ({capacity} pending)")]
    Full { capacity: usize },
    #[error("test run failed: {0}")]
    Failed(String),
    #[error("job was dropped before it completed")]
    Dropped,
}

/// Executes one queued run.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job_id: Uuid, site_id: &str) -> anyhow::Result<TestResult>;
}

/// A queued test job.
#[derive(Debug)]
struct Job {
    id: Uuid,
    site_id: String,
    reply: oneshot::Sender<Result<TestResult, QueueError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running {
        #[serde(rename = "jobId")]
        job_id: Uuid,
        #[serde(rename = "siteId")]
        site_id: String,
        #[serde(rename = "startedAt", with = "rfc3339_millis")]
        started_at: DateTime<Utc>,
    },
}

/// Read-only view for the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub worker: WorkerState,
    /// Site ids waiting, oldest first.
    pub pending: Vec<String>,
    pub max_pending: Option<usize>,
}

#[derive(Debug)]
struct QueueInner {
    pending: VecDeque<Job>,
    state: WorkerState,
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    inner: Arc<Mutex<QueueInner>>,
    max_pending: Option<usize>,
}

/// Awaitable handle for an enqueued run.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub site_id: String,
    rx: oneshot::Receiver<Result<TestResult, QueueError>>,
}

impl JobHandle {
    pub async fn result(self) -> Result<TestResult, QueueError> {
        self.rx.await.unwrap_or(Err(QueueError::Dropped))
    }
}

impl JobQueue {
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                pending: VecDeque::new(),
                state: WorkerState::Idle,
            })),
            max_pending,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a run for `site_id`. Never blocks.
    pub fn enqueue(&self, site_id: &str) -> Result<JobHandle, QueueError> {
        self.submit(Uuid::new_v4(), site_id)
    }

    /// Append a run under a job id chosen by the caller, so progress
    /// subscribers can attach before the job can start.
    pub fn submit(&self, id: Uuid, site_id: &str) -> Result<JobHandle, QueueError> {
        let mut inner = self.lock();
        if let Some(capacity) = self.max_pending {
            if inner.pending.len() >= capacity {
                warn!(site = %site_id, capacity, "Job queue full, rejecting run");
                return Err(QueueError::Full { capacity });
            }
        }

        let (tx, rx) = oneshot::channel();
        inner.pending.push_back(Job {
            id,
            site_id: site_id.to_string(),
            reply: tx,
        });
        info!(
            site = %site_id,
            job = %id,
            queued = inner.pending.len(),
            running = !matches!(inner.state, WorkerState::Idle),
            "Run queued"
        );

        Ok(JobHandle {
            job_id: id,
            site_id: site_id.to_string(),
            rx,
        })
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            worker: inner.state.clone(),
            pending: inner.pending.iter().map(|j| j.site_id.clone()).collect(),
            max_pending: self.max_pending,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.lock().state, WorkerState::Idle)
    }

    /// One worker step: if idle, run the oldest pending job to completion.
    /// Returns whether a job ran.
    pub async fn tick(&self, runner: &dyn JobRunner) -> bool {
        let job = {
            let mut inner = self.lock();
            if !matches!(inner.state, WorkerState::Idle) {
                return false;
            }
            let Some(job) = inner.pending.pop_front() else {
                return false;
            };
            inner.state = WorkerState::Running {
                job_id: job.id,
                site_id: job.site_id.clone(),
                started_at: now_millis(),
            };
            job
        };

        info!(site = %job.site_id, job = %job.id, "Processing queued run");
        let outcome = runner
            .run(job.id, &job.site_id)
            .await
            .map_err(|e| QueueError::Failed(format!("{:#}", e)));

        self.lock().state = WorkerState::Idle;
        if job.reply.send(outcome).is_err() {
            // Caller stopped waiting; the run still happened.
            info!(job = %job.id, "Run finished with no one awaiting it");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRunner;

    #[async_trait::async_trait]
    impl JobRunner for EchoRunner {
        async fn run(&self, _job_id: Uuid, site_id: &str) -> anyhow::Result<TestResult> {
            if site_id == "missing" {
                anyhow::bail!("site not found: {}", site_id);
            }
            Ok(TestResult::blank(site_id, "https://example.com"))
        }
    }

    #[tokio::test]
    async fn test_tick_runs_oldest_first() {
        let queue = JobQueue::new(None);
        let a = queue.enqueue("a").unwrap();
        let b = queue.enqueue("b").unwrap();
        assert_eq!(queue.snapshot().pending, vec!["a", "b"]);

        assert!(queue.tick(&EchoRunner).await);
        assert_eq!(queue.snapshot().pending, vec!["b"]);
        assert_eq!(a.result().await.unwrap().site_id, "a");

        assert!(queue.tick(&EchoRunner).await);
        assert_eq!(b.result().await.unwrap().site_id, "b");
        assert!(!queue.tick(&EchoRunner).await);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_runner_error_rejects_handle() {
        let queue = JobQueue::new(None);
        let handle = queue.enqueue("missing").unwrap();
        queue.tick(&EchoRunner).await;

        match handle.result().await {
            Err(QueueError::Failed(msg)) => assert!(msg.contains("site not found")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_bounded_queue_rejects_when_full() {
        let queue = JobQueue::new(Some(2));
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        assert_eq!(
            queue.enqueue("c").unwrap_err(),
            QueueError::Full { capacity: 2 }
        );
    }

    #[tokio::test]
    async fn test_submit_keeps_caller_job_id() {
        let queue = JobQueue::new(None);
        let id = Uuid::new_v4();
        let handle = queue.submit(id, "a").unwrap();
        assert_eq!(handle.job_id, id);
        assert!(queue.tick(&EchoRunner).await);
        assert_eq!(handle.result().await.unwrap().site_id, "a");
    }

    #[test]
    fn test_snapshot_serializes_state_tag() {
        let queue = JobQueue::new(None);
        let json = serde_json::to_value(queue.snapshot()).unwrap();
        assert_eq!(json["worker"]["state"], "idle");
        assert_eq!(json["pending"], serde_json::json!([]));
    }
}
