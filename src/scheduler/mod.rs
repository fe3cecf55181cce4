//! Run orchestration: the single-slot job queue, the site runner and the
//! cron-driven monitoring sweep.

pub mod cron;
pub mod engine;
pub mod queue;
pub mod runner;

pub use self::cron::MonitoringSchedule;
pub use self::engine::{run_monitoring_loop, run_queue_loop};
pub use self::queue::{JobHandle, JobQueue, JobRunner, QueueError, QueueSnapshot, WorkerState};
pub use self::runner::SiteRunner;
