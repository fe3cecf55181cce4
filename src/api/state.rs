use std::sync::Arc;

use crate::config::AppConfig;
use crate::scheduler::{JobQueue, SiteRunner};
use crate::storage::RecordStore;
use crate::stream::ProgressHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RecordStore>,
    pub queue: JobQueue,
    pub hub: ProgressHub,
    pub runner: Arc<SiteRunner>,
}
