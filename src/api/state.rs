// src/api/state.rs
use crate::config::AppConfig;
use crate::errors::Result;
use crate::sandbox::LocalSandbox;
use crate::service::GradingService;
use crate::worker::Worker;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<GradingService<LocalSandbox>>,
    /// Set when every item is graded in its own process
    pub worker: Option<Worker>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let worker = if config.fork_per_item {
            Some(Worker::current()?)
        } else {
            None
        };
        Ok(Self {
            config: Arc::new(config.clone()),
            service: Arc::new(GradingService::from_config(config)),
            worker,
        })
    }
}
