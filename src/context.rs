use crate::build::process::ProcessRunner;
use crate::config::{Config, Definitions};
use crate::manager::QueueManager;
use anyhow::Result;
use std::sync::Arc;

/// Shared state of the scheduler daemon, wired together once at startup
/// and handed to the web layer.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub queue_manager: Arc<QueueManager>,
}

impl Context {
    /// Build the full daemon state from the environment and the
    /// definitions file it points at.
    pub fn from_environment() -> Result<Self> {
        let config = Arc::new(Config::from_environment()?);
        let definitions = Definitions::load(&config.definitions_path)?;
        Self::new(config, definitions)
    }

    pub fn new(config: Arc<Config>, definitions: Definitions) -> Result<Self> {
        let queue_manager = Arc::new(QueueManager::new(
            config.clone(),
            definitions,
            Arc::new(ProcessRunner::new()),
        )?);

        Ok(Self {
            config,
            queue_manager,
        })
    }
}
