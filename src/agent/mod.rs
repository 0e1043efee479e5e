//! The worker-side build agent: accepts dispatched builds, caps local
//! concurrency, and tracks each build's status until it is polled.

pub mod api;

pub use api::run_agent_server;

use crate::build::BuildRunner;
use crate::config::AgentConfig;
use crate::manager::project::Project;
use crate::queue::IntegrationRequest;
use crate::types::{BuildId, BuildStatus};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Status bookkeeping for one dispatched build. Created when the build
/// is accepted, finished exactly once by its worker, evicted by the
/// retention sweep after it has been terminal for a while.
struct BuildStatusInformation {
    status: BuildStatus,
    finished_at: Option<Instant>,
    cancel: watch::Sender<bool>,
}

pub struct BuildAgent {
    semaphore: Arc<Semaphore>,
    next_build_id: AtomicU64,
    statuses: DashMap<BuildId, BuildStatusInformation>,
    /// Parsed project definitions keyed by the SHA-256 of their
    /// serialized form. Append-only for the process lifetime; repeat
    /// dispatches of the same definition skip re-parsing.
    definitions: DashMap<String, Arc<Project>>,
    runner: Arc<dyn BuildRunner>,
    status_retention: Duration,
}

impl BuildAgent {
    pub fn new(config: &AgentConfig, runner: Arc<dyn BuildRunner>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.allowed)),
            next_build_id: AtomicU64::new(0),
            statuses: DashMap::new(),
            definitions: DashMap::new(),
            runner,
            status_retention: config.status_retention,
        }
    }

    /// Advisory capacity check: true iff a build started right now
    /// would not queue behind running ones. Nothing is reserved, so a
    /// caller must tolerate a subsequent dispatch still queueing.
    pub fn can_build(&self, _project_name: &str) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Accept a build and return its id immediately. Execution happens
    /// on a spawned worker gated by the concurrency semaphore; an
    /// over-capacity dispatch queues, it never fails.
    pub fn start_build(
        self: &Arc<Self>,
        project_definition: &str,
        request: IntegrationRequest,
    ) -> anyhow::Result<BuildId> {
        let project = self.resolve_definition(project_definition)?;

        let id = BuildId::from(self.next_build_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.statuses.insert(
            id,
            BuildStatusInformation {
                status: BuildStatus::Unknown,
                finished_at: None,
                cancel: cancel_tx,
            },
        );

        info!(build_id = %id, project = %project.name, "accepted dispatched build");

        let agent = self.clone();
        tokio::spawn(async move {
            agent.run_build(id, project, request, cancel_rx).await;
        });

        Ok(id)
    }

    /// Cancel a dispatched build. A queued build skips execution, a
    /// running build's command is killed; a finished or unknown id is
    /// accepted with no effect.
    pub fn cancel_build(&self, id: BuildId) {
        match self.statuses.get(&id) {
            Some(info) if !info.status.is_terminal() => {
                info!(build_id = %id, "cancelling dispatched build");
                info.cancel.send_replace(true);
            }
            Some(_) => info!(build_id = %id, "ignoring cancel for finished build"),
            None => warn!(build_id = %id, "ignoring cancel for unknown build id"),
        }
    }

    /// `Unknown` while the build is still running or the id is not
    /// recognized; otherwise the terminal status.
    pub fn retrieve_build_status(&self, id: BuildId) -> BuildStatus {
        self.statuses
            .get(&id)
            .map(|info| info.status)
            .unwrap_or(BuildStatus::Unknown)
    }

    fn resolve_definition(&self, project_definition: &str) -> anyhow::Result<Arc<Project>> {
        let hash = hex::encode(Sha256::digest(project_definition.as_bytes()));

        if let Some(project) = self.definitions.get(&hash) {
            return Ok(project.clone());
        }

        let project: Arc<Project> = Arc::new(toml::from_str(project_definition)?);
        self.definitions.insert(hash, project.clone());
        Ok(project)
    }

    async fn run_build(
        &self,
        id: BuildId,
        project: Arc<Project>,
        request: IntegrationRequest,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        // cancelled while still queued behind running builds
        if *cancel_rx.borrow() {
            self.finish(id, BuildStatus::Cancelled);
            return;
        }

        let status = match self.runner.run(&project, &request, cancel_rx).await {
            Ok(status) => status.normalize(),
            Err(err) => {
                error!(build_id = %id, project = %project.name, "build failed: {err:?}");
                BuildStatus::Exception
            }
        };

        info!(build_id = %id, project = %project.name, %status, "dispatched build finished");
        self.finish(id, status);
    }

    fn finish(&self, id: BuildId, status: BuildStatus) {
        if let Some(mut info) = self.statuses.get_mut(&id) {
            info.status = status;
            info.finished_at = Some(Instant::now());
        }
    }

    /// Drop status entries that have been terminal longer than the
    /// retention period. Evicted ids poll as `Unknown` afterwards.
    pub fn sweep_statuses(&self) {
        let retention = self.status_retention;
        self.statuses.retain(|_, info| {
            !info.status.is_terminal()
                || info
                    .finished_at
                    .is_none_or(|finished| finished.elapsed() < retention)
        });
    }

    /// Background task bounding the status map's growth.
    pub fn start_status_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let agent = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                agent.sweep_statuses();
            }
        })
    }
}
