//! The orchestration facade: owns the queue set and one integrator per
//! project, routes trigger and force-build requests, and fans lifecycle
//! events out over a broadcast channel.

pub mod integrator;
pub mod project;

pub use project::{HandlingMode, Project, QueueConfiguration};

use crate::build::BuildRunner;
use crate::config::{Config, Definitions};
use crate::dispatch::BuildMachine;
use crate::error::{QueueError, Result};
use crate::manager::integrator::{Integrator, IntegratorNotifier};
use crate::queue::{
    IntegrationQueue, IntegrationRequest, QueueItem, QueueSet, QueueSetSnapshot,
};
use crate::types::BuildStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle events integrators publish; anyone may subscribe through
/// [`QueueManager::subscribe`].
#[derive(Debug, Clone)]
pub enum IntegrationEvent {
    Started {
        project: String,
        request: IntegrationRequest,
    },
    Completed {
        project: String,
        status: BuildStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopSignal {
    Run,
    /// Finish the current build, then exit.
    Stop,
    /// Exit now, cancelling an in-flight build.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub name: String,
    pub queue: String,
    pub state: IntegratorState,
}

/// Point-in-time view of the whole server for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub projects: Vec<ProjectStatus>,
    pub queues: QueueSetSnapshot,
}

struct IntegratorHandle {
    stop: watch::Sender<StopSignal>,
    join: JoinHandle<()>,
}

struct ProjectEntry {
    project: Arc<Project>,
    queue: Arc<IntegrationQueue>,
    machine: Option<Arc<BuildMachine>>,
    wake: Arc<Notify>,
    integrator: Option<IntegratorHandle>,
}

struct ManagerState {
    queue_set: Arc<QueueSet>,
    projects: BTreeMap<String, ProjectEntry>,
}

pub struct QueueManager {
    config: Arc<Config>,
    runner: Arc<dyn BuildRunner>,
    events: broadcast::Sender<IntegrationEvent>,
    state: Mutex<ManagerState>,
}

impl QueueManager {
    pub fn new(
        config: Arc<Config>,
        definitions: Definitions,
        runner: Arc<dyn BuildRunner>,
    ) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(64);
        let state = Self::build_state(&config, definitions)?;

        Ok(Self {
            config,
            runner,
            events,
            state: Mutex::new(state),
        })
    }

    /// Build the queue set and project table wholesale from one set of
    /// definitions. Explicit queue configurations win; every project
    /// and every lock target still gets a queue with default settings.
    fn build_state(config: &Config, definitions: Definitions) -> anyhow::Result<ManagerState> {
        let mut queue_set = QueueSet::new(config.queue_lock_timeout);

        for queue_config in &definitions.queues {
            queue_set.add(queue_config.clone());
        }
        for project in &definitions.projects {
            queue_set.add(QueueConfiguration::new(project.queue_name()));
        }
        let lock_targets: Vec<String> = queue_set
            .names()
            .flat_map(|name| {
                queue_set
                    .get(name)
                    .map(|queue| {
                        queue
                            .config()
                            .lock_targets()
                            .into_iter()
                            .map(str::to_owned)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .collect();
        for target in lock_targets {
            queue_set.add(QueueConfiguration::new(target));
        }

        let mut projects = BTreeMap::new();
        for project in definitions.projects {
            let project = Arc::new(project);
            let queue = queue_set
                .get(project.queue_name())
                .expect("queue registered above");
            let machine = project
                .agent
                .clone()
                .map(|agent| {
                    BuildMachine::new(
                        agent,
                        config.rpc_call_retries,
                        config.remote_poll_interval,
                    )
                    .map(Arc::new)
                })
                .transpose()?;

            debug!(project = %project.name, queue = %queue.name(), "registering project");
            projects.insert(
                project.name.clone(),
                ProjectEntry {
                    project,
                    queue,
                    machine,
                    wake: Arc::new(Notify::new()),
                    integrator: None,
                },
            );
        }

        Ok(ManagerState {
            queue_set: Arc::new(queue_set),
            projects,
        })
    }

    /// Subscribe to integration lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<IntegrationEvent> {
        self.events.subscribe()
    }

    /// Start the named project's integrator. A no-op when it is already
    /// running.
    pub async fn start(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let queue_set = state.queue_set.clone();
        let entry = state
            .projects
            .get_mut(name)
            .ok_or_else(|| QueueError::UnknownProject(name.to_owned()))?;

        if let Some(handle) = &entry.integrator {
            if !handle.join.is_finished() {
                return Ok(());
            }
        }

        let (stop_tx, stop_rx) = watch::channel(StopSignal::Run);
        let join = Integrator {
            project: entry.project.clone(),
            queue: entry.queue.clone(),
            queue_set,
            wake: entry.wake.clone(),
            stop: stop_rx,
            events: self.events.clone(),
            runner: self.runner.clone(),
            machine: entry.machine.clone(),
            poll_interval: self.config.integrator_poll_interval,
        }
        .spawn();

        entry.integrator = Some(IntegratorHandle {
            stop: stop_tx,
            join,
        });

        Ok(())
    }

    pub async fn start_all_projects(&self) -> Result<()> {
        let names: Vec<String> = {
            let state = self.state.lock().await;
            state.projects.keys().cloned().collect()
        };
        for name in &names {
            self.start(name).await?;
        }
        info!("started {} project integrators", names.len());
        Ok(())
    }

    /// Tell the named project's integrator to finish its current build
    /// and exit. Does not wait; pair with [`QueueManager::wait_for_exit`].
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.signal(name, StopSignal::Stop).await
    }

    async fn signal(&self, name: &str, signal: StopSignal) -> Result<()> {
        let state = self.state.lock().await;
        let entry = state
            .projects
            .get(name)
            .ok_or_else(|| QueueError::UnknownProject(name.to_owned()))?;

        match &entry.integrator {
            Some(handle) => {
                let _ = handle.stop.send(signal);
                Ok(())
            }
            None => Err(QueueError::NotRunning(name.to_owned())),
        }
    }

    /// Block until the named project's integrator task has fully
    /// stopped. Returns immediately when it is not running.
    pub async fn wait_for_exit(&self, name: &str) -> Result<()> {
        let join = {
            let mut state = self.state.lock().await;
            let entry = state
                .projects
                .get_mut(name)
                .ok_or_else(|| QueueError::UnknownProject(name.to_owned()))?;
            entry.integrator.take().map(|handle| handle.join)
        };

        if let Some(join) = join {
            let _ = join.await;
        }

        Ok(())
    }

    async fn stop_all(&self, signal: StopSignal) -> Result<()> {
        let joins: Vec<(String, JoinHandle<()>)> = {
            let mut state = self.state.lock().await;
            state
                .projects
                .iter_mut()
                .filter_map(|(name, entry)| {
                    entry.integrator.take().map(|handle| {
                        let _ = handle.stop.send(signal);
                        (name.clone(), handle.join)
                    })
                })
                .collect()
        };

        for (name, join) in joins {
            debug!(project = %name, "waiting for integrator exit");
            let _ = join.await;
        }

        Ok(())
    }

    /// Stop every integrator, letting in-flight builds finish.
    pub async fn stop_all_projects(&self) -> Result<()> {
        self.stop_all(StopSignal::Stop).await
    }

    /// Stop every integrator, cancelling in-flight builds.
    pub async fn abort(&self) -> Result<()> {
        self.stop_all(StopSignal::Abort).await
    }

    /// Route a force-build command into the project's queue.
    pub async fn force_build(
        &self,
        name: &str,
        requester: &str,
        values: BTreeMap<String, String>,
    ) -> Result<()> {
        self.request(name, IntegrationRequest::force_build(requester, values))
            .await
    }

    /// Route an integration request into the project's queue, applying
    /// the queue's duplicate and priority rules.
    pub async fn request(&self, name: &str, request: IntegrationRequest) -> Result<()> {
        let (queue, item) = {
            let state = self.state.lock().await;
            let entry = state
                .projects
                .get(name)
                .ok_or_else(|| QueueError::UnknownProject(name.to_owned()))?;

            let item = QueueItem::new(
                entry.project.clone(),
                request,
                Arc::new(IntegratorNotifier::new(entry.wake.clone())),
            );
            (entry.queue.clone(), item)
        };

        queue.enqueue(item).await
    }

    /// Remove the project's pending requests, leaving an in-flight
    /// build untouched.
    pub async fn cancel_pending_request(&self, name: &str) -> Result<usize> {
        let queue = {
            let state = self.state.lock().await;
            state
                .projects
                .get(name)
                .ok_or_else(|| QueueError::UnknownProject(name.to_owned()))?
                .queue
                .clone()
        };

        queue.remove_pending_request(name).await
    }

    /// Stop everything and rebuild queues and integrators from new
    /// definitions. The queue set is replaced wholesale; nothing of the
    /// old state survives.
    pub async fn restart(&self, definitions: Definitions) -> anyhow::Result<()> {
        info!("restarting queue manager with new definitions");
        self.abort().await?;

        let new_state = Self::build_state(&self.config, definitions)?;
        {
            let mut state = self.state.lock().await;
            *state = new_state;
        }

        self.start_all_projects().await?;
        Ok(())
    }

    pub async fn project_statuses(&self) -> Result<Vec<ProjectStatus>> {
        let state = self.state.lock().await;
        Ok(state
            .projects
            .values()
            .map(|entry| ProjectStatus {
                name: entry.project.name.clone(),
                queue: entry.queue.name().to_owned(),
                state: match &entry.integrator {
                    Some(handle) if !handle.join.is_finished() => IntegratorState::Running,
                    _ => IntegratorState::Stopped,
                },
            })
            .collect())
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSetSnapshot> {
        let queue_set = self.state.lock().await.queue_set.clone();
        queue_set.snapshot().await
    }

    pub async fn server_snapshot(&self) -> Result<ServerSnapshot> {
        Ok(ServerSnapshot {
            projects: self.project_statuses().await?,
            queues: self.queue_snapshot().await?,
        })
    }
}
