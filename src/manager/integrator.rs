use crate::build::BuildRunner;
use crate::dispatch::BuildMachine;
use crate::manager::{IntegrationEvent, StopSignal, project::Project};
use crate::queue::{IntegrationQueue, IntegrationRequest, QueueItem, QueueNotifier, QueueSet};
use crate::types::BuildStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Wakes the integrator whenever its queue reports that one of the
/// project's items entered the queue or reached an eligible head slot.
pub(crate) struct IntegratorNotifier {
    wake: Arc<Notify>,
}

impl IntegratorNotifier {
    pub(crate) fn new(wake: Arc<Notify>) -> Self {
        Self { wake }
    }
}

impl QueueNotifier for IntegratorNotifier {
    fn on_entering_queue(&self) {
        self.wake.notify_one();
    }

    fn on_exiting_queue(&self, _pending_cancelled: bool) {}

    fn on_commence(&self, _item: &QueueItem) {
        self.wake.notify_one();
    }
}

/// The per-project integration loop. Waits on its wake signal (with a
/// poll-interval fallback), gates on `get_next_request`, holds the
/// queue's configured cross-queue locks around the build, and dequeues
/// on completion.
pub(crate) struct Integrator {
    pub(crate) project: Arc<Project>,
    pub(crate) queue: Arc<IntegrationQueue>,
    pub(crate) queue_set: Arc<QueueSet>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) stop: watch::Receiver<StopSignal>,
    pub(crate) events: broadcast::Sender<IntegrationEvent>,
    pub(crate) runner: Arc<dyn BuildRunner>,
    pub(crate) machine: Option<Arc<BuildMachine>>,
    pub(crate) poll_interval: Duration,
}

impl Integrator {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(project = %self.project.name, "integrator started");

        loop {
            if *self.stop.borrow() != StopSignal::Run {
                break;
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.stop.changed() => continue,
            }

            if *self.stop.borrow() != StopSignal::Run {
                break;
            }

            match self.queue.get_next_request(&self.project.name).await {
                Ok(Some(request)) => self.integrate(request).await,
                Ok(None) => {}
                Err(err) => {
                    warn!(project = %self.project.name, "could not check the queue gate: {err}");
                }
            }
        }

        // a stopped project must not leave items behind: an orphan that
        // reaches the head of a shared queue would stall it forever
        match self.queue.remove_project(&self.project.name).await {
            Ok(removed) if removed > 0 => {
                info!(
                    project = %self.project.name,
                    removed, "dropped queued requests of stopped project"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(project = %self.project.name, "could not drop queued requests: {err}");
            }
        }

        info!(project = %self.project.name, "integrator stopped");
    }

    async fn integrate(&mut self, request: IntegrationRequest) {
        if let Err(err) = self
            .queue_set
            .toggle_queue_locks(self.queue.name(), true)
            .await
        {
            // retried on the next wake/poll tick
            warn!(project = %self.project.name, "could not acquire cross-queue locks: {err}");
            return;
        }

        let _ = self.events.send(IntegrationEvent::Started {
            project: self.project.name.clone(),
            request: request.clone(),
        });

        let status = self.execute(&request).await;
        info!(project = %self.project.name, %status, "integration finished");

        let _ = self.events.send(IntegrationEvent::Completed {
            project: self.project.name.clone(),
            status,
        });

        if let Err(err) = self
            .queue_set
            .toggle_queue_locks(self.queue.name(), false)
            .await
        {
            warn!(project = %self.project.name, "could not release cross-queue locks: {err}");
        }

        if let Err(err) = self.queue.dequeue().await {
            warn!(project = %self.project.name, "could not dequeue finished build: {err}");
        }
    }

    async fn execute(&mut self, request: &IntegrationRequest) -> BuildStatus {
        match self.machine.clone() {
            Some(machine) => self.execute_remote(machine, request).await,
            None => self.execute_local(request).await,
        }
    }

    async fn execute_local(&mut self, request: &IntegrationRequest) -> BuildStatus {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = self.runner.run(&self.project, request, cancel_rx);
        tokio::pin!(run);

        let stop = self.stop.clone();
        tokio::select! {
            result = &mut run => map_outcome(&self.project, result),
            _ = wait_for_abort(stop) => {
                let _ = cancel_tx.send(true);
                map_outcome(&self.project, (&mut run).await)
            }
        }
    }

    async fn execute_remote(
        &mut self,
        machine: Arc<BuildMachine>,
        request: &IntegrationRequest,
    ) -> BuildStatus {
        // advisory only: a saturated agent still accepts the dispatch
        // and queues it behind its running builds
        match machine.can_build(&self.project.name).await {
            Ok(true) => {}
            Ok(false) => {
                info!(project = %self.project.name, "agent is at capacity, build will queue");
            }
            Err(err) => {
                warn!(project = %self.project.name, "capacity check failed: {err:?}");
            }
        }

        let (tx, mut rx) = oneshot::channel();
        let remote = match machine
            .start_build(&self.project, request, move |status| {
                let _ = tx.send(status);
            })
            .await
        {
            Ok(remote) => remote,
            Err(err) => {
                error!(project = %self.project.name, "failed to dispatch remote build: {err:?}");
                return BuildStatus::Exception;
            }
        };

        let stop = self.stop.clone();
        tokio::select! {
            status = &mut rx => status.unwrap_or(BuildStatus::Exception),
            _ = wait_for_abort(stop) => {
                // cancel does not stop the polling; the agent reports a
                // terminal `cancelled` status that resolves the request
                remote.cancel().await;
                (&mut rx).await.unwrap_or(BuildStatus::Exception)
            }
        }
    }
}

fn map_outcome(project: &Project, result: anyhow::Result<BuildStatus>) -> BuildStatus {
    match result {
        Ok(status) => status.normalize(),
        Err(err) => {
            error!(project = %project.name, "build failed: {err:?}");
            BuildStatus::Exception
        }
    }
}

/// Resolves when the integrator is told to abort; pends forever
/// otherwise.
async fn wait_for_abort(mut stop: watch::Receiver<StopSignal>) {
    if stop
        .wait_for(|signal| *signal == StopSignal::Abort)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}
