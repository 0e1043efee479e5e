use crate::dispatch::machine::BuildMachine;
use crate::types::{BuildId, BuildStatus};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks one dispatched remote build until the agent reports a
/// terminal status: a single polling task sleeps, asks for the status,
/// re-arms on `Unknown`, and invokes the completion callback exactly
/// once on the first terminal answer.
///
/// `cancel` does not stop the polling loop. The agent-side cancel
/// produces a terminal `Cancelled` status, so the loop ends through the
/// same path as every other completion and the callback still fires
/// exactly once.
pub struct RemoteBuildRequest {
    build_id: BuildId,
    machine: Arc<BuildMachine>,
    cancelled: AtomicBool,
    last_status: Mutex<BuildStatus>,
}

impl RemoteBuildRequest {
    pub(crate) fn start(
        build_id: BuildId,
        machine: Arc<BuildMachine>,
        poll_interval: Duration,
        on_completed: impl FnOnce(BuildStatus) + Send + 'static,
    ) -> Arc<Self> {
        let request = Arc::new(Self {
            build_id,
            machine,
            cancelled: AtomicBool::new(false),
            last_status: Mutex::new(BuildStatus::Unknown),
        });

        tokio::spawn({
            let request = request.clone();
            async move { request.poll_until_completed(poll_interval, on_completed).await }
        });

        request
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    /// The most recently observed status.
    pub fn status(&self) -> BuildStatus {
        *self.last_status.lock().unwrap()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Ask the agent to cancel the build. Idempotent: only the first
    /// call issues the RPC. Polling continues until the agent reports
    /// the resulting terminal status.
    pub async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(build_id = %self.build_id, "cancelling remote build");
        if let Err(err) = self.machine.cancel_build(self.build_id).await {
            warn!(build_id = %self.build_id, "failed to cancel remote build: {err:?}");
        }
    }

    async fn poll_until_completed(
        &self,
        poll_interval: Duration,
        on_completed: impl FnOnce(BuildStatus) + Send,
    ) {
        loop {
            tokio::time::sleep(poll_interval).await;

            match self.machine.retrieve_build_status(self.build_id).await {
                Ok(status) => {
                    *self.last_status.lock().unwrap() = status;
                    if status.is_terminal() {
                        debug!(build_id = %self.build_id, %status, "remote build completed");
                        on_completed(status);
                        return;
                    }
                }
                // a transient poll failure is never conflated with a
                // build status; try again on the next tick
                Err(err) => {
                    warn!(build_id = %self.build_id, "status poll failed: {err:?}");
                }
            }
        }
    }
}
