//! The seam between scheduling and execution. Both the local
//! integrator path and the build agent's worker run builds through the
//! same [`BuildRunner`] trait.

pub mod process;

pub use process::ProcessRunner;

use crate::manager::project::Project;
use crate::queue::IntegrationRequest;
use crate::types::BuildStatus;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

/// Executes one build for a project. Implementations watch the
/// `cancelled` flag and resolve with [`BuildStatus::Cancelled`] when it
/// flips while the build is running.
///
/// An `Err` return means the runner itself failed (could not spawn,
/// lost the child, ...); callers map it to [`BuildStatus::Exception`].
/// An `Ok(BuildStatus::Unknown)` outcome is treated as a success by the
/// caller via [`BuildStatus::normalize`].
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(
        &self,
        project: &Project,
        request: &IntegrationRequest,
        cancelled: watch::Receiver<bool>,
    ) -> Result<BuildStatus>;
}

/// Resolves when the cancellation flag flips to true; pends forever if
/// the sender goes away without cancelling.
pub(crate) async fn cancellation(mut cancelled: watch::Receiver<bool>) {
    if cancelled.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
