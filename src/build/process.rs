use crate::build::{BuildRunner, cancellation};
use crate::manager::project::Project;
use crate::queue::IntegrationRequest;
use crate::types::BuildStatus;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default runner: spawns the project's configured build command and
/// maps its exit code to a build status. The request's build values are
/// exposed to the child as `CONVEYOR_VALUE_*` environment variables.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildRunner for ProcessRunner {
    async fn run(
        &self,
        project: &Project,
        request: &IntegrationRequest,
        cancelled: watch::Receiver<bool>,
    ) -> Result<BuildStatus> {
        let mut command = Command::new(&project.command);
        command
            .args(&project.args)
            .env("CONVEYOR_PROJECT", &project.name)
            .env("CONVEYOR_BUILD_CONDITION", request.condition.to_string())
            .env("CONVEYOR_SOURCE", &request.source)
            .env("CONVEYOR_USER", &request.user_name)
            .kill_on_drop(true);

        for (key, value) in &request.build_values {
            command.env(format!("CONVEYOR_VALUE_{}", key.to_uppercase()), value);
        }

        if let Some(working_dir) = &project.working_dir {
            command.current_dir(working_dir);
        }

        debug!(
            project = %project.name,
            command = %project.command,
            "spawning build command"
        );

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn build command for `{}`", project.name))?;

        tokio::select! {
            exit = child.wait() => {
                let exit = exit.context("failed waiting for build command")?;
                Ok(if exit.success() {
                    BuildStatus::Success
                } else {
                    BuildStatus::Failure
                })
            }
            _ = cancellation(cancelled) => {
                info!(project = %project.name, "killing cancelled build");
                child.start_kill().context("failed to kill build command")?;
                child.wait().await.context("failed reaping killed build")?;
                Ok(BuildStatus::Cancelled)
            }
        }
    }
}
