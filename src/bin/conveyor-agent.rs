use anyhow::{Context as _, Result};
use clap::Parser;
use conveyor::agent::{BuildAgent, run_agent_server};
use conveyor::build::ProcessRunner;
use conveyor::config::AgentConfig;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    conveyor_logging::init().context("error initializing logging")?;

    if let Err(err) = CommandLine::parse().handle_args().await {
        eprintln!("error running conveyor-agent: {err:?}");
        std::process::exit(1);
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version,
    rename_all = "kebab-case",
)]
enum CommandLine {
    /// Run a build agent
    Start,
}

impl CommandLine {
    async fn handle_args(self) -> Result<()> {
        match self {
            Self::Start => {
                let config = AgentConfig::from_environment()?;
                let agent = Arc::new(BuildAgent::new(&config, Arc::new(ProcessRunner::new())));

                run_agent_server(&config, agent).await?;
            }
        }

        Ok(())
    }
}
