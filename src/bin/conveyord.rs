use anyhow::{Context as _, Result};
use clap::Parser;
use conveyor::config::{Config, Definitions};
use conveyor::context::Context;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    conveyor_logging::init().context("error initializing logging")?;

    if let Err(err) = CommandLine::parse().handle_args().await {
        eprintln!("error running conveyord: {err:?}");
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
    /// Run the integration scheduler
    Start {
        /// Path of the project/queue definitions file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Load and check the project/queue definitions, then exit
    ValidateConfig {
        /// Path of the project/queue definitions file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(definitions_path: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::from_environment()?;
    if let Some(path) = definitions_path {
        config.definitions_path = path;
    }
    Ok(config)
}

impl CommandLine {
    async fn handle_args(self) -> Result<()> {
        match self {
            Self::Start { config } => {
                let config = Arc::new(load_config(config)?);
                let definitions = Definitions::load(&config.definitions_path)?;
                let ctx = Context::new(config, definitions)?;

                ctx.queue_manager.start_all_projects().await?;

                // blocks until SIGINT/SIGTERM
                conveyor::web::run_web_server(ctx.clone()).await?;

                ctx.queue_manager.stop_all_projects().await?;
            }

            Self::ValidateConfig { config } => {
                let config = load_config(config)?;
                let definitions = Definitions::load(&config.definitions_path)?;
                println!(
                    "{}: {} project(s), {} queue(s)",
                    config.definitions_path.display(),
                    definitions.projects.len(),
                    definitions.queues.len(),
                );
            }
        }

        Ok(())
    }
}
