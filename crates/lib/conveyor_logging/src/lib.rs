use std::{env, str::FromStr as _};
use tracing_subscriber::{EnvFilter, filter::Directive, prelude::*};

/// Initialize tracing for a conveyor binary.
///
/// The filter comes from `CONVEYOR_LOG` (default `conveyor=info`), and
/// `CONVEYOR_LOG_FORMAT=json` switches to the JSON formatter.
pub fn init() -> anyhow::Result<()> {
    let log_formatter = {
        let log_format = env::var("CONVEYOR_LOG_FORMAT").unwrap_or_default();

        if log_format == "json" {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        }
    };

    let tracing_registry = tracing_subscriber::registry().with(log_formatter).with(
        EnvFilter::builder()
            .with_default_directive(Directive::from_str("conveyor=info")?)
            .with_env_var("CONVEYOR_LOG")
            .from_env_lossy(),
    );

    tracing::subscriber::set_global_default(tracing_registry)?;

    Ok(())
}
