use crate::manager::project::{Project, QueueConfiguration};
use anyhow::{Context as _, Result};
use conveyor_env_vars::env;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operational knobs of the scheduler daemon, taken from the
/// environment.
#[derive(Debug)]
pub struct Config {
    /// Path of the project/queue definitions file.
    pub definitions_path: PathBuf,

    /// Bound wait for a queue's internal lock.
    pub queue_lock_timeout: Duration,

    /// Fallback poll period of an idle integrator.
    pub integrator_poll_interval: Duration,

    /// Status poll period for dispatched remote builds.
    pub remote_poll_interval: Duration,

    /// Retry budget for RPC calls to build agents.
    pub rpc_call_retries: u32,

    /// Bind address of the status/trigger API.
    pub web_bind: SocketAddr,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        Ok(Self {
            definitions_path: env("CONVEYOR_CONFIG", PathBuf::from("conveyor.toml"))?,
            queue_lock_timeout: Duration::from_secs(env("CONVEYOR_QUEUE_LOCK_TIMEOUT_SECS", 5u64)?),
            integrator_poll_interval: Duration::from_secs(env(
                "CONVEYOR_INTEGRATOR_POLL_INTERVAL_SECS",
                5u64,
            )?),
            remote_poll_interval: Duration::from_secs(env(
                "CONVEYOR_REMOTE_POLL_INTERVAL_SECS",
                5u64,
            )?),
            rpc_call_retries: env("CONVEYOR_RPC_CALL_RETRIES", 3u32)?,
            web_bind: env("CONVEYOR_WEB_BIND", "0.0.0.0:3000".parse().unwrap())?,
        })
    }
}

/// Operational knobs of the build agent daemon.
#[derive(Debug)]
pub struct AgentConfig {
    /// Bind address of the agent's RPC surface.
    pub bind: SocketAddr,

    /// Maximum number of concurrently executing builds.
    pub allowed: usize,

    /// How long terminal build statuses stay pollable.
    pub status_retention: Duration,
}

impl AgentConfig {
    pub fn from_environment() -> Result<Self> {
        Ok(Self {
            bind: env("CONVEYOR_AGENT_BIND", "0.0.0.0:8416".parse().unwrap())?,
            allowed: env("CONVEYOR_AGENT_ALLOWED", 5usize)?,
            status_retention: Duration::from_secs(env(
                "CONVEYOR_AGENT_STATUS_RETENTION_SECS",
                21_600u64,
            )?),
        })
    }
}

/// Project and queue definitions, loaded from a plain TOML file. The
/// whole set is replaced wholesale on reconfiguration, never partially
/// mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definitions {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub queues: Vec<QueueConfiguration>,
}

impl Definitions {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read definitions file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse definitions file {}", path.display()))
    }
}
