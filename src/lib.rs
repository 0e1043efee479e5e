//! Conveyor is a continuous integration scheduler. A single daemon
//! (`conveyord`) orders integration requests through named queues and
//! runs builds locally or dispatches them to remote build agents
//! (`conveyor-agent`) over a small HTTP/JSON protocol.

pub mod agent;
pub mod build;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod queue;
pub mod types;
pub mod utils;
pub mod web;

pub use crate::config::{AgentConfig, Config, Definitions};
pub use crate::context::Context;
pub use crate::error::QueueError;
pub use crate::manager::QueueManager;
pub use crate::types::{BuildCondition, BuildId, BuildStatus};
