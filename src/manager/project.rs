use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Policy for resolving a second request for a project that is already
/// pending in its queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingMode {
    /// Keep the pending request, discard the new one.
    #[default]
    UseFirst,
    /// A stronger request replaces the pending one and is re-inserted
    /// at its priority position.
    ApplyForceBuildsReAdd,
    /// A stronger request replaces the pending one in place, keeping
    /// the slot the displaced item occupied.
    ApplyForceBuildsReplace,
}

/// Per-queue settings from the definitions file. The handling mode is a
/// closed enum, so a misspelled mode fails at load time instead of at
/// enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfiguration {
    pub name: String,
    #[serde(default)]
    pub handling_mode: HandlingMode,
    /// Comma-separated names of queues this queue locks while its head
    /// item is integrating.
    #[serde(default)]
    pub lock_queue_names: String,
}

impl QueueConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_handling_mode(mut self, handling_mode: HandlingMode) -> Self {
        self.handling_mode = handling_mode;
        self
    }

    pub fn with_lock_queue_names(mut self, lock_queue_names: impl Into<String>) -> Self {
        self.lock_queue_names = lock_queue_names.into();
        self
    }

    /// The parsed lock list: split on commas, trimmed, empty entries
    /// dropped.
    pub fn lock_targets(&self) -> Vec<&str> {
        self.lock_queue_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// A project definition as the scheduler sees it. Loaded from the
/// definitions file, shared read-only between the queue items and the
/// project's integrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// The queue this project integrates through. Defaults to the
    /// project's own name, giving every project a private queue unless
    /// configured otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Position hint within the queue; 0 means "unordered, arrival
    /// order at the tail".
    #[serde(default)]
    pub queue_priority: u32,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// When set, builds for this project are dispatched to the remote
    /// agent at this URL instead of running locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Url>,
}

impl Project {
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(&self.name)
    }
}
