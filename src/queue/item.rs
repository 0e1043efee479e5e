use crate::manager::project::Project;
use crate::queue::request::IntegrationRequest;
use std::fmt;
use std::sync::Arc;

/// Capability handed to the queue with every item so the owning
/// integrator hears about queue lifecycle transitions. All callbacks
/// are invoked synchronously while the queue's lock is held, so they
/// must not block.
pub trait QueueNotifier: Send + Sync {
    /// The item is about to be inserted.
    fn on_entering_queue(&self);

    /// The item left the queue. `pending_cancelled` is true when the
    /// item was displaced or removed without having been built.
    fn on_exiting_queue(&self, pending_cancelled: bool);

    /// The item is at the head of an unlocked queue and may integrate.
    fn on_commence(&self, item: &QueueItem);
}

/// A notifier that ignores every event, for requests nobody waits on.
pub struct NullNotifier;

impl QueueNotifier for NullNotifier {
    fn on_entering_queue(&self) {}
    fn on_exiting_queue(&self, _pending_cancelled: bool) {}
    fn on_commence(&self, _item: &QueueItem) {}
}

/// One pending or active build request tracked by a named queue. The
/// project is shared with the configuration; the queue never owns it.
#[derive(Clone)]
pub struct QueueItem {
    pub project: Arc<Project>,
    pub request: IntegrationRequest,
    pub notifier: Arc<dyn QueueNotifier>,
}

impl QueueItem {
    pub fn new(
        project: Arc<Project>,
        request: IntegrationRequest,
        notifier: Arc<dyn QueueNotifier>,
    ) -> Self {
        Self {
            project,
            request,
            notifier,
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project.name
    }

    pub fn priority(&self) -> u32 {
        self.project.queue_priority
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("project", &self.project.name)
            .field("priority", &self.project.queue_priority)
            .field("condition", &self.request.condition)
            .finish_non_exhaustive()
    }
}
