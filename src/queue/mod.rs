//! The integration queue scheduler: named queues with priority
//! insertion, duplicate-request policies and cross-queue locking.

pub mod item;
pub mod request;
pub mod set;
pub mod snapshot;

pub use item::{NullNotifier, QueueItem, QueueNotifier};
pub use request::IntegrationRequest;
pub use set::QueueSet;
pub use snapshot::{QueueSetSnapshot, QueueSnapshot, QueuedItemSnapshot};

use crate::error::{QueueError, Result};
use crate::manager::project::{HandlingMode, QueueConfiguration};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, info};

/// An ordered sequence of queue items for one named group. Index 0 is
/// the currently integrating item, if any; indices >= 1 are pending and
/// kept in non-decreasing priority order, with priority 0 sorting to
/// the tail in arrival order.
pub struct IntegrationQueue {
    name: String,
    config: QueueConfiguration,
    lock_timeout: Duration,
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    items: Vec<QueueItem>,
    /// Names of the queues currently holding a lock on this queue.
    lockers: HashSet<String>,
}

impl IntegrationQueue {
    pub fn new(config: QueueConfiguration, lock_timeout: Duration) -> Self {
        Self {
            name: config.name.clone(),
            config,
            lock_timeout,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfiguration {
        &self.config
    }

    /// Every mutation goes through this bounded acquisition; a stuck
    /// holder surfaces as a retryable `LockTimeout` instead of hanging
    /// the calling task.
    async fn lock(&self) -> Result<MutexGuard<'_, QueueInner>> {
        timeout(self.lock_timeout, self.inner.lock())
            .await
            .map_err(|_| QueueError::LockTimeout {
                queue: self.name.clone(),
            })
    }

    /// Add a request to the queue, reconciling it against a pending
    /// request for the same project according to the configured
    /// handling mode.
    pub async fn enqueue(&self, item: QueueItem) -> Result<()> {
        let mut inner = self.lock().await?;

        if inner.items.is_empty() {
            item.notifier.on_entering_queue();
            inner.items.push(item);
            if inner.lockers.is_empty() {
                let head = &inner.items[0];
                head.notifier.on_commence(head);
            }
            return Ok(());
        }

        let pending = inner
            .items
            .iter()
            .skip(1)
            .position(|existing| existing.project_name() == item.project_name())
            .map(|pos| pos + 1);

        match pending {
            None => {
                let index = insertion_index(&inner.items, item.priority());
                item.notifier.on_entering_queue();
                inner.items.insert(index, item);
            }
            Some(index) => match self.config.handling_mode {
                HandlingMode::UseFirst => {
                    info!(
                        queue = %self.name,
                        project = item.project_name(),
                        "suppressing duplicate request, keeping the pending one"
                    );
                }
                HandlingMode::ApplyForceBuildsReAdd => {
                    if item.request.condition <= inner.items[index].request.condition {
                        debug!(
                            queue = %self.name,
                            project = item.project_name(),
                            "duplicate request is not stronger, discarding it"
                        );
                    } else {
                        let displaced = inner.items.remove(index);
                        displaced.notifier.on_exiting_queue(true);
                        let index = insertion_index(&inner.items, item.priority());
                        item.notifier.on_entering_queue();
                        inner.items.insert(index, item);
                    }
                }
                HandlingMode::ApplyForceBuildsReplace => {
                    if item.request.condition <= inner.items[index].request.condition {
                        debug!(
                            queue = %self.name,
                            project = item.project_name(),
                            "duplicate request is not stronger, discarding it"
                        );
                    } else {
                        let displaced = inner.items.remove(index);
                        displaced.notifier.on_exiting_queue(true);
                        item.notifier.on_entering_queue();
                        inner.items.insert(index, item);
                    }
                }
            },
        }

        Ok(())
    }

    /// Remove the completed head item and promote the next one.
    pub async fn dequeue(&self) -> Result<Option<QueueItem>> {
        let mut inner = self.lock().await?;

        if inner.items.is_empty() {
            return Ok(None);
        }

        let finished = inner.items.remove(0);
        finished.notifier.on_exiting_queue(false);

        if inner.lockers.is_empty()
            && let Some(head) = inner.items.first()
        {
            head.notifier.on_commence(head);
        }

        Ok(Some(finished))
    }

    /// Remove all pending requests for a project, leaving the actively
    /// integrating head untouched. Returns how many items were removed.
    pub async fn remove_pending_request(&self, project_name: &str) -> Result<usize> {
        let mut inner = self.lock().await?;

        let mut removed = 0;
        let mut index = 1;
        while index < inner.items.len() {
            if inner.items[index].project_name() == project_name {
                let item = inner.items.remove(index);
                item.notifier.on_exiting_queue(true);
                removed += 1;
            } else {
                index += 1;
            }
        }

        Ok(removed)
    }

    /// Remove every item for a project, including the active head. Used
    /// when a project is administratively stopped.
    pub async fn remove_project(&self, project_name: &str) -> Result<usize> {
        let mut inner = self.lock().await?;

        let head_removed = inner
            .items
            .first()
            .is_some_and(|head| head.project_name() == project_name);

        let mut removed = 0;
        let mut index = 0;
        while index < inner.items.len() {
            if inner.items[index].project_name() == project_name {
                let item = inner.items.remove(index);
                item.notifier.on_exiting_queue(true);
                removed += 1;
            } else {
                index += 1;
            }
        }

        if head_removed
            && inner.lockers.is_empty()
            && let Some(head) = inner.items.first()
        {
            head.notifier.on_commence(head);
        }

        Ok(removed)
    }

    /// The gate a project's integrator polls before building: the head
    /// item's request, iff the queue is unlocked and the head belongs
    /// to the given project.
    pub async fn get_next_request(&self, project_name: &str) -> Result<Option<IntegrationRequest>> {
        let inner = self.lock().await?;

        if !inner.lockers.is_empty() {
            return Ok(None);
        }

        Ok(inner
            .items
            .first()
            .filter(|head| head.project_name() == project_name)
            .map(|head| head.request.clone()))
    }

    /// True iff one or more other queues currently hold a lock on this
    /// queue.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(!self.lock().await?.lockers.is_empty())
    }

    pub(crate) async fn add_locker(&self, requester: &str) -> Result<()> {
        let mut inner = self.lock().await?;
        if inner.lockers.insert(requester.to_owned()) {
            debug!(queue = %self.name, locked_by = requester, "queue locked");
        }
        Ok(())
    }

    pub(crate) async fn remove_locker(&self, requester: &str) -> Result<()> {
        let mut inner = self.lock().await?;
        if inner.lockers.remove(requester) {
            debug!(queue = %self.name, unlocked_by = requester, "queue lock released");
        }

        if inner.lockers.is_empty()
            && let Some(head) = inner.items.first()
        {
            head.notifier.on_commence(head);
        }

        Ok(())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.lock().await?.items.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.lock().await?.items.is_empty())
    }

    /// A point-in-time copy of the queue contents for reporting. `None`
    /// for an empty queue.
    pub async fn snapshot(&self) -> Result<Option<QueueSnapshot>> {
        let inner = self.lock().await?;

        if inner.items.is_empty() {
            return Ok(None);
        }

        Ok(Some(QueueSnapshot {
            name: self.name.clone(),
            items: inner
                .items
                .iter()
                .map(|item| QueuedItemSnapshot {
                    project_name: item.project_name().to_owned(),
                    priority: item.priority(),
                    condition: item.request.condition,
                    source: item.request.source.clone(),
                })
                .collect(),
        }))
    }
}

/// Position for a new pending item: before the first pending item whose
/// priority is 0 or strictly greater, so pending order is ascending by
/// priority with FIFO ties and priority 0 always at the tail.
fn insertion_index(items: &[QueueItem], priority: u32) -> usize {
    if priority == 0 {
        return items.len();
    }

    for (index, item) in items.iter().enumerate().skip(1) {
        let existing = item.priority();
        if existing == 0 || existing > priority {
            return index;
        }
    }

    items.len()
}
