use crate::error::{QueueError, Result};
use crate::manager::project::QueueConfiguration;
use crate::queue::{IntegrationQueue, QueueSetSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Registry of named queues. Built once from configuration and replaced
/// wholesale on restart; queues refer to each other only by name
/// through this set, never by back-pointer.
pub struct QueueSet {
    queues: HashMap<String, Arc<IntegrationQueue>>,
    lock_timeout: Duration,
}

impl QueueSet {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            queues: HashMap::new(),
            lock_timeout,
        }
    }

    /// Register a queue. Idempotent: a name that is already present
    /// keeps its existing queue and configuration.
    pub fn add(&mut self, config: QueueConfiguration) -> Arc<IntegrationQueue> {
        let lock_timeout = self.lock_timeout;
        self.queues
            .entry(config.name.clone())
            .or_insert_with(|| {
                debug!(queue = %config.name, "registering integration queue");
                Arc::new(IntegrationQueue::new(config, lock_timeout))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<IntegrationQueue>> {
        self.queues.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub async fn lock_queue(&self, target: &str, requester: &str) -> Result<()> {
        self.queues
            .get(target)
            .ok_or_else(|| QueueError::UnknownQueue(target.to_owned()))?
            .add_locker(requester)
            .await
    }

    pub async fn unlock_queue(&self, target: &str, requester: &str) -> Result<()> {
        self.queues
            .get(target)
            .ok_or_else(|| QueueError::UnknownQueue(target.to_owned()))?
            .remove_locker(requester)
            .await
    }

    /// Acquire or release the locks a queue's configuration declares on
    /// other queues. Called when the queue's active build starts and
    /// ends. Only one queue's mutex is held at a time, so lock lists
    /// can reference each other without deadlocking.
    pub async fn toggle_queue_locks(&self, requester: &str, acquire: bool) -> Result<()> {
        let queue = self
            .queues
            .get(requester)
            .ok_or_else(|| QueueError::UnknownQueue(requester.to_owned()))?;

        for target in queue.config().lock_targets() {
            if acquire {
                self.lock_queue(target, requester).await?;
            } else {
                self.unlock_queue(target, requester).await?;
            }
        }

        Ok(())
    }

    /// Immutable point-in-time tree of every non-empty queue, sorted by
    /// name.
    pub async fn snapshot(&self) -> Result<QueueSetSnapshot> {
        let mut queues = Vec::new();
        for queue in self.queues.values() {
            if let Some(snapshot) = queue.snapshot().await? {
                queues.push(snapshot);
            }
        }
        queues.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(QueueSetSnapshot { queues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::project::HandlingMode;
    use crate::queue::test_support::item;
    use crate::types::BuildCondition;
    use pretty_assertions::assert_eq;

    fn set_with(configs: Vec<QueueConfiguration>) -> QueueSet {
        let mut set = QueueSet::new(Duration::from_secs(5));
        for config in configs {
            set.add(config);
        }
        set
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let mut set = QueueSet::new(Duration::from_secs(5));
        let first = set.add(
            QueueConfiguration::new("commit")
                .with_handling_mode(HandlingMode::ApplyForceBuildsReAdd),
        );
        let second = set.add(QueueConfiguration::new("commit"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            second.config().handling_mode,
            HandlingMode::ApplyForceBuildsReAdd
        );
        assert_eq!(set.names().count(), 1);
    }

    #[tokio::test]
    async fn cross_queue_locks_follow_the_configured_lock_list() {
        let set = set_with(vec![
            QueueConfiguration::new("commit").with_lock_queue_names("nightly,release"),
            QueueConfiguration::new("nightly"),
            QueueConfiguration::new("release"),
        ]);

        set.get("nightly")
            .unwrap()
            .enqueue(item("docs", 0, BuildCondition::IfModificationExists))
            .await
            .unwrap();

        set.toggle_queue_locks("commit", true).await.unwrap();
        assert!(set.get("nightly").unwrap().is_locked().await.unwrap());
        assert!(set.get("release").unwrap().is_locked().await.unwrap());
        assert!(
            set.get("nightly")
                .unwrap()
                .get_next_request("docs")
                .await
                .unwrap()
                .is_none()
        );

        set.toggle_queue_locks("commit", false).await.unwrap();
        assert!(!set.get("nightly").unwrap().is_locked().await.unwrap());
        assert!(
            set.get("nightly")
                .unwrap()
                .get_next_request("docs")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn locks_from_different_queues_are_tracked_independently() {
        let set = set_with(vec![
            QueueConfiguration::new("commit").with_lock_queue_names("nightly"),
            QueueConfiguration::new("release").with_lock_queue_names("nightly"),
            QueueConfiguration::new("nightly"),
        ]);

        set.toggle_queue_locks("commit", true).await.unwrap();
        set.toggle_queue_locks("release", true).await.unwrap();

        set.toggle_queue_locks("commit", false).await.unwrap();
        assert!(set.get("nightly").unwrap().is_locked().await.unwrap());

        set.toggle_queue_locks("release", false).await.unwrap();
        assert!(!set.get("nightly").unwrap().is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_lock_target_is_an_error() {
        let set = set_with(vec![
            QueueConfiguration::new("commit").with_lock_queue_names("missing"),
        ]);

        assert!(matches!(
            set.toggle_queue_locks("commit", true).await.unwrap_err(),
            QueueError::UnknownQueue(name) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn snapshot_lists_non_empty_queues_sorted_by_name() {
        let set = set_with(vec![
            QueueConfiguration::new("zulu"),
            QueueConfiguration::new("alpha"),
            QueueConfiguration::new("idle"),
        ]);

        set.get("zulu")
            .unwrap()
            .enqueue(item("z-app", 2, BuildCondition::IfModificationExists))
            .await
            .unwrap();
        set.get("alpha")
            .unwrap()
            .enqueue(item("a-app", 0, BuildCondition::ForceBuild))
            .await
            .unwrap();

        let snapshot = set.snapshot().await.unwrap();
        assert_eq!(
            snapshot
                .queues
                .iter()
                .map(|queue| queue.name.as_str())
                .collect::<Vec<_>>(),
            vec!["alpha", "zulu"]
        );
        assert_eq!(snapshot.queues[0].items[0].project_name, "a-app");
        assert_eq!(
            snapshot.queues[0].items[0].condition,
            BuildCondition::ForceBuild
        );
    }
}
