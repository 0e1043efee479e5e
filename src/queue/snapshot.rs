use crate::types::BuildCondition;
use serde::{Deserialize, Serialize};

/// One queue entry as external reporting sees it. A plain copy, no
/// references into live queue state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedItemSnapshot {
    pub project_name: String,
    pub priority: u32,
    pub condition: BuildCondition,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub items: Vec<QueuedItemSnapshot>,
}

/// Point-in-time tree of all non-empty queues, sorted by queue name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSetSnapshot {
    pub queues: Vec<QueueSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_in_wire_form() {
        let snapshot = QueueSetSnapshot {
            queues: vec![QueueSnapshot {
                name: "commit".into(),
                items: vec![QueuedItemSnapshot {
                    project_name: "app".into(),
                    priority: 3,
                    condition: BuildCondition::ForceBuild,
                    source: "alice".into(),
                }],
            }],
        };

        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            serde_json::json!({
                "queues": [{
                    "name": "commit",
                    "items": [{
                        "project_name": "app",
                        "priority": 3,
                        "condition": "force_build",
                        "source": "alice",
                    }],
                }],
            })
        );
    }
}
