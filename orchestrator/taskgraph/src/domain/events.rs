// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor tag stamped on every engine-originated event.
pub const SYSTEM_ACTOR: &str = "taskgraph-engine";

/// Reason tag carried by the generic `DagUpdated` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DagUpdateReason {
    Rebuilt,
    NodeAdded,
    NodeRemoved,
    DependencyAdded,
    DependencyRemoved,
    StatusChanged,
}

/// Notifications emitted by the graph engine. One variant per event kind;
/// payload fields are fixed and typed rather than an untyped bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DagEvent {
    DependencyAdded {
        channel_id: String,
        actor: String,
        edge_id: String,
        dependent_id: String,
        dependency_id: String,
        version: u64,
        occurred_at: DateTime<Utc>,
    },
    DependencyRemoved {
        channel_id: String,
        actor: String,
        edge_id: String,
        dependent_id: String,
        dependency_id: String,
        version: u64,
        occurred_at: DateTime<Utc>,
    },
    /// Generic structural/status change notification.
    DagUpdated {
        channel_id: String,
        actor: String,
        reason: DagUpdateReason,
        affected_tasks: Vec<String>,
        version: u64,
        occurred_at: DateTime<Utc>,
    },
    /// An attempted dependency was rejected because it would close a cycle.
    CycleDetected {
        channel_id: String,
        actor: String,
        attempted_edge: String,
        cycle_path: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    /// A task's last blocker completed; it is now eligible to start.
    TaskDependenciesResolved {
        channel_id: String,
        actor: String,
        task_id: String,
        resolved_by: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DagEvent {
    /// Channel the event belongs to, for per-channel subscriptions.
    pub fn channel_id(&self) -> &str {
        match self {
            DagEvent::DependencyAdded { channel_id, .. }
            | DagEvent::DependencyRemoved { channel_id, .. }
            | DagEvent::DagUpdated { channel_id, .. }
            | DagEvent::CycleDetected { channel_id, .. }
            | DagEvent::TaskDependenciesResolved { channel_id, .. } => channel_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = DagEvent::DagUpdated {
            channel_id: "ops".to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            reason: DagUpdateReason::NodeAdded,
            affected_tasks: vec!["t1".to_string()],
            version: 4,
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "dag_updated");
        assert_eq!(json["reason"], "node_added");
        assert_eq!(json["version"], 4);
    }

    #[test]
    fn channel_id_accessor_covers_every_variant() {
        let event = DagEvent::CycleDetected {
            channel_id: "ops".to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            attempted_edge: "c->a".to_string(),
            cycle_path: vec!["a".to_string(), "c".to_string(), "a".to_string()],
            occurred_at: Utc::now(),
        };
        assert_eq!(event.channel_id(), "ops");
    }
}
