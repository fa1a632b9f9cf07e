// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Task Dependency Graph Data Model
//
// One `TaskDag` per channel: a node per task, a directed edge per
// dependency ("from must complete before to may start"), forward and
// reverse adjacency, and the derived bookkeeping (degrees, readiness)
// that the scheduler queries rely on.
//
// Adjacency sets are BTreeSets so every traversal over neighbours is
// lexicographic by task id. That is the documented tie-break for
// topological levels and critical-path end nodes.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External lifecycle status of a task.
///
/// Owned by the task store; the engine treats it opaquely except for the
/// `Completed`/`InProgress` distinction used by readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// A task in this state can still be started once its blockers clear.
    pub fn allows_start(&self) -> bool {
        !matches!(self, TaskStatus::Completed | TaskStatus::InProgress)
    }
}

/// Task record as supplied by the task store / API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,

    /// Tasks this one depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Tasks blocking this one (treated identically to `depends_on`).
    #[serde(default)]
    pub blocked_by: Vec<String>,
}

impl TaskRecord {
    /// Union of `depends_on` and `blocked_by`, deduplicated, in the order
    /// the source record listed them.
    pub fn dependency_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.depends_on
            .iter()
            .chain(self.blocked_by.iter())
            .filter(|id| id.as_str() != self.id && seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

/// A task admitted to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDagNode {
    pub task_id: String,
    pub status: TaskStatus,

    /// Dependency ids declared by the source record. May include ids with
    /// no corresponding node; those are never readiness blockers.
    pub depends_on: Vec<String>,

    /// Always equals `|reverse[task_id]|` after any mutation.
    pub in_degree: usize,

    /// Always equals `|forward[task_id]|` after any mutation.
    pub out_degree: usize,

    /// True iff the status allows starting and every known dependency is
    /// completed.
    pub is_ready: bool,

    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Directed dependency edge: `from_task_id` must complete before
/// `to_task_id` may start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDagEdge {
    /// `"{from}->{to}"`; at most one edge per ordered pair.
    pub id: String,
    pub from_task_id: String,
    pub to_task_id: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Canonical edge identity for an ordered pair of task ids.
pub fn edge_id(from: &str, to: &str) -> String {
    format!("{from}->{to}")
}

/// The dependency graph for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDag {
    pub nodes: HashMap<String, TaskDagNode>,
    pub edges: HashMap<String, TaskDagEdge>,

    /// task id -> ids of tasks that depend on it.
    pub forward: HashMap<String, BTreeSet<String>>,

    /// task id -> ids of tasks it depends on.
    pub reverse: HashMap<String, BTreeSet<String>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Strictly increases by 1 on every accepted mutation; never changes
    /// on a rejected mutation or a query. Tags cached derived results.
    pub version: u64,
}

impl TaskDag {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            forward: HashMap::new(),
            reverse: HashMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Build a graph from a full task list in two passes: all nodes first,
    /// then edges between pairs that are both present. Dependency ids with
    /// no matching task are silently dropped. Version starts at 1.
    pub fn from_tasks(tasks: &[TaskRecord]) -> Self {
        let mut dag = Self::new();
        for task in tasks {
            dag.insert_node(task);
        }
        for task in tasks {
            for dep in task.dependency_ids() {
                if dag.nodes.contains_key(&dep) && !dag.edges.contains_key(&edge_id(&dep, &task.id)) {
                    dag.link(&dep, &task.id, None);
                }
            }
        }
        dag.recompute_degrees();
        dag.recompute_readiness();
        dag.version = 1;
        dag
    }

    /// Insert a node for a task record (no edges). Replaces any node with
    /// the same id.
    pub fn insert_node(&mut self, task: &TaskRecord) {
        let now = Utc::now();
        self.nodes.insert(
            task.id.clone(),
            TaskDagNode {
                task_id: task.id.clone(),
                status: task.status,
                depends_on: task.dependency_ids(),
                in_degree: 0,
                out_degree: 0,
                is_ready: false,
                added_at: now,
                updated_at: now,
            },
        );
        self.forward.entry(task.id.clone()).or_default();
        self.reverse.entry(task.id.clone()).or_default();
    }

    /// Insert the edge `from -> to` and update both adjacency relations
    /// and endpoint timestamps. Callers validate first (both nodes known,
    /// no duplicate, no cycle); this method does not re-check.
    pub fn link(&mut self, from: &str, to: &str, label: Option<String>) -> TaskDagEdge {
        let now = Utc::now();
        let edge = TaskDagEdge {
            id: edge_id(from, to),
            from_task_id: from.to_string(),
            to_task_id: to.to_string(),
            label,
            created_at: now,
        };
        self.edges.insert(edge.id.clone(), edge.clone());
        self.forward.entry(from.to_string()).or_default().insert(to.to_string());
        self.reverse.entry(to.to_string()).or_default().insert(from.to_string());
        for endpoint in [from, to] {
            if let Some(node) = self.nodes.get_mut(endpoint) {
                node.updated_at = now;
            }
        }
        edge
    }

    /// Remove the edge `from -> to`. Returns false if it is absent.
    pub fn unlink(&mut self, from: &str, to: &str) -> bool {
        if self.edges.remove(&edge_id(from, to)).is_none() {
            return false;
        }
        let now = Utc::now();
        if let Some(set) = self.forward.get_mut(from) {
            set.remove(to);
        }
        if let Some(set) = self.reverse.get_mut(to) {
            set.remove(from);
        }
        for endpoint in [from, to] {
            if let Some(node) = self.nodes.get_mut(endpoint) {
                node.updated_at = now;
            }
        }
        true
    }

    /// Remove a node together with every edge touching it. Returns false
    /// if the task is unknown.
    pub fn remove_node(&mut self, task_id: &str) -> bool {
        if self.nodes.remove(task_id).is_none() {
            return false;
        }
        self.edges
            .retain(|_, edge| edge.from_task_id != task_id && edge.to_task_id != task_id);
        self.forward.remove(task_id);
        self.reverse.remove(task_id);
        for set in self.forward.values_mut() {
            set.remove(task_id);
        }
        for set in self.reverse.values_mut() {
            set.remove(task_id);
        }
        true
    }

    /// Overwrite a node's status. Returns the previous status, or None if
    /// the task is unknown.
    pub fn set_status(&mut self, task_id: &str, status: TaskStatus) -> Option<TaskStatus> {
        let node = self.nodes.get_mut(task_id)?;
        let previous = node.status;
        node.status = status;
        node.updated_at = Utc::now();
        Some(previous)
    }

    /// Re-derive every node's in/out degree from the adjacency relations.
    pub fn recompute_degrees(&mut self) {
        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for id in ids {
            let in_degree = self.reverse.get(&id).map_or(0, BTreeSet::len);
            let out_degree = self.forward.get(&id).map_or(0, BTreeSet::len);
            if let Some(node) = self.nodes.get_mut(&id) {
                node.in_degree = in_degree;
                node.out_degree = out_degree;
            }
        }
    }

    /// Re-derive every node's readiness from current statuses. A node is
    /// ready iff its status allows starting and every dependency id that
    /// resolves to a known node is completed.
    pub fn recompute_readiness(&mut self) {
        let completed: HashSet<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.status.is_completed())
            .map(|(id, _)| id.clone())
            .collect();
        let known: HashSet<String> = self.nodes.keys().cloned().collect();
        for node in self.nodes.values_mut() {
            node.is_ready = node.status.allows_start()
                && node
                    .depends_on
                    .iter()
                    .all(|dep| !known.contains(dep) || completed.contains(dep));
        }
    }

    /// Mark one accepted mutation: bump the version and touch the graph
    /// timestamp. Exactly one call per mutation operation.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

impl Default for TaskDag {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

/// Rejection categories for dependency mutations. Returned as data, never
/// panicked; callers branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("task graph engine is disabled by configuration")]
    EngineDisabled,

    #[error("no dependency graph exists for channel '{0}'")]
    MissingGraph(String),

    #[error("task '{0}' is not present in the graph")]
    MissingNode(String),

    #[error("a task cannot depend on itself")]
    SelfDependency,

    #[error("dependency edge '{0}' already exists")]
    DuplicateEdge(String),

    #[error("adding this dependency would create a cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: TaskStatus, deps: &[&str]) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            status,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            blocked_by: vec![],
        }
    }

    #[test]
    fn dependency_ids_unions_and_dedupes() {
        let task = TaskRecord {
            id: "c".to_string(),
            status: TaskStatus::Pending,
            depends_on: vec!["a".to_string(), "b".to_string()],
            blocked_by: vec!["b".to_string(), "c".to_string()],
        };
        // "b" appears once, the self-reference "c" is dropped.
        assert_eq!(task.dependency_ids(), ["a", "b"]);
    }

    #[test]
    fn from_tasks_wires_edges_and_drops_dangling_ids() {
        let dag = TaskDag::from_tasks(&[
            record("a", TaskStatus::Pending, &[]),
            record("b", TaskStatus::Pending, &["a", "ghost"]),
        ]);
        assert_eq!(dag.version, 1);
        assert_eq!(dag.edges.len(), 1);
        assert!(dag.edges.contains_key("a->b"));
        let b = &dag.nodes["b"];
        assert_eq!(b.in_degree, 1);
        // "ghost" has no node, so it does not block b.
        assert!(!b.is_ready); // a is pending, so b is still blocked
        assert!(dag.nodes["a"].is_ready);
    }

    #[test]
    fn degrees_track_adjacency_after_unlink() {
        let mut dag = TaskDag::from_tasks(&[
            record("a", TaskStatus::Pending, &[]),
            record("b", TaskStatus::Pending, &["a"]),
        ]);
        assert!(dag.unlink("a", "b"));
        assert!(!dag.unlink("a", "b"));
        dag.recompute_degrees();
        assert_eq!(dag.nodes["a"].out_degree, 0);
        assert_eq!(dag.nodes["b"].in_degree, 0);
    }

    #[test]
    fn remove_node_strips_touching_edges() {
        let mut dag = TaskDag::from_tasks(&[
            record("a", TaskStatus::Pending, &[]),
            record("b", TaskStatus::Pending, &["a"]),
            record("c", TaskStatus::Pending, &["b"]),
        ]);
        assert!(dag.remove_node("b"));
        assert!(dag.edges.is_empty());
        assert!(!dag.forward.contains_key("b"));
        assert!(dag.forward["a"].is_empty());
        assert!(dag.reverse["c"].is_empty());
    }

    #[test]
    fn readiness_requires_completed_dependencies() {
        let mut dag = TaskDag::from_tasks(&[
            record("a", TaskStatus::Pending, &[]),
            record("b", TaskStatus::Pending, &["a"]),
        ]);
        assert!(!dag.nodes["b"].is_ready);

        dag.set_status("a", TaskStatus::Completed);
        dag.recompute_readiness();
        assert!(dag.nodes["b"].is_ready);
        // Completed tasks are never ready themselves.
        assert!(!dag.nodes["a"].is_ready);
    }

    #[test]
    fn failed_dependency_keeps_dependent_blocked() {
        let mut dag = TaskDag::from_tasks(&[
            record("a", TaskStatus::Pending, &[]),
            record("b", TaskStatus::Pending, &["a"]),
        ]);
        dag.set_status("a", TaskStatus::Failed);
        dag.recompute_readiness();
        assert!(!dag.nodes["b"].is_ready);
    }
}
