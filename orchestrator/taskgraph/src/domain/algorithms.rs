// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Graph Algorithms
//
// Pure functions over a `TaskDag` value: Kahn topological sort with level
// extraction, three-color DFS cycle detection (with an optional
// hypothetical edge), critical-path computation, parallel-group
// extraction, aggregate statistics, and per-task readiness lookups.
//
// Every function works on private copies of the adjacency structures and
// never mutates the caller's graph. No caching and no I/O here; the
// service layer owns both.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::dag::{TaskDag, TaskStatus};

/// Result of a successful topological sort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologicalSort {
    /// Total order over all task ids; for every edge (u, v), u precedes v.
    pub order: Vec<String>,

    /// Peeling rounds: tasks in the same level have no dependency relation
    /// among themselves and become eligible at the same stage. Each level
    /// is sorted lexicographically.
    pub levels: Vec<Vec<String>>,

    /// Tasks whose blockers are all resolved and whose status allows a start.
    pub ready_tasks: Vec<String>,

    /// Tasks still waiting on at least one blocker (or already running).
    pub blocked_tasks: Vec<String>,

    /// Tasks already completed.
    pub completed_tasks: Vec<String>,

    /// Longest dependency chain, as an ordered task-id sequence.
    pub critical_path: Vec<String>,
}

/// The graph contains a cycle; no partial order is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency graph contains a cycle involving: {}", remaining.join(", "))]
pub struct CycleError {
    /// Task ids left unprocessed by the topological peel (the cyclic
    /// remainder), sorted lexicographically.
    pub remaining: Vec<String>,
}

/// Kahn's algorithm with level extraction.
///
/// Seeds a queue with every node of in-degree 0 and peels the graph in
/// rounds; each round is one parallel-execution level. Members are
/// classified by status into ready/blocked/completed buckets. If any node
/// is left unprocessed the graph is cyclic and `CycleError` names the
/// remainder. On success the critical path is computed as well.
///
/// Tie-break within a level: lexicographic task id.
pub fn topological_sort(dag: &TaskDag) -> Result<TopologicalSort, CycleError> {
    let mut in_degree: HashMap<&str, usize> = dag
        .nodes
        .keys()
        .map(|id| (id.as_str(), dag.reverse.get(id).map_or(0, BTreeSet::len)))
        .collect();

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    queue.sort_unstable();

    let mut order = Vec::with_capacity(dag.nodes.len());
    let mut levels = Vec::new();
    let mut ready_tasks = Vec::new();
    let mut blocked_tasks = Vec::new();
    let mut completed_tasks = Vec::new();

    while !queue.is_empty() {
        let level = std::mem::take(&mut queue);
        for id in &level {
            order.push(id.to_string());
            let node = &dag.nodes[*id];
            if node.status.is_completed() {
                completed_tasks.push(id.to_string());
            } else if node.is_ready {
                ready_tasks.push(id.to_string());
            } else {
                blocked_tasks.push(id.to_string());
            }
            if let Some(dependents) = dag.forward.get(*id) {
                for next in dependents {
                    let degree = in_degree
                        .get_mut(next.as_str())
                        .expect("adjacency references a known node");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(next.as_str());
                    }
                }
            }
        }
        queue.sort_unstable();
        levels.push(level.iter().map(|id| id.to_string()).collect());
    }

    if order.len() < dag.nodes.len() {
        let mut remaining: Vec<String> = dag
            .nodes
            .keys()
            .filter(|id| !order.contains(*id))
            .cloned()
            .collect();
        remaining.sort_unstable();
        return Err(CycleError { remaining });
    }

    let critical_path = critical_path_over(dag, &order);
    Ok(TopologicalSort {
        order,
        levels,
        ready_tasks,
        blocked_tasks,
        completed_tasks,
        critical_path,
    })
}

/// Longest-path dynamic programming over an already-computed topological
/// order. Ties among maximum-distance end nodes break to the
/// lexicographically smallest task id.
fn critical_path_over(dag: &TaskDag, order: &[String]) -> Vec<String> {
    if order.is_empty() {
        return Vec::new();
    }

    let mut distance: HashMap<&str, usize> = order.iter().map(|id| (id.as_str(), 0)).collect();
    let mut predecessor: HashMap<&str, &str> = HashMap::new();

    for id in order {
        let from_distance = distance[id.as_str()];
        if let Some(dependents) = dag.forward.get(id) {
            for next in dependents {
                let best = distance
                    .get_mut(next.as_str())
                    .expect("adjacency references a known node");
                if from_distance + 1 > *best {
                    *best = from_distance + 1;
                    predecessor.insert(next.as_str(), id.as_str());
                }
            }
        }
    }

    let mut end: &str = "";
    let mut max_distance = 0;
    let mut ids: Vec<&str> = distance.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        if end.is_empty() || distance[id] > max_distance {
            end = id;
            max_distance = distance[id];
        }
    }

    let mut path = vec![end.to_string()];
    let mut current = end;
    while let Some(prev) = predecessor.get(current) {
        path.push(prev.to_string());
        current = prev;
    }
    path.reverse();
    path
}

/// Longest chain of dependency edges in the graph. Empty for an empty or
/// cyclic graph; a single node for a graph with no edges.
pub fn find_critical_path(dag: &TaskDag) -> Vec<String> {
    topological_sort(dag).map_or_else(|_| Vec::new(), |sort| sort.critical_path)
}

/// Outcome of a cycle probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCheck {
    pub has_cycle: bool,

    /// The discovered cycle, starting and ending at the repeated task.
    pub path: Vec<String>,

    pub description: Option<String>,
}

impl CycleCheck {
    fn clear() -> Self {
        Self {
            has_cycle: false,
            path: Vec::new(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-color depth-first search over a private copy of the forward
/// adjacency. When `hypothetical_edge` is given it is added to the copy
/// only, so callers can ask "would adding this edge create a cycle"
/// without touching the real graph.
pub fn detect_cycle(dag: &TaskDag, hypothetical_edge: Option<(&str, &str)>) -> CycleCheck {
    let mut adjacency: HashMap<String, BTreeSet<String>> = dag.forward.clone();
    if let Some((from, to)) = hypothetical_edge {
        adjacency.entry(from.to_string()).or_default().insert(to.to_string());
    }

    let mut color: HashMap<String, Color> = HashMap::new();
    let mut parent: HashMap<String, String> = HashMap::new();

    let mut roots: Vec<&String> = dag.nodes.keys().collect();
    roots.sort_unstable();
    for root in roots {
        if color.get(root.as_str()).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }
        if let Some((from, repeated)) = visit(root, &adjacency, &mut color, &mut parent) {
            let mut path = vec![from.clone()];
            let mut current = from;
            while current != repeated {
                current = parent[&current].clone();
                path.push(current.clone());
            }
            path.reverse();
            path.push(repeated);
            let description = format!("Cycle detected: {}", path.join(" -> "));
            return CycleCheck {
                has_cycle: true,
                path,
                description: Some(description),
            };
        }
    }
    CycleCheck::clear()
}

/// Returns the back edge (from, gray target) if one is reachable.
fn visit(
    node: &str,
    adjacency: &HashMap<String, BTreeSet<String>>,
    color: &mut HashMap<String, Color>,
    parent: &mut HashMap<String, String>,
) -> Option<(String, String)> {
    color.insert(node.to_string(), Color::Gray);
    if let Some(neighbors) = adjacency.get(node) {
        for next in neighbors {
            match color.get(next.as_str()).copied().unwrap_or(Color::White) {
                Color::Gray => return Some((node.to_string(), next.clone())),
                Color::White => {
                    parent.insert(next.clone(), node.to_string());
                    if let Some(found) = visit(next, adjacency, color, parent) {
                        return Some(found);
                    }
                }
                Color::Black => {}
            }
        }
    }
    color.insert(node.to_string(), Color::Black);
    None
}

/// Topological levels with completed tasks filtered out and empty levels
/// dropped. `Err` when the graph currently contains a cycle.
pub fn find_parallel_groups(dag: &TaskDag) -> Result<Vec<Vec<String>>, CycleError> {
    let sort = topological_sort(dag)?;
    Ok(sort
        .levels
        .into_iter()
        .map(|level| {
            level
                .into_iter()
                .filter(|id| !dag.nodes[id].status.is_completed())
                .collect::<Vec<_>>()
        })
        .filter(|level| !level.is_empty())
        .collect())
}

/// Aggregate graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagStats {
    pub total_tasks: usize,
    pub total_edges: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub avg_in_degree: f64,
    pub avg_out_degree: f64,
    pub ready_count: usize,
    pub blocked_count: usize,
    pub completed_count: usize,

    /// Node count of the critical path; 0 for an empty or cyclic graph.
    pub max_depth: usize,
}

/// Single pass over the nodes, plus the critical path for `max_depth`.
pub fn compute_dag_stats(dag: &TaskDag) -> DagStats {
    let mut stats = DagStats {
        total_tasks: dag.nodes.len(),
        total_edges: dag.edges.len(),
        ..DagStats::default()
    };
    let mut in_sum = 0usize;
    let mut out_sum = 0usize;
    for node in dag.nodes.values() {
        in_sum += node.in_degree;
        out_sum += node.out_degree;
        if node.in_degree == 0 {
            stats.root_count += 1;
        }
        if node.out_degree == 0 {
            stats.leaf_count += 1;
        }
        if node.status.is_completed() {
            stats.completed_count += 1;
        } else if node.is_ready {
            stats.ready_count += 1;
        } else {
            stats.blocked_count += 1;
        }
    }
    if !dag.nodes.is_empty() {
        stats.avg_in_degree = in_sum as f64 / dag.nodes.len() as f64;
        stats.avg_out_degree = out_sum as f64 / dag.nodes.len() as f64;
    }
    stats.max_depth = find_critical_path(dag).len();
    stats
}

/// A task is ready iff its status allows a start and every dependency id
/// that resolves to a known node is completed. Unknown tasks carry no
/// constraints and report ready.
pub fn is_task_ready(dag: &TaskDag, task_id: &str) -> bool {
    match dag.nodes.get(task_id) {
        None => true,
        Some(node) => {
            node.status.allows_start()
                && node.depends_on.iter().all(|dep| {
                    dag.nodes
                        .get(dep)
                        .map_or(true, |dependency| dependency.status.is_completed())
                })
        }
    }
}

/// The subset of a task's dependencies that are present and not yet
/// completed, in declaration order.
pub fn blocking_tasks(dag: &TaskDag, task_id: &str) -> Vec<String> {
    dag.nodes.get(task_id).map_or_else(Vec::new, |node| {
        node.depends_on
            .iter()
            .filter(|dep| {
                dag.nodes
                    .get(dep.as_str())
                    .is_some_and(|dependency| !dependency.status.is_completed())
            })
            .cloned()
            .collect()
    })
}

/// Given a just-completed task, the forward neighbors whose remaining
/// blockers (excluding the completed task itself) are all resolved.
pub fn tasks_to_unblock(dag: &TaskDag, completed_id: &str) -> Vec<String> {
    dag.forward.get(completed_id).map_or_else(Vec::new, |dependents| {
        dependents
            .iter()
            .filter(|dependent| {
                dag.reverse.get(dependent.as_str()).is_none_or(|blockers| {
                    blockers
                        .iter()
                        .filter(|blocker| blocker.as_str() != completed_id)
                        .all(|blocker| {
                            dag.nodes
                                .get(blocker)
                                .is_some_and(|node| node.status.is_completed())
                        })
                })
            })
            .cloned()
            .collect()
    })
}
