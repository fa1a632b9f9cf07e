// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Dependency Graph Service (Application Service)
//!
//! Owns one in-memory `TaskDag` per channel, a version-tagged cache of the
//! last topological-sort result, and a per-channel lock that serializes
//! multi-step mutations. Delegates all algorithmic work to
//! `domain::algorithms` and is the only component that talks to the event
//! bus.
//!
//! # Design Pattern
//!
//! `TaskDagService` is an explicit service object constructed once at
//! process start and injected by handle; there is no global singleton.
//! Mutations run validate -> mutate -> recompute -> notify under the
//! channel's lock. Queries never mutate the graph and never bump the
//! version; derived results are memoized per graph version and
//! recomputed silently on any version mismatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::algorithms::{self, CycleError, DagStats, TopologicalSort};
use crate::domain::dag::{edge_id, DependencyError, TaskDag, TaskDagEdge, TaskRecord, TaskStatus};
use crate::domain::events::{DagEvent, DagUpdateReason, SYSTEM_ACTOR};
use crate::infrastructure::config::ConfigHandle;
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Cache entry
// ============================================================================

/// Topological-sort result memoized at a specific graph version. Valid
/// only while the tag equals the graph's current version.
struct CachedTopo {
    version: u64,
    result: Result<Arc<TopologicalSort>, CycleError>,
}

struct ChannelEntry {
    dag: TaskDag,
    last_accessed: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    topo_cache: Option<CachedTopo>,
}

impl ChannelEntry {
    fn new(dag: TaskDag) -> Self {
        let now = Utc::now();
        Self {
            dag,
            last_accessed: now,
            last_modified: now,
            topo_cache: None,
        }
    }
}

// ============================================================================
// Query option / report types
// ============================================================================

/// Filtering options for `get_execution_order`.
#[derive(Debug, Clone)]
pub struct ExecutionOrderOptions {
    pub include_completed: bool,
    pub include_blocked: bool,
    pub status_filter: Option<Vec<TaskStatus>>,
}

impl Default for ExecutionOrderOptions {
    fn default() -> Self {
        Self {
            include_completed: true,
            include_blocked: true,
            status_filter: None,
        }
    }
}

/// Outcome of a full graph audit. Never an error: problems accumulate as
/// strings, and a channel with no graph yields an empty valid report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: Option<DagStats>,
}

impl DagValidationReport {
    fn empty() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            stats: None,
        }
    }
}

// ============================================================================
// Application Service: TaskDagService
// ============================================================================

pub struct TaskDagService {
    /// Per-channel graphs and their cached derived results.
    channels: RwLock<HashMap<String, ChannelEntry>>,

    /// Per-channel serialization locks. Entries are transient: created on
    /// first use, removed once no caller holds them.
    channel_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    /// Runtime configuration, consulted on every call.
    config: ConfigHandle,

    /// Notification collaborator; publish is fire-and-forget.
    event_bus: Arc<EventBus>,

    /// Background cache sweep task, if started.
    sweeper: SyncMutex<Option<JoinHandle<()>>>,
}

impl TaskDagService {
    pub fn new(config: ConfigHandle, event_bus: Arc<EventBus>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            channel_locks: Mutex::new(HashMap::new()),
            config,
            event_bus,
            sweeper: SyncMutex::new(None),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Discard any existing graph for the channel and rebuild it from a
    /// full task list. Dependency ids without a matching task are silently
    /// dropped. The rebuilt graph starts at version 1.
    pub async fn build_dag(&self, channel_id: &str, tasks: &[TaskRecord]) -> Option<TaskDag> {
        if !self.config.get().enabled {
            return None;
        }
        let guard = self.lock_channel(channel_id).await;
        let dag = TaskDag::from_tasks(tasks);
        let snapshot = dag.clone();
        let mut affected: Vec<String> = dag.nodes.keys().cloned().collect();
        affected.sort_unstable();
        let version = dag.version;
        self.channels
            .write()
            .await
            .insert(channel_id.to_string(), ChannelEntry::new(dag));
        drop(guard);
        self.release_channel(channel_id).await;

        info!(
            channel_id = %channel_id,
            tasks = tasks.len(),
            edges = snapshot.edges.len(),
            "Built task dependency graph"
        );
        self.emit(Self::updated_event(channel_id, DagUpdateReason::Rebuilt, affected, version));
        Some(snapshot)
    }

    /// Add one task to the channel's graph, wiring edges to any dependency
    /// ids already present. Builds a fresh single-task graph when the
    /// channel has none yet.
    pub async fn add_task(&self, channel_id: &str, task: &TaskRecord) {
        if !self.config.get().enabled {
            return;
        }
        let guard = self.lock_channel(channel_id).await;
        let event = {
            let mut channels = self.channels.write().await;
            match channels.get_mut(channel_id) {
                None => {
                    let dag = TaskDag::from_tasks(std::slice::from_ref(task));
                    let version = dag.version;
                    channels.insert(channel_id.to_string(), ChannelEntry::new(dag));
                    info!(channel_id = %channel_id, task_id = %task.id, "Built graph from first task");
                    Self::updated_event(
                        channel_id,
                        DagUpdateReason::Rebuilt,
                        vec![task.id.clone()],
                        version,
                    )
                }
                Some(entry) => {
                    entry.dag.insert_node(task);
                    for dep in task.dependency_ids() {
                        if entry.dag.nodes.contains_key(&dep)
                            && !entry.dag.edges.contains_key(&edge_id(&dep, &task.id))
                        {
                            entry.dag.link(&dep, &task.id, None);
                        }
                    }
                    entry.dag.recompute_degrees();
                    entry.dag.recompute_readiness();
                    entry.dag.touch();
                    entry.last_modified = Utc::now();
                    let version = entry.dag.version;
                    info!(channel_id = %channel_id, task_id = %task.id, version, "Added task node");
                    Self::updated_event(
                        channel_id,
                        DagUpdateReason::NodeAdded,
                        vec![task.id.clone()],
                        version,
                    )
                }
            }
        };
        drop(guard);
        self.release_channel(channel_id).await;
        self.emit(event);
    }

    /// Remove a task, every edge touching it, and its adjacency entries.
    /// Returns false (without bumping the version) if the task is unknown.
    pub async fn remove_task(&self, channel_id: &str, task_id: &str) -> bool {
        if !self.config.get().enabled {
            return false;
        }
        let guard = self.lock_channel(channel_id).await;
        let event = {
            let mut channels = self.channels.write().await;
            channels.get_mut(channel_id).and_then(|entry| {
                if !entry.dag.remove_node(task_id) {
                    return None;
                }
                entry.dag.recompute_degrees();
                entry.dag.recompute_readiness();
                entry.dag.touch();
                entry.last_modified = Utc::now();
                let version = entry.dag.version;
                info!(channel_id = %channel_id, task_id = %task_id, version, "Removed task node");
                Some(Self::updated_event(
                    channel_id,
                    DagUpdateReason::NodeRemoved,
                    vec![task_id.to_string()],
                    version,
                ))
            })
        };
        drop(guard);
        self.release_channel(channel_id).await;
        match event {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        }
    }

    /// Add the dependency edge `dependency_id -> dependent_id` after the
    /// full validation ladder. Rejections leave the graph byte-for-byte
    /// unchanged (same version, same node/edge sets).
    pub async fn add_dependency(
        &self,
        channel_id: &str,
        dependent_id: &str,
        dependency_id: &str,
        label: Option<String>,
    ) -> Result<TaskDagEdge, DependencyError> {
        if !self.config.get().enabled {
            return Err(DependencyError::EngineDisabled);
        }
        let guard = self.lock_channel(channel_id).await;
        let (result, events) = self
            .add_dependency_locked(channel_id, dependent_id, dependency_id, label)
            .await;
        drop(guard);
        self.release_channel(channel_id).await;
        for event in events {
            self.emit(event);
        }
        result
    }

    async fn add_dependency_locked(
        &self,
        channel_id: &str,
        dependent_id: &str,
        dependency_id: &str,
        label: Option<String>,
    ) -> (Result<TaskDagEdge, DependencyError>, Vec<DagEvent>) {
        let mut channels = self.channels.write().await;
        let Some(entry) = channels.get_mut(channel_id) else {
            return (
                Err(DependencyError::MissingGraph(channel_id.to_string())),
                Vec::new(),
            );
        };
        entry.last_accessed = Utc::now();

        for id in [dependent_id, dependency_id] {
            if !entry.dag.nodes.contains_key(id) {
                return (Err(DependencyError::MissingNode(id.to_string())), Vec::new());
            }
        }
        if dependent_id == dependency_id {
            return (Err(DependencyError::SelfDependency), Vec::new());
        }
        let id = edge_id(dependency_id, dependent_id);
        if entry.dag.edges.contains_key(&id) {
            return (Err(DependencyError::DuplicateEdge(id)), Vec::new());
        }

        let check = algorithms::detect_cycle(&entry.dag, Some((dependency_id, dependent_id)));
        if check.has_cycle {
            warn!(
                channel_id = %channel_id,
                edge_id = %id,
                path = ?check.path,
                "Rejected dependency: would create a cycle"
            );
            let event = DagEvent::CycleDetected {
                channel_id: channel_id.to_string(),
                actor: SYSTEM_ACTOR.to_string(),
                attempted_edge: id,
                cycle_path: check.path.clone(),
                occurred_at: Utc::now(),
            };
            return (Err(DependencyError::CycleDetected { path: check.path }), vec![event]);
        }

        let edge = entry.dag.link(dependency_id, dependent_id, label);
        entry.dag.recompute_degrees();
        entry.dag.recompute_readiness();
        entry.dag.touch();
        entry.last_modified = Utc::now();
        let version = entry.dag.version;

        info!(channel_id = %channel_id, edge_id = %edge.id, version, "Added dependency edge");
        let events = vec![
            DagEvent::DependencyAdded {
                channel_id: channel_id.to_string(),
                actor: SYSTEM_ACTOR.to_string(),
                edge_id: edge.id.clone(),
                dependent_id: dependent_id.to_string(),
                dependency_id: dependency_id.to_string(),
                version,
                occurred_at: Utc::now(),
            },
            Self::updated_event(
                channel_id,
                DagUpdateReason::DependencyAdded,
                vec![dependent_id.to_string(), dependency_id.to_string()],
                version,
            ),
        ];
        (Ok(edge), events)
    }

    /// Remove the dependency edge `dependency_id -> dependent_id`.
    /// Returns false if it is absent; removal is never rejected for
    /// structural reasons.
    pub async fn remove_dependency(
        &self,
        channel_id: &str,
        dependent_id: &str,
        dependency_id: &str,
    ) -> bool {
        if !self.config.get().enabled {
            return false;
        }
        let guard = self.lock_channel(channel_id).await;
        let events = {
            let mut channels = self.channels.write().await;
            channels.get_mut(channel_id).and_then(|entry| {
                if !entry.dag.unlink(dependency_id, dependent_id) {
                    return None;
                }
                entry.dag.recompute_degrees();
                entry.dag.recompute_readiness();
                entry.dag.touch();
                entry.last_modified = Utc::now();
                let version = entry.dag.version;
                let id = edge_id(dependency_id, dependent_id);
                info!(channel_id = %channel_id, edge_id = %id, version, "Removed dependency edge");
                Some(vec![
                    DagEvent::DependencyRemoved {
                        channel_id: channel_id.to_string(),
                        actor: SYSTEM_ACTOR.to_string(),
                        edge_id: id,
                        dependent_id: dependent_id.to_string(),
                        dependency_id: dependency_id.to_string(),
                        version,
                        occurred_at: Utc::now(),
                    },
                    Self::updated_event(
                        channel_id,
                        DagUpdateReason::DependencyRemoved,
                        vec![dependent_id.to_string(), dependency_id.to_string()],
                        version,
                    ),
                ])
            })
        };
        drop(guard);
        self.release_channel(channel_id).await;
        match events {
            Some(events) => {
                for event in events {
                    self.emit(event);
                }
                true
            }
            None => false,
        }
    }

    /// Update a task's lifecycle status and recompute readiness. Silently
    /// a no-op if the channel or task is unknown. A transition into
    /// `Completed` additionally announces every dependent this completion
    /// unblocks; the whole decision runs under the channel lock so two
    /// concurrent completions cannot race on the unblock computation.
    pub async fn update_task_status(&self, channel_id: &str, task_id: &str, status: TaskStatus) {
        if !self.config.get().enabled {
            return;
        }
        let guard = self.lock_channel(channel_id).await;
        let events = {
            let mut channels = self.channels.write().await;
            match channels.get_mut(channel_id) {
                None => {
                    debug!(channel_id = %channel_id, "Status update for unknown channel ignored");
                    Vec::new()
                }
                Some(entry) => match entry.dag.set_status(task_id, status) {
                    None => {
                        debug!(channel_id = %channel_id, task_id = %task_id, "Status update for unknown task ignored");
                        Vec::new()
                    }
                    Some(previous) => {
                        entry.dag.recompute_readiness();
                        entry.dag.touch();
                        entry.last_modified = Utc::now();
                        let version = entry.dag.version;

                        let mut events = Vec::new();
                        if status.is_completed() && !previous.is_completed() {
                            for unblocked in algorithms::tasks_to_unblock(&entry.dag, task_id) {
                                info!(
                                    channel_id = %channel_id,
                                    task_id = %unblocked,
                                    resolved_by = %task_id,
                                    "Task dependencies resolved"
                                );
                                events.push(DagEvent::TaskDependenciesResolved {
                                    channel_id: channel_id.to_string(),
                                    actor: SYSTEM_ACTOR.to_string(),
                                    task_id: unblocked,
                                    resolved_by: task_id.to_string(),
                                    occurred_at: Utc::now(),
                                });
                            }
                        }
                        events.push(Self::updated_event(
                            channel_id,
                            DagUpdateReason::StatusChanged,
                            vec![task_id.to_string()],
                            version,
                        ));
                        debug!(channel_id = %channel_id, task_id = %task_id, ?status, version, "Updated task status");
                        events
                    }
                },
            }
        };
        drop(guard);
        self.release_channel(channel_id).await;
        for event in events {
            self.emit(event);
        }
    }

    // ========================================================================
    // Queries (read-only; never bump the version)
    // ========================================================================

    /// Readiness of one task. A missing graph or task carries no
    /// constraints and reports ready.
    pub async fn is_task_ready(&self, channel_id: &str, task_id: &str) -> bool {
        if !self.config.get().enabled {
            return true;
        }
        self.with_entry_mut(channel_id, |entry| algorithms::is_task_ready(&entry.dag, task_id))
            .await
            .unwrap_or(true)
    }

    /// The not-yet-completed dependencies of one task.
    pub async fn get_blocking_tasks(&self, channel_id: &str, task_id: &str) -> Vec<String> {
        if !self.config.get().enabled {
            return Vec::new();
        }
        self.with_entry_mut(channel_id, |entry| algorithms::blocking_tasks(&entry.dag, task_id))
            .await
            .unwrap_or_default()
    }

    /// All ready tasks in lexicographic order, optionally restricted to a
    /// supplied id subset and/or capped with a limit.
    pub async fn get_ready_tasks(
        &self,
        channel_id: &str,
        filter: Option<&[String]>,
        limit: Option<usize>,
    ) -> Vec<String> {
        if !self.config.get().enabled {
            return Vec::new();
        }
        self.with_entry_mut(channel_id, |entry| {
            let mut ready: Vec<String> = entry
                .dag
                .nodes
                .values()
                .filter(|node| node.is_ready)
                .map(|node| node.task_id.clone())
                .collect();
            ready.sort_unstable();
            if let Some(subset) = filter {
                let allowed: HashSet<&str> = subset.iter().map(String::as_str).collect();
                ready.retain(|id| allowed.contains(id.as_str()));
            }
            if let Some(limit) = limit {
                ready.truncate(limit);
            }
            ready
        })
        .await
        .unwrap_or_default()
    }

    /// Safe execution order over the whole graph, with optional filtering.
    /// Empty when the channel has no graph or the graph is cyclic.
    pub async fn get_execution_order(
        &self,
        channel_id: &str,
        options: &ExecutionOrderOptions,
    ) -> Vec<String> {
        if !self.config.get().enabled {
            return Vec::new();
        }
        self.with_entry_mut(channel_id, |entry| match Self::cached_topo(entry) {
            Err(err) => {
                warn!(channel_id = %channel_id, error = %err, "Cannot compute execution order");
                Vec::new()
            }
            Ok(sort) => sort
                .order
                .iter()
                .filter(|id| {
                    let node = &entry.dag.nodes[id.as_str()];
                    if !options.include_completed && node.status.is_completed() {
                        return false;
                    }
                    if !options.include_blocked
                        && !node.is_ready
                        && !node.status.is_completed()
                    {
                        return false;
                    }
                    options
                        .status_filter
                        .as_ref()
                        .is_none_or(|statuses| statuses.contains(&node.status))
                })
                .cloned()
                .collect(),
        })
        .await
        .unwrap_or_default()
    }

    /// Parallel-execution groups: topological levels with completed tasks
    /// filtered out. Empty (with a warning) when the graph is cyclic.
    pub async fn get_parallel_groups(&self, channel_id: &str) -> Vec<Vec<String>> {
        if !self.config.get().enabled {
            return Vec::new();
        }
        self.with_entry_mut(channel_id, |entry| match Self::cached_topo(entry) {
            Err(err) => {
                warn!(channel_id = %channel_id, error = %err, "Cannot compute parallel groups");
                Vec::new()
            }
            Ok(sort) => sort
                .levels
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .filter(|id| !entry.dag.nodes[id.as_str()].status.is_completed())
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .filter(|level| !level.is_empty())
                .collect(),
        })
        .await
        .unwrap_or_default()
    }

    /// The longest dependency chain, as an ordered task-id sequence.
    pub async fn get_critical_path(&self, channel_id: &str) -> Vec<String> {
        if !self.config.get().enabled {
            return Vec::new();
        }
        self.with_entry_mut(channel_id, |entry| match Self::cached_topo(entry) {
            Err(err) => {
                warn!(channel_id = %channel_id, error = %err, "Cannot compute critical path");
                Vec::new()
            }
            Ok(sort) => sort.critical_path.clone(),
        })
        .await
        .unwrap_or_default()
    }

    /// Aggregate statistics, or None when the channel has no graph.
    pub async fn get_stats(&self, channel_id: &str) -> Option<DagStats> {
        if !self.config.get().enabled {
            return None;
        }
        self.with_entry_mut(channel_id, |entry| algorithms::compute_dag_stats(&entry.dag))
            .await
    }

    /// Snapshot of the channel's graph.
    pub async fn get_dag(&self, channel_id: &str) -> Option<TaskDag> {
        if !self.config.get().enabled {
            return None;
        }
        self.with_entry_mut(channel_id, |entry| entry.dag.clone()).await
    }

    /// Independent full audit of the channel's graph. Usable even when the
    /// engine's mutation enforcement is configured off; never errors.
    pub async fn validate_dag(&self, channel_id: &str) -> DagValidationReport {
        let config = self.config.get();
        self.with_entry_mut(channel_id, |entry| {
            let dag = &entry.dag;
            let mut errors = Vec::new();
            let mut warnings = Vec::new();

            let check = algorithms::detect_cycle(dag, None);
            if check.has_cycle {
                errors.push(
                    check
                        .description
                        .unwrap_or_else(|| "dependency graph contains a cycle".to_string()),
                );
            }

            // Defensive: the mutation API only links known nodes.
            let mut edge_ids: Vec<&String> = dag.edges.keys().collect();
            edge_ids.sort_unstable();
            for id in edge_ids {
                let edge = &dag.edges[id];
                for task_id in [&edge.from_task_id, &edge.to_task_id] {
                    if !dag.nodes.contains_key(task_id) {
                        errors.push(format!("edge '{id}' references missing task '{task_id}'"));
                    }
                }
            }

            let mut node_ids: Vec<&String> = dag.nodes.keys().collect();
            node_ids.sort_unstable();
            for id in node_ids {
                let node = &dag.nodes[id];
                if node.in_degree > config.max_in_degree_warning {
                    warnings.push(format!(
                        "task '{id}' has in-degree {} (warning threshold {})",
                        node.in_degree, config.max_in_degree_warning
                    ));
                }
                if node.out_degree > config.max_out_degree_warning {
                    warnings.push(format!(
                        "task '{id}' has out-degree {} (warning threshold {})",
                        node.out_degree, config.max_out_degree_warning
                    ));
                }
                if node.in_degree == 0 && node.out_degree == 0 && dag.nodes.len() > 1 {
                    warnings.push(format!("task '{id}' is orphaned (no dependencies either way)"));
                }
            }

            let stats = algorithms::compute_dag_stats(dag);
            if stats.max_depth > config.max_chain_length_warning {
                warnings.push(format!(
                    "critical path length {} exceeds warning threshold {}",
                    stats.max_depth, config.max_chain_length_warning
                ));
            }

            DagValidationReport {
                valid: errors.is_empty(),
                errors,
                warnings,
                stats: Some(stats),
            }
        })
        .await
        .unwrap_or_else(DagValidationReport::empty)
    }

    // ========================================================================
    // Cache maintenance / lifecycle
    // ========================================================================

    /// Spawn the periodic cache sweep (interval = 2x the configured TTL).
    /// Replaces any previously started sweeper.
    pub fn start_maintenance(self: &Arc<Self>) {
        let interval_ms = self.config.get().cache_ttl_ms.saturating_mul(2).max(1);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let evicted = service.sweep_expired().await;
                if evicted > 0 {
                    debug!(evicted, "Cache sweep evicted idle channels");
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Evict channel entries idle longer than the configured TTL. Returns
    /// the number of evicted channels.
    pub async fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(self.config.get().cache_ttl_ms as i64);
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|channel_id, entry| {
            let keep = entry.last_accessed >= cutoff;
            if !keep {
                debug!(channel_id = %channel_id, "Evicting idle graph cache entry");
            }
            keep
        });
        before - channels.len()
    }

    /// Drop one channel's graph and cache. Returns false if none existed.
    pub async fn clear_channel(&self, channel_id: &str) -> bool {
        self.channels.write().await.remove(channel_id).is_some()
    }

    /// Drop every channel's graph and all serialization locks.
    pub async fn clear_all(&self) {
        self.channels.write().await.clear();
        self.channel_locks.lock().await.clear();
    }

    /// Stop the sweeper and drop all state.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.clear_all().await;
        info!("Task graph service shut down");
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Run a closure against a channel entry, touching its access time.
    async fn with_entry_mut<R>(
        &self,
        channel_id: &str,
        f: impl FnOnce(&mut ChannelEntry) -> R,
    ) -> Option<R> {
        let mut channels = self.channels.write().await;
        let entry = channels.get_mut(channel_id)?;
        entry.last_accessed = Utc::now();
        Some(f(entry))
    }

    /// Shared topological-sort result for the entry's current version.
    /// A stale tag forces silent recomputation.
    fn cached_topo(entry: &mut ChannelEntry) -> Result<Arc<TopologicalSort>, CycleError> {
        if let Some(cache) = &entry.topo_cache {
            if cache.version == entry.dag.version {
                return cache.result.clone();
            }
        }
        debug!(version = entry.dag.version, "Recomputing topological sort");
        let result = algorithms::topological_sort(&entry.dag).map(Arc::new);
        entry.topo_cache = Some(CachedTopo {
            version: entry.dag.version,
            result: result.clone(),
        });
        result
    }

    fn updated_event(
        channel_id: &str,
        reason: DagUpdateReason,
        affected_tasks: Vec<String>,
        version: u64,
    ) -> DagEvent {
        DagEvent::DagUpdated {
            channel_id: channel_id.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            reason,
            affected_tasks,
            version,
            occurred_at: Utc::now(),
        }
    }

    fn emit(&self, event: DagEvent) {
        if self.config.get().emit_events {
            self.event_bus.publish(event);
        }
    }

    /// Acquire the channel's serialization lock, creating it on first
    /// contention.
    async fn lock_channel(&self, channel_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.channel_locks.lock().await;
            Arc::clone(locks.entry(channel_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the channel's lock entry once no caller holds it.
    async fn release_channel(&self, channel_id: &str) {
        let mut locks = self.channel_locks.lock().await;
        if let Some(lock) = locks.get(channel_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(channel_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::TaskGraphConfig;

    fn record(id: &str, status: TaskStatus, deps: &[&str]) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            status,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            blocked_by: vec![],
        }
    }

    fn service() -> Arc<TaskDagService> {
        Arc::new(TaskDagService::new(
            ConfigHandle::default(),
            Arc::new(EventBus::with_default_capacity()),
        ))
    }

    #[tokio::test]
    async fn disabled_engine_rejects_mutations_and_neutralizes_queries() {
        let config = ConfigHandle::new(TaskGraphConfig {
            enabled: false,
            ..TaskGraphConfig::default()
        });
        let service = TaskDagService::new(config.clone(), Arc::new(EventBus::default()));

        assert!(service.build_dag("ops", &[record("a", TaskStatus::Pending, &[])]).await.is_none());
        assert!(matches!(
            service.add_dependency("ops", "b", "a", None).await,
            Err(DependencyError::EngineDisabled)
        ));
        assert!(service.is_task_ready("ops", "a").await);
        assert!(service.get_execution_order("ops", &ExecutionOrderOptions::default()).await.is_empty());

        // Re-enabling at runtime takes effect without a restart.
        config.update(|c| c.enabled = true);
        assert!(service.build_dag("ops", &[record("a", TaskStatus::Pending, &[])]).await.is_some());
    }

    #[tokio::test]
    async fn topo_cache_is_reused_within_a_version_and_refreshed_across() {
        let service = service();
        service
            .build_dag(
                "ops",
                &[
                    record("a", TaskStatus::Pending, &[]),
                    record("b", TaskStatus::Pending, &["a"]),
                ],
            )
            .await;

        let order = service.get_execution_order("ops", &ExecutionOrderOptions::default()).await;
        assert_eq!(order, ["a", "b"]);
        {
            let channels = service.channels.read().await;
            let cache = channels["ops"].topo_cache.as_ref().unwrap();
            assert_eq!(cache.version, 1);
        }

        // A mutation bumps the version; the next query recomputes.
        service.add_task("ops", &record("c", TaskStatus::Pending, &["b"])).await;
        let order = service.get_execution_order("ops", &ExecutionOrderOptions::default()).await;
        assert_eq!(order, ["a", "b", "c"]);
        {
            let channels = service.channels.read().await;
            let cache = channels["ops"].topo_cache.as_ref().unwrap();
            assert_eq!(cache.version, 2);
        }
    }

    #[tokio::test]
    async fn channel_lock_entries_are_transient() {
        let service = service();
        service.build_dag("ops", &[record("a", TaskStatus::Pending, &[])]).await;
        assert!(service.channel_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_channels() {
        let service = service();
        service.build_dag("stale", &[record("a", TaskStatus::Pending, &[])]).await;
        service.build_dag("fresh", &[record("a", TaskStatus::Pending, &[])]).await;

        // Backdate one channel past the default 5-minute TTL.
        {
            let mut channels = service.channels.write().await;
            channels.get_mut("stale").unwrap().last_accessed =
                Utc::now() - ChronoDuration::milliseconds(600_000);
        }

        let evicted = service.sweep_expired().await;
        assert_eq!(evicted, 1);
        assert!(service.get_dag("stale").await.is_none());
        assert!(service.get_dag("fresh").await.is_some());
    }
}
