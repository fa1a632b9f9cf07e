// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Task Graph Configuration
//
// Runtime-tunable settings consumed by the graph service. The service
// reads through `ConfigHandle` on every call, so updates (including the
// `enabled` and `emit_events` flags) take effect without a restart.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskGraphConfig {
    /// Engine on/off switch. When off, mutations fail fast and queries
    /// return neutral values.
    pub enabled: bool,

    /// Idle TTL for per-channel cache entries; the maintenance sweep runs
    /// at twice this interval.
    pub cache_ttl_ms: u64,

    /// `validate_dag` warns when a node's in-degree exceeds this.
    pub max_in_degree_warning: usize,

    /// `validate_dag` warns when a node's out-degree exceeds this.
    pub max_out_degree_warning: usize,

    /// `validate_dag` warns when the critical path is longer than this.
    pub max_chain_length_warning: usize,

    /// Gates all notification emission.
    pub emit_events: bool,
}

impl Default for TaskGraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_ms: 300_000,
            max_in_degree_warning: 50,
            max_out_degree_warning: 50,
            max_chain_length_warning: 100,
            emit_events: true,
        }
    }
}

/// Shared read/update accessor for `TaskGraphConfig`.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<TaskGraphConfig>>,
}

impl ConfigHandle {
    pub fn new(config: TaskGraphConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> TaskGraphConfig {
        self.inner.read().clone()
    }

    /// Apply an in-place update; visible to the next `get`.
    pub fn update(&self, apply: impl FnOnce(&mut TaskGraphConfig)) {
        apply(&mut self.inner.write());
    }
}
