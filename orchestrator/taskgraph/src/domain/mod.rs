// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mod

pub mod dag;
pub mod algorithms;
pub mod events;

pub use algorithms::{CycleCheck, CycleError, DagStats, TopologicalSort};
pub use dag::{DependencyError, TaskDag, TaskDagEdge, TaskDagNode, TaskRecord, TaskStatus};
pub use events::{DagEvent, DagUpdateReason};
