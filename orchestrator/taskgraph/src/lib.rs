// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Dependency Graph engine.
//!
//! Builds and maintains one directed-acyclic task graph per channel,
//! answers scheduler queries (readiness, execution order, critical path,
//! parallel groups), and rejects any dependency that would close a cycle.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** DAG data model, graph algorithms, and the channel-scoped
//!   graph service with caching and per-channel serialization

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
