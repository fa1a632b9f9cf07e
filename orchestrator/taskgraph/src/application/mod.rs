// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dag_service;

pub use dag_service::{DagValidationReport, ExecutionOrderOptions, TaskDagService};
