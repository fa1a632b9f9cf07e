// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod event_bus;

pub use config::{ConfigHandle, TaskGraphConfig};
pub use event_bus::{EventBus, EventBusError};
