// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Handoff Core
//!
//! Runs a sub-agent's task: resolves its relations and tools, generates,
//! and turns transfers, delegations, and conversation history into the
//! inputs and outputs of that run.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` holds the model and collaborator traits,
//!   `application` the services, `infrastructure` the adapters and the
//!   per-process runtime registry

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
