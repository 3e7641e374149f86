// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects, events, and the traits of every black-box
//! collaborator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** No I/O here; adapters live in `infrastructure`

pub mod a2a;
pub mod conversation;
pub mod credentials;
pub mod events;
pub mod generation;
pub mod mcp;
pub mod project;
pub mod relation;
pub mod repository;
pub mod runtime_config;
pub mod task;
pub mod tokens;
