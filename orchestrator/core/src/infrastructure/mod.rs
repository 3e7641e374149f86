// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod a2a_client;
pub mod argument_transform;
pub mod event_bus;
pub mod header_templates;
pub mod registry;
pub mod repositories;
pub mod retry;
pub mod single_flight;

pub use registry::{RuntimeRegistry, SessionKey};
pub use single_flight::{FlightRole, SingleFlight};
