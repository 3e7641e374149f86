// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod relation_extractor;
pub mod tool_resolver;
pub mod connection_manager;
pub mod history_manager;
pub mod delegation_tools;
pub mod task_handler;

// Re-export services for convenience
pub use connection_manager::{ConnectionManager, McpAgentTool, PreparedConnection};
pub use delegation_tools::{DelegationScope, DelegationToolFactory};
pub use history_manager::{HistoryError, HistoryManager};
pub use relation_extractor::{RelationError, RelationExtractor};
pub use task_handler::{RunningAgent, TaskError, TaskHandler, TaskHandlerServices};
pub use tool_resolver::{ResolvedToolBinding, ToolResolutionError, ToolResolver};
