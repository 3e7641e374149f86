// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool Resolver
//!
//! Maps a sub-agent's `canUse` bindings onto tool definitions.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Find each bound tool in the agent catalog, then the project
//!   catalog, and narrow a server's exposed tools to the binding's selection
//! - **Collaborators:** [`ProjectGraph`], [`EventBus`]
//!
//! An unknown tool id fails the task. A selection that leaves nothing exposed
//! does not; it publishes [`DomainEvent::NoEffectiveTools`] instead.

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::events::DomainEvent;
use crate::domain::mcp::McpToolInfo;
use crate::domain::project::{CanUseBinding, ProjectGraph, SubAgentDefinition, ToolDefinition};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolResolutionError {
    #[error("tool '{tool_id}' used by sub-agent '{sub_agent_id}' not found")]
    ToolNotFound { tool_id: String, sub_agent_id: String },
}

/// A `canUse` binding paired with the tool definition it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedToolBinding {
    pub binding: CanUseBinding,
    pub tool: ToolDefinition,
}

impl ResolvedToolBinding {
    pub fn tool_id(&self) -> &str {
        &self.tool.id
    }
}

pub struct ToolResolver {
    event_bus: EventBus,
}

impl ToolResolver {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Resolves every binding of `sub_agent`. The first unknown tool id fails
    /// the whole resolution.
    pub fn resolve(
        &self,
        graph: &ProjectGraph,
        agent_id: &str,
        sub_agent: &SubAgentDefinition,
    ) -> Result<Vec<ResolvedToolBinding>, ToolResolutionError> {
        sub_agent
            .can_use
            .iter()
            .map(|binding| {
                let tool = graph
                    .find_tool(agent_id, &binding.tool_id)
                    .ok_or_else(|| ToolResolutionError::ToolNotFound {
                        tool_id: binding.tool_id.clone(),
                        sub_agent_id: sub_agent.id.clone(),
                    })?;
                Ok(ResolvedToolBinding {
                    binding: binding.clone(),
                    tool: tool.clone(),
                })
            })
            .collect()
    }

    /// Narrows the server's exposed tools to the binding's allow-list.
    ///
    /// No allow-list means everything the server exposes. An empty result is
    /// returned as-is after a warning and a `no_effective_tools` event.
    pub fn effective_tools(
        &self,
        conversation_id: &str,
        sub_agent_id: &str,
        resolved: &ResolvedToolBinding,
        exposed: Vec<McpToolInfo>,
    ) -> Vec<McpToolInfo> {
        let available: Vec<String> = exposed.iter().map(|t| t.name.clone()).collect();

        let effective: Vec<McpToolInfo> = match &resolved.binding.tool_selection {
            None => exposed,
            Some(selection) => exposed
                .into_iter()
                .filter(|tool| selection.iter().any(|name| name == &tool.name))
                .collect(),
        };

        if effective.is_empty() {
            let requested = resolved.binding.tool_selection.clone().unwrap_or_default();
            warn!(
                conversation_id = %conversation_id,
                sub_agent_id = %sub_agent_id,
                tool_id = %resolved.tool.id,
                requested = ?requested,
                available = ?available,
                "No effective tools for binding"
            );
            self.event_bus.publish(DomainEvent::NoEffectiveTools {
                conversation_id: conversation_id.to_string(),
                sub_agent_id: sub_agent_id.to_string(),
                tool_id: resolved.tool.id.clone(),
                requested,
                available,
                detected_at: Utc::now(),
            });
        } else {
            debug!(tool_id = %resolved.tool.id, count = effective.len(), "Effective tools resolved");
        }

        effective
    }
}
