// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Project Graph (read-only snapshot)
//!
//! The hydrated configuration of one project at a resolved ref: agents, their
//! sub-agents, tool catalogs, external agents, components, and credential
//! references. A task reads the graph; nothing in this crate mutates it.
//!
//! ```text
//! ProjectGraph
//!   ├─ agents ─ AgentDefinition
//!   │            ├─ sub_agents ─ SubAgentDefinition (canTransferTo / canDelegateTo / canUse)
//!   │            ├─ tools (agent-level catalog)
//!   │            └─ external_agents (agent-level catalog)
//!   ├─ tools (project-level catalog)
//!   ├─ external_agents (project-level catalog)
//!   ├─ data_components / artifact_components
//!   └─ credential_references
//! ```
//!
//! Lookups always consult the agent-level catalog first and fall back to the
//! project-level one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::mcp::{McpTransport, ToolOverride};
use crate::domain::relation::SubAgentLink;

/// Identifies one resolved version of a project's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub tenant_id: String,
    pub project_id: String,
    /// Branch or tag name the caller asked for (e.g. "main").
    pub ref_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGraph {
    pub tenant_id: String,
    pub project_id: String,
    /// Immutable version hash the ref resolved to.
    #[serde(default)]
    pub resolved_version: Option<String>,
    #[serde(default)]
    pub agents: HashMap<String, AgentDefinition>,
    #[serde(default)]
    pub tools: HashMap<String, ToolDefinition>,
    #[serde(default)]
    pub external_agents: HashMap<String, ExternalAgentDefinition>,
    #[serde(default)]
    pub data_components: HashMap<String, ComponentDefinition>,
    #[serde(default)]
    pub artifact_components: HashMap<String, ComponentDefinition>,
    #[serde(default)]
    pub credential_references: HashMap<String, CredentialReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_sub_agent_id: Option<String>,
    #[serde(default)]
    pub sub_agents: HashMap<String, SubAgentDefinition>,
    #[serde(default)]
    pub tools: HashMap<String, ToolDefinition>,
    #[serde(default)]
    pub external_agents: HashMap<String, ExternalAgentDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub can_transfer_to: Vec<SubAgentLink>,
    #[serde(default)]
    pub can_delegate_to: Vec<SubAgentLink>,
    #[serde(default)]
    pub can_use: Vec<CanUseBinding>,
    #[serde(default)]
    pub data_components: Vec<String>,
    #[serde(default)]
    pub artifact_components: Vec<String>,
}

/// A sub-agent's permission to use one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanUseBinding {
    pub tool_id: String,
    /// Explicit allow-list of tool names exposed by the server. `None` means all.
    #[serde(default)]
    pub tool_selection: Option<Vec<String>>,
    /// Static headers configured on the sub-agent/tool relation.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub agent_tool_relation_id: Option<String>,
}

/// Who a tool's credential belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialScope {
    #[default]
    Project,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub server_url: String,
    #[serde(default)]
    pub transport: McpTransport,
    #[serde(default)]
    pub credential_reference_id: Option<String>,
    #[serde(default)]
    pub credential_scope: CredentialScope,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-tool overrides keyed by the tool name the server exposes.
    #[serde(default)]
    pub tool_overrides: HashMap<String, ToolOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub credential_reference_id: Option<String>,
}

/// Data and artifact components share one shape: a named JSON-schema'd props bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub props: Value,
}

/// Pointer into a credential store. Never the secret itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialReference {
    pub id: String,
    pub credential_store_id: String,
    #[serde(default)]
    pub retrieval_params: Value,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ProjectGraph {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentDefinition> {
        self.agents.get(agent_id)
    }

    pub fn sub_agent(&self, agent_id: &str, sub_agent_id: &str) -> Option<&SubAgentDefinition> {
        self.agents.get(agent_id)?.sub_agents.get(sub_agent_id)
    }

    /// Agent-level catalog first, then project-level.
    pub fn find_tool(&self, agent_id: &str, tool_id: &str) -> Option<&ToolDefinition> {
        self.agents
            .get(agent_id)
            .and_then(|agent| agent.tools.get(tool_id))
            .or_else(|| self.tools.get(tool_id))
    }

    /// Agent-level catalog first, then project-level.
    pub fn find_external_agent(&self, agent_id: &str, external_agent_id: &str) -> Option<&ExternalAgentDefinition> {
        self.agents
            .get(agent_id)
            .and_then(|agent| agent.external_agents.get(external_agent_id))
            .or_else(|| self.external_agents.get(external_agent_id))
    }

    /// A team target is another agent of the same project.
    pub fn find_team_agent(&self, origin_agent_id: &str, target_agent_id: &str) -> Option<&AgentDefinition> {
        if origin_agent_id == target_agent_id {
            return None;
        }
        self.agents.get(target_agent_id)
    }

    pub fn find_data_component(&self, id: &str) -> Option<&ComponentDefinition> {
        self.data_components.get(id)
    }

    pub fn find_artifact_component(&self, id: &str) -> Option<&ComponentDefinition> {
        self.artifact_components.get(id)
    }

    pub fn credential_reference(&self, id: &str) -> Option<&CredentialReference> {
        self.credential_references.get(id)
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::relation::LinkTarget;
    use serde_json::json;

    fn sample() -> ProjectGraph {
        serde_json::from_value(json!({
            "tenantId": "t1",
            "projectId": "p1",
            "agents": {
                "support": {
                    "id": "support",
                    "name": "Support",
                    "subAgents": {
                        "router": {
                            "id": "router",
                            "name": "Router",
                            "canTransferTo": [{ "subAgentId": "billing" }],
                            "canDelegateTo": [
                                { "externalAgentId": "crm", "headers": { "x-region": "eu" } },
                                { "agentId": "sales" }
                            ],
                            "canUse": [{ "toolId": "search", "toolSelection": ["lookup"] }]
                        }
                    },
                    "tools": {
                        "search": { "id": "search", "name": "Agent Search", "serverUrl": "http://agent-search" }
                    }
                },
                "sales": { "id": "sales", "name": "Sales" }
            },
            "tools": {
                "search": { "id": "search", "name": "Project Search", "serverUrl": "http://project-search" },
                "docs": { "id": "docs", "name": "Docs", "serverUrl": "http://docs", "credentialScope": "user" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_links_are_decided_at_load_time() {
        let graph = sample();
        let router = graph.sub_agent("support", "router").unwrap();
        assert!(matches!(
            router.can_transfer_to[0].target,
            LinkTarget::SubAgent { ref sub_agent_id } if sub_agent_id == "billing"
        ));
        assert!(matches!(router.can_delegate_to[0].target, LinkTarget::External { .. }));
        assert!(matches!(router.can_delegate_to[1].target, LinkTarget::Team { .. }));
        assert_eq!(router.can_delegate_to[0].headers.get("x-region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn test_tool_lookup_prefers_agent_catalog() {
        let graph = sample();
        assert_eq!(graph.find_tool("support", "search").unwrap().name, "Agent Search");
        assert_eq!(graph.find_tool("support", "docs").unwrap().credential_scope, CredentialScope::User);
        assert!(graph.find_tool("support", "missing").is_none());
    }

    #[test]
    fn test_team_lookup_excludes_self() {
        let graph = sample();
        assert!(graph.find_team_agent("support", "sales").is_some());
        assert!(graph.find_team_agent("support", "support").is_none());
    }

    #[test]
    fn test_ambiguous_link_fails_graph_load() {
        let result: Result<ProjectGraph, _> = serde_json::from_value(json!({
            "tenantId": "t1",
            "projectId": "p1",
            "agents": {
                "a": {
                    "id": "a",
                    "name": "A",
                    "subAgents": {
                        "s": {
                            "id": "s",
                            "name": "S",
                            "canDelegateTo": [{ "subAgentId": "x", "externalAgentId": "y" }]
                        }
                    }
                }
            }
        }));
        assert!(result.is_err());
    }
}
