// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Generation
//!
//! Domain interface to the model-generation engine (Anti-Corruption Layer).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** The engine is a black box: prompt, tools, and history in,
//!   structured response out. The core hands it [`AgentTool`]s it may call and
//!   reads the tool calls and results back from the returned steps.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::project::ComponentDefinition;
use crate::domain::task::Part;

/// Per-call context the engine passes to a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallContext {
    pub tool_call_id: String,
    pub conversation_id: String,
    pub task_id: String,
}

/// A callable tool exposed to the model.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    async fn invoke(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolInvocationError>;
}

/// Errors raised inside a tool call. They fail the call, not the task.
#[derive(Debug, thiserror::Error)]
pub enum ToolInvocationError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool server error: {0}")]
    ToolServer(String),

    #[error("Delegation failed: {0}")]
    Delegation(String),

    #[error("Remote agent returned error {code}: {message}")]
    RemoteAgent { code: i64, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_message: String,
    /// Formatted prior conversation, oldest first.
    pub history: String,
    pub tools: Vec<Arc<dyn AgentTool>>,
    pub data_components: Vec<ComponentDefinition>,
    pub artifact_components: Vec<ComponentDefinition>,
    pub conversation_id: String,
    pub task_id: String,
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("conversation_id", &self.conversation_id)
            .field("task_id", &self.task_id)
            .field("tools", &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("data_components", &self.data_components.len())
            .field("artifact_components", &self.artifact_components.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub result: Value,
}

/// One model step: whatever the model reasoned, called, and got back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStep {
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Final text, if the model produced any.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub steps: Vec<GenerationStep>,
    /// Structured content parts destined for the result artifact.
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl GenerationResponse {
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.steps.iter().flat_map(|s| s.tool_calls.iter())
    }

    pub fn tool_result_for(&self, tool_call_id: &str) -> Option<&ToolResult> {
        self.steps
            .iter()
            .flat_map(|s| s.tool_results.iter())
            .find(|r| r.tool_call_id == tool_call_id)
    }

    pub fn last_reasoning(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .filter_map(|s| s.reasoning.as_deref())
            .find(|r| !r.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Generation aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GenerationError>;
}
