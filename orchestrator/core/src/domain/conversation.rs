// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conversation
//!
//! The append-only message ledger a conversation is made of.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Message rows, their roles/visibility/types, and the
//!   summarizer seam used by compression.
//!
//! Rows are never updated or deleted. Compression appends a
//! `compression_summary` row; readers treat the latest one as a cut point.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::task::Part;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant/project/conversation triple every ledger read and write is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationScope {
    pub tenant_id: String,
    pub project_id: String,
    pub conversation_id: String,
}

impl ConversationScope {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Key used by the per-process compression map.
    pub fn lock_key(&self) -> String {
        format!("{}:{}:{}", self.tenant_id, self.project_id, self.conversation_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Internal,
    External,
    UserFacing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "chat")]
    Chat,
    #[serde(rename = "a2a-request")]
    A2aRequest,
    #[serde(rename = "a2a-response")]
    A2aResponse,
    #[serde(rename = "tool-result")]
    ToolResult,
    #[serde(rename = "compression_summary")]
    CompressionSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_id: Option<String>,
    #[serde(default)]
    pub is_delegated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: MessageId,
    pub tenant_id: String,
    pub project_id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub visibility: Visibility,
    pub message_type: MessageType,
    #[serde(default)]
    pub from_sub_agent_id: Option<String>,
    #[serde(default)]
    pub to_sub_agent_id: Option<String>,
    #[serde(default)]
    pub from_external_agent_id: Option<String>,
    #[serde(default)]
    pub to_external_agent_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub a2a_task_id: Option<String>,
    pub content: MessageContent,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(
        scope: &ConversationScope,
        role: MessageRole,
        message_type: MessageType,
        visibility: Visibility,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            tenant_id: scope.tenant_id.clone(),
            project_id: scope.project_id.clone(),
            conversation_id: scope.conversation_id.clone(),
            role,
            visibility,
            message_type,
            from_sub_agent_id: None,
            to_sub_agent_id: None,
            from_external_agent_id: None,
            to_external_agent_id: None,
            task_id: None,
            a2a_task_id: None,
            content: MessageContent {
                text: Some(text.into()),
                parts: Vec::new(),
            },
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn user(scope: &ConversationScope, text: impl Into<String>) -> Self {
        Self::new(scope, MessageRole::User, MessageType::Chat, Visibility::UserFacing, text)
    }

    pub fn from_sub_agent(mut self, id: impl Into<String>) -> Self {
        self.from_sub_agent_id = Some(id.into());
        self
    }

    pub fn to_sub_agent(mut self, id: impl Into<String>) -> Self {
        self.to_sub_agent_id = Some(id.into());
        self
    }

    pub fn from_external_agent(mut self, id: impl Into<String>) -> Self {
        self.from_external_agent_id = Some(id.into());
        self
    }

    pub fn to_external_agent(mut self, id: impl Into<String>) -> Self {
        self.to_external_agent_id = Some(id.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.content.parts = parts;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn text(&self) -> &str {
        self.content.text.as_deref().unwrap_or("")
    }

    pub fn is_user_authored(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_compression_summary(&self) -> bool {
        self.message_type == MessageType::CompressionSummary
    }

    /// Sender id, sub-agent first.
    pub fn from_id(&self) -> Option<&str> {
        self.from_sub_agent_id
            .as_deref()
            .or(self.from_external_agent_id.as_deref())
    }

    pub fn to_id(&self) -> Option<&str> {
        self.to_sub_agent_id
            .as_deref()
            .or(self.to_external_agent_id.as_deref())
    }
}

/// Optional narrowing applied to a scoped history read.
///
/// A user-authored message passes every filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub sub_agent_id: Option<String>,
    pub task_id: Option<String>,
    pub delegation_id: Option<String>,
}

impl HistoryFilter {
    pub fn for_sub_agent(sub_agent_id: impl Into<String>) -> Self {
        Self {
            sub_agent_id: Some(sub_agent_id.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sub_agent_id.is_none() && self.task_id.is_none() && self.delegation_id.is_none()
    }
}

/// A stored tool result too large to replay inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OversizedArtifact {
    pub artifact_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Value,
    #[serde(default)]
    pub summary: String,
}

/// Structured result of one compression pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionSummary {
    /// Machine-readable summary stored in the row's metadata.
    pub summary: Value,
    /// Prose rendering stored as the row's text.
    pub text: String,
    #[serde(default)]
    pub artifact_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    /// The messages already fit the budget; nothing to do.
    WithinBudget,
    Summarized(CompressionSummary),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SummarizerError {
    #[error("summarizer failed: {0}")]
    Failed(String),
}

/// Decides whether a message set needs compressing and, if so, produces the summary.
#[async_trait]
pub trait ConversationSummarizer: Send + Sync {
    async fn summarize(
        &self,
        scope: &ConversationScope,
        messages: &[ConversationMessage],
    ) -> Result<SummaryOutcome, SummarizerError>;
}
