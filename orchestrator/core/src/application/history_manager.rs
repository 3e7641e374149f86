// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conversation History Manager
//!
//! Reads a conversation's ledger and turns it into prompt history.
//!
//! # Pipeline
//!
//! 1. [`HistoryManager::scoped_history`]: full ledger, cut at the latest
//!    compression summary, narrowed by a [`HistoryFilter`]
//! 2. [`HistoryManager::substitute_oversized`]: oversized tool results become
//!    compact references
//! 3. [`HistoryManager::compress_if_needed`]: at most one compression per
//!    conversation at a time; late callers reuse the in-flight result
//! 4. [`format_history`]: one labelled line per message
//!
//! [`HistoryManager::build_prompt_history`] runs all four.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::conversation::{
    ConversationMessage, ConversationScope, ConversationSummarizer, HistoryFilter, MessageMetadata, MessageRole,
    MessageType, OversizedArtifact, SummaryOutcome, Visibility,
};
use crate::domain::events::DomainEvent;
use crate::domain::repository::{ArtifactRepository, ConversationRepository, RepositoryError};
use crate::domain::runtime_config::HistoryConfig;
use crate::domain::task::Part;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::registry::RuntimeRegistry;

pub const COMPRESSION_TYPE_CONVERSATION: &str = "conversation_history";

#[derive(Debug, Clone, thiserror::Error)]
pub enum HistoryError {
    #[error("history read failed: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct HistoryManager {
    conversations: Arc<dyn ConversationRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    summarizer: Arc<dyn ConversationSummarizer>,
    registry: RuntimeRegistry,
    event_bus: EventBus,
    config: HistoryConfig,
}

impl HistoryManager {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        summarizer: Arc<dyn ConversationSummarizer>,
        registry: RuntimeRegistry,
        event_bus: EventBus,
        config: HistoryConfig,
    ) -> Self {
        Self {
            conversations,
            artifacts,
            summarizer,
            registry,
            event_bus,
            config,
        }
    }

    /// Ledger rows visible to a reader, oldest first.
    ///
    /// Everything up to the latest compression summary collapses into that
    /// summary. Filters then apply to the remaining rows; user messages and
    /// the summary itself always pass.
    pub async fn scoped_history(
        &self,
        scope: &ConversationScope,
        filter: &HistoryFilter,
    ) -> Result<Vec<ConversationMessage>, HistoryError> {
        let mut messages = self
            .conversations
            .list_messages(scope, self.config.max_ledger_messages)
            .await?;

        if let Some(latest_summary) = messages.iter().rposition(ConversationMessage::is_compression_summary) {
            messages.drain(..latest_summary);
        }

        if !filter.is_empty() {
            messages.retain(|message| passes_filter(message, filter));
        }
        Ok(messages)
    }

    /// Replaces every tool result backed by an oversized artifact with a
    /// short reference.
    pub async fn substitute_oversized(
        &self,
        scope: &ConversationScope,
        messages: Vec<ConversationMessage>,
    ) -> Result<Vec<ConversationMessage>, HistoryError> {
        let oversized = self.artifacts.list_oversized(scope).await?;
        if oversized.is_empty() {
            return Ok(messages);
        }

        Ok(messages
            .into_iter()
            .map(|mut message| {
                if message.message_type != MessageType::ToolResult {
                    return message;
                }
                let Some(artifact) = message
                    .metadata
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| oversized.iter().find(|a| a.tool_call_id == id))
                else {
                    return message;
                };
                debug!(artifact_id = %artifact.artifact_id, "Substituting oversized tool result");
                message.content.text = Some(self.artifact_reference(artifact));
                message.content.parts.clear();
                message
            })
            .collect())
    }

    pub fn artifact_reference(&self, artifact: &OversizedArtifact) -> String {
        let args = truncate_chars(&artifact.tool_args.to_string(), self.config.artifact_args_preview_chars);
        let summary = truncate_chars(&artifact.summary, self.config.artifact_summary_preview_chars);
        let name = artifact.name.as_deref().unwrap_or(&artifact.artifact_id);
        format!(
            "[Artifact \"{}\" ({}) from {}({}): {}]",
            name, artifact.artifact_id, artifact.tool_name, args, summary
        )
    }

    /// Compresses `messages` if the summarizer says they exceed budget.
    ///
    /// Concurrent callers for one conversation share a single summarizer run
    /// and all receive its result. On success the result is exactly the new
    /// summary row; on skip or failure it is the input unchanged.
    pub async fn compress_if_needed(
        &self,
        scope: &ConversationScope,
        messages: Vec<ConversationMessage>,
    ) -> Vec<ConversationMessage> {
        if messages.is_empty() {
            return messages;
        }

        let summarizer = Arc::clone(&self.summarizer);
        let conversations = Arc::clone(&self.conversations);
        let event_bus = self.event_bus.clone();
        let key = scope.lock_key();
        let scope = scope.clone();

        self.registry
            .compressions()
            .run(key, move || {
                compress(summarizer, conversations, event_bus, scope, messages)
            })
            .await
    }

    /// Scoped read, oversized substitution, compression, then formatting.
    pub async fn build_prompt_history(
        &self,
        scope: &ConversationScope,
        filter: &HistoryFilter,
    ) -> Result<String, HistoryError> {
        let messages = self.scoped_history(scope, filter).await?;
        let messages = self.substitute_oversized(scope, messages).await?;
        let messages = self.compress_if_needed(scope, messages).await;
        Ok(format_history(&messages))
    }
}

async fn compress(
    summarizer: Arc<dyn ConversationSummarizer>,
    conversations: Arc<dyn ConversationRepository>,
    event_bus: EventBus,
    scope: ConversationScope,
    messages: Vec<ConversationMessage>,
) -> Vec<ConversationMessage> {
    let summary = match summarizer.summarize(&scope, &messages).await {
        Ok(SummaryOutcome::WithinBudget) => {
            debug!(conversation_id = %scope.conversation_id, count = messages.len(), "History within budget");
            event_bus.publish(DomainEvent::CompressionSkipped {
                conversation_id: scope.conversation_id.clone(),
                message_count: messages.len(),
                skipped_at: Utc::now(),
            });
            return messages;
        }
        Ok(SummaryOutcome::Summarized(summary)) => summary,
        Err(e) => {
            return compression_failed(&event_bus, &scope, e.to_string(), messages);
        }
    };

    let row = ConversationMessage::new(
        &scope,
        MessageRole::System,
        MessageType::CompressionSummary,
        Visibility::Internal,
        summary.text,
    )
    .with_metadata(MessageMetadata {
        compression_type: Some(COMPRESSION_TYPE_CONVERSATION.to_string()),
        summary_data: Some(summary.summary),
        artifact_ids: summary.artifact_ids,
        ..MessageMetadata::default()
    });

    if let Err(e) = conversations.append(&row).await {
        return compression_failed(&event_bus, &scope, e.to_string(), messages);
    }

    info!(
        conversation_id = %scope.conversation_id,
        compressed = messages.len(),
        summary_id = %row.id,
        "Compressed conversation history"
    );
    event_bus.publish(DomainEvent::CompressionCompleted {
        conversation_id: scope.conversation_id.clone(),
        summary_message_id: row.id.to_string(),
        compressed_messages: messages.len(),
        completed_at: Utc::now(),
    });
    vec![row]
}

fn compression_failed(
    event_bus: &EventBus,
    scope: &ConversationScope,
    reason: String,
    messages: Vec<ConversationMessage>,
) -> Vec<ConversationMessage> {
    warn!(conversation_id = %scope.conversation_id, error = %reason, "Compression failed, using uncompressed history");
    event_bus.publish(DomainEvent::CompressionFailed {
        conversation_id: scope.conversation_id.clone(),
        reason,
        failed_at: Utc::now(),
    });
    messages
}

fn passes_filter(message: &ConversationMessage, filter: &HistoryFilter) -> bool {
    if message.is_user_authored() || message.is_compression_summary() {
        return true;
    }
    if let Some(sub_agent_id) = filter.sub_agent_id.as_deref() {
        let involved = message.from_sub_agent_id.as_deref() == Some(sub_agent_id)
            || message.to_sub_agent_id.as_deref() == Some(sub_agent_id);
        if !involved {
            return false;
        }
    }
    if let Some(task_id) = filter.task_id.as_deref() {
        if message.task_id.as_deref() != Some(task_id) {
            return false;
        }
    }
    if let Some(delegation_id) = filter.delegation_id.as_deref() {
        if message.metadata.delegation_id.as_deref() != Some(delegation_id) {
            return false;
        }
    }
    true
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}

/// Speaker label of a history line.
pub fn role_label(message: &ConversationMessage) -> String {
    match (message.role, message.message_type) {
        (MessageRole::User, _) => "user".to_string(),
        (_, MessageType::A2aRequest | MessageType::A2aResponse) => match (message.from_id(), message.to_id()) {
            (Some(from), Some(to)) => format!("{} to {}", from, to),
            _ => message.role.as_str().to_string(),
        },
        (MessageRole::Agent, MessageType::Chat) => match message.from_id() {
            Some(from) => format!("{} to User", from),
            None => message.role.as_str().to_string(),
        },
        (MessageRole::Assistant, MessageType::ToolResult) => match message.from_id() {
            Some(from) => format!(
                "{} tool: {}",
                from,
                message.metadata.tool_name.as_deref().unwrap_or("unknown")
            ),
            None => message.role.as_str().to_string(),
        },
        _ => message.role.as_str().to_string(),
    }
}

fn message_body(message: &ConversationMessage) -> String {
    let mut body = message.text().to_string();
    for part in &message.content.parts {
        let rendered = match part.artifact_ref() {
            Some((id, Some(name))) => format!("[artifact: {} ({})]", name, id),
            Some((id, None)) => format!("[artifact: {}]", id),
            None => match part {
                Part::Text { text } if body.is_empty() => text.clone(),
                _ => continue,
            },
        };
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(&rendered);
    }
    body
}

/// Renders messages as `label: body` lines, oldest first.
pub fn format_history(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", role_label(message), message_body(message)))
        .collect::<Vec<_>>()
        .join("\n")
}
