// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trace/session events emitted while a task runs.
///
/// Published on the in-process `EventBus`; most carry the conversation id so a
/// subscriber can follow one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TransferRequested {
        conversation_id: String,
        from_sub_agent_id: String,
        target_sub_agent_id: String,
        tool_call_id: String,
        requested_at: DateTime<Utc>,
    },
    DelegationSent {
        conversation_id: String,
        delegation_id: String,
        from_sub_agent_id: String,
        target_id: String,
        /// internal, external, or team
        target_variant: String,
        sent_at: DateTime<Utc>,
    },
    DelegationReturned {
        conversation_id: String,
        delegation_id: String,
        target_id: String,
        response_length: usize,
        returned_at: DateTime<Utc>,
    },
    DelegationFailed {
        conversation_id: String,
        delegation_id: String,
        target_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    NoEffectiveTools {
        conversation_id: String,
        sub_agent_id: String,
        tool_id: String,
        requested: Vec<String>,
        available: Vec<String>,
        detected_at: DateTime<Utc>,
    },
    ToolServerConnected {
        tool_id: String,
        server_url: String,
        connected_at: DateTime<Utc>,
    },
    ToolServerEvicted {
        tool_id: String,
        reason: String,
        evicted_at: DateTime<Utc>,
    },
    CompressionCompleted {
        conversation_id: String,
        summary_message_id: String,
        compressed_messages: usize,
        completed_at: DateTime<Utc>,
    },
    CompressionSkipped {
        conversation_id: String,
        message_count: usize,
        skipped_at: DateTime<Utc>,
    },
    CompressionFailed {
        conversation_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    TaskCompleted {
        conversation_id: String,
        task_id: String,
        sub_agent_id: String,
        transferred_to: Option<String>,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        conversation_id: String,
        task_id: String,
        sub_agent_id: String,
        error_type: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Conversation the event belongs to. Tool-server events are process-wide.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::TransferRequested { conversation_id, .. }
            | Self::DelegationSent { conversation_id, .. }
            | Self::DelegationReturned { conversation_id, .. }
            | Self::DelegationFailed { conversation_id, .. }
            | Self::NoEffectiveTools { conversation_id, .. }
            | Self::CompressionCompleted { conversation_id, .. }
            | Self::CompressionSkipped { conversation_id, .. }
            | Self::CompressionFailed { conversation_id, .. }
            | Self::TaskCompleted { conversation_id, .. }
            | Self::TaskFailed { conversation_id, .. } => Some(conversation_id),
            Self::ToolServerConnected { .. } | Self::ToolServerEvicted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tag() {
        let event = DomainEvent::CompressionSkipped {
            conversation_id: "c1".into(),
            message_count: 3,
            skipped_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "compression_skipped");
        assert_eq!(event.conversation_id(), Some("c1"));
    }
}
