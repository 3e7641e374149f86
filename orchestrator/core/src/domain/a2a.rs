// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! A2A
//!
//! Agent-to-agent wire types: the JSON-RPC `message/send` envelope and the
//! message it carries, plus the transport seam the retrying client drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Keep the protocol shape independent of the HTTP client.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::task::Part;

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_MESSAGE_SEND: &str = "message/send";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    pub role: String,
    pub parts: Vec<Part>,
    pub message_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl A2aMessage {
    /// Agent-authored single text part message.
    pub fn agent_text(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: "agent".to_string(),
            parts: vec![Part::text(text)],
            message_id: message_id.into(),
            kind: "message".to_string(),
            context_id: None,
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: A2aMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: MessageSendParams,
}

impl JsonRpcRequest {
    pub fn message_send(id: impl Into<String>, message: A2aMessage) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: METHOD_MESSAGE_SEND.to_string(),
            params: MessageSendParams { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Concatenated text of a `message/send` result, whether the remote answered
    /// with a message (`parts`) or a task (`artifacts[].parts`, then
    /// `status.message.parts`).
    pub fn result_text(&self) -> String {
        let Some(result) = &self.result else {
            return String::new();
        };
        let mut texts = Vec::new();
        collect_part_texts(result.get("parts"), &mut texts);
        if let Some(artifacts) = result.get("artifacts").and_then(Value::as_array) {
            for artifact in artifacts {
                collect_part_texts(artifact.get("parts"), &mut texts);
            }
        }
        if texts.is_empty() {
            let status_parts = result.get("status").and_then(|s| s.get("message")).and_then(|m| m.get("parts"));
            collect_part_texts(status_parts, &mut texts);
        }
        texts.join("\n")
    }

    /// Remote task id when the result is a task.
    pub fn task_id(&self) -> Option<&str> {
        let result = self.result.as_ref()?;
        match result.get("kind").and_then(Value::as_str) {
            Some("task") => result.get("id").and_then(Value::as_str),
            _ => result.get("taskId").and_then(Value::as_str),
        }
    }
}

fn collect_part_texts(parts: Option<&Value>, out: &mut Vec<String>) {
    let Some(parts) = parts.and_then(Value::as_array) else {
        return;
    };
    for part in parts {
        if part.get("kind").and_then(Value::as_str) == Some("text") {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push(text.to_string());
            }
        }
    }
}

/// Raw HTTP outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A2aHttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum A2aTransportError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request error: {0}")]
    Request(String),
}

impl A2aTransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}

/// One HTTP POST of a JSON-RPC request. No retries at this layer.
#[async_trait]
pub trait A2aTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        request: &JsonRpcRequest,
    ) -> Result<A2aHttpResponse, A2aTransportError>;
}
