// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mcp
//!
//! Tool-server (MCP) value objects and the transport seam.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Describe how to reach a tool server and what a live session
//!   can do, without committing to any wire framing. `McpConnector` opens
//!   sessions; `McpSession` lists and calls tools. Framing lives behind these
//!   traits in whatever adapter the host wires in.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport flavour a tool server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    #[default]
    StreamableHttp,
    Sse,
}

/// Per-tool override configured on a tool definition.
///
/// Every field is optional; an absent field leaves the server's value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOverride {
    /// Name exposed to the model instead of the server's tool name.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement JSON schema for the tool's input.
    #[serde(default)]
    pub schema: Option<Value>,
    /// Argument projection applied before the call reaches the server.
    /// Keys are JSON pointers into the outgoing arguments, values are JSON
    /// pointers into the arguments the model produced.
    #[serde(default)]
    pub transformation: Option<HashMap<String, String>>,
}

/// Fully resolved connection parameters for one tool server.
///
/// Built fresh per acquisition by the connection manager; secrets only ever
/// appear in `headers`.
#[derive(Debug, Clone, PartialEq)]
pub struct McpServerConfig {
    pub tool_id: String,
    pub server_url: String,
    pub transport: McpTransport,
    pub headers: HashMap<String, String>,
    /// Credential reference the headers were stuffed from, if any.
    pub credential_reference_id: Option<String>,
}

/// One tool as a server describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// MCP error details (value object for error responses)
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("tool server not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tool call failed: {0}")]
    ToolCall(String),
}

/// Why a tool-server session could not be acquired, classified for the task result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection to tool '{tool_id}' refused: {message}")]
    Refused { tool_id: String, message: String },

    #[error("tool server for '{tool_id}' not found: {message}")]
    NotFound { tool_id: String, message: String },

    #[error("failed to connect to tool '{tool_id}': {message}")]
    Failed { tool_id: String, message: String },
}

impl ConnectionError {
    /// Classifies a connector failure. Transports that only surface a message
    /// are sniffed for the usual refused / 404 markers.
    pub fn classify(tool_id: &str, err: &McpError) -> Self {
        let tool_id = tool_id.to_string();
        match err {
            McpError::ConnectionRefused(message) => Self::Refused { tool_id, message: message.clone() },
            McpError::NotFound(message) => Self::NotFound { tool_id, message: message.clone() },
            McpError::Transport(message) | McpError::ToolCall(message) => {
                let lower = message.to_lowercase();
                if lower.contains("econnrefused") || lower.contains("connection refused") {
                    Self::Refused { tool_id, message: message.clone() }
                } else if lower.contains("404") || lower.contains("not found") {
                    Self::NotFound { tool_id, message: message.clone() }
                } else {
                    Self::Failed { tool_id, message: message.clone() }
                }
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Refused { .. } => "connection_refused",
            Self::NotFound { .. } => "not_found",
            Self::Failed { .. } => "connection_failed",
        }
    }

    pub fn tool_id(&self) -> &str {
        match self {
            Self::Refused { tool_id, .. } | Self::NotFound { tool_id, .. } | Self::Failed { tool_id, .. } => tool_id,
        }
    }
}

/// A live connection to a tool server.
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;

    /// Cheap liveness probe. A session that returns `false` is evicted.
    async fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<(), McpError>;
}

/// Opens tool-server sessions.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(
        &self,
        config: &McpServerConfig,
    ) -> Result<std::sync::Arc<dyn McpSession>, McpError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_override_fields_are_optional() {
        let ov: ToolOverride = serde_json::from_value(json!({ "displayName": "find_customer" })).unwrap();
        assert_eq!(ov.display_name.as_deref(), Some("find_customer"));
        assert!(ov.schema.is_none());
        assert!(ov.transformation.is_none());
    }

    #[test]
    fn test_connection_error_classification() {
        let refused = ConnectionError::classify("search", &McpError::Transport("connect ECONNREFUSED 127.0.0.1:9".into()));
        assert_eq!(refused.kind(), "connection_refused");
        let missing = ConnectionError::classify("search", &McpError::Transport("HTTP 404 Not Found".into()));
        assert_eq!(missing.kind(), "not_found");
        let other = ConnectionError::classify("search", &McpError::Transport("tls handshake".into()));
        assert_eq!(other.kind(), "connection_failed");
        assert_eq!(other.tool_id(), "search");
    }

    #[test]
    fn test_transport_defaults_to_streamable_http() {
        assert_eq!(McpTransport::default(), McpTransport::StreamableHttp);
        let t: McpTransport = serde_json::from_value(json!("sse")).unwrap();
        assert_eq!(t, McpTransport::Sse);
    }
}
