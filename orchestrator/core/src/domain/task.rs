// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task I/O
//!
//! A task is one conversational turn handed to a sub-agent. It comes in as a
//! list of parts plus optional conversation context and leaves as a
//! [`TaskResult`]: a status and zero or more artifacts. A `Failed` result is a
//! normal return value, not an error.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::project::ProjectRef;

/// Discriminator carried by every transfer directive.
pub const TRANSFER_DIRECTIVE_TYPE: &str = "transfer";

/// One content part of a task, message, or artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Part {
    Text {
        text: String,
    },
    Data {
        data: Value,
    },
    File {
        file: FileRef,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn data(data: Value) -> Self {
        Self::Data { data }
    }

    /// `(artifact_id, name)` when this part stands in for a stored artifact.
    pub fn artifact_ref(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Self::Data { data } => {
                let id = data.get("artifactId").and_then(Value::as_str)?;
                let name = data.get("name").and_then(Value::as_str);
                Some((id, name))
            }
            Self::File { file } => {
                let uri = file.uri.as_deref()?;
                Some((uri, file.name.as_deref()))
            }
            Self::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub input: TaskInput,
    #[serde(default)]
    pub context: Option<TaskContext>,
}

impl Task {
    pub fn new(id: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            input: TaskInput { parts },
            context: None,
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref().map(|c| &c.metadata)
    }
}

/// Who is running the task and on whose behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskExecutionContext {
    pub project: ProjectRef,
    pub agent_id: String,
    pub sub_agent_id: String,
    /// Bearer token the caller authenticated with.
    pub api_key: Option<String>,
    /// End user the task runs for; drives user-scoped credentials.
    pub user_id: Option<String>,
    /// Headers the caller asked to forward to every tool server.
    pub forwarded_headers: HashMap<String, String>,
    /// Set when this task was itself started by a team delegation.
    pub team_delegation: bool,
}

impl TaskExecutionContext {
    pub fn new(project: ProjectRef, agent_id: impl Into<String>, sub_agent_id: impl Into<String>) -> Self {
        Self {
            project,
            agent_id: agent_id.into(),
            sub_agent_id: sub_agent_id.into(),
            api_key: None,
            user_id: None,
            forwarded_headers: HashMap::new(),
            team_delegation: false,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.project.tenant_id
    }

    pub fn project_id(&self) -> &str {
        &self.project.project_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Coarse failure class, e.g. `connection_refused`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            artifact_id: Uuid::new_v4().to_string(),
            parts,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub artifacts: Vec<Artifact>,
}

impl TaskResult {
    pub fn completed(artifacts: Vec<Artifact>) -> Self {
        Self {
            status: TaskStatus {
                state: TaskState::Completed,
                message: None,
                error_type: None,
            },
            artifacts,
        }
    }

    pub fn failed(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            status: TaskStatus {
                state: TaskState::Failed,
                message: Some(message.into()),
                error_type: Some(error_type.into()),
            },
            artifacts: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.state == TaskState::Completed
    }
}

/// What a transfer tool returns: "hand this turn to `target_sub_agent_id`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDirective {
    pub target_sub_agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_sub_agent_id: Option<String>,
}

impl TransferDirective {
    /// Accepts a tool result only if it is an object tagged `type: "transfer"`
    /// with a non-empty string `targetSubAgentId`.
    pub fn from_tool_result(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.get("type").and_then(Value::as_str) != Some(TRANSFER_DIRECTIVE_TYPE) {
            return None;
        }
        let target = object.get("targetSubAgentId").and_then(Value::as_str)?;
        if target.is_empty() {
            return None;
        }
        let from = match object.get("fromSubAgentId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return None,
        };
        Some(Self {
            target_sub_agent_id: target.to_string(),
            from_sub_agent_id: from,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(TRANSFER_DIRECTIVE_TYPE.into()));
        object.insert("targetSubAgentId".into(), Value::String(self.target_sub_agent_id.clone()));
        if let Some(from) = &self.from_sub_agent_id {
            object.insert("fromSubAgentId".into(), Value::String(from.clone()));
        }
        Value::Object(object)
    }
}
