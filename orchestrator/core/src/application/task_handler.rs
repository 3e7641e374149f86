// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Handler
//!
//! Runs one task against one sub-agent and maps the outcome to a
//! [`TaskResult`].
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** The only place errors become a `Failed` result
//! - **Collaborators:** every other application service, plus the
//!   [`ProjectGraphProvider`] and the [`GenerationEngine`]
//!
//! # Flow
//!
//! 1. Extract text and data from the input; fail fast if there is none
//! 2. Load the sub-agent's relations, tools, and components
//! 3. Mark the running agent's delegation state
//! 4. Generate
//! 5. Short-circuit on a valid transfer directive
//! 6. Otherwise map the response parts to the result artifact
//!
//! Cleanup runs exactly once after steps 2 through 6, whichever way they end,
//! including a panic in a collaborator.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::application::connection_manager::{ConnectionManager, SessionCloseError};
use crate::application::delegation_tools::{DelegationScope, DelegationToolFactory};
use crate::application::history_manager::{HistoryError, HistoryManager};
use crate::application::relation_extractor::{RelationError, RelationExtractor};
use crate::application::tool_resolver::{ToolResolutionError, ToolResolver};
use crate::domain::conversation::{ConversationScope, HistoryFilter};
use crate::domain::events::DomainEvent;
use crate::domain::generation::{GenerationEngine, GenerationError, GenerationRequest, GenerationResponse};
use crate::domain::mcp::ConnectionError;
use crate::domain::project::{ComponentDefinition, ProjectGraph, SubAgentDefinition};
use crate::domain::repository::{ProjectGraphProvider, RepositoryError};
use crate::domain::runtime_config::TaskConfig;
use crate::domain::task::{
    Artifact, Part, Task, TaskExecutionContext, TaskResult, TransferDirective, TRANSFER_DIRECTIVE_TYPE,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::header_templates::HeaderContext;
use crate::infrastructure::registry::SessionKey;

static TASK_ID_CONVERSATION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^task_([A-Za-z0-9_]+)-").ok());

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task input contains no text or data")]
    EmptyInput,

    #[error("failed to load project graph: {0}")]
    ProjectGraph(RepositoryError),

    #[error(transparent)]
    Relation(#[from] RelationError),

    #[error(transparent)]
    ToolResolution(#[from] ToolResolutionError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Coarse tag placed in `TaskStatus.type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::EmptyInput => "invalid_input",
            Self::ProjectGraph(RepositoryError::NotFound(_)) => "not_found",
            Self::ProjectGraph(RepositoryError::Unknown(_)) | Self::Panicked(_) => "unknown",
            Self::ProjectGraph(_) | Self::History(_) => "persistence_failed",
            Self::Relation(RelationError::AgentNotFound(_)) => "not_found",
            Self::Relation(RelationError::SubAgentNotFound { .. }) => "sub_agent_not_found",
            Self::ToolResolution(_) => "tool_not_found",
            Self::Connection(e) => e.kind(),
            Self::Generation(_) => "generation_failed",
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Delegation state of a running sub-agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationMarks {
    pub is_delegated: bool,
    pub delegation_id: Option<String>,
}

/// A sub-agent while it handles one task.
pub struct RunningAgent {
    task_id: String,
    sub_agent_id: String,
    delegation: Mutex<DelegationMarks>,
    sessions: Mutex<Vec<SessionKey>>,
    cleaned_up: AtomicBool,
}

impl RunningAgent {
    pub fn new(task_id: impl Into<String>, sub_agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            sub_agent_id: sub_agent_id.into(),
            delegation: Mutex::new(DelegationMarks::default()),
            sessions: Mutex::new(Vec::new()),
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn sub_agent_id(&self) -> &str {
        &self.sub_agent_id
    }

    pub fn mark_delegation(&self, is_delegated: bool, delegation_id: Option<String>) {
        *self.delegation.lock() = DelegationMarks {
            is_delegated,
            delegation_id,
        };
    }

    pub fn delegation(&self) -> DelegationMarks {
        self.delegation.lock().clone()
    }

    pub fn track_session(&self, key: SessionKey) {
        let mut sessions = self.sessions.lock();
        if !sessions.contains(&key) {
            sessions.push(key);
        }
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    /// Clears the delegation marks and sweeps dead sessions this task used.
    /// Only the first call does anything.
    pub async fn cleanup(&self, connections: &ConnectionManager) -> Result<(), Vec<SessionCloseError>> {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.delegation.lock() = DelegationMarks::default();
        let sessions = std::mem::take(&mut *self.sessions.lock());
        let errors = connections.sweep(&sessions).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Collaborators of the task handler.
pub struct TaskHandlerServices {
    pub graphs: Arc<dyn ProjectGraphProvider>,
    pub engine: Arc<dyn GenerationEngine>,
    pub relation_extractor: RelationExtractor,
    pub tool_resolver: ToolResolver,
    pub connections: ConnectionManager,
    pub history: Arc<HistoryManager>,
    pub delegation_tools: DelegationToolFactory,
    pub event_bus: EventBus,
}

enum TaskOutcome {
    Completed(TaskResult),
    Transferred { result: TaskResult, target: String },
}

pub struct TaskHandler {
    services: TaskHandlerServices,
    config: TaskConfig,
    running: Arc<DashMap<String, Arc<RunningAgent>>>,
}

impl TaskHandler {
    pub fn new(services: TaskHandlerServices, config: TaskConfig) -> Self {
        Self {
            services,
            config,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn running_agent(&self, task_id: &str) -> Option<Arc<RunningAgent>> {
        self.running.get(task_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Conversation id from the task context, else embedded in the task id,
    /// else the configured default.
    pub fn conversation_id(&self, task: &Task) -> String {
        if let Some(id) = task
            .context
            .as_ref()
            .and_then(|c| c.conversation_id.as_deref())
            .filter(|id| !id.trim().is_empty())
        {
            return id.to_string();
        }
        if let Some(id) = TASK_ID_CONVERSATION
            .as_ref()
            .and_then(|re| re.captures(&task.id))
            .and_then(|caps| caps.get(1))
        {
            return id.as_str().to_string();
        }
        self.config.default_conversation_id.clone()
    }

    /// Runs `task`. Never fails: errors come back as a `Failed` result.
    pub async fn handle(&self, task: Task, ctx: TaskExecutionContext) -> TaskResult {
        // 1. Usable input
        let input = TaskInputView::from_task(&task);
        if input.is_empty() {
            warn!(task_id = %task.id, sub_agent_id = %ctx.sub_agent_id, "Task input contains no text or data");
            let err = TaskError::EmptyInput;
            return TaskResult::failed(err.to_string(), err.error_type());
        }

        let conversation_id = self.conversation_id(&task);
        let running = Arc::new(RunningAgent::new(task.id.clone(), ctx.sub_agent_id.clone()));
        self.running.insert(task.id.clone(), Arc::clone(&running));

        info!(
            task_id = %task.id,
            conversation_id = %conversation_id,
            sub_agent_id = %ctx.sub_agent_id,
            "Handling task"
        );

        let outcome = AssertUnwindSafe(self.run(&task, &ctx, &conversation_id, &running, &input))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));

        if let Err(errors) = running.cleanup(&self.services.connections).await {
            for e in errors {
                error!(task_id = %task.id, error = %e, "Task cleanup failed");
            }
        }
        self.running.remove(&task.id);

        match outcome {
            Ok(TaskOutcome::Completed(result)) => {
                self.publish_completed(&task, &ctx, &conversation_id, None);
                result
            }
            Ok(TaskOutcome::Transferred { result, target }) => {
                self.publish_completed(&task, &ctx, &conversation_id, Some(target));
                result
            }
            Err(e) => {
                let error_type = e.error_type();
                warn!(
                    task_id = %task.id,
                    conversation_id = %conversation_id,
                    error_type = error_type,
                    error = %e,
                    "Task failed"
                );
                self.services.event_bus.publish(DomainEvent::TaskFailed {
                    conversation_id: conversation_id.clone(),
                    task_id: task.id.clone(),
                    sub_agent_id: ctx.sub_agent_id.clone(),
                    error_type: error_type.to_string(),
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                });
                TaskResult::failed(e.to_string(), error_type)
            }
        }
    }

    async fn run(
        &self,
        task: &Task,
        ctx: &TaskExecutionContext,
        conversation_id: &str,
        running: &RunningAgent,
        input: &TaskInputView,
    ) -> Result<TaskOutcome, TaskError> {
        // 2. Sub-agent configuration
        let graph = self
            .services
            .graphs
            .load(&ctx.project)
            .await
            .map_err(TaskError::ProjectGraph)?;
        let relations = self
            .services
            .relation_extractor
            .extract_for(&graph, &ctx.agent_id, &ctx.sub_agent_id)?;
        let sub_agent = graph
            .sub_agent(&ctx.agent_id, &ctx.sub_agent_id)
            .ok_or_else(|| RelationError::SubAgentNotFound {
                agent_id: ctx.agent_id.clone(),
                sub_agent_id: ctx.sub_agent_id.clone(),
            })?;
        let bindings = self.services.tool_resolver.resolve(&graph, &ctx.agent_id, sub_agent)?;
        let (data_components, artifact_components) = resolve_components(&graph, sub_agent);

        let metadata = task.metadata().cloned().unwrap_or_default();
        let scope = ConversationScope::new(ctx.tenant_id(), ctx.project_id(), conversation_id);
        let header_context = HeaderContext {
            conversation_id: conversation_id.to_string(),
            tenant_id: ctx.tenant_id().to_string(),
            project_id: ctx.project_id().to_string(),
            sub_agent_id: ctx.sub_agent_id.clone(),
            user_id: ctx.user_id.clone(),
            headers: ctx.forwarded_headers.clone(),
            metadata: metadata.clone(),
        };

        // 3. Delegation marks
        let marks = delegation_marks(&metadata);
        running.mark_delegation(marks.is_delegated, marks.delegation_id);

        let mut tools = Vec::new();
        for resolved in &bindings {
            let prepared = self
                .services
                .connections
                .prepare(ctx, &graph, resolved, &header_context)
                .await?;
            running.track_session(prepared.key.clone());
            let exposed = self.services.connections.list_tools(&prepared).await?;
            let effective =
                self.services
                    .tool_resolver
                    .effective_tools(conversation_id, &ctx.sub_agent_id, resolved, exposed);
            tools.extend(
                self.services
                    .connections
                    .agent_tools(&prepared, effective, &resolved.tool.tool_overrides),
            );
        }

        let delegation_scope = Arc::new(DelegationScope {
            execution: ctx.clone(),
            conversation: scope.clone(),
            task_id: task.id.clone(),
            header_context,
            graph: Arc::clone(&graph),
            inherited_metadata: metadata,
        });
        tools.extend(self.services.delegation_tools.build(&relations, delegation_scope));

        let history = self
            .services
            .history
            .build_prompt_history(&scope, &HistoryFilter::for_sub_agent(ctx.sub_agent_id.as_str()))
            .await?;

        // 4. Generate
        debug!(task_id = %task.id, tools = tools.len(), "Invoking generation engine");
        let response = self
            .services
            .engine
            .generate(GenerationRequest {
                system_prompt: sub_agent.prompt.clone(),
                user_message: input.user_message(),
                history,
                tools,
                data_components,
                artifact_components,
                conversation_id: conversation_id.to_string(),
                task_id: task.id.clone(),
            })
            .await?;

        // 5. Transfer short-circuit
        if let Some(directive) = find_transfer(&response) {
            let reason = transfer_reason(&response, &self.config.default_transfer_reason);
            let from = directive
                .from_sub_agent_id
                .clone()
                .unwrap_or_else(|| ctx.sub_agent_id.clone());
            info!(
                task_id = %task.id,
                from_sub_agent_id = %from,
                target_sub_agent_id = %directive.target_sub_agent_id,
                "Transferring conversation"
            );
            let part = Part::data(json!({
                "type": TRANSFER_DIRECTIVE_TYPE,
                "targetSubAgentId": directive.target_sub_agent_id,
                "fromSubAgentId": from,
                "task_id": task.id,
                "reason": reason,
                "original_message": input.text,
            }));
            return Ok(TaskOutcome::Transferred {
                result: TaskResult::completed(vec![Artifact::new(vec![part])]),
                target: directive.target_sub_agent_id,
            });
        }

        // 6. Normal completion
        let parts = if response.parts.is_empty() {
            response.text.into_iter().map(Part::text).collect()
        } else {
            response.parts
        };
        Ok(TaskOutcome::Completed(TaskResult::completed(vec![Artifact::new(parts)])))
    }

    fn publish_completed(&self, task: &Task, ctx: &TaskExecutionContext, conversation_id: &str, transferred_to: Option<String>) {
        self.services.event_bus.publish(DomainEvent::TaskCompleted {
            conversation_id: conversation_id.to_string(),
            task_id: task.id.clone(),
            sub_agent_id: ctx.sub_agent_id.clone(),
            transferred_to,
            completed_at: Utc::now(),
        });
    }
}

/// Text and structured data pulled from a task's input parts.
struct TaskInputView {
    text: String,
    data: Vec<Value>,
}

impl TaskInputView {
    fn from_task(task: &Task) -> Self {
        let mut texts = Vec::new();
        let mut data = Vec::new();
        for part in &task.input.parts {
            match part {
                Part::Text { text } if !text.trim().is_empty() => texts.push(text.as_str()),
                Part::Data { data: value } if !value.is_null() => data.push(value.clone()),
                _ => {}
            }
        }
        Self {
            text: texts.join("\n"),
            data,
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.data.is_empty()
    }

    fn user_message(&self) -> String {
        let mut message = self.text.clone();
        for value in &self.data {
            if !message.is_empty() {
                message.push_str("\n\n");
            }
            message.push_str(&value.to_string());
        }
        message
    }
}

fn delegation_marks(metadata: &Map<String, Value>) -> DelegationMarks {
    DelegationMarks {
        is_delegated: metadata.get("isDelegation").and_then(Value::as_bool).unwrap_or(false),
        delegation_id: metadata
            .get("delegationId")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn resolve_components(
    graph: &ProjectGraph,
    sub_agent: &SubAgentDefinition,
) -> (Vec<ComponentDefinition>, Vec<ComponentDefinition>) {
    let data = sub_agent
        .data_components
        .iter()
        .filter_map(|id| {
            let found = graph.find_data_component(id).cloned();
            if found.is_none() {
                warn!(sub_agent_id = %sub_agent.id, component_id = %id, "Dropping unknown data component");
            }
            found
        })
        .collect();
    let artifacts = sub_agent
        .artifact_components
        .iter()
        .filter_map(|id| {
            let found = graph.find_artifact_component(id).cloned();
            if found.is_none() {
                warn!(sub_agent_id = %sub_agent.id, component_id = %id, "Dropping unknown artifact component");
            }
            found
        })
        .collect();
    (data, artifacts)
}

/// First transfer-named tool call whose paired result is a valid directive.
fn find_transfer(response: &GenerationResponse) -> Option<TransferDirective> {
    for call in response.tool_calls().filter(|c| c.tool_name.contains("transfer")) {
        let Some(result) = response.tool_result_for(&call.tool_call_id) else {
            warn!(tool = %call.tool_name, tool_call_id = %call.tool_call_id, "Transfer call has no result");
            continue;
        };
        match TransferDirective::from_tool_result(&result.result) {
            Some(directive) => return Some(directive),
            None => warn!(
                tool = %call.tool_name,
                tool_call_id = %call.tool_call_id,
                "Ignoring malformed transfer result"
            ),
        }
    }
    None
}

fn transfer_reason(response: &GenerationResponse, default_reason: &str) -> String {
    response
        .text
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .or_else(|| response.last_reasoning())
        .unwrap_or(default_reason)
        .to_string()
}
