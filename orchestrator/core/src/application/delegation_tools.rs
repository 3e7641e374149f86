// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Delegation and Transfer Tools
//!
//! Builds one callable tool per relation of the running sub-agent:
//!
//! - `transferTo<Target>`: no arguments and no I/O. Returns a transfer
//!   directive that the task handler acts on after generation.
//! - `delegateTo<Target>`: sends `message` to the target over A2A, records
//!   the exchange in the conversation ledger, and returns the reply.
//!
//! Outbound auth depends on the target:
//!
//! | Target | Headers |
//! |---|---|
//! | external | credential headers + rendered relation headers |
//! | team | rendered relation headers + fresh service token |
//! | internal | caller's API key, or a re-targeted service token inside a team delegation |
//!
//! A delegate call may be retried by the A2A client after the remote agent
//! already acted on it. Nothing deduplicates those repeats.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::a2a::A2aMessage;
use crate::domain::conversation::{
    ConversationMessage, ConversationScope, MessageMetadata, MessageRole, MessageType, Visibility,
};
use crate::domain::credentials::{CredentialStuffer, StuffingContext};
use crate::domain::events::DomainEvent;
use crate::domain::generation::{AgentTool, ToolCallContext, ToolInvocationError};
use crate::domain::project::ProjectGraph;
use crate::domain::relation::{ExtractedRelations, Relation, RelationTarget};
use crate::domain::repository::ConversationRepository;
use crate::domain::task::{TaskExecutionContext, TransferDirective};
use crate::domain::tokens::{ServiceTokenClaims, ServiceTokenIssuer};
use crate::infrastructure::a2a_client::{A2aClient, A2aClientError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::header_templates::{HeaderContext, HeaderTemplateEngine};

pub const TARGET_SUB_AGENT_HEADER: &str = "x-target-sub-agent-id";

/// Per-task state shared by the tools of one sub-agent run.
#[derive(Debug, Clone)]
pub struct DelegationScope {
    pub execution: TaskExecutionContext,
    pub conversation: ConversationScope,
    pub task_id: String,
    pub header_context: HeaderContext,
    pub graph: Arc<ProjectGraph>,
    /// Task metadata forwarded on every outbound message.
    pub inherited_metadata: Map<String, Value>,
}

/// `refund-agent` -> `RefundAgent`
pub fn pascal_case(id: &str) -> String {
    id.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn transfer_tool_name(target_id: &str) -> String {
    format!("transferTo{}", pascal_case(target_id))
}

pub fn delegate_tool_name(target_id: &str) -> String {
    format!("delegateTo{}", pascal_case(target_id))
}

#[derive(Clone)]
pub struct DelegationToolFactory {
    conversations: Arc<dyn ConversationRepository>,
    a2a_client: A2aClient,
    credential_stuffer: Arc<dyn CredentialStuffer>,
    token_issuer: Arc<dyn ServiceTokenIssuer>,
    templates: Arc<HeaderTemplateEngine>,
    event_bus: EventBus,
    a2a_base_url: String,
}

impl DelegationToolFactory {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        a2a_client: A2aClient,
        credential_stuffer: Arc<dyn CredentialStuffer>,
        token_issuer: Arc<dyn ServiceTokenIssuer>,
        templates: Arc<HeaderTemplateEngine>,
        event_bus: EventBus,
        a2a_base_url: impl Into<String>,
    ) -> Self {
        Self {
            conversations,
            a2a_client,
            credential_stuffer,
            token_issuer,
            templates,
            event_bus,
            a2a_base_url: a2a_base_url.into(),
        }
    }

    /// Transfer tools first, then delegate tools.
    pub fn build(&self, relations: &ExtractedRelations, scope: Arc<DelegationScope>) -> Vec<Arc<dyn AgentTool>> {
        let mut tools: Vec<Arc<dyn AgentTool>> = Vec::new();
        for relation in &relations.transfers {
            tools.push(Arc::new(self.transfer_tool(relation.clone(), Arc::clone(&scope))));
        }
        for relation in relations.delegates() {
            tools.push(Arc::new(self.delegate_tool(relation.clone(), Arc::clone(&scope))));
        }
        tools
    }

    pub fn transfer_tool(&self, relation: Relation, scope: Arc<DelegationScope>) -> TransferTool {
        let description = if relation.description.is_empty() {
            format!("Hand the conversation over to {}.", relation.name)
        } else {
            format!("Hand the conversation over to {}. {}", relation.name, relation.description)
        };
        TransferTool {
            name: transfer_tool_name(relation.target.id()),
            description,
            relation,
            scope,
            event_bus: self.event_bus.clone(),
        }
    }

    pub fn delegate_tool(&self, relation: Relation, scope: Arc<DelegationScope>) -> DelegateTool {
        let description = if relation.description.is_empty() {
            format!("Ask {} to handle a request and wait for its answer.", relation.name)
        } else {
            format!(
                "Ask {} to handle a request and wait for its answer. {}",
                relation.name, relation.description
            )
        };
        DelegateTool {
            name: delegate_tool_name(relation.target.id()),
            description,
            relation,
            scope,
            factory: self.clone(),
        }
    }

    /// Endpoint of an agent hosted by this deployment.
    pub fn agent_url(&self, execution: &TaskExecutionContext, agent_id: &str) -> String {
        format!(
            "{}/tenants/{}/projects/{}/agents/{}/a2a",
            self.a2a_base_url.trim_end_matches('/'),
            execution.tenant_id(),
            execution.project_id(),
            agent_id
        )
    }

    fn target_url(&self, relation: &Relation, execution: &TaskExecutionContext) -> String {
        match &relation.target {
            RelationTarget::Internal { .. } => self.agent_url(execution, &execution.agent_id),
            RelationTarget::Team { agent_id } => self.agent_url(execution, agent_id),
            RelationTarget::External { base_url, .. } => base_url.clone(),
        }
    }

    async fn outbound_headers(
        &self,
        relation: &Relation,
        scope: &DelegationScope,
    ) -> Result<HashMap<String, String>, ToolInvocationError> {
        let execution = &scope.execution;
        let mut headers: HashMap<String, String> = HashMap::new();

        match &relation.target {
            RelationTarget::External {
                credential_reference_id,
                external_agent_id,
                ..
            } => {
                if let Some(reference_id) = credential_reference_id {
                    match scope.graph.credential_reference(reference_id) {
                        Some(reference) => {
                            let stuffing = StuffingContext {
                                tenant_id: execution.tenant_id().to_string(),
                                project_id: execution.project_id().to_string(),
                                user_id: execution.user_id.clone(),
                            };
                            let credential_headers = self
                                .credential_stuffer
                                .build_headers(reference, &stuffing)
                                .await
                                .map_err(|e| ToolInvocationError::Delegation(e.to_string()))?;
                            merge_headers(&mut headers, credential_headers);
                        }
                        None => warn!(
                            external_agent_id = %external_agent_id,
                            credential_reference_id = %reference_id,
                            "Credential reference not in project graph, calling without credentials"
                        ),
                    }
                }
                merge_headers(
                    &mut headers,
                    self.templates.render_headers(&relation.headers, &scope.header_context),
                );
            }
            RelationTarget::Team { agent_id } => {
                merge_headers(
                    &mut headers,
                    self.templates.render_headers(&relation.headers, &scope.header_context),
                );
                let token = self
                    .issue_token(ServiceTokenClaims {
                        tenant_id: execution.tenant_id().to_string(),
                        project_id: execution.project_id().to_string(),
                        origin_agent_id: execution.agent_id.clone(),
                        target_agent_id: agent_id.clone(),
                        target_sub_agent_id: None,
                    })
                    .await?;
                headers.insert("authorization".to_string(), format!("Bearer {}", token));
            }
            RelationTarget::Internal { sub_agent_id } => {
                merge_headers(
                    &mut headers,
                    self.templates.render_headers(&relation.headers, &scope.header_context),
                );
                if execution.team_delegation {
                    let token = self
                        .issue_token(ServiceTokenClaims {
                            tenant_id: execution.tenant_id().to_string(),
                            project_id: execution.project_id().to_string(),
                            origin_agent_id: execution.agent_id.clone(),
                            target_agent_id: execution.agent_id.clone(),
                            target_sub_agent_id: Some(sub_agent_id.clone()),
                        })
                        .await?;
                    headers.insert("authorization".to_string(), format!("Bearer {}", token));
                } else if let Some(api_key) = &execution.api_key {
                    headers.insert("authorization".to_string(), format!("Bearer {}", api_key));
                }
                headers.insert(TARGET_SUB_AGENT_HEADER.to_string(), sub_agent_id.clone());
            }
        }

        Ok(headers)
    }

    async fn issue_token(&self, claims: ServiceTokenClaims) -> Result<String, ToolInvocationError> {
        self.token_issuer
            .issue(&claims)
            .await
            .map_err(|e| ToolInvocationError::Delegation(e.to_string()))
    }
}

fn merge_headers(target: &mut HashMap<String, String>, layer: HashMap<String, String>) {
    for (name, value) in layer {
        target.insert(name.to_ascii_lowercase(), value);
    }
}

pub struct TransferTool {
    name: String,
    description: String,
    relation: Relation,
    scope: Arc<DelegationScope>,
    event_bus: EventBus,
}

impl TransferTool {
    pub fn relation(&self) -> &Relation {
        &self.relation
    }
}

#[async_trait]
impl AgentTool for TransferTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn invoke(&self, _args: Value, ctx: &ToolCallContext) -> Result<Value, ToolInvocationError> {
        let from = self.scope.execution.sub_agent_id.clone();
        let target = self.relation.target.id().to_string();

        info!(
            conversation_id = %self.scope.conversation.conversation_id,
            from_sub_agent_id = %from,
            target_sub_agent_id = %target,
            "Transfer requested"
        );
        self.event_bus.publish(DomainEvent::TransferRequested {
            conversation_id: self.scope.conversation.conversation_id.clone(),
            from_sub_agent_id: from.clone(),
            target_sub_agent_id: target.clone(),
            tool_call_id: ctx.tool_call_id.clone(),
            requested_at: Utc::now(),
        });

        Ok(TransferDirective {
            target_sub_agent_id: target,
            from_sub_agent_id: Some(from),
        }
        .to_value())
    }
}

pub struct DelegateTool {
    name: String,
    description: String,
    relation: Relation,
    scope: Arc<DelegationScope>,
    factory: DelegationToolFactory,
}

impl DelegateTool {
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    fn visibility(&self) -> Visibility {
        if self.relation.target.is_external() {
            Visibility::External
        } else {
            Visibility::Internal
        }
    }

    fn outbound_message(&self, delegation_id: &str, text: &str) -> A2aMessage {
        let mut message = A2aMessage::agent_text(Uuid::new_v4().to_string(), text);
        message.context_id = Some(self.scope.conversation.conversation_id.clone());
        message.metadata = self.scope.inherited_metadata.clone();
        message.metadata.insert("isDelegation".into(), Value::Bool(true));
        message
            .metadata
            .insert("delegationId".into(), Value::String(delegation_id.to_string()));
        message.metadata.insert(
            "fromSubAgentId".into(),
            Value::String(self.scope.execution.sub_agent_id.clone()),
        );
        message
    }

    async fn persist(&self, message: &ConversationMessage) -> Result<(), ToolInvocationError> {
        self.factory
            .conversations
            .append(message)
            .await
            .map_err(|e| ToolInvocationError::Persistence(e.to_string()))
    }

    fn fail(&self, delegation_id: &str, reason: String) {
        warn!(
            conversation_id = %self.scope.conversation.conversation_id,
            delegation_id = %delegation_id,
            target_id = %self.relation.target.id(),
            error = %reason,
            "Delegation failed"
        );
        self.factory.event_bus.publish(DomainEvent::DelegationFailed {
            conversation_id: self.scope.conversation.conversation_id.clone(),
            delegation_id: delegation_id.to_string(),
            target_id: self.relation.target.id().to_string(),
            reason,
            failed_at: Utc::now(),
        });
    }
}

#[async_trait]
impl AgentTool for DelegateTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "What the target agent should do." }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolInvocationError> {
        let text = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolInvocationError::InvalidArguments("'message' must be a string".to_string()))?
            .to_string();

        let scope = &self.scope;
        let from = scope.execution.sub_agent_id.clone();
        let target = self.relation.target.id().to_string();
        let delegation_id = Uuid::new_v4().to_string();

        // 1. Resolve auth before anything is recorded
        let headers = match self.factory.outbound_headers(&self.relation, scope).await {
            Ok(headers) => headers,
            Err(e) => {
                self.fail(&delegation_id, e.to_string());
                return Err(e);
            }
        };
        let url = self.factory.target_url(&self.relation, &scope.execution);

        // 2. Record the outbound message
        let metadata = MessageMetadata {
            tool_call_id: Some(ctx.tool_call_id.clone()),
            delegation_id: Some(delegation_id.clone()),
            is_delegated: true,
            ..MessageMetadata::default()
        };
        let mut outbound = ConversationMessage::new(
            &scope.conversation,
            MessageRole::Agent,
            MessageType::A2aRequest,
            self.visibility(),
            text.as_str(),
        )
        .from_sub_agent(from.as_str())
        .with_task_id(scope.task_id.as_str())
        .with_metadata(metadata.clone());
        outbound = match &self.relation.target {
            RelationTarget::External { .. } => outbound.to_external_agent(target.as_str()),
            _ => outbound.to_sub_agent(target.as_str()),
        };
        self.persist(&outbound).await?;

        self.factory.event_bus.publish(DomainEvent::DelegationSent {
            conversation_id: scope.conversation.conversation_id.clone(),
            delegation_id: delegation_id.clone(),
            from_sub_agent_id: from.clone(),
            target_id: target.clone(),
            target_variant: variant_name(&self.relation.target).to_string(),
            sent_at: Utc::now(),
        });

        // 3. Send and wait
        let message = self.outbound_message(&delegation_id, &text);
        let response = match self.factory.a2a_client.send_message(&url, &headers, message).await {
            Ok(response) => response,
            Err(e) => {
                self.fail(&delegation_id, e.to_string());
                return Err(match e {
                    A2aClientError::Rpc { code, message } => ToolInvocationError::RemoteAgent { code, message },
                    other => ToolInvocationError::Delegation(other.to_string()),
                });
            }
        };

        // 4. Record the reply
        let reply = response.result_text();
        let a2a_task_id = response.task_id().map(str::to_string);
        let mut inbound = ConversationMessage::new(
            &scope.conversation,
            MessageRole::Agent,
            MessageType::A2aResponse,
            self.visibility(),
            reply.as_str(),
        )
        .to_sub_agent(from.as_str())
        .with_task_id(scope.task_id.as_str())
        .with_metadata(metadata);
        inbound = match &self.relation.target {
            RelationTarget::External { .. } => inbound.from_external_agent(target.as_str()),
            _ => inbound.from_sub_agent(target.as_str()),
        };
        inbound.a2a_task_id = a2a_task_id.clone();
        self.persist(&inbound).await?;

        info!(
            conversation_id = %scope.conversation.conversation_id,
            delegation_id = %delegation_id,
            target_id = %target,
            "Delegation returned"
        );
        self.factory.event_bus.publish(DomainEvent::DelegationReturned {
            conversation_id: scope.conversation.conversation_id.clone(),
            delegation_id: delegation_id.clone(),
            target_id: target,
            response_length: reply.len(),
            returned_at: Utc::now(),
        });

        Ok(json!({
            "delegationId": delegation_id,
            "taskId": a2a_task_id,
            "response": reply,
        }))
    }
}

fn variant_name(target: &RelationTarget) -> &'static str {
    match target {
        RelationTarget::Internal { .. } => "internal",
        RelationTarget::External { .. } => "external",
        RelationTarget::Team { .. } => "team",
    }
}
