// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use handoff_core::application::{
    ConnectionManager, DelegationToolFactory, HistoryManager, RelationExtractor, TaskHandler, TaskHandlerServices,
    ToolResolver,
};
use handoff_core::domain::a2a::{A2aHttpResponse, A2aTransport, A2aTransportError, JsonRpcRequest};
use handoff_core::domain::conversation::{
    CompressionSummary, ConversationMessage, ConversationScope, ConversationSummarizer, SummarizerError,
    SummaryOutcome,
};
use handoff_core::domain::credentials::{CredentialError, CredentialStore, CredentialStuffer, StuffingContext};
use handoff_core::domain::generation::{
    GenerationEngine, GenerationError, GenerationRequest, GenerationResponse, GenerationStep, ToolCall,
    ToolCallContext, ToolResult,
};
use handoff_core::domain::mcp::{McpConnector, McpError, McpServerConfig, McpSession, McpToolInfo};
use handoff_core::domain::project::{CredentialReference, ProjectGraph, ProjectRef};
use handoff_core::domain::runtime_config::{HistoryConfig, TaskConfig};
use handoff_core::domain::task::TaskExecutionContext;
use handoff_core::domain::tokens::{ServiceTokenClaims, ServiceTokenIssuer, TokenError};
use handoff_core::infrastructure::a2a_client::A2aClient;
use handoff_core::infrastructure::event_bus::EventBus;
use handoff_core::infrastructure::header_templates::HeaderTemplateEngine;
use handoff_core::infrastructure::registry::RuntimeRegistry;
use handoff_core::infrastructure::repositories::{
    InMemoryArtifactRepository, InMemoryConversationRepository, InMemoryProjectGraphProvider,
};
use handoff_core::infrastructure::retry::RetryPolicy;

pub const TENANT: &str = "acme";
pub const PROJECT: &str = "support";

pub fn project_ref() -> ProjectRef {
    ProjectRef {
        tenant_id: TENANT.to_string(),
        project_id: PROJECT.to_string(),
        ref_name: "main".to_string(),
    }
}

pub fn exec_context(sub_agent_id: &str) -> TaskExecutionContext {
    let mut ctx = TaskExecutionContext::new(project_ref(), "desk", sub_agent_id);
    ctx.api_key = Some("caller-key".to_string());
    ctx
}

/// desk/router can transfer to refund-agent, delegate to billing, and use `orders`.
pub fn project_graph() -> ProjectGraph {
    ProjectGraph::from_json_str(
        r#"{
            "tenantId": "acme",
            "projectId": "support",
            "tools": {
                "orders": { "id": "orders", "name": "Orders", "serverUrl": "http://orders.local/mcp" }
            },
            "agents": {
                "desk": {
                    "id": "desk",
                    "name": "Help Desk",
                    "defaultSubAgentId": "router",
                    "subAgents": {
                        "router": {
                            "id": "router",
                            "name": "Router",
                            "prompt": "Route customer requests.",
                            "canTransferTo": [ { "subAgentId": "refund-agent" } ],
                            "canDelegateTo": [ { "subAgentId": "billing" } ],
                            "canUse": [ { "toolId": "orders" } ]
                        },
                        "refund-agent": { "id": "refund-agent", "name": "Refunds", "prompt": "Issue refunds." },
                        "billing": { "id": "billing", "name": "Billing", "prompt": "Answer billing questions." },
                        "lonely": {
                            "id": "lonely",
                            "name": "Lonely",
                            "canUse": [ { "toolId": "nowhere" } ]
                        }
                    }
                }
            }
        }"#,
    )
    .expect("fixture graph parses")
}

pub fn tool_info(name: &str) -> McpToolInfo {
    McpToolInfo {
        name: name.to_string(),
        description: Some(format!("{} tool", name)),
        input_schema: json!({ "type": "object" }),
    }
}

pub struct MockSession {
    pub alive: AtomicBool,
    pub closes: AtomicUsize,
    tools: Vec<McpToolInfo>,
}

impl MockSession {
    pub fn new(tools: Vec<McpToolInfo>) -> Self {
        Self {
            alive: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            tools,
        }
    }
}

#[async_trait]
impl McpSession for MockSession {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        Ok(json!({ "tool": name, "arguments": arguments }))
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts connection attempts; fails with queued errors first.
pub struct MockConnector {
    pub connects: AtomicUsize,
    pub failures: Mutex<VecDeque<McpError>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
    pub delay: Duration,
    tools: Vec<McpToolInfo>,
}

impl MockConnector {
    pub fn new(tools: Vec<McpToolInfo>) -> Self {
        Self {
            connects: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(Vec::new()),
            delay: Duration::from_millis(20),
            tools,
        }
    }

    pub fn fail_next(&self, error: McpError) {
        self.failures.lock().push_back(error);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[index])
    }
}

#[async_trait]
impl McpConnector for MockConnector {
    async fn connect(&self, _config: &McpServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let session = Arc::new(MockSession::new(self.tools.clone()));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

pub struct NoUserCredentials;

#[async_trait]
impl CredentialStore for NoUserCredentials {
    async fn find_user_credential(
        &self,
        _tenant_id: &str,
        _project_id: &str,
        _tool_id: &str,
        _user_id: &str,
    ) -> Result<Option<CredentialReference>, CredentialError> {
        Ok(None)
    }
}

pub struct BearerStuffer;

#[async_trait]
impl CredentialStuffer for BearerStuffer {
    async fn build_headers(
        &self,
        reference: &CredentialReference,
        _context: &StuffingContext,
    ) -> Result<HashMap<String, String>, CredentialError> {
        Ok(HashMap::from([(
            "authorization".to_string(),
            format!("Bearer {}", reference.id),
        )]))
    }
}

pub struct StaticIssuer;

#[async_trait]
impl ServiceTokenIssuer for StaticIssuer {
    async fn issue(&self, claims: &ServiceTokenClaims) -> Result<String, TokenError> {
        Ok(format!("svc-{}-{}", claims.origin_agent_id, claims.target_agent_id))
    }
}

/// Answers every `message/send` with a fixed reply, or a JSON-RPC error.
pub struct ScriptedA2a {
    pub requests: Mutex<Vec<(String, HashMap<String, String>, JsonRpcRequest)>>,
    reply: String,
    rpc_error: Option<(i64, String)>,
}

impl ScriptedA2a {
    pub fn replying(reply: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: reply.to_string(),
            rpc_error: None,
        }
    }

    pub fn failing(code: i64, message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: String::new(),
            rpc_error: Some((code, message.to_string())),
        }
    }
}

#[async_trait]
impl A2aTransport for ScriptedA2a {
    async fn post(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        request: &JsonRpcRequest,
    ) -> Result<A2aHttpResponse, A2aTransportError> {
        self.requests
            .lock()
            .push((url.to_string(), headers.clone(), request.clone()));
        let body = match &self.rpc_error {
            Some((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "error": { "code": code, "message": message }
            }),
            None => json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "result": {
                    "kind": "task",
                    "id": "remote-task-1",
                    "artifacts": [ { "parts": [ { "kind": "text", "text": self.reply } ] } ]
                }
            }),
        };
        Ok(A2aHttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }
}

/// Summarizer that counts runs and either keeps or summarizes.
pub struct CountingSummarizer {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Vec<String>>>,
    summarize: bool,
    fail: bool,
    delay: Duration,
}

impl CountingSummarizer {
    pub fn within_budget() -> Self {
        Self::build(false, false)
    }

    pub fn summarizing() -> Self {
        Self::build(true, false)
    }

    pub fn failing() -> Self {
        Self::build(false, true)
    }

    fn build(summarize: bool, fail: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            summarize,
            fail,
            delay: Duration::from_millis(20),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationSummarizer for CountingSummarizer {
    async fn summarize(
        &self,
        _scope: &ConversationScope,
        messages: &[ConversationMessage],
    ) -> Result<SummaryOutcome, SummarizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .push(messages.iter().map(|m| m.text().to_string()).collect());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(SummarizerError::Failed("model unavailable".to_string()));
        }
        if !self.summarize {
            return Ok(SummaryOutcome::WithinBudget);
        }
        Ok(SummaryOutcome::Summarized(CompressionSummary {
            summary: json!({ "topics": ["refund"], "messageCount": messages.len() }),
            text: format!("Summary of {} messages", messages.len()),
            artifact_ids: vec!["art-1".to_string()],
        }))
    }
}

/// One scripted tool call the engine makes before answering.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub tool_name: String,
    pub args: Value,
    /// Recorded instead of invoking the tool.
    pub fake_result: Option<Value>,
}

/// Engine that invokes scripted tools, records what it was given, and
/// answers with fixed text.
pub struct ScriptedEngine {
    pub requests: Mutex<Vec<EngineCall>>,
    calls: Vec<ScriptedCall>,
    text: Option<String>,
    error: Option<String>,
    panic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineCall {
    pub system_prompt: String,
    pub user_message: String,
    pub history: String,
    pub tool_names: Vec<String>,
    pub conversation_id: String,
}

impl ScriptedEngine {
    pub fn answering(text: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            calls: Vec::new(),
            text: Some(text.to_string()),
            error: None,
            panic: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            calls: Vec::new(),
            text: None,
            error: Some(message.to_string()),
            panic: None,
        }
    }

    pub fn panicking(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            calls: Vec::new(),
            text: None,
            error: None,
            panic: Some(message.to_string()),
        }
    }

    pub fn with_call(mut self, tool_name: &str, args: Value) -> Self {
        self.calls.push(ScriptedCall {
            tool_name: tool_name.to_string(),
            args,
            fake_result: None,
        });
        self
    }

    pub fn with_fake_call(mut self, tool_name: &str, result: Value) -> Self {
        self.calls.push(ScriptedCall {
            tool_name: tool_name.to_string(),
            args: json!({}),
            fake_result: Some(result),
        });
        self
    }

    pub fn without_text(mut self) -> Self {
        self.text = None;
        self
    }

    pub fn last_call(&self) -> Option<EngineCall> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        self.requests.lock().push(EngineCall {
            system_prompt: request.system_prompt.clone(),
            user_message: request.user_message.clone(),
            history: request.history.clone(),
            tool_names: request.tools.iter().map(|t| t.name().to_string()).collect(),
            conversation_id: request.conversation_id.clone(),
        });

        if let Some(message) = &self.panic {
            panic!("{}", message);
        }
        if let Some(message) = &self.error {
            return Err(GenerationError::Provider(message.clone()));
        }

        let mut step = GenerationStep {
            reasoning: Some("thinking it through".to_string()),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        };
        for (index, call) in self.calls.iter().enumerate() {
            let tool_call_id = format!("call-{}", index + 1);
            let result = match &call.fake_result {
                Some(result) => result.clone(),
                None => {
                    let tool = request
                        .tools
                        .iter()
                        .find(|t| t.name() == call.tool_name)
                        .ok_or_else(|| GenerationError::Aborted(format!("no tool named {}", call.tool_name)))?;
                    let ctx = ToolCallContext {
                        tool_call_id: tool_call_id.clone(),
                        conversation_id: request.conversation_id.clone(),
                        task_id: request.task_id.clone(),
                    };
                    match tool.invoke(call.args.clone(), &ctx).await {
                        Ok(value) => value,
                        Err(e) => json!({ "error": e.to_string() }),
                    }
                }
            };
            step.tool_calls.push(ToolCall {
                tool_call_id: tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                args: call.args.clone(),
            });
            step.tool_results.push(ToolResult {
                tool_call_id,
                tool_name: call.tool_name.clone(),
                result,
            });
        }

        Ok(GenerationResponse {
            text: self.text.clone(),
            steps: vec![step],
            parts: Vec::new(),
        })
    }
}

/// Fully wired handler over in-memory collaborators.
pub struct Harness {
    pub handler: TaskHandler,
    pub engine: Arc<ScriptedEngine>,
    pub connector: Arc<MockConnector>,
    pub a2a: Arc<ScriptedA2a>,
    pub summarizer: Arc<CountingSummarizer>,
    pub conversations: InMemoryConversationRepository,
    pub artifacts: InMemoryArtifactRepository,
    pub registry: RuntimeRegistry,
    pub event_bus: EventBus,
}

pub struct HarnessBuilder {
    engine: ScriptedEngine,
    a2a: ScriptedA2a,
    summarizer: CountingSummarizer,
    tools: Vec<McpToolInfo>,
}

impl HarnessBuilder {
    pub fn new(engine: ScriptedEngine) -> Self {
        Self {
            engine,
            a2a: ScriptedA2a::replying("Refund issued for order 123"),
            summarizer: CountingSummarizer::within_budget(),
            tools: vec![tool_info("lookup_order")],
        }
    }

    pub fn a2a(mut self, a2a: ScriptedA2a) -> Self {
        self.a2a = a2a;
        self
    }

    pub fn summarizer(mut self, summarizer: CountingSummarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn build(self) -> Harness {
        let event_bus = EventBus::new(256);
        let registry = RuntimeRegistry::new();
        let engine = Arc::new(self.engine);
        let connector = Arc::new(MockConnector::new(self.tools));
        let a2a = Arc::new(self.a2a);
        let summarizer = Arc::new(self.summarizer);
        let conversations = InMemoryConversationRepository::new();
        let artifacts = InMemoryArtifactRepository::new();
        let graphs = InMemoryProjectGraphProvider::new();
        graphs.insert(project_ref(), project_graph());
        let templates = Arc::new(HeaderTemplateEngine::new());

        let connections = ConnectionManager::new(
            registry.clone(),
            connector.clone(),
            Arc::new(NoUserCredentials),
            Arc::new(BearerStuffer),
            Arc::clone(&templates),
            event_bus.clone(),
        );
        let history = Arc::new(HistoryManager::new(
            Arc::new(conversations.clone()),
            Arc::new(artifacts.clone()),
            summarizer.clone(),
            registry.clone(),
            event_bus.clone(),
            HistoryConfig::default(),
        ));
        let delegation_tools = DelegationToolFactory::new(
            Arc::new(conversations.clone()),
            A2aClient::new(a2a.clone(), RetryPolicy::no_retry()),
            Arc::new(BearerStuffer),
            Arc::new(StaticIssuer),
            templates,
            event_bus.clone(),
            "http://agents.local",
        );

        let handler = TaskHandler::new(
            TaskHandlerServices {
                graphs: Arc::new(graphs),
                engine: engine.clone(),
                relation_extractor: RelationExtractor::default(),
                tool_resolver: ToolResolver::new(event_bus.clone()),
                connections,
                history,
                delegation_tools,
                event_bus: event_bus.clone(),
            },
            TaskConfig::default(),
        );

        Harness {
            handler,
            engine,
            connector,
            a2a,
            summarizer,
            conversations,
            artifacts,
            registry,
            event_bus,
        }
    }
}
