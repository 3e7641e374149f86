// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection Manager
//!
//! Owns tool-server sessions for the running process.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Build the server config of a tool binding, hand out cached
//!   sessions, and wrap exposed tools as [`AgentTool`]s
//! - **Collaborators:** [`McpConnector`], [`CredentialStore`],
//!   [`CredentialStuffer`], [`RuntimeRegistry`]
//!
//! # Credentials and headers
//!
//! Credentials resolve in order: the current user's credential for a
//! user-scoped tool, then the tool's explicit credential reference, then none.
//! Header layers are merged with later layers winning, compared
//! case-insensitively:
//!
//! 1. credential headers
//! 2. tool headers
//! 3. relation (binding) headers
//! 4. forwarded request headers
//!
//! # Sessions
//!
//! Sessions are cached per [`SessionKey`]. The key fingerprints the final
//! merged headers, so templated values such as `{{conversationId}}` or
//! `{{userId}}` never leak into another caller's session. A cached session is
//! probed before
//! reuse and replaced if dead. At most one connection attempt per key is in
//! flight; concurrent callers share it, and a failed attempt is not cached,
//! so the next caller tries again. Failures are classified and returned, never
//! retried here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::tool_resolver::ResolvedToolBinding;
use crate::domain::credentials::{CredentialStore, CredentialStuffer, StuffingContext};
use crate::domain::events::DomainEvent;
use crate::domain::generation::{AgentTool, ToolCallContext, ToolInvocationError};
use crate::domain::mcp::{ConnectionError, McpConnector, McpError, McpServerConfig, McpSession, McpToolInfo, ToolOverride};
use crate::domain::project::{CredentialReference, CredentialScope, ProjectGraph, ToolDefinition};
use crate::domain::task::TaskExecutionContext;
use crate::infrastructure::argument_transform::{ArgumentTransform, JsonPointerTransform};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::header_templates::{HeaderContext, HeaderTemplateEngine};
use crate::infrastructure::registry::{RuntimeRegistry, SessionKey};
use crate::infrastructure::single_flight::FlightRole;

/// Everything needed to (re)open the session of one tool binding.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedConnection {
    pub key: SessionKey,
    pub config: McpServerConfig,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to close session for tool '{tool_id}': {source}")]
pub struct SessionCloseError {
    pub tool_id: String,
    #[source]
    pub source: McpError,
}

#[derive(Clone)]
pub struct ConnectionManager {
    registry: RuntimeRegistry,
    connector: Arc<dyn McpConnector>,
    credential_store: Arc<dyn CredentialStore>,
    credential_stuffer: Arc<dyn CredentialStuffer>,
    templates: Arc<HeaderTemplateEngine>,
    event_bus: EventBus,
}

impl ConnectionManager {
    pub fn new(
        registry: RuntimeRegistry,
        connector: Arc<dyn McpConnector>,
        credential_store: Arc<dyn CredentialStore>,
        credential_stuffer: Arc<dyn CredentialStuffer>,
        templates: Arc<HeaderTemplateEngine>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            connector,
            credential_store,
            credential_stuffer,
            templates,
            event_bus,
        }
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    /// Resolves credentials and headers for a binding and derives its cache key.
    pub async fn prepare(
        &self,
        ctx: &TaskExecutionContext,
        graph: &ProjectGraph,
        resolved: &ResolvedToolBinding,
        header_context: &HeaderContext,
    ) -> Result<PreparedConnection, ConnectionError> {
        let tool = &resolved.tool;
        let credential = self.resolve_credential(ctx, graph, tool).await?;

        let mut headers: HashMap<String, String> = HashMap::new();
        if let Some(reference) = &credential {
            let stuffing = StuffingContext {
                tenant_id: ctx.tenant_id().to_string(),
                project_id: ctx.project_id().to_string(),
                user_id: ctx.user_id.clone(),
            };
            let credential_headers = self
                .credential_stuffer
                .build_headers(reference, &stuffing)
                .await
                .map_err(|e| ConnectionError::Failed {
                    tool_id: tool.id.clone(),
                    message: format!("credential headers: {}", e),
                })?;
            merge_headers(&mut headers, credential_headers);
        }
        merge_headers(&mut headers, self.templates.render_headers(&tool.headers, header_context));
        merge_headers(
            &mut headers,
            self.templates.render_headers(&resolved.binding.headers, header_context),
        );
        merge_headers(&mut headers, ctx.forwarded_headers.clone());

        let credential_id = credential.map(|c| c.id);
        let key = SessionKey::new(
            ctx.tenant_id(),
            ctx.project_id(),
            tool.id.clone(),
            credential_id.clone(),
            &headers,
        );

        Ok(PreparedConnection {
            key,
            config: McpServerConfig {
                tool_id: tool.id.clone(),
                server_url: tool.server_url.clone(),
                transport: tool.transport,
                headers,
                credential_reference_id: credential_id,
            },
        })
    }

    async fn resolve_credential(
        &self,
        ctx: &TaskExecutionContext,
        graph: &ProjectGraph,
        tool: &ToolDefinition,
    ) -> Result<Option<CredentialReference>, ConnectionError> {
        if tool.credential_scope == CredentialScope::User {
            if let Some(user_id) = ctx.user_id.as_deref() {
                let found = self
                    .credential_store
                    .find_user_credential(ctx.tenant_id(), ctx.project_id(), &tool.id, user_id)
                    .await
                    .map_err(|e| ConnectionError::Failed {
                        tool_id: tool.id.clone(),
                        message: format!("credential lookup: {}", e),
                    })?;
                if let Some(reference) = found {
                    debug!(tool_id = %tool.id, credential_id = %reference.id, "Using user-scoped credential");
                    return Ok(Some(reference));
                }
            }
        }

        if let Some(reference_id) = &tool.credential_reference_id {
            match graph.credential_reference(reference_id) {
                Some(reference) => return Ok(Some(reference.clone())),
                None => warn!(
                    tool_id = %tool.id,
                    credential_reference_id = %reference_id,
                    "Credential reference not in project graph, connecting without credentials"
                ),
            }
        }

        Ok(None)
    }

    /// Returns a live session for `prepared`, connecting if needed.
    pub async fn acquire(&self, prepared: &PreparedConnection) -> Result<Arc<dyn McpSession>, ConnectionError> {
        if let Some(session) = self.registry.cached_session(&prepared.key) {
            if session.is_alive().await {
                return Ok(session);
            }
            if let Err(e) = self.evict(&prepared.key, &session, "health check failed").await {
                debug!(tool_id = %prepared.key.tool_id, error = %e, "Closing dead session failed");
            }
        }

        let registry = self.registry.clone();
        let connector = Arc::clone(&self.connector);
        let key = prepared.key.clone();
        let config = prepared.config.clone();

        let (result, role) = self
            .registry
            .connections()
            .run_with_role(prepared.key.clone(), move || async move {
                // A caller that finished just before this flight started may have stored a session.
                if let Some(session) = registry.cached_session(&key) {
                    return Ok(session);
                }
                match connector.connect(&config).await {
                    Ok(session) => {
                        registry.store_session(key, Arc::clone(&session));
                        Ok(session)
                    }
                    Err(e) => Err(ConnectionError::classify(&config.tool_id, &e)),
                }
            })
            .await;

        match (&result, role) {
            (Ok(_), FlightRole::Owner) => {
                info!(tool_id = %prepared.config.tool_id, server_url = %prepared.config.server_url, "Connected to tool server");
                self.event_bus.publish(DomainEvent::ToolServerConnected {
                    tool_id: prepared.config.tool_id.clone(),
                    server_url: prepared.config.server_url.clone(),
                    connected_at: Utc::now(),
                });
            }
            (Err(e), _) => {
                warn!(tool_id = %prepared.config.tool_id, kind = e.kind(), error = %e, "Tool server connection failed");
            }
            _ => {}
        }

        result
    }

    pub async fn list_tools(&self, prepared: &PreparedConnection) -> Result<Vec<McpToolInfo>, ConnectionError> {
        let session = self.acquire(prepared).await?;
        session
            .list_tools()
            .await
            .map_err(|e| ConnectionError::classify(&prepared.config.tool_id, &e))
    }

    /// Wraps each effective tool of a binding, applying its override.
    pub fn agent_tools(
        &self,
        prepared: &PreparedConnection,
        effective: Vec<McpToolInfo>,
        overrides: &HashMap<String, ToolOverride>,
    ) -> Vec<Arc<dyn AgentTool>> {
        effective
            .into_iter()
            .map(|info| {
                let tool = McpAgentTool::new(self.clone(), prepared.clone(), info, overrides);
                Arc::new(tool) as Arc<dyn AgentTool>
            })
            .collect()
    }

    /// Evicts and closes every session among `keys` that no longer answers
    /// its health check. Close failures are collected, not raised.
    pub async fn sweep(&self, keys: &[SessionKey]) -> Vec<SessionCloseError> {
        let mut errors = Vec::new();
        for key in keys {
            let Some(session) = self.registry.cached_session(key) else {
                continue;
            };
            if session.is_alive().await {
                continue;
            }
            if let Err(e) = self.evict(key, &session, "dead after task").await {
                errors.push(e);
            }
        }
        errors
    }

    /// Closes every cached session. Returns how many closed cleanly.
    pub async fn shutdown(&self) -> usize {
        let mut closed = 0;
        for (key, session) in self.registry.drain_sessions() {
            match session.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!(tool_id = %key.tool_id, error = %e, "Failed to close session on shutdown"),
            }
        }
        info!(closed, "Connection manager shut down");
        closed
    }

    async fn evict(&self, key: &SessionKey, session: &Arc<dyn McpSession>, reason: &str) -> Result<(), SessionCloseError> {
        if !self.registry.evict_session(key, session) {
            return Ok(());
        }
        info!(tool_id = %key.tool_id, reason = %reason, "Evicted tool server session");
        self.event_bus.publish(DomainEvent::ToolServerEvicted {
            tool_id: key.tool_id.clone(),
            reason: reason.to_string(),
            evicted_at: Utc::now(),
        });
        session.close().await.map_err(|source| SessionCloseError {
            tool_id: key.tool_id.clone(),
            source,
        })
    }
}

fn merge_headers(target: &mut HashMap<String, String>, layer: HashMap<String, String>) {
    for (name, value) in layer {
        target.insert(name.to_ascii_lowercase(), value);
    }
}

/// A tool exposed by an MCP server, as the generation engine sees it.
pub struct McpAgentTool {
    manager: ConnectionManager,
    connection: PreparedConnection,
    server_tool_name: String,
    name: String,
    description: String,
    input_schema: Value,
    transform: Option<JsonPointerTransform>,
}

impl McpAgentTool {
    pub fn new(
        manager: ConnectionManager,
        connection: PreparedConnection,
        info: McpToolInfo,
        overrides: &HashMap<String, ToolOverride>,
    ) -> Self {
        let tool_id = connection.config.tool_id.clone();
        let over = overrides.get(&info.name);

        let name = over
            .and_then(|o| o.display_name.clone())
            .unwrap_or_else(|| info.name.clone());
        let description = over
            .and_then(|o| o.description.clone())
            .or_else(|| info.description.clone())
            .unwrap_or_default();

        let input_schema = match over.and_then(|o| o.schema.as_ref()) {
            Some(schema) if schema.is_object() && jsonschema::validator_for(schema).is_ok() => schema.clone(),
            Some(_) => {
                warn!(tool_id = %tool_id, tool = %info.name, "Override schema is not a valid JSON Schema, keeping original");
                info.input_schema.clone()
            }
            None => info.input_schema.clone(),
        };

        let transform = over
            .and_then(|o| o.transformation.as_ref())
            .and_then(|mappings| match JsonPointerTransform::new(mappings) {
                Ok(transform) => Some(transform),
                Err(e) => {
                    warn!(tool_id = %tool_id, tool = %info.name, error = %e, "Ignoring invalid argument transform");
                    None
                }
            });

        Self {
            manager,
            connection,
            server_tool_name: info.name,
            name,
            description,
            input_schema,
            transform,
        }
    }

    pub fn server_tool_name(&self) -> &str {
        &self.server_tool_name
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.connection.key
    }

    fn transform_args(&self, args: Value) -> Value {
        let Some(transform) = &self.transform else {
            return args;
        };
        match transform.apply(&args) {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(tool = %self.name, error = %e, "Argument transform failed, sending original arguments");
                args
            }
        }
    }
}

#[async_trait]
impl AgentTool for McpAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn invoke(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolInvocationError> {
        let args = self.transform_args(args);
        let session = self
            .manager
            .acquire(&self.connection)
            .await
            .map_err(|e| ToolInvocationError::ToolServer(e.to_string()))?;

        debug!(
            tool = %self.server_tool_name,
            tool_call_id = %ctx.tool_call_id,
            conversation_id = %ctx.conversation_id,
            "Calling MCP tool"
        );
        session
            .call_tool(&self.server_tool_name, args)
            .await
            .map_err(|e| ToolInvocationError::ToolServer(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::CredentialError;
    use crate::domain::project::{CanUseBinding, ProjectRef};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct EchoSession {
        alive: AtomicBool,
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl McpSession for EchoSession {
        async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
            Ok(vec![McpToolInfo {
                name: "lookup".to_string(),
                description: Some("Find an order".to_string()),
                input_schema: json!({ "type": "object" }),
            }])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
            self.calls.lock().push((name.to_string(), arguments.clone()));
            Ok(arguments)
        }

        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<(), McpError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        connects: AtomicUsize,
        configs: Mutex<Vec<McpServerConfig>>,
        sessions: Mutex<Vec<Arc<EchoSession>>>,
    }

    #[async_trait]
    impl McpConnector for RecordingConnector {
        async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.configs.lock().push(config.clone());
            let session = Arc::new(EchoSession {
                alive: AtomicBool::new(true),
                calls: Mutex::new(Vec::new()),
            });
            self.sessions.lock().push(Arc::clone(&session));
            Ok(session)
        }
    }

    struct UserStore;

    #[async_trait]
    impl CredentialStore for UserStore {
        async fn find_user_credential(
            &self,
            _tenant_id: &str,
            _project_id: &str,
            _tool_id: &str,
            user_id: &str,
        ) -> Result<Option<CredentialReference>, CredentialError> {
            Ok((user_id == "alice").then(|| CredentialReference {
                id: "cred-alice".to_string(),
                credential_store_id: "vault".to_string(),
                retrieval_params: Value::Null,
                user_id: Some("alice".to_string()),
            }))
        }
    }

    struct BearerStuffer;

    #[async_trait]
    impl CredentialStuffer for BearerStuffer {
        async fn build_headers(
            &self,
            reference: &CredentialReference,
            _context: &StuffingContext,
        ) -> Result<HashMap<String, String>, CredentialError> {
            Ok(HashMap::from([
                ("Authorization".to_string(), format!("Bearer {}", reference.id)),
                ("x-cred".to_string(), reference.id.clone()),
            ]))
        }
    }

    fn graph() -> ProjectGraph {
        ProjectGraph::from_json_str(
            r#"{
                "tenantId": "acme",
                "projectId": "support",
                "credentialReferences": {
                    "cred-project": { "id": "cred-project", "credentialStoreId": "vault" }
                },
                "tools": {
                    "orders": {
                        "id": "orders",
                        "name": "Orders",
                        "serverUrl": "http://orders/mcp",
                        "credentialReferenceId": "cred-project",
                        "credentialScope": "user",
                        "headers": { "x-conversation": "{{conversationId}}", "x-cred": "static" }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    fn binding(graph: &ProjectGraph) -> ResolvedToolBinding {
        ResolvedToolBinding {
            binding: CanUseBinding {
                tool_id: "orders".to_string(),
                tool_selection: None,
                headers: HashMap::from([("x-relation".to_string(), "rel".to_string())]),
                agent_tool_relation_id: None,
            },
            tool: graph.tools["orders"].clone(),
        }
    }

    fn ctx(user: Option<&str>) -> TaskExecutionContext {
        let mut ctx = TaskExecutionContext::new(
            ProjectRef {
                tenant_id: "acme".to_string(),
                project_id: "support".to_string(),
                ref_name: "main".to_string(),
            },
            "desk",
            "router",
        );
        ctx.user_id = user.map(str::to_string);
        ctx.forwarded_headers = HashMap::from([("authorization".to_string(), "Bearer forwarded".to_string())]);
        ctx
    }

    fn header_context() -> HeaderContext {
        HeaderContext {
            conversation_id: "conv-1".to_string(),
            ..HeaderContext::default()
        }
    }

    fn manager(connector: Arc<RecordingConnector>) -> ConnectionManager {
        ConnectionManager::new(
            RuntimeRegistry::new(),
            connector,
            Arc::new(UserStore),
            Arc::new(BearerStuffer),
            Arc::new(HeaderTemplateEngine::new()),
            EventBus::new(16),
        )
    }

    #[tokio::test]
    async fn test_user_credential_then_reference_then_forwarded_wins() {
        let graph = graph();
        let manager = manager(Arc::new(RecordingConnector::default()));

        let alice = manager.prepare(&ctx(Some("alice")), &graph, &binding(&graph), &header_context()).await.unwrap();
        assert_eq!(alice.key.credential_id.as_deref(), Some("cred-alice"));
        let headers = &alice.config.headers;
        assert_eq!(headers["authorization"], "Bearer forwarded");
        assert_eq!(headers["x-cred"], "static");
        assert_eq!(headers["x-conversation"], "conv-1");
        assert_eq!(headers["x-relation"], "rel");

        let bob = manager.prepare(&ctx(Some("bob")), &graph, &binding(&graph), &header_context()).await.unwrap();
        assert_eq!(bob.key.credential_id.as_deref(), Some("cred-project"));
        assert_ne!(alice.key, bob.key);
    }

    #[tokio::test]
    async fn test_templated_headers_partition_sessions() {
        let graph = graph();
        let connector = Arc::new(RecordingConnector::default());
        let manager = manager(Arc::clone(&connector));
        let second_conversation = HeaderContext {
            conversation_id: "conv-2".to_string(),
            ..HeaderContext::default()
        };

        let one = manager.prepare(&ctx(None), &graph, &binding(&graph), &header_context()).await.unwrap();
        let two = manager.prepare(&ctx(None), &graph, &binding(&graph), &second_conversation).await.unwrap();
        assert_ne!(one.key, two.key);

        manager.acquire(&one).await.unwrap();
        manager.acquire(&two).await.unwrap();
        manager.acquire(&one).await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        let sent: Vec<_> = connector
            .configs
            .lock()
            .iter()
            .map(|c| c.headers["x-conversation"].clone())
            .collect();
        assert_eq!(sent, vec!["conv-1", "conv-2"]);
    }

    #[tokio::test]
    async fn test_dead_session_is_evicted_and_reconnected() {
        let graph = graph();
        let connector = Arc::new(RecordingConnector::default());
        let manager = manager(Arc::clone(&connector));
        let prepared = manager.prepare(&ctx(None), &graph, &binding(&graph), &header_context()).await.unwrap();

        let first = manager.acquire(&prepared).await.unwrap();
        let again = manager.acquire(&prepared).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        connector.sessions.lock()[0].alive.store(false, Ordering::SeqCst);
        let fresh = manager.acquire(&prepared).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.registry().session_count(), 1);
    }

    #[tokio::test]
    async fn test_overrides_are_best_effort() {
        let graph = graph();
        let connector = Arc::new(RecordingConnector::default());
        let manager = manager(Arc::clone(&connector));
        let prepared = manager.prepare(&ctx(None), &graph, &binding(&graph), &header_context()).await.unwrap();
        let exposed = manager.list_tools(&prepared).await.unwrap();

        let overrides = HashMap::from([(
            "lookup".to_string(),
            ToolOverride {
                display_name: Some("find_order".to_string()),
                description: None,
                schema: Some(json!({ "type": 12 })),
                transformation: Some(HashMap::from([("/order_id".to_string(), "/id".to_string())])),
            },
        )]);
        let tools = manager.agent_tools(&prepared, exposed, &overrides);
        let tool = &tools[0];
        assert_eq!(tool.name(), "find_order");
        assert_eq!(tool.description(), "Find an order");
        assert_eq!(tool.input_schema(), json!({ "type": "object" }));

        let call = ToolCallContext::default();
        assert_eq!(tool.invoke(json!({ "id": 7 }), &call).await.unwrap(), json!({ "order_id": 7 }));
        // Missing source: original arguments go through.
        assert_eq!(tool.invoke(json!({ "other": 1 }), &call).await.unwrap(), json!({ "other": 1 }));

        let calls = connector.sessions.lock()[0].calls.lock().clone();
        assert!(calls.iter().all(|(name, _)| name == "lookup"));
    }

    #[tokio::test]
    async fn test_sweep_and_shutdown() {
        let graph = graph();
        let connector = Arc::new(RecordingConnector::default());
        let manager = manager(Arc::clone(&connector));
        let prepared = manager.prepare(&ctx(None), &graph, &binding(&graph), &header_context()).await.unwrap();
        manager.acquire(&prepared).await.unwrap();

        assert!(manager.sweep(&[prepared.key.clone()]).await.is_empty());
        assert_eq!(manager.registry().session_count(), 1);

        connector.sessions.lock()[0].alive.store(false, Ordering::SeqCst);
        assert!(manager.sweep(&[prepared.key.clone()]).await.is_empty());
        assert_eq!(manager.registry().session_count(), 0);

        manager.acquire(&prepared).await.unwrap();
        assert_eq!(manager.shutdown().await, 1);
        assert_eq!(manager.registry().session_count(), 0);
    }
}
