// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{exec_context, project_graph, tool_info, BearerStuffer, MockConnector, NoUserCredentials};
use handoff_core::application::{ConnectionManager, PreparedConnection, RunningAgent, ToolResolver};
use handoff_core::domain::events::DomainEvent;
use handoff_core::domain::mcp::McpError;
use handoff_core::infrastructure::event_bus::EventBus;
use handoff_core::infrastructure::header_templates::{HeaderContext, HeaderTemplateEngine};
use handoff_core::infrastructure::registry::RuntimeRegistry;

struct Fixture {
    manager: ConnectionManager,
    connector: Arc<MockConnector>,
    event_bus: EventBus,
}

fn fixture() -> Fixture {
    let connector = Arc::new(MockConnector::new(vec![tool_info("lookup_order")]));
    let event_bus = EventBus::new(64);
    let manager = ConnectionManager::new(
        RuntimeRegistry::new(),
        connector.clone(),
        Arc::new(NoUserCredentials),
        Arc::new(BearerStuffer),
        Arc::new(HeaderTemplateEngine::new()),
        event_bus.clone(),
    );
    Fixture {
        manager,
        connector,
        event_bus,
    }
}

async fn prepared(manager: &ConnectionManager, forwarded: &[(&str, &str)]) -> PreparedConnection {
    let graph = project_graph();
    let mut ctx = exec_context("router");
    ctx.forwarded_headers = forwarded
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let router = graph.sub_agent("desk", "router").unwrap();
    let resolved = ToolResolver::new(EventBus::new(8))
        .resolve(&graph, "desk", router)
        .unwrap();
    let header_context = HeaderContext {
        conversation_id: "conv-1".to_string(),
        tenant_id: "acme".to_string(),
        project_id: "support".to_string(),
        sub_agent_id: "router".to_string(),
        headers: ctx.forwarded_headers.clone(),
        ..HeaderContext::default()
    };
    manager
        .prepare(&ctx, &graph, &resolved[0], &header_context)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_acquires_share_one_connect() {
    let f = fixture();
    let mut events = f.event_bus.subscribe();
    let prepared = prepared(&f.manager, &[]).await;

    let (a, b) = tokio::join!(f.manager.acquire(&prepared), f.manager.acquire(&prepared));

    assert_eq!(f.connector.connect_count(), 1);
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(f.manager.registry().session_count(), 1);
    let connected = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, DomainEvent::ToolServerConnected { .. }))
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let f = fixture();
    let prepared = prepared(&f.manager, &[]).await;
    f.connector
        .fail_next(McpError::ConnectionRefused("connect ECONNREFUSED 10.0.0.5:443".into()));

    let (a, b) = tokio::join!(f.manager.acquire(&prepared), f.manager.acquire(&prepared));
    let err = a.err().unwrap();
    assert_eq!(err.kind(), "connection_refused");
    assert_eq!(err.tool_id(), "orders");
    assert_eq!(b.err().unwrap().kind(), "connection_refused");
    assert_eq!(f.connector.connect_count(), 1);
    assert_eq!(f.manager.registry().session_count(), 0);

    // The next caller starts a fresh attempt.
    f.manager.acquire(&prepared).await.unwrap();
    assert_eq!(f.connector.connect_count(), 2);
}

#[tokio::test]
async fn test_not_found_is_classified() {
    let f = fixture();
    let prepared = prepared(&f.manager, &[]).await;
    f.connector.fail_next(McpError::Transport("HTTP 404 Not Found".into()));

    let err = f.manager.acquire(&prepared).await.err().unwrap();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_forwarded_headers_partition_sessions() {
    let f = fixture();
    let alice = prepared(&f.manager, &[("x-user", "alice")]).await;
    let bob = prepared(&f.manager, &[("x-user", "bob")]).await;
    assert_ne!(alice.key, bob.key);

    f.manager.acquire(&alice).await.unwrap();
    f.manager.acquire(&bob).await.unwrap();
    f.manager.acquire(&alice).await.unwrap();

    assert_eq!(f.connector.connect_count(), 2);
}

#[tokio::test]
async fn test_dead_session_is_replaced() {
    let f = fixture();
    let mut events = f.event_bus.subscribe();
    let prepared = prepared(&f.manager, &[]).await;

    f.manager.acquire(&prepared).await.unwrap();
    f.connector.session(0).alive.store(false, Ordering::SeqCst);
    f.manager.acquire(&prepared).await.unwrap();

    assert_eq!(f.connector.connect_count(), 2);
    assert_eq!(f.connector.session(0).closes.load(Ordering::SeqCst), 1);
    assert!(events
        .drain()
        .iter()
        .any(|e| matches!(e, DomainEvent::ToolServerEvicted { tool_id, .. } if tool_id == "orders")));
}

#[tokio::test]
async fn test_shutdown_closes_cached_sessions() {
    let f = fixture();
    let prepared = prepared(&f.manager, &[]).await;
    f.manager.list_tools(&prepared).await.unwrap();

    assert_eq!(f.manager.shutdown().await, 1);
    assert_eq!(f.manager.registry().session_count(), 0);
    assert_eq!(f.connector.session(0).closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_running_agent_cleanup_sweeps_dead_sessions_once() {
    let f = fixture();
    let prepared = prepared(&f.manager, &[]).await;
    let running = RunningAgent::new("t-1", "router");
    running.mark_delegation(true, Some("d-1".to_string()));
    running.track_session(prepared.key.clone());
    running.track_session(prepared.key.clone());

    f.manager.acquire(&prepared).await.unwrap();
    f.connector.session(0).alive.store(false, Ordering::SeqCst);

    running.cleanup(&f.manager).await.unwrap();
    running.cleanup(&f.manager).await.unwrap();

    assert!(running.is_cleaned_up());
    assert!(!running.delegation().is_delegated);
    assert_eq!(running.delegation().delegation_id, None);
    assert_eq!(f.connector.session(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(f.manager.registry().session_count(), 0);
}

#[tokio::test]
async fn test_cleanup_keeps_live_sessions() {
    let f = fixture();
    let prepared = prepared(&f.manager, &[]).await;
    let running = RunningAgent::new("t-1", "router");
    running.track_session(prepared.key.clone());
    f.manager.acquire(&prepared).await.unwrap();

    running.cleanup(&f.manager).await.unwrap();

    assert_eq!(f.manager.registry().session_count(), 1);
    assert_eq!(f.connector.session(0).closes.load(Ordering::SeqCst), 0);
}
