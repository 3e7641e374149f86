// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Runtime Registry
//!
//! The per-process shared state of the core, constructed once and injected:
//!
//! - `compressions`: in-flight history compressions, keyed by conversation
//! - `connections`: in-flight tool-server connection attempts, keyed by [`SessionKey`]
//! - `sessions`: live tool-server sessions, keyed by [`SessionKey`]
//!
//! These are best-effort, single-process mechanisms. Two processes serving the
//! same conversation may each compress once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::domain::conversation::ConversationMessage;
use crate::domain::mcp::{ConnectionError, McpSession};
use crate::infrastructure::single_flight::SingleFlight;

/// Cache key of one tool-server session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub tenant_id: String,
    pub project_id: String,
    pub tool_id: String,
    pub credential_id: Option<String>,
    pub header_fingerprint: String,
}

impl SessionKey {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        tool_id: impl Into<String>,
        credential_id: Option<String>,
        headers: &HashMap<String, String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            tool_id: tool_id.into(),
            credential_id,
            header_fingerprint: header_fingerprint(headers),
        }
    }
}

/// Order-independent digest of the headers a session is opened with. Names are compared
/// case-insensitively; values are hashed, never stored.
pub fn header_fingerprint(headers: &HashMap<String, String>) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let sorted: BTreeMap<String, &str> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect();
    let mut hasher = Sha256::new();
    for (name, value) in sorted {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

pub type SessionResult = Result<Arc<dyn McpSession>, ConnectionError>;

#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    compressions: SingleFlight<String, Vec<ConversationMessage>>,
    connections: SingleFlight<SessionKey, SessionResult>,
    sessions: Arc<DashMap<SessionKey, Arc<dyn McpSession>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compressions(&self) -> &SingleFlight<String, Vec<ConversationMessage>> {
        &self.compressions
    }

    pub fn connections(&self) -> &SingleFlight<SessionKey, SessionResult> {
        &self.connections
    }

    pub fn cached_session(&self, key: &SessionKey) -> Option<Arc<dyn McpSession>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn store_session(&self, key: SessionKey, session: Arc<dyn McpSession>) {
        self.sessions.insert(key, session);
    }

    /// Removes the entry only if it still holds `session`, so a reconnect that
    /// raced ahead is not thrown away.
    pub fn evict_session(&self, key: &SessionKey, session: &Arc<dyn McpSession>) -> bool {
        self.sessions
            .remove_if(key, |_, cached| Arc::ptr_eq(cached, session))
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Empties the session cache and hands back what it held.
    pub fn drain_sessions(&self) -> Vec<(SessionKey, Arc<dyn McpSession>)> {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.sessions.remove(&key))
            .collect()
    }
}
