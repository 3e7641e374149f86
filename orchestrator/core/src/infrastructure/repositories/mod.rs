// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! In-memory implementations of the repository abstractions defined in the
//! domain layer, for development and testing.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve ledger rows, oversized-artifact records,
//!   and project graph snapshots
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryConversationRepository** - Append-only Vec, insertion ordered
//! - **InMemoryArtifactRepository** - Oversized artifacts per conversation
//! - **InMemoryProjectGraphProvider** - Graph snapshots per project ref

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::conversation::{ConversationMessage, ConversationScope, OversizedArtifact};
use crate::domain::project::{ProjectGraph, ProjectRef};
use crate::domain::repository::{
    ArtifactRepository, ConversationRepository, ProjectGraphProvider, RepositoryError,
};

#[derive(Clone, Default)]
pub struct InMemoryConversationRepository {
    messages: Arc<RwLock<Vec<ConversationMessage>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of every conversation, in append order.
    pub fn all(&self) -> Vec<ConversationMessage> {
        self.messages.read().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

fn in_scope(message: &ConversationMessage, scope: &ConversationScope) -> bool {
    message.tenant_id == scope.tenant_id
        && message.project_id == scope.project_id
        && message.conversation_id == scope.conversation_id
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn append(&self, message: &ConversationMessage) -> Result<(), RepositoryError> {
        self.messages.write().push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        scope: &ConversationScope,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let messages = self.messages.read();
        let mut matching: Vec<ConversationMessage> = messages
            .iter()
            .filter(|m| in_scope(m, scope))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let skip = matching.len().saturating_sub(limit);
            matching.drain(..skip);
        }
        Ok(matching)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryArtifactRepository {
    oversized: Arc<RwLock<HashMap<ConversationScope, Vec<OversizedArtifact>>>>,
}

impl InMemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_oversized(&self, scope: ConversationScope, artifact: OversizedArtifact) {
        self.oversized.write().entry(scope).or_default().push(artifact);
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn list_oversized(&self, scope: &ConversationScope) -> Result<Vec<OversizedArtifact>, RepositoryError> {
        Ok(self.oversized.read().get(scope).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProjectGraphProvider {
    graphs: Arc<RwLock<HashMap<ProjectRef, Arc<ProjectGraph>>>>,
}

impl InMemoryProjectGraphProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: ProjectRef, graph: ProjectGraph) {
        self.graphs.write().insert(project, Arc::new(graph));
    }
}

#[async_trait]
impl ProjectGraphProvider for InMemoryProjectGraphProvider {
    async fn load(&self, project: &ProjectRef) -> Result<Arc<ProjectGraph>, RepositoryError> {
        self.graphs.read().get(project).cloned().ok_or_else(|| {
            RepositoryError::NotFound(format!(
                "project {}/{} at ref '{}'",
                project.tenant_id, project.project_id, project.ref_name
            ))
        })
    }
}
