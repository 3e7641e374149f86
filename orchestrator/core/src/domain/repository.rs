// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts the core reads and writes through. Interfaces live in
//! the domain layer; implementations in `crate::infrastructure::repositories`.
//!
//! | Trait | Data | Implementations |
//! |-------|------|----------------|
//! | `ProjectGraphProvider` | `ProjectGraph` | `InMemoryProjectGraphProvider` |
//! | `ConversationRepository` | `ConversationMessage` | `InMemoryConversationRepository` |
//! | `ArtifactRepository` | `OversizedArtifact` | `InMemoryArtifactRepository` |
//!
//! Hosts plug in their database-backed implementations; in-memory ones are used
//! for development and testing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::conversation::{ConversationMessage, ConversationScope, OversizedArtifact};
use crate::domain::project::{ProjectGraph, ProjectRef};

/// Resolves a ref to an immutable graph snapshot.
#[async_trait]
pub trait ProjectGraphProvider: Send + Sync {
    async fn load(&self, project: &ProjectRef) -> Result<Arc<ProjectGraph>, RepositoryError>;
}

/// Append-only message ledger.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Append one row. Rows are never updated afterwards.
    async fn append(&self, message: &ConversationMessage) -> Result<(), RepositoryError>;

    /// Messages of one conversation, oldest first, internal rows included.
    /// With a `limit`, only the most recent `limit` rows are returned.
    async fn list_messages(
        &self,
        scope: &ConversationScope,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, RepositoryError>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Tool-result artifacts of the conversation flagged as too large to replay.
    async fn list_oversized(&self, scope: &ConversationScope) -> Result<Vec<OversizedArtifact>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
