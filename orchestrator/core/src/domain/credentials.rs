// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential store and header stuffing.
//!
//! The core never sees raw secrets outside of the headers a [`CredentialStuffer`]
//! returns; it only moves [`CredentialReference`]s around.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::project::CredentialReference;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential store error: {0}")]
    Store(String),
}

/// Who the headers are being built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuffingContext {
    pub tenant_id: String,
    pub project_id: String,
    pub user_id: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credential a specific end user connected for a user-scoped tool.
    async fn find_user_credential(
        &self,
        tenant_id: &str,
        project_id: &str,
        tool_id: &str,
        user_id: &str,
    ) -> Result<Option<CredentialReference>, CredentialError>;
}

#[async_trait]
pub trait CredentialStuffer: Send + Sync {
    /// Turns a reference into the request headers carrying its secret.
    async fn build_headers(
        &self,
        reference: &CredentialReference,
        context: &StuffingContext,
    ) -> Result<HashMap<String, String>, CredentialError>;
}
