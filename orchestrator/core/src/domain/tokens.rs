// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service tokens for agent-to-agent calls inside one project.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenClaims {
    pub tenant_id: String,
    pub project_id: String,
    pub origin_agent_id: String,
    pub target_agent_id: String,
    /// Narrows the token to one sub-agent of the target agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_sub_agent_id: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("Token issuance failed: {0}")]
    Issuance(String),
}

#[async_trait]
pub trait ServiceTokenIssuer: Send + Sync {
    async fn issue(&self, claims: &ServiceTokenClaims) -> Result<String, TokenError>;
}
