// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Relations
//!
//! A relation is `{transfer | delegate} x {internal | external | team}`.
//!
//! The store encodes a link's variant by which id field is present
//! (`subAgentId`, `externalAgentId`, or `agentId`). That sniffing happens once,
//! in [`SubAgentLink`]'s `TryFrom<RawSubAgentLink>`, so every use site matches on
//! [`LinkTarget`] instead of probing optional fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Transfer,
    Delegate,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transfer => write!(f, "transfer"),
            Self::Delegate => write!(f, "delegate"),
        }
    }
}

/// Target of a configured link, as stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum LinkTarget {
    SubAgent { sub_agent_id: String },
    External { external_agent_id: String },
    Team { agent_id: String },
}

impl LinkTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::SubAgent { sub_agent_id } => sub_agent_id,
            Self::External { external_agent_id } => external_agent_id,
            Self::Team { agent_id } => agent_id,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::SubAgent { .. } => "internal",
            Self::External { .. } => "external",
            Self::Team { .. } => "team",
        }
    }
}

/// One entry of a sub-agent's `canTransferTo` / `canDelegateTo` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSubAgentLink", into = "RawSubAgentLink")]
pub struct SubAgentLink {
    pub relation_id: Option<String>,
    pub target: LinkTarget,
    pub headers: HashMap<String, String>,
}

/// Wire form of a link before its variant is decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubAgentLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

impl From<SubAgentLink> for RawSubAgentLink {
    fn from(link: SubAgentLink) -> Self {
        let mut raw = RawSubAgentLink {
            relation_id: link.relation_id,
            sub_agent_id: None,
            external_agent_id: None,
            agent_id: None,
            headers: (!link.headers.is_empty()).then_some(link.headers),
        };
        match link.target {
            LinkTarget::SubAgent { sub_agent_id } => raw.sub_agent_id = Some(sub_agent_id),
            LinkTarget::External { external_agent_id } => raw.external_agent_id = Some(external_agent_id),
            LinkTarget::Team { agent_id } => raw.agent_id = Some(agent_id),
        }
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link has no target id (expected one of subAgentId, externalAgentId, agentId)")]
    MissingTarget,
    #[error("link names more than one target id: {0:?}")]
    AmbiguousTarget(Vec<&'static str>),
}

impl TryFrom<RawSubAgentLink> for SubAgentLink {
    type Error = LinkError;

    fn try_from(raw: RawSubAgentLink) -> Result<Self, Self::Error> {
        let mut present = Vec::new();
        if raw.sub_agent_id.is_some() {
            present.push("subAgentId");
        }
        if raw.external_agent_id.is_some() {
            present.push("externalAgentId");
        }
        if raw.agent_id.is_some() {
            present.push("agentId");
        }
        if present.len() > 1 {
            return Err(LinkError::AmbiguousTarget(present));
        }

        let target = match (raw.sub_agent_id, raw.external_agent_id, raw.agent_id) {
            (Some(sub_agent_id), None, None) => LinkTarget::SubAgent { sub_agent_id },
            (None, Some(external_agent_id), None) => LinkTarget::External { external_agent_id },
            (None, None, Some(agent_id)) => LinkTarget::Team { agent_id },
            _ => return Err(LinkError::MissingTarget),
        };

        Ok(Self {
            relation_id: raw.relation_id,
            target,
            headers: raw.headers.unwrap_or_default(),
        })
    }
}

/// Namespace for relation ids derived from (source, kind, target).
const RELATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d8e_4b7a_4c55_9e3f_0a1b_2c3d_4e5f);

impl SubAgentLink {
    /// Stable relation id: the configured one, else a UUID v5 of the link's coordinates.
    pub fn stable_relation_id(&self, source_sub_agent_id: &str, kind: RelationKind) -> String {
        match &self.relation_id {
            Some(id) => id.clone(),
            None => {
                let name = format!(
                    "{}:{}:{}:{}",
                    source_sub_agent_id,
                    kind,
                    self.target.variant_name(),
                    self.target.id()
                );
                Uuid::new_v5(&RELATION_NAMESPACE, name.as_bytes()).to_string()
            }
        }
    }
}

/// Resolved target with the catalog data needed to call it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum RelationTarget {
    Internal {
        sub_agent_id: String,
    },
    External {
        external_agent_id: String,
        base_url: String,
        credential_reference_id: Option<String>,
    },
    Team {
        agent_id: String,
    },
}

impl RelationTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Internal { sub_agent_id } => sub_agent_id,
            Self::External { external_agent_id, .. } => external_agent_id,
            Self::Team { agent_id } => agent_id,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub relation_id: String,
    pub kind: RelationKind,
    pub target: RelationTarget,
    pub name: String,
    pub description: String,
    pub headers: HashMap<String, String>,
}

/// Output of the relation extractor, partitioned by how the tool factory treats each list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelations {
    pub transfers: Vec<Relation>,
    pub internal_delegates: Vec<Relation>,
    pub external_delegates: Vec<Relation>,
    pub team_delegates: Vec<Relation>,
}

impl ExtractedRelations {
    pub fn delegates(&self) -> impl Iterator<Item = &Relation> {
        self.internal_delegates
            .iter()
            .chain(self.external_delegates.iter())
            .chain(self.team_delegates.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
            && self.internal_delegates.is_empty()
            && self.external_delegates.is_empty()
            && self.team_delegates.is_empty()
    }
}
