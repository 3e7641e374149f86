// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Relation Extractor
//!
//! Turns a sub-agent's `canTransferTo` / `canDelegateTo` links into resolved
//! [`Relation`]s, pulling names and descriptions from the agent catalog first
//! and the project catalog second.
//!
//! A link whose target cannot be found is dropped with a warning; the rest of
//! the sub-agent still runs. Descriptions of internal and team targets list
//! what the target can itself reach, down to a fixed depth, so a cycle of
//! sub-agents that link to each other always terminates.

use tracing::{debug, warn};

use crate::domain::project::{ProjectGraph, SubAgentDefinition};
use crate::domain::relation::{ExtractedRelations, LinkTarget, Relation, RelationKind, RelationTarget, SubAgentLink};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelationError {
    #[error("agent '{0}' not found in project graph")]
    AgentNotFound(String),

    #[error("sub-agent '{sub_agent_id}' not found in agent '{agent_id}'")]
    SubAgentNotFound { agent_id: String, sub_agent_id: String },
}

pub struct RelationExtractor {
    description_depth: usize,
}

impl RelationExtractor {
    pub fn new(description_depth: usize) -> Self {
        Self { description_depth }
    }

    pub fn description_depth(&self) -> usize {
        self.description_depth
    }

    /// Looks the sub-agent up and extracts its relations.
    pub fn extract_for(
        &self,
        graph: &ProjectGraph,
        agent_id: &str,
        sub_agent_id: &str,
    ) -> Result<ExtractedRelations, RelationError> {
        if graph.agent(agent_id).is_none() {
            return Err(RelationError::AgentNotFound(agent_id.to_string()));
        }
        let sub_agent = graph
            .sub_agent(agent_id, sub_agent_id)
            .ok_or_else(|| RelationError::SubAgentNotFound {
                agent_id: agent_id.to_string(),
                sub_agent_id: sub_agent_id.to_string(),
            })?;
        Ok(self.extract(graph, agent_id, sub_agent))
    }

    pub fn extract(&self, graph: &ProjectGraph, agent_id: &str, sub_agent: &SubAgentDefinition) -> ExtractedRelations {
        let mut extracted = ExtractedRelations::default();

        for link in &sub_agent.can_transfer_to {
            if let Some(relation) = self.resolve(graph, agent_id, sub_agent, link, RelationKind::Transfer) {
                extracted.transfers.push(relation);
            }
        }

        for link in &sub_agent.can_delegate_to {
            let Some(relation) = self.resolve(graph, agent_id, sub_agent, link, RelationKind::Delegate) else {
                continue;
            };
            match relation.target {
                RelationTarget::Internal { .. } => extracted.internal_delegates.push(relation),
                RelationTarget::External { .. } => extracted.external_delegates.push(relation),
                RelationTarget::Team { .. } => extracted.team_delegates.push(relation),
            }
        }

        debug!(
            sub_agent_id = %sub_agent.id,
            transfers = extracted.transfers.len(),
            delegates = extracted.delegates().count(),
            "Extracted relations"
        );
        extracted
    }

    fn resolve(
        &self,
        graph: &ProjectGraph,
        agent_id: &str,
        source: &SubAgentDefinition,
        link: &SubAgentLink,
        kind: RelationKind,
    ) -> Option<Relation> {
        let relation_id = link.stable_relation_id(&source.id, kind);

        let resolved = match &link.target {
            LinkTarget::SubAgent { sub_agent_id } => graph.sub_agent(agent_id, sub_agent_id).map(|target| {
                (
                    RelationTarget::Internal {
                        sub_agent_id: target.id.clone(),
                    },
                    target.name.clone(),
                    describe_sub_agent(graph, agent_id, target, self.description_depth),
                )
            }),
            LinkTarget::External { external_agent_id } => {
                graph.find_external_agent(agent_id, external_agent_id).map(|target| {
                    (
                        RelationTarget::External {
                            external_agent_id: target.id.clone(),
                            base_url: target.base_url.clone(),
                            credential_reference_id: target.credential_reference_id.clone(),
                        },
                        target.name.clone(),
                        target.description.clone().unwrap_or_default(),
                    )
                })
            }
            LinkTarget::Team { agent_id: target_agent_id } => {
                graph.find_team_agent(agent_id, target_agent_id).map(|target| {
                    let mut description = target.description.clone().unwrap_or_default();
                    // A team agent is reached through its default sub-agent.
                    if let Some(entry) = target
                        .default_sub_agent_id
                        .as_deref()
                        .and_then(|id| target.sub_agents.get(id))
                    {
                        append_reach(&mut description, graph, &target.id, entry, self.description_depth);
                    }
                    (
                        RelationTarget::Team {
                            agent_id: target.id.clone(),
                        },
                        target.name.clone(),
                        description,
                    )
                })
            }
        };

        match resolved {
            Some((target, name, description)) => Some(Relation {
                relation_id,
                kind,
                target,
                name,
                description,
                headers: link.headers.clone(),
            }),
            None => {
                warn!(
                    sub_agent_id = %source.id,
                    relation_id = %relation_id,
                    kind = %kind,
                    target_variant = link.target.variant_name(),
                    target_id = %link.target.id(),
                    "Dropping relation with unresolvable target"
                );
                None
            }
        }
    }
}

impl Default for RelationExtractor {
    fn default() -> Self {
        Self::new(1)
    }
}

fn describe_sub_agent(graph: &ProjectGraph, agent_id: &str, sub_agent: &SubAgentDefinition, depth: usize) -> String {
    let mut description = sub_agent.description.clone().unwrap_or_default();
    append_reach(&mut description, graph, agent_id, sub_agent, depth);
    description
}

/// Appends the targets `sub_agent` can transfer or delegate to. Each level
/// spends one unit of `depth`; at zero nothing is appended.
fn append_reach(description: &mut String, graph: &ProjectGraph, agent_id: &str, sub_agent: &SubAgentDefinition, depth: usize) {
    if depth == 0 {
        return;
    }

    let transfers = reach_line(graph, agent_id, &sub_agent.can_transfer_to, depth - 1);
    let delegates = reach_line(graph, agent_id, &sub_agent.can_delegate_to, depth - 1);

    for (label, entries) in [("Can transfer to", transfers), ("Can delegate to", delegates)] {
        if entries.is_empty() {
            continue;
        }
        if !description.is_empty() {
            description.push('\n');
        }
        description.push_str(label);
        description.push_str(": ");
        description.push_str(&entries.join("; "));
    }
}

fn reach_line(graph: &ProjectGraph, agent_id: &str, links: &[SubAgentLink], depth: usize) -> Vec<String> {
    links
        .iter()
        .filter_map(|link| match &link.target {
            LinkTarget::SubAgent { sub_agent_id } => graph.sub_agent(agent_id, sub_agent_id).map(|target| {
                let nested = describe_sub_agent(graph, agent_id, target, depth);
                label(&target.name, &nested)
            }),
            LinkTarget::External { external_agent_id } => graph
                .find_external_agent(agent_id, external_agent_id)
                .map(|target| label(&target.name, target.description.as_deref().unwrap_or(""))),
            LinkTarget::Team { agent_id: target_agent_id } => graph
                .find_team_agent(agent_id, target_agent_id)
                .map(|target| label(&target.name, target.description.as_deref().unwrap_or(""))),
        })
        .collect()
}

fn label(name: &str, description: &str) -> String {
    if description.is_empty() {
        name.to_string()
    } else {
        format!("{} ({})", name, description.replace('\n', " "))
    }
}
