// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Header Template Engine
//!
//! Renders configured header values against the running task's context,
//! using Handlebars for placeholder substitution.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Let relation and tool headers carry per-conversation values
//! - **Integration:** relation/tool `headers` → outbound A2A or MCP request
//!
//! # Supported Placeholders
//!
//! - `{{conversationId}}` - Conversation the task belongs to
//! - `{{tenantId}}`, `{{projectId}}` - Owning project
//! - `{{subAgentId}}` - Sub-agent issuing the call
//! - `{{userId}}` - End user, when known
//! - `{{headers.<name>}}` - Forwarded request headers
//! - `{{metadata.<key>}}` - Task context metadata
//!
//! HTML escaping is off: header values are not markup. A value that fails to
//! render is sent as written.

use std::collections::HashMap;

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Variables available to header templates.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderContext {
    pub conversation_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub sub_agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub metadata: Map<String, Value>,
}

pub struct HeaderTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl HeaderTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Render one value. Plain values skip the engine.
    pub fn render_value(&self, name: &str, template: &str, context: &HeaderContext) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }
        match self.handlebars.render_template(template, context) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(header = %name, error = %e, "Header template failed to render, sending raw value");
                template.to_string()
            }
        }
    }

    pub fn render_headers(&self, headers: &HashMap<String, String>, context: &HeaderContext) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, template)| (name.clone(), self.render_value(name, template, context)))
            .collect()
    }
}

impl Default for HeaderTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
