// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use wave_config::PermissionMode;

use crate::{Tool, ToolCall, ToolClass, ToolContext, ToolOutput};

/// A tool schema as surfaced to the model (name + JSON Schema).
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce the tool surface for the given permission mode.
    ///
    /// Plan-only tools (e.g. the plan-exit tool) appear only in `plan`
    /// mode.  In `plan` mode, restricted tools are hidden — the gate would
    /// deny them anyway, and hiding them keeps the model from trying.
    pub fn schemas_for_mode(&self, mode: PermissionMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| {
                if mode == PermissionMode::Plan {
                    t.plan_only() || t.classification() == ToolClass::Unrestricted
                } else {
                    !t.plan_only()
                }
            })
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call, ctx).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a sub-registry containing only the named tools (for subagent
    /// tool subsets).  Unknown names are skipped.
    pub fn subset(&self, names: &[String]) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for name in names {
            if let Some(tool) = self.tools.get(name) {
                reg.register_arc(Arc::clone(tool));
            }
        }
        reg
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
