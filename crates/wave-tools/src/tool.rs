// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::background::BackgroundTasks;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content fed back to the model.
    pub content: String,
    /// If true, the tool execution failed non-fatally (content carries the
    /// error message the model sees).
    pub is_error: bool,
    /// The tool declared itself long-running: the underlying work keeps
    /// going and reports to the background task manager.  When every call
    /// in a round sets this, the turn finalises without recursing.
    pub manually_backgrounded: bool,
    /// Background task spawned by this invocation, if any.
    pub background_task_id: Option<String>,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            manually_backgrounded: false,
            background_task_id: None,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
            manually_backgrounded: false,
            background_task_id: None,
        }
    }

    /// Result of a tool that moved itself to the background.
    pub fn backgrounded(
        call_id: impl Into<String>,
        content: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            manually_backgrounded: true,
            background_task_id: Some(task_id.into()),
        }
    }
}

/// Whether a tool must pass the permission gate before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// Requires approval from a rule, the mode, or the user callback.
    Restricted,
    /// Never invokes the permission gate.
    Unrestricted,
}

/// Per-invocation context handed to tool handlers.
///
/// `cancel` is the turn's abort token: handlers observe it at their await
/// points and may still complete synchronously after observing it.
#[derive(Clone)]
pub struct ToolContext {
    pub workdir: PathBuf,
    pub cancel: CancellationToken,
    pub tasks: BackgroundTasks,
    pub session_id: String,
}

/// Trait that every tool registered with the dispatcher must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    fn classification(&self) -> ToolClass;
    /// Edit-class tools are auto-allowed in `acceptEdits` mode.
    fn is_edit_tool(&self) -> bool {
        false
    }
    /// Tools surfaced to the model only while the permission mode is `plan`.
    fn plan_only(&self) -> bool {
        false
    }
    /// The string the permission gate matches rules against.  Command-style
    /// tools expose their command string; everything else matches on the
    /// compact JSON of the arguments.
    fn permission_argument(&self, args: &Value) -> String {
        args.get("command")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| args.to_string())
    }
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn classification(&self) -> ToolClass {
            ToolClass::Unrestricted
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn default_permission_argument_prefers_command_field() {
        let t = MinimalTool;
        let arg = t.permission_argument(&json!({"command": "ls -la"}));
        assert_eq!(arg, "ls -la");
    }

    #[test]
    fn default_permission_argument_falls_back_to_json() {
        let t = MinimalTool;
        let arg = t.permission_argument(&json!({"path": "a.txt"}));
        assert_eq!(arg, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn tool_defaults_are_not_edit_and_not_plan_only() {
        let t = MinimalTool;
        assert!(!t.is_edit_tool());
        assert!(!t.plan_only());
    }

    #[test]
    fn backgrounded_output_carries_task_id() {
        let out = ToolOutput::backgrounded("c1", "running", "task-9");
        assert!(out.manually_backgrounded);
        assert_eq!(out.background_task_id.as_deref(), Some("task-9"));
        assert!(!out.is_error);
    }

    #[test]
    fn err_output_sets_is_error() {
        let out = ToolOutput::err("c1", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }
}
