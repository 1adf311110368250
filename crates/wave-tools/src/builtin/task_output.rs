// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::background::TaskStatus;
use crate::{Tool, ToolCall, ToolClass, ToolContext, ToolOutput};

/// Reports the status and captured output of a background task.
///
/// Also used by the turn controller itself: when a background task reaches
/// a terminal state while the agent is idle, the controller synthesises a
/// `TaskOutput(task_id, block=false)` call so the model can react.
#[derive(Default)]
pub struct TaskOutputTool;

#[async_trait]
impl Tool for TaskOutputTool {
    fn name(&self) -> &str {
        "TaskOutput"
    }

    fn description(&self) -> &str {
        "Read the current status, stdout, and stderr of a background task. \
         Set block=true to wait until the task reaches a terminal state."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Identifier returned when the task was started"
                },
                "block": {
                    "type": "boolean",
                    "description": "Wait for the task to finish before returning (default false)"
                }
            },
            "required": ["task_id"]
        })
    }

    fn classification(&self) -> ToolClass {
        ToolClass::Unrestricted
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(task_id) = call.args.get("task_id").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'task_id'");
        };
        let block = call.args.get("block").and_then(|v| v.as_bool()).unwrap_or(false);

        if ctx.tasks.get(task_id).is_none() {
            return ToolOutput::err(&call.id, format!("unknown background task: {task_id}"));
        }

        if block {
            loop {
                match ctx.tasks.get(task_id) {
                    Some(t) if t.status.is_terminal() => break,
                    Some(_) => {
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => break,
                            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                        }
                    }
                    None => break,
                }
            }
        }

        let Some(task) = ctx.tasks.get(task_id) else {
            return ToolOutput::err(&call.id, format!("unknown background task: {task_id}"));
        };
        let status = match task.status {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Killed => "killed",
        };
        let mut report = format!("Task {} is {status}", task.id);
        if let Some(code) = task.exit_code {
            report.push_str(&format!(" (exit code {code})"));
        }
        if !task.stdout.is_empty() {
            report.push_str(&format!("\n--- stdout ---\n{}", task.stdout));
        }
        if !task.stderr.is_empty() {
            report.push_str(&format!("\n--- stderr ---\n{}", task.stderr));
        }
        ToolOutput::ok(&call.id, report)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
