// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use wave_config::PermissionMode;

use crate::events::ToolEvent;
use crate::{Tool, ToolCall, ToolClass, ToolContext, ToolOutput};

/// Lifts `plan` mode back to `default`.
///
/// Holds the **same** mode lock as the permission gate so the change is
/// immediately visible, and the event sender whose receiver the turn
/// controller drains after each tool round.
pub struct ExitPlanModeTool {
    mode: Arc<RwLock<PermissionMode>>,
    events: mpsc::UnboundedSender<ToolEvent>,
}

impl ExitPlanModeTool {
    pub fn new(
        mode: Arc<RwLock<PermissionMode>>,
        events: mpsc::UnboundedSender<ToolEvent>,
    ) -> Self {
        Self { mode, events }
    }
}

#[async_trait]
impl Tool for ExitPlanModeTool {
    fn name(&self) -> &str {
        "ExitPlanMode"
    }

    fn description(&self) -> &str {
        "Leave plan mode and return to the default permission mode. Call this \
         once the plan is ready so effectful tools become available again."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan": {
                    "type": "string",
                    "description": "The finished plan to present to the user"
                }
            }
        })
    }

    fn classification(&self) -> ToolClass {
        ToolClass::Unrestricted
    }

    fn plan_only(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        *self.mode.write().expect("mode lock poisoned") = PermissionMode::Default;
        let _ = self.events.send(ToolEvent::ModeChanged(PermissionMode::Default));
        ToolOutput::ok(&call.id, "Exited plan mode; permission mode is now default.")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
