// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod background;
pub mod builtin;
pub mod events;
pub mod gate;
pub mod registry;
pub mod rules;
pub mod tool;

pub use background::{BackgroundTask, BackgroundTasks, TaskKind, TaskStatus};
pub use builtin::exit_plan::ExitPlanModeTool;
pub use builtin::task_output::TaskOutputTool;
pub use events::ToolEvent;
pub use gate::{
    CanUseTool, GateDecision, PermissionGate, PermissionRequest, PermissionResponse,
};
pub use registry::{ToolRegistry, ToolSchema};
pub use rules::{split_rule_on_and, RuleSet};
pub use tool::{Tool, ToolCall, ToolClass, ToolContext, ToolOutput};
