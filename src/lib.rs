// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! wave — an embeddable autonomous AI coding-agent engine.
//!
//! The engine drives an LLM through a tool-augmented loop: it streams
//! model output, assembles tool calls while they arrive, checks a
//! permission policy before each tool executes, runs tools (possibly in
//! the background), feeds results back to the model, and recurses until
//! the model stops or a policy stops it.  Every turn persists to a
//! resumable JSONL session log, and conversations that outgrow the model
//! context are compacted by a secondary fast model.
//!
//! ```no_run
//! use wave::{Agent, AgentOptions};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut options = AgentOptions::new("/path/to/project");
//! options.api_key = Some("sk-...".into());
//! let agent = Agent::new(options)?;
//! agent.send_message("fix the failing test", vec![]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Concrete tool implementations (shell, file edit, search), terminal
//! UIs, and MCP servers are collaborators, not part of this crate: hosts
//! register [`Tool`] implementations and receive state through
//! [`AgentCallbacks`].

pub use wave_config::{
    ConfigUpdate, GatewayConfig, GatewayUpdate, ModelConfig, OptionsError, PermissionMode,
};
pub use wave_core::{
    Agent, AgentCallbacks, AgentOptions, Block, Message, OperationType, SubagentConfig,
    SubagentHandle, SubagentModel, ToolBlock, ToolStage, Usage,
};
pub use wave_hooks::{HookEngine, HookEvent};
pub use wave_tools::{
    BackgroundTask, CanUseTool, PermissionRequest, PermissionResponse, TaskKind, TaskStatus,
    Tool, ToolCall, ToolClass, ToolContext, ToolOutput,
};

/// Wire-level types and gateway implementations (OpenAI-compatible chat
/// completions), including the mock gateways used in tests.
pub mod model {
    pub use wave_model::*;
}

/// Construct an agent with default options rooted at `workdir`.
pub fn agent_in(workdir: impl Into<std::path::PathBuf>) -> anyhow::Result<Agent> {
    Agent::new(AgentOptions::new(workdir))
}
