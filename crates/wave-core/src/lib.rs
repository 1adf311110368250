// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod compress;
mod memory;
mod message;
mod options;
mod session;
mod store;
mod subagent;
mod wire;

pub use agent::Agent;
pub use compress::DEFAULT_FRESH_WINDOW;
pub use message::{
    Block, Message, OperationType, Role, SubagentStatus, ToolBlock, ToolStage, Usage,
};
pub use options::{AgentCallbacks, AgentOptions};
pub use session::{
    most_recent_session, read_session, sanitize_workdir, session_file_path, sessions_root,
    RestoredSession, SessionLog, SessionMeta, SessionRecord,
};
pub use store::{MessageStore, StoreObservers};
pub use subagent::{SubagentConfig, SubagentHandle, SubagentModel};
pub use wire::{project, COMPRESS_SUMMARY_PREFIX};
