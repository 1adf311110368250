// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

pub use wave_model::Role;

/// Streaming lifecycle of a tool block.  Stages advance in strict order;
/// consumers switch on the stage, never on the presence of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStage {
    /// Announced by the model; parameters still empty.
    Start,
    /// Argument deltas are arriving.
    Streaming,
    /// Emitted just before dispatch.
    Running,
    /// Result/error set; the block is frozen.
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBlock {
    pub id: String,
    pub name: String,
    /// Full accumulated JSON arguments string.  The same string must parse
    /// to the final arguments once the stream ends.
    #[serde(default)]
    pub parameters: String,
    /// Latest streamed chunk, for observers rendering incremental updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_chunk: Option<String>,
    pub stage: ToolStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub manually_backgrounded: bool,
}

impl ToolBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters: String::new(),
            parameters_chunk: None,
            stage: ToolStage::Start,
            success: None,
            result: None,
            error: None,
            manually_backgrounded: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

/// Typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        content: String,
    },
    Tool(ToolBlock),
    Error {
        content: String,
    },
    /// Marks the boundary where older messages have been summarised.
    Compress {
        content: String,
        session_id: String,
    },
    Subagent {
        subagent_id: String,
        subagent_name: String,
        status: SubagentStatus,
        session_id: String,
        configuration: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Agent,
    Compress,
    Subagent,
}

/// Token usage from one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub model: String,
    pub operation_type: OperationType,
}

/// One conversation message: a role plus ordered blocks.
///
/// Messages are never mutated in place once finalised; streaming mutation
/// targets only the trailing assistant message of the current turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Child session linkage for subagent cross-references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Image attachments on user turns (data URLs or HTTPS URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![Block::Text { content: text.into() }],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<String>) -> Self {
        Self {
            attachments,
            ..Self::user(text)
        }
    }

    pub fn assistant_empty() -> Self {
        Self {
            role: Role::Assistant,
            blocks: Vec::new(),
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![Block::Text { content: text.into() }],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        }
    }

    /// Assistant message carrying a single error block.
    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![Block::Error { content: content.into() }],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        }
    }

    /// Concatenated text content of all `Text` blocks.
    pub fn text_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_blocks(&self) -> impl Iterator<Item = &ToolBlock> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Tool(t) => Some(t),
            _ => None,
        })
    }

    pub fn tool_block_mut(&mut self, id: &str) -> Option<&mut ToolBlock> {
        self.blocks.iter_mut().find_map(|b| match b {
            Block::Tool(t) if t.id == id => Some(t),
            _ => None,
        })
    }

    pub fn compress_block(&self) -> Option<(&str, &str)> {
        self.blocks.iter().find_map(|b| match b {
            Block::Compress { content, session_id } => {
                Some((content.as_str(), session_id.as_str()))
            }
            _ => None,
        })
    }

    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
