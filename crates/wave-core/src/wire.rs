// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! On-demand projection of the block store to the wire format the model
//! expects.
//!
//! A `compress` block becomes a system message prefixed with
//! `[Compressed Message Summary]` and erases everything older from the
//! wire view (the original messages stay on disk).  `subagent` and
//! `error` blocks are elided entirely.

use wave_model::{ContentPart, Message as WireMessage, Role};

use crate::message::Message;

pub const COMPRESS_SUMMARY_PREFIX: &str = "[Compressed Message Summary]";

/// Project the store's message list to the model's wire form.
pub fn project(messages: &[Message], system_prompt: Option<&str>) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(prompt) = system_prompt {
        out.push(WireMessage::system(prompt));
    }

    // Everything older than the latest compress block is hidden.
    let boundary = messages
        .iter()
        .rposition(|m| m.compress_block().is_some());
    let visible = match boundary {
        Some(i) => {
            if let Some((content, _)) = messages[i].compress_block() {
                out.push(WireMessage::system(format!(
                    "{COMPRESS_SUMMARY_PREFIX}\n{content}"
                )));
            }
            &messages[i + 1..]
        }
        None => messages,
    };

    for message in visible {
        project_message(message, &mut out);
    }
    out
}

fn project_message(message: &Message, out: &mut Vec<WireMessage>) {
    match message.role {
        Role::User => {
            let text = message.text_content();
            if message.attachments.is_empty() {
                out.push(WireMessage::user(text));
            } else {
                let mut parts = vec![ContentPart::text(text)];
                parts.extend(
                    message
                        .attachments
                        .iter()
                        .map(|url| ContentPart::image(url.clone())),
                );
                out.push(WireMessage::user_with_parts(parts));
            }
        }
        Role::Assistant => {
            let text = message.text_content();
            if !text.is_empty() {
                out.push(WireMessage::assistant(text));
            }
            // Pre-execution view: one ToolCall entry per tool block, kept
            // consecutive so the client coalesces them into a single
            // assistant tool_calls array.
            let tool_blocks: Vec<_> = message.tool_blocks().collect();
            for block in &tool_blocks {
                let arguments = if block.parameters.is_empty() {
                    "{}".to_string()
                } else {
                    block.parameters.clone()
                };
                out.push(WireMessage::tool_call(&block.id, &block.name, arguments));
            }
            // Then the tool-role results: result, or the stringified error.
            for block in &tool_blocks {
                let content = block
                    .result
                    .clone()
                    .or_else(|| block.error.clone())
                    .unwrap_or_default();
                out.push(WireMessage::tool_result(&block.id, content));
            }
        }
        // System text passes through (synthetic notices); tool-role store
        // messages have no wire counterpart of their own.
        Role::System => {
            out.push(WireMessage::system(message.text_content()));
        }
        Role::Tool => {}
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Block, ToolBlock, ToolStage};
    use wave_model::MessageContent;

    fn tool_msg(id: &str, name: &str, params: &str, result: Option<&str>) -> Message {
        let mut block = ToolBlock::new(id, name);
        block.parameters = params.to_string();
        block.stage = ToolStage::End;
        block.result = result.map(str::to_string);
        Message {
            role: Role::Assistant,
            blocks: vec![Block::Tool(block)],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn system_prompt_is_first_when_present() {
        let wire = project(&[Message::user("hi")], Some("be useful"));
        assert_eq!(wire[0].role, Role::System);
        assert_eq!(wire[0].as_text(), Some("be useful"));
        assert_eq!(wire[1].as_text(), Some("hi"));
    }

    #[test]
    fn assistant_tool_block_yields_call_and_result_entries() {
        let wire = project(
            &[tool_msg("tc-1", "Bash", r#"{"command":"ls"}"#, Some("total 8"))],
            None,
        );
        assert_eq!(wire.len(), 2);
        match &wire[0].content {
            MessageContent::ToolCall { tool_call_id, function } => {
                assert_eq!(tool_call_id, "tc-1");
                assert_eq!(function.name, "Bash");
                assert_eq!(function.arguments, r#"{"command":"ls"}"#);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        match &wire[1].content {
            MessageContent::ToolResult { tool_call_id, content } => {
                assert_eq!(tool_call_id, "tc-1");
                assert_eq!(content, "total 8");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn tool_error_becomes_the_result_content() {
        let mut msg = tool_msg("tc-1", "Bash", "{}", None);
        if let Block::Tool(b) = &mut msg.blocks[0] {
            b.error = Some("Failed to parse tool arguments for Bash".into());
        }
        let wire = project(&[msg], None);
        match &wire[1].content {
            MessageContent::ToolResult { content, .. } => {
                assert!(content.contains("Failed to parse"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn compress_block_hides_older_messages() {
        let compress = Message {
            role: Role::Assistant,
            blocks: vec![Block::Compress { content: "what happened".into(), session_id: "s".into() }],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        };
        let messages = vec![
            Message::user("ancient one"),
            Message::assistant_text("ancient two"),
            compress,
            Message::user("fresh"),
        ];
        let wire = project(&messages, None);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, Role::System);
        let summary = wire[0].as_text().unwrap();
        assert!(summary.starts_with(COMPRESS_SUMMARY_PREFIX));
        assert!(summary.contains("what happened"));
        assert_eq!(wire[1].as_text(), Some("fresh"));
    }

    #[test]
    fn error_and_subagent_blocks_are_elided() {
        let msg = Message {
            role: Role::Assistant,
            blocks: vec![
                Block::Error { content: "boom".into() },
                Block::Subagent {
                    subagent_id: "sa".into(),
                    subagent_name: "helper".into(),
                    status: crate::message::SubagentStatus::Completed,
                    session_id: "child".into(),
                    configuration: serde_json::json!({}),
                },
            ],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        };
        let wire = project(&[msg], None);
        assert!(wire.is_empty());
    }

    #[test]
    fn user_attachments_become_image_parts() {
        let msg = Message::user_with_attachments("see", vec!["data:image/png;base64,Z".into()]);
        let wire = project(&[msg], None);
        match &wire[0].content {
            MessageContent::ContentParts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[1], ContentPart::Image { image_url } if image_url.contains("base64,Z")));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn empty_parameters_project_as_empty_object() {
        let wire = project(&[tool_msg("tc", "X", "", None)], None);
        match &wire[0].content {
            MessageContent::ToolCall { function, .. } => assert_eq!(function.arguments, "{}"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn only_latest_compress_applies() {
        let mk_compress = |text: &str| Message {
            role: Role::Assistant,
            blocks: vec![Block::Compress { content: text.into(), session_id: "s".into() }],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        };
        let messages = vec![
            Message::user("one"),
            mk_compress("first"),
            Message::user("two"),
            mk_compress("second"),
            Message::user("three"),
        ];
        let wire = project(&messages, None);
        assert_eq!(wire.len(), 2);
        assert!(wire[0].as_text().unwrap().contains("second"));
        assert_eq!(wire[1].as_text(), Some("three"));
    }
}
