// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The message store: single source of truth for conversation content.
//!
//! All mutation happens on the turn's task (cooperative single-threaded),
//! so the store needs no internal locking.  Observer callbacks fire before
//! control returns from the mutation.  Every message-level commit is
//! scheduled as an append to the session log; streaming deltas mark the
//! trailing assistant message dirty and are flushed when the message
//! finalises, so the on-disk sequence is always a prefix of the in-memory
//! sequence by the time the turn returns control.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::message::{
    Block, Message, Role, SubagentStatus, ToolBlock, ToolStage, Usage,
};
use crate::session::{SessionLog, SessionMeta, SessionRecord};
use crate::wire;

pub type MessagesCallback = Arc<dyn Fn(&[Message]) + Send + Sync>;
pub type UsagesCallback = Arc<dyn Fn(&[Usage]) + Send + Sync>;
pub type ToolBlockCallback = Arc<dyn Fn(&ToolBlock) + Send + Sync>;

/// Store-level observers.  `muted` is shared with the owning agent so no
/// observer fires after `destroy()` returns.
#[derive(Clone, Default)]
pub struct StoreObservers {
    pub on_messages_change: Option<MessagesCallback>,
    pub on_usages_change: Option<UsagesCallback>,
    pub on_tool_block_updated: Option<ToolBlockCallback>,
    pub muted: Arc<AtomicBool>,
}

pub struct MessageStore {
    meta: SessionMeta,
    messages: Vec<Message>,
    usages: Vec<Usage>,
    log: SessionLog,
    /// Messages `[0, persisted)` have their latest finalised state on disk.
    persisted: usize,
    /// Already-persisted indices whose in-memory state changed (streaming).
    dirty: BTreeSet<usize>,
    /// Index of the assistant message currently under streaming mutation.
    current_assistant: Option<usize>,
    /// Stream tool-call index → block position within the current message.
    stream_blocks: HashMap<u32, usize>,
    observers: StoreObservers,
}

impl MessageStore {
    /// Fresh store: writes the session header record.
    pub fn new(meta: SessionMeta, log: SessionLog, observers: StoreObservers) -> Self {
        let store = Self {
            meta,
            messages: Vec::new(),
            usages: Vec::new(),
            log,
            persisted: 0,
            dirty: BTreeSet::new(),
            current_assistant: None,
            stream_blocks: HashMap::new(),
            observers,
        };
        store.write(&[SessionRecord::Header { meta: store.meta.clone() }]);
        store
    }

    /// Store rebuilt from a restored session; the file already contains
    /// its history so nothing is rewritten.
    pub fn restored(
        meta: SessionMeta,
        messages: Vec<Message>,
        usages: Vec<Usage>,
        log: SessionLog,
        observers: StoreObservers,
    ) -> Self {
        let persisted = messages.len();
        Self {
            meta,
            messages,
            usages,
            log,
            persisted,
            dirty: BTreeSet::new(),
            current_assistant: None,
            stream_blocks: HashMap::new(),
            observers,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn usages(&self) -> &[Usage] {
        &self.usages
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn session_id(&self) -> &str {
        &self.meta.id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn log_path(&self) -> &std::path::Path {
        self.log.path()
    }

    // ── Message-level mutation ────────────────────────────────────────────────

    /// Append a finalised message and commit it to the log.
    pub fn append_message(&mut self, message: Message) -> usize {
        self.messages.push(message);
        let index = self.messages.len() - 1;
        self.flush();
        self.notify_messages();
        index
    }

    /// Erase the trailing message (hook-blocked user prompt).  The log
    /// keeps the original append record and gains a `remove` record.
    pub fn remove_last_message(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        self.flush();
        let index = self.messages.len() - 1;
        self.messages.pop();
        self.write(&[SessionRecord::Remove { index }]);
        self.persisted = self.persisted.min(self.messages.len());
        self.notify_messages();
    }

    // ── Streaming mutation (trailing assistant message) ───────────────────────

    /// Open a fresh assistant message for the incoming model round.
    pub fn start_assistant(&mut self) -> usize {
        self.messages.push(Message::assistant_empty());
        let index = self.messages.len() - 1;
        self.current_assistant = Some(index);
        self.stream_blocks.clear();
        self.notify_messages();
        index
    }

    fn current_index(&mut self) -> usize {
        match self.current_assistant {
            Some(i) => i,
            None => self.start_assistant(),
        }
    }

    /// Forward a streamed content chunk into the trailing text block.
    pub fn append_text_delta(&mut self, delta: &str) {
        let index = self.current_index();
        let message = &mut self.messages[index];
        match message.blocks.last_mut() {
            Some(Block::Text { content }) => content.push_str(delta),
            _ => message.blocks.push(Block::Text { content: delta.to_string() }),
        }
        self.mark_dirty(index);
        self.notify_messages();
    }

    /// Forward a streamed tool-call chunk.  The first chunk for a stream
    /// index opens the block at stage `start`; subsequent chunks accumulate
    /// the full parameters string and carry the latest delta.
    pub fn tool_delta(&mut self, stream_index: u32, id: &str, name: &str, chunk: &str) {
        let index = self.current_index();
        let block_pos = match self.stream_blocks.get(&stream_index) {
            Some(pos) => *pos,
            None => {
                let synthetic = format!("tc_{}_{stream_index}", self.messages[index].blocks.len());
                let block_id = if id.is_empty() { synthetic } else { id.to_string() };
                let block = ToolBlock::new(block_id, name);
                self.messages[index].blocks.push(Block::Tool(block));
                let pos = self.messages[index].blocks.len() - 1;
                self.stream_blocks.insert(stream_index, pos);
                // Observers see the start stage before any delta applies.
                self.notify_tool_block(index, pos);
                pos
            }
        };

        if let Some(Block::Tool(block)) = self.messages[index].blocks.get_mut(block_pos) {
            if !id.is_empty() {
                block.id = id.to_string();
            }
            if !name.is_empty() && block.name.is_empty() {
                block.name = name.to_string();
            }
            if !chunk.is_empty() {
                block.stage = ToolStage::Streaming;
                block.parameters.push_str(chunk);
                block.parameters_chunk = Some(chunk.to_string());
            }
        }
        self.mark_dirty(index);
        self.notify_tool_block(index, block_pos);
        self.notify_messages();
    }

    /// Snapshot of the current round's tool blocks, in arrival order.
    pub fn current_tool_blocks(&self) -> Vec<ToolBlock> {
        match self.current_assistant {
            Some(i) => self.messages[i].tool_blocks().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn tool_running(&mut self, block_id: &str) {
        self.update_tool_block(block_id, |block| {
            block.stage = ToolStage::Running;
            block.parameters_chunk = None;
        });
    }

    pub fn tool_end(
        &mut self,
        block_id: &str,
        success: bool,
        result: Option<String>,
        error: Option<String>,
        manually_backgrounded: bool,
    ) {
        self.update_tool_block(block_id, |block| {
            block.stage = ToolStage::End;
            block.success = Some(success);
            block.result = result;
            block.error = error;
            block.manually_backgrounded = manually_backgrounded;
            block.parameters_chunk = None;
        });
        self.flush();
    }

    /// Argument parse failure: the error string doubles as the stub result
    /// the model sees on the next round.
    pub fn set_tool_parse_error(&mut self, block_id: &str, error: String) {
        self.update_tool_block(block_id, |block| {
            block.stage = ToolStage::End;
            block.success = Some(false);
            block.error = Some(error);
            block.parameters_chunk = None;
        });
        self.flush();
    }

    /// Silently drop a partially streamed tool block (abort path).
    pub fn drop_tool_block(&mut self, block_id: &str) {
        let Some(index) = self.current_assistant else { return };
        let message = &mut self.messages[index];
        let before = message.blocks.len();
        message
            .blocks
            .retain(|b| !matches!(b, Block::Tool(t) if t.id == block_id));
        if message.blocks.len() != before {
            self.stream_blocks.clear();
            self.mark_dirty(index);
            self.notify_messages();
        }
    }

    fn update_tool_block(&mut self, block_id: &str, apply: impl FnOnce(&mut ToolBlock)) {
        let Some((msg_index, block_pos)) = self.find_tool_block(block_id) else {
            warn!(block_id, "tool block not found for update");
            return;
        };
        if let Some(Block::Tool(block)) = self.messages[msg_index].blocks.get_mut(block_pos) {
            apply(block);
        }
        self.mark_dirty(msg_index);
        self.notify_tool_block(msg_index, block_pos);
        self.notify_messages();
    }

    fn find_tool_block(&self, block_id: &str) -> Option<(usize, usize)> {
        // Search backwards: streaming mutation always targets recent messages.
        for (msg_index, message) in self.messages.iter().enumerate().rev() {
            for (block_pos, block) in message.blocks.iter().enumerate() {
                if matches!(block, Block::Tool(t) if t.id == block_id) {
                    return Some((msg_index, block_pos));
                }
            }
        }
        None
    }

    /// Append an error block to the current assistant message (created on
    /// demand when the failure happened before any content streamed).
    pub fn append_error_block(&mut self, content: &str) {
        let index = self.current_index();
        self.messages[index]
            .blocks
            .push(Block::Error { content: content.to_string() });
        self.mark_dirty(index);
        self.notify_messages();
    }

    /// Open an assistant message carrying one synthetic tool call (used by
    /// the background-task completion trigger).  Returns the block id.
    pub fn append_synthetic_tool_call(&mut self, name: &str, args: &serde_json::Value) -> String {
        let index = self.start_assistant();
        let block_id = format!("tc_synth_{}", uuid::Uuid::new_v4().simple());
        let mut block = ToolBlock::new(&block_id, name);
        block.parameters = args.to_string();
        block.stage = ToolStage::Streaming;
        self.messages[index].blocks.push(Block::Tool(block));
        self.mark_dirty(index);
        self.notify_messages();
        block_id
    }

    /// Close the streaming assistant message: an entirely empty message is
    /// withdrawn, anything else is committed to the log.
    pub fn finish_assistant(&mut self) {
        let Some(index) = self.current_assistant.take() else { return };
        self.stream_blocks.clear();
        if index == self.messages.len() - 1 && !self.messages[index].has_blocks() {
            self.messages.pop();
            self.dirty.remove(&index);
            self.persisted = self.persisted.min(self.messages.len());
            self.notify_messages();
            return;
        }
        self.flush();
        self.notify_messages();
    }

    // ── Compression, usage, metadata ──────────────────────────────────────────

    /// Splice a compress-block message at `position` (just before the
    /// fresh window).  History already on disk stays; replay applies the
    /// same insert.
    pub fn insert_compress(&mut self, position: usize, content: String) {
        self.flush();
        let message = Message {
            role: Role::Assistant,
            blocks: vec![Block::Compress { content, session_id: self.meta.id.clone() }],
            usage: None,
            session_id: None,
            attachments: Vec::new(),
        };
        let position = position.min(self.messages.len());
        self.messages.insert(position, message.clone());
        if let Some(current) = self.current_assistant.as_mut() {
            if *current >= position {
                *current += 1;
            }
        }
        self.write(&[SessionRecord::Insert { index: position, message }]);
        self.persisted += 1;
        self.notify_messages();
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.meta.latest_total_tokens += usage.total_tokens as u64;
        self.meta.last_active_at = Utc::now();
        self.usages.push(usage.clone());
        self.write(&[
            SessionRecord::Usage { usage },
            SessionRecord::Meta {
                last_active_at: self.meta.last_active_at,
                latest_total_tokens: self.meta.latest_total_tokens,
            },
        ]);
        if !self.observers.muted.load(Ordering::SeqCst) {
            if let Some(cb) = &self.observers.on_usages_change {
                cb(&self.usages);
            }
        }
    }

    pub fn touch(&mut self) {
        self.meta.last_active_at = Utc::now();
        self.write(&[SessionRecord::Meta {
            last_active_at: self.meta.last_active_at,
            latest_total_tokens: self.meta.latest_total_tokens,
        }]);
    }

    /// Drop the in-memory conversation and begin a fresh session id/log.
    /// The previous log file is left intact.
    pub fn clear_conversation(&mut self, new_log: SessionLog) {
        self.meta = SessionMeta::new(&self.meta.workdir.clone());
        self.messages.clear();
        self.usages.clear();
        self.dirty.clear();
        self.current_assistant = None;
        self.stream_blocks.clear();
        self.persisted = 0;
        self.log = new_log;
        self.write(&[SessionRecord::Header { meta: self.meta.clone() }]);
        self.notify_messages();
    }

    pub fn update_subagent_status(&mut self, subagent_id: &str, status: SubagentStatus) {
        let mut changed = None;
        for (index, message) in self.messages.iter_mut().enumerate() {
            for block in &mut message.blocks {
                if let Block::Subagent { subagent_id: id, status: s, .. } = block {
                    if id == subagent_id {
                        *s = status;
                        changed = Some(index);
                    }
                }
            }
        }
        if let Some(index) = changed {
            self.mark_dirty(index);
            self.flush();
            self.notify_messages();
        }
    }

    // ── Wire projection ───────────────────────────────────────────────────────

    pub fn wire_messages(&self, system_prompt: Option<&str>) -> Vec<wave_model::Message> {
        wire::project(&self.messages, system_prompt)
    }

    // ── Persistence plumbing ──────────────────────────────────────────────────

    fn mark_dirty(&mut self, index: usize) {
        if index < self.persisted {
            self.dirty.insert(index);
        }
    }

    /// Commit new messages as `append` records and rewritten ones as
    /// `replace` records.  Best-effort: session I/O failures log and never
    /// abort a turn.
    pub fn flush(&mut self) {
        let mut records = Vec::new();
        for index in self.persisted..self.messages.len() {
            records.push(SessionRecord::Append { message: self.messages[index].clone() });
        }
        let dirty = std::mem::take(&mut self.dirty);
        for index in dirty {
            if index < self.persisted {
                records.push(SessionRecord::Replace {
                    index,
                    message: self.messages[index].clone(),
                });
            }
        }
        self.persisted = self.messages.len();
        self.write(&records);
    }

    fn write(&self, records: &[SessionRecord]) {
        if let Err(e) = self.log.append(records) {
            warn!(path = %self.log.path().display(), error = %e, "session write failed");
        }
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    fn notify_messages(&self) {
        if self.observers.muted.load(Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = &self.observers.on_messages_change {
            cb(&self.messages);
        }
    }

    fn notify_tool_block(&self, msg_index: usize, block_pos: usize) {
        if self.observers.muted.load(Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = &self.observers.on_tool_block_updated {
            if let Some(Block::Tool(block)) = self.messages[msg_index].blocks.get(block_pos) {
                cb(block);
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
