// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only JSONL session log.
//!
//! Each session gets a `<id>.jsonl` file under
//! `<session root>/<sanitized-workdir>/`.  Every message-level event is
//! appended as a single JSON record; restore replays the whole file once.
//! The raw log never shrinks — compression inserts records and the
//! hook-erasure path appends a `remove` record rather than rewriting.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::message::{Message, Usage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub workdir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub latest_total_tokens: u64,
    /// Fields written by newer versions are preserved across restores.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionMeta {
    pub fn new(workdir: &Path) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workdir: workdir.to_path_buf(),
            created_at: now,
            last_active_at: now,
            latest_total_tokens: 0,
            extra: serde_json::Map::new(),
        }
    }
}

/// One line of the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRecord {
    Header {
        #[serde(flatten)]
        meta: SessionMeta,
    },
    Append {
        message: Message,
    },
    /// Finalised rewrite of an already-persisted index (streaming turns
    /// persist the user message first, then rewrite the assistant message
    /// once its blocks are frozen).
    Replace {
        index: usize,
        message: Message,
    },
    /// Compression splice.
    Insert {
        index: usize,
        message: Message,
    },
    /// Hook-blocked user message erasure.  The original `append` line
    /// stays in the raw log; replay removes the message from the store.
    Remove {
        index: usize,
    },
    Usage {
        usage: Usage,
    },
    Meta {
        last_active_at: DateTime<Utc>,
        latest_total_tokens: u64,
    },
}

/// Collapse a working directory path to a filesystem-safe directory name.
pub fn sanitize_workdir(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    out = out.trim_matches('-').to_string();
    if out.is_empty() {
        out.push_str("root");
    }
    out
}

/// Session root directory: the configured path or `~/.wave/sessions`.
pub fn sessions_root(session_dir: Option<&Path>) -> PathBuf {
    match session_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".wave")
            .join("sessions"),
    }
}

pub fn session_file_path(root: &Path, workdir: &Path, id: &str) -> PathBuf {
    root.join(sanitize_workdir(workdir)).join(format!("{id}.jsonl"))
}

/// The most recently modified session file in a cwd-scoped directory
/// (used by `continueLastSession`).
pub fn most_recent_session(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "jsonl").unwrap_or(false))
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH)
        })
}

/// Single writer for one session's log file.  One instance per session id
/// per process keeps concurrent writes impossible by design.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records in order.  Session I/O is best-effort at the call
    /// sites; this returns the error so callers can decide to log it.
    pub fn append(&self, records: &[SessionRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record).context("serializing session record")?);
            buf.push('\n');
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }
}

/// A session rebuilt from its log file.
#[derive(Debug)]
pub struct RestoredSession {
    pub meta: SessionMeta,
    pub messages: Vec<Message>,
    pub usages: Vec<Usage>,
}

/// Replay a session file into its current message list.  Malformed lines
/// are skipped with a warning so a partially corrupt log still restores.
pub fn read_session(path: &Path) -> anyhow::Result<RestoredSession> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading session file {}", path.display()))?;

    let mut meta: Option<SessionMeta> = None;
    let mut messages: Vec<Message> = Vec::new();
    let mut usages: Vec<Usage> = Vec::new();

    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: SessionRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), line = lineno + 1, error = %e,
                      "skipping malformed session record");
                continue;
            }
        };
        match record {
            SessionRecord::Header { meta: mut m } => {
                // The internally-tagged "type" key lands in the flattened
                // extra map on deserialize; it is not a user field.
                m.extra.remove("type");
                meta = Some(m);
            }
            SessionRecord::Append { message } => messages.push(message),
            SessionRecord::Replace { index, message } => {
                if index < messages.len() {
                    messages[index] = message;
                } else {
                    messages.push(message);
                }
            }
            SessionRecord::Insert { index, message } => {
                let index = index.min(messages.len());
                messages.insert(index, message);
            }
            SessionRecord::Remove { index } => {
                if index < messages.len() {
                    messages.remove(index);
                }
            }
            SessionRecord::Usage { usage } => usages.push(usage),
            SessionRecord::Meta { last_active_at, latest_total_tokens } => {
                if let Some(meta) = meta.as_mut() {
                    meta.last_active_at = last_active_at;
                    meta.latest_total_tokens = latest_total_tokens;
                }
            }
        }
    }

    let meta = meta.with_context(|| format!("{} has no session header", path.display()))?;
    Ok(RestoredSession { meta, messages, usages })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
