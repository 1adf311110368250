// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The compression engine.
//!
//! When a turn's token usage crosses the configured ceiling, the prefix
//! older than the fresh window is projected to wire form, summarised by
//! the secondary fast model, and replaced in the wire view by a single
//! `compress` block spliced just before the fresh window.  The original
//! messages stay on disk; compression only ever grows the log.

use anyhow::{bail, Context};
use futures::StreamExt;
use tracing::{debug, warn};

use wave_config::LiveConfig;
use wave_model::{CompletionRequest, Gateway, ResponseEvent};

use crate::message::{OperationType, Usage};
use crate::store::MessageStore;
use crate::wire;

/// Messages at the tail of the conversation that compression never touches.
pub const DEFAULT_FRESH_WINDOW: usize = 7;

/// Ranges smaller than this are not worth a model call.
const MIN_RANGE: usize = 2;

const COMPRESS_PROMPT: &str =
    "Summarise the conversation so far in a concise, information-dense way. \
     Preserve all technical details, decisions, file names, code snippets, and \
     tool outputs that may be relevant to future work. The summary will replace \
     the original history to free up context space.";

/// Run one compression pass.  Best-effort at every call site: failures are
/// logged by the caller and the turn continues uncompressed.
pub async fn run(
    store: &mut MessageStore,
    gateway: &dyn Gateway,
    live: &LiveConfig,
    fresh_window: usize,
) -> anyhow::Result<()> {
    let n = store.len();
    let boundary = store
        .messages()
        .iter()
        .rposition(|m| m.compress_block().is_some());
    let range_start = boundary.map(|k| k + 1).unwrap_or(0);
    let range_end = n.saturating_sub(fresh_window);
    if range_end <= range_start || range_end - range_start < MIN_RANGE {
        debug!(n, range_start, range_end, "compression skipped: range too small");
        return Ok(());
    }

    // Pre-compression snapshot: the original prefix must be recoverable
    // from disk before the wire view starts hiding it.
    store.flush();

    // Project the old prefix (any prior compress block becomes the leading
    // system summary, giving the model its own earlier context).
    let mut messages = wire::project(&store.messages()[..range_end], None);
    messages.push(wave_model::Message::user(COMPRESS_PROMPT));

    let model = live.model_config().fast_model;
    let req = CompletionRequest {
        model: model.clone(),
        messages,
        tools: Vec::new(),
        stream: true,
    };
    let mut stream = gateway
        .complete(req)
        .await
        .context("compression model call failed")?;

    let mut summary = String::new();
    while let Some(event) = stream.next().await {
        match event.context("compression stream failed")? {
            ResponseEvent::TextDelta(delta) => summary.push_str(&delta),
            ResponseEvent::Usage { prompt_tokens, completion_tokens, total_tokens } => {
                store.record_usage(Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                    model: model.clone(),
                    operation_type: OperationType::Compress,
                });
            }
            ResponseEvent::Done => break,
            ResponseEvent::Error(e) => warn!("compression stream warning: {e}"),
            ResponseEvent::ToolCall { .. } => {}
        }
    }

    if summary.trim().is_empty() {
        bail!("compression produced an empty summary");
    }

    debug!(
        summarised = range_end - range_start,
        insert_at = range_end,
        "splicing compression summary"
    );
    store.insert_compress(range_end, summary);
    Ok(())
}
