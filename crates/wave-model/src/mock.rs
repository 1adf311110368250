// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::{gateway::ResponseStream, CompletionRequest, Gateway, ResponseEvent};

/// Deterministic mock gateway for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockGateway;

#[async_trait]
impl Gateway for MockGateway {
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted response: the events to emit, and whether the stream
/// should hang afterwards (for abort-mid-stream tests).
#[derive(Clone)]
pub struct Script {
    pub events: Vec<ResponseEvent>,
    pub hang_after: bool,
}

impl Script {
    pub fn events(events: Vec<ResponseEvent>) -> Self {
        Self { events, hang_after: false }
    }

    /// Emit `events`, then never complete.  The caller must abort.
    pub fn hanging(events: Vec<ResponseEvent>) -> Self {
        Self { events, hang_after: true }
    }
}

/// A pre-scripted gateway.  Each call to `complete` pops the next script
/// from the front of the queue, so tests can specify exact event sequences
/// — including partial tool-call deltas — without network access.
pub struct ScriptedGateway {
    scripts: Mutex<Vec<Script>>,
    calls: AtomicUsize,
    /// Every `CompletionRequest` seen, in call order, so tests can inspect
    /// what was sent (wire projection, model selection, tool surface).
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedGateway {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build a gateway from bare event lists (no hanging rounds).
    pub fn from_events(rounds: Vec<Vec<ResponseEvent>>) -> Self {
        Self::new(rounds.into_iter().map(Script::events).collect())
    }

    /// Convenience: gateway that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::from_events(vec![vec![
            ResponseEvent::TextDelta(r),
            ResponseEvent::Usage { prompt_tokens: 5, completion_tokens: 5, total_tokens: 10 },
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: gateway that returns a tool call followed by a text
    /// reply on the next round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::from_events(vec![
            // Round 1 – model emits a tool call
            vec![
                ResponseEvent::ToolCall {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Done,
            ],
            // Round 2 – model responds after the tool result
            vec![ResponseEvent::TextDelta(final_text.into()), ResponseEvent::Done],
        ])
    }

    /// Number of completed `complete()` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Script::events(vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Done,
                ])
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> =
            script.events.into_iter().map(Ok).collect();
        if script.hang_after {
            Ok(Box::pin(stream::iter(wrapped).chain(stream::pending())))
        } else {
            Ok(Box::pin(stream::iter(wrapped)))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
