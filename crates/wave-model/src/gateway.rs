// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat-completions gateway client.
//!
//! The engine talks to one HTTP gateway speaking the standard
//! `/chat/completions` SSE streaming wire format.  Endpoint configuration
//! (key, URL, headers) is resolved through a capability closure on every
//! request so live config changes apply without reconstruction.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use crate::{CompletionRequest, ContentPart, MessageContent, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// A model gateway: sends one completion request, returns a streaming
/// response.  Implemented by [`HttpGateway`] in production and by the mock
/// gateways in tests.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

/// Resolved endpoint for one request.
#[derive(Debug, Clone, Default)]
pub struct GatewayEndpoint {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Additional HTTP headers sent on every request.
    pub headers: Vec<(String, String)>,
}

/// Production gateway speaking the OpenAI-compatible SSE protocol.
pub struct HttpGateway {
    client: reqwest::Client,
    /// Resolves the endpoint at call time (dynamic config).
    resolve: Arc<dyn Fn() -> GatewayEndpoint + Send + Sync>,
}

impl HttpGateway {
    pub fn new(resolve: Arc<dyn Fn() -> GatewayEndpoint + Send + Sync>) -> Self {
        Self { client: reqwest::Client::new(), resolve }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let endpoint = (self.resolve)();
        let base = endpoint
            .base_url
            .as_deref()
            .context("gateway base URL not configured; set baseURL or WAVE_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let key = endpoint
            .api_key
            .as_deref()
            .context("gateway API key not configured; set apiKey or WAVE_API_KEY")?;

        let messages = build_wire_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": req.stream,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %req.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let mut http_req = self
            .client
            .post(format!("{base}/chat/completions"))
            .bearer_auth(key)
            .json(&body);
        for (name, val) in &endpoint.headers {
            http_req = http_req.header(name.as_str(), val.as_str());
        }

        let resp = http_req.send().await.context("gateway request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("gateway error {status}: {text}");
        }

        // Network chunks do not respect SSE line boundaries, so a carry
        // buffer accumulates bytes and only whole lines are decoded.
        let event_stream = resp
            .bytes_stream()
            .scan(String::new(), |carry, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(bytes) => {
                        carry.push_str(&String::from_utf8_lossy(&bytes));
                        drain_stream_buffer(carry).into_iter().map(Ok).collect()
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Decode every fully received SSE line in `carry`, keeping the trailing
/// partial line (if any) for the next network chunk.
fn drain_stream_buffer(carry: &mut String) -> Vec<ResponseEvent> {
    let decodable_len = match carry.rfind('\n') {
        Some(last_newline) => last_newline + 1,
        None => return Vec::new(),
    };
    let partial_tail = carry.split_off(decodable_len);
    let complete = std::mem::replace(carry, partial_tail);
    complete.lines().filter_map(sse_event_from_line).collect()
}

/// Decode one SSE line.  Only `data:` lines carry payload; blank lines,
/// comments, and undecodable JSON yield nothing.
fn sse_event_from_line(line: &str) -> Option<ResponseEvent> {
    let payload = line.trim().strip_prefix("data:")?.trim_start();
    match payload {
        "" => None,
        "[DONE]" => Some(ResponseEvent::Done),
        json => serde_json::from_str::<Value>(json)
            .ok()
            .map(|chunk| parse_sse_chunk(&chunk)),
    }
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let total = usage["total_tokens"]
            .as_u64()
            .unwrap_or((prompt + completion) as u64) as u32;
        return ResponseEvent::Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        };
    }

    let delta = &v["choices"][0]["delta"];

    // Tool call delta — the gateway interleaves chunks for parallel tool
    // calls by "index"; each SSE chunk carries exactly one tool-call delta.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        };
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

/// Serialize the conversation for the chat-completions endpoint.
///
/// The engine stores one `MessageContent::ToolCall` entry per call (result
/// ordering stays trivial that way), but the endpoint wants a whole
/// round's calls inside a single assistant message.  Calls are buffered
/// as they are encountered and flushed as one `tool_calls` array the
/// moment any other message kind (or the end of the list) is reached.
pub(crate) fn build_wire_messages(messages: &[crate::Message]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_calls: Vec<Value> = Vec::new();

    for message in messages {
        match &message.content {
            MessageContent::ToolCall { tool_call_id, function } => {
                pending_calls.push(json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "arguments": function.arguments,
                    },
                }));
            }
            MessageContent::Text(text) => {
                flush_pending_calls(&mut wire, &mut pending_calls);
                wire.push(json!({ "role": message.role, "content": text }));
            }
            MessageContent::ContentParts(parts) => {
                flush_pending_calls(&mut wire, &mut pending_calls);
                let blocks: Vec<Value> = parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => json!({
                            "type": "image_url",
                            "image_url": { "url": image_url },
                        }),
                    })
                    .collect();
                wire.push(json!({ "role": message.role, "content": blocks }));
            }
            MessageContent::ToolResult { tool_call_id, content } => {
                flush_pending_calls(&mut wire, &mut pending_calls);
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    flush_pending_calls(&mut wire, &mut pending_calls);
    wire
}

fn flush_pending_calls(wire: &mut Vec<Value>, pending: &mut Vec<Value>) {
    if !pending.is_empty() {
        wire.push(json!({
            "role": "assistant",
            "tool_calls": std::mem::take(pending),
        }));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
