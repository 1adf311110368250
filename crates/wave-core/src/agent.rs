// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use anyhow::bail;
use serde_json::json;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wave_config::{
    load_settings, ConfigUpdate, GatewayConfig, GatewayOverrides, LiveConfig,
    LocalSettingsFile, ModelConfig, PermissionMode,
};
use wave_hooks::{HookEngine, HookEvent};
use wave_model::{CompletionRequest, Gateway, GatewayEndpoint, HttpGateway, ResponseEvent};
use wave_tools::{
    BackgroundTask, ExitPlanModeTool, GateDecision, RuleSet, TaskOutputTool, ToolCall,
    ToolContext, ToolEvent, ToolOutput, ToolRegistry,
};

use crate::compress;
use crate::memory;
use crate::message::{Message, OperationType, Usage};
use crate::options::{AgentCallbacks, AgentOptions};
use crate::session::{
    most_recent_session, read_session, sanitize_workdir, session_file_path, sessions_root,
    SessionLog, SessionMeta,
};
use crate::store::{MessageStore, StoreObservers};

/// The turn controller: orchestrates the recursive call/execute cycle,
/// detects stop conditions, and manages compression and abort.
///
/// Cheap to clone; all state lives behind the shared inner.  One turn
/// executes at a time (the store lock is held for the whole turn), while
/// `abort()` and the config accessors stay callable from other tasks.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

pub(crate) struct AgentInner {
    pub(crate) workdir: PathBuf,
    pub(crate) live: LiveConfig,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) gate: wave_tools::PermissionGate,
    pub(crate) hooks: HookEngine,
    pub(crate) tasks: wave_tools::BackgroundTasks,
    pub(crate) store: TokioMutex<MessageStore>,
    pub(crate) observers: StoreObservers,
    pub(crate) callbacks: AgentCallbacks,
    pub(crate) abort: StdMutex<CancellationToken>,
    pub(crate) muted: Arc<AtomicBool>,
    pub(crate) destroyed: AtomicBool,
    pub(crate) system_prompt: Option<String>,
    pub(crate) fresh_window: usize,
    pub(crate) usage_kind: OperationType,
    /// Fixed model name for subagents constructed with an override; `None`
    /// resolves through the live config on every round.
    pub(crate) model_override: Option<String>,
    pub(crate) tool_events: StdMutex<mpsc::UnboundedReceiver<ToolEvent>>,
    pub(crate) session_root: PathBuf,
}

/// Everything needed to assemble an agent; used by both the public
/// constructor and the subagent manager.
pub(crate) struct AgentParts {
    pub workdir: PathBuf,
    pub live: LiveConfig,
    pub gateway: Arc<dyn Gateway>,
    pub tools: Arc<ToolRegistry>,
    pub gate: wave_tools::PermissionGate,
    pub hooks: HookEngine,
    pub tasks: wave_tools::BackgroundTasks,
    pub task_rx: mpsc::UnboundedReceiver<String>,
    pub store: MessageStore,
    pub observers: StoreObservers,
    pub callbacks: AgentCallbacks,
    pub muted: Arc<AtomicBool>,
    pub system_prompt: Option<String>,
    pub fresh_window: usize,
    pub usage_kind: OperationType,
    pub model_override: Option<String>,
    pub tool_events: mpsc::UnboundedReceiver<ToolEvent>,
    pub session_root: PathBuf,
}

struct ParsedCall {
    block_id: String,
    name: String,
    args: serde_json::Value,
}

enum RoundOutcome {
    /// The abort token tripped; no error blocks for in-flight work.
    Aborted,
    /// Stream completed (or failed with an error block already appended).
    Completed {
        calls: Vec<ParsedCall>,
        had_tool_activity: bool,
        needs_compression: bool,
        errored: bool,
    },
}

impl Agent {
    /// Construct an agent.  Fail-fast on invalid options or an explicit
    /// restore id pointing at a missing/corrupt session file.
    pub fn new(options: AgentOptions) -> anyhow::Result<Self> {
        options.validate()?;
        let workdir = options.workdir.clone();
        let settings = load_settings(&workdir);

        let live = LiveConfig::new(
            GatewayOverrides {
                api_key: options.api_key.clone(),
                base_url: options.base_url.clone(),
                headers: options.default_headers.clone(),
            },
            options.agent_model.clone(),
            options.fast_model.clone(),
            options.max_input_tokens,
            settings.env.clone(),
        );

        let initial_mode = options.permission_mode.unwrap_or_else(|| {
            settings
                .permissions
                .default_mode
                .as_deref()
                .and_then(|raw| {
                    raw.parse::<PermissionMode>()
                        .map_err(|e| warn!("ignoring settings defaultMode: {e}"))
                        .ok()
                })
                .unwrap_or_default()
        });
        let mode = Arc::new(RwLock::new(initial_mode));
        let muted = Arc::new(AtomicBool::new(false));

        let observers = StoreObservers {
            on_messages_change: options.callbacks.on_messages_change.clone(),
            on_usages_change: options.callbacks.on_usages_change.clone(),
            on_tool_block_updated: options.callbacks.on_tool_block_updated.clone(),
            muted: Arc::clone(&muted),
        };

        let session_root = sessions_root(options.session_dir.as_deref());
        let store = if let Some(id) = &options.restore_session_id {
            let path = session_file_path(&session_root, &workdir, id);
            let restored = read_session(&path)?;
            MessageStore::restored(
                restored.meta,
                restored.messages,
                restored.usages,
                SessionLog::new(path),
                observers.clone(),
            )
        } else if options.continue_last_session {
            let dir = session_root.join(sanitize_workdir(&workdir));
            match most_recent_session(&dir).map(|path| read_session(&path).map(|r| (path, r))) {
                Some(Ok((path, restored))) => MessageStore::restored(
                    restored.meta,
                    restored.messages,
                    restored.usages,
                    SessionLog::new(path),
                    observers.clone(),
                ),
                Some(Err(e)) => {
                    warn!(error = %e, "failed to continue last session; starting fresh");
                    fresh_store(&session_root, &workdir, observers.clone())
                }
                None => fresh_store(&session_root, &workdir, observers.clone()),
            }
        } else {
            let mut store = fresh_store(&session_root, &workdir, observers.clone());
            for message in options.messages.clone() {
                store.append_message(message);
            }
            store
        };

        load_subagent_children(&store, &options.callbacks, &session_root, &workdir);

        let (tool_event_tx, tool_event_rx) = mpsc::unbounded_channel();
        let mut registry = ToolRegistry::new();
        registry.register(TaskOutputTool);
        registry.register(ExitPlanModeTool::new(Arc::clone(&mode), tool_event_tx));
        for tool in options.tools.clone() {
            registry.register_arc(tool);
        }

        let on_mode_change = options.callbacks.on_permission_mode_change.clone().map(|cb| {
            let muted = Arc::clone(&muted);
            Arc::new(move |m: PermissionMode| {
                if !muted.load(Ordering::SeqCst) {
                    cb(m);
                }
            }) as Arc<dyn Fn(PermissionMode) + Send + Sync>
        });
        let gate = wave_tools::PermissionGate::new(
            mode,
            RuleSet::from_strings(&settings.permissions.allow),
            Arc::new(LocalSettingsFile::new(&workdir)),
            options.can_use_tool.clone(),
            on_mode_change,
        );

        let hooks = HookEngine::new(settings.hooks, workdir.clone());
        let (tasks, task_rx) = wave_tools::BackgroundTasks::new();

        let gateway = options.gateway.clone().unwrap_or_else(|| {
            let live = live.clone();
            Arc::new(HttpGateway::new(Arc::new(move || {
                let cfg = live.gateway_config();
                GatewayEndpoint {
                    api_key: cfg.api_key,
                    base_url: cfg.base_url,
                    headers: cfg.headers,
                }
            })))
        });

        Ok(Self::from_parts(AgentParts {
            workdir,
            live,
            gateway,
            tools: Arc::new(registry),
            gate,
            hooks,
            tasks,
            task_rx,
            store,
            observers,
            callbacks: options.callbacks.clone(),
            muted,
            system_prompt: options.system_prompt.clone(),
            fresh_window: options.fresh_window.unwrap_or(compress::DEFAULT_FRESH_WINDOW),
            usage_kind: OperationType::Agent,
            model_override: None,
            tool_events: tool_event_rx,
            session_root,
        }))
    }

    pub(crate) fn from_parts(parts: AgentParts) -> Self {
        let inner = Arc::new(AgentInner {
            workdir: parts.workdir,
            live: parts.live,
            gateway: parts.gateway,
            tools: parts.tools,
            gate: parts.gate,
            hooks: parts.hooks,
            tasks: parts.tasks,
            store: TokioMutex::new(parts.store),
            observers: parts.observers,
            callbacks: parts.callbacks,
            abort: StdMutex::new(CancellationToken::new()),
            muted: parts.muted,
            destroyed: AtomicBool::new(false),
            system_prompt: parts.system_prompt,
            fresh_window: parts.fresh_window,
            usage_kind: parts.usage_kind,
            model_override: parts.model_override,
            tool_events: StdMutex::new(parts.tool_events),
            session_root: parts.session_root,
        });
        spawn_task_listener(&inner, parts.task_rx);
        Self { inner }
    }

    // ── Public surface ────────────────────────────────────────────────────────

    /// Run one full turn: append the user message, fire hooks, then the
    /// recursive model-call / tool-execute cycle until a stop condition.
    ///
    /// Runtime failures land in the conversation (error blocks, failed
    /// tool blocks); `Err` here means the agent was destroyed.
    pub async fn send_message(
        &self,
        content: &str,
        attachments: Vec<String>,
    ) -> anyhow::Result<()> {
        self.send_message_linked(content, attachments, None).await
    }

    pub(crate) async fn send_message_linked(
        &self,
        content: &str,
        attachments: Vec<String>,
        parent: Option<CancellationToken>,
    ) -> anyhow::Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            bail!("agent has been destroyed");
        }
        let mut store = self.inner.store.lock().await;
        let token = self.inner.begin_turn(parent);

        store.append_message(Message::user_with_attachments(content, attachments));

        let outcome = self.inner.hooks.fire(HookEvent::UserPromptSubmit, None).await;
        if outcome.blocked {
            store.remove_last_message();
            store.append_message(Message::assistant_error(outcome.stderr));
            return Ok(());
        }

        self.inner.run_loop(&mut store, &token).await;
        store.touch();
        Ok(())
    }

    /// Abort the in-flight turn.  Idempotent; safe to call from any task.
    pub fn abort(&self) {
        self.inner.abort.lock().expect("abort lock poisoned").cancel();
    }

    /// Execute a host-level slash command (`compact`, `clear`, `status`).
    pub async fn execute_slash_command(&self, name: &str) -> anyhow::Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            bail!("agent has been destroyed");
        }
        let command = name.trim().trim_start_matches('/');
        let mut store = self.inner.store.lock().await;
        match command {
            "compact" => {
                if let Err(e) = compress::run(
                    &mut store,
                    self.inner.gateway.as_ref(),
                    &self.inner.live,
                    self.inner.fresh_window,
                )
                .await
                {
                    warn!(error = %e, "manual compaction failed");
                    store.append_message(Message::assistant_error(format!(
                        "Compaction failed: {e}"
                    )));
                }
            }
            "clear" => {
                let meta = SessionMeta::new(&self.inner.workdir);
                let path =
                    session_file_path(&self.inner.session_root, &self.inner.workdir, &meta.id);
                store.clear_conversation(SessionLog::new(path));
            }
            "status" => {
                let tasks = self.inner.tasks.snapshot();
                let running = tasks.iter().filter(|t| !t.status.is_terminal()).count();
                let status = format!(
                    "Session {} — {} message(s), {} tokens used, permission mode {}, \
                     {} background task(s) running",
                    store.session_id(),
                    store.len(),
                    store.meta().latest_total_tokens,
                    self.inner.gate.mode(),
                    running,
                );
                store.append_message(Message::assistant_text(status));
            }
            other => {
                store.append_message(Message::assistant_error(format!(
                    "Unknown command: /{other}"
                )));
            }
        }
        Ok(())
    }

    pub fn set_permission_mode(&self, mode: PermissionMode) {
        self.inner.gate.set_mode(mode);
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.inner.gate.mode()
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        self.inner.live.gateway_config()
    }

    pub fn model_config(&self) -> ModelConfig {
        self.inner.live.model_config()
    }

    pub fn max_input_tokens(&self) -> usize {
        self.inner.live.max_input_tokens()
    }

    /// Hot-update the live configuration; takes effect on the next use.
    pub fn update_config(&self, update: ConfigUpdate) {
        self.inner.live.update(update);
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.store.lock().await.messages().to_vec()
    }

    pub async fn usages(&self) -> Vec<Usage> {
        self.inner.store.lock().await.usages().to_vec()
    }

    pub async fn session_id(&self) -> String {
        self.inner.store.lock().await.session_id().to_string()
    }

    /// The conversation as the model would see it right now.
    pub async fn wire_view(&self) -> Vec<wave_model::Message> {
        self.inner
            .store
            .lock()
            .await
            .wire_messages(self.inner.effective_system_prompt().as_deref())
    }

    pub async fn last_assistant_text(&self) -> String {
        let store = self.inner.store.lock().await;
        store
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == wave_model::Role::Assistant && !m.text_content().is_empty())
            .map(|m| m.text_content())
            .unwrap_or_default()
    }

    pub fn save_memory(&self, content: &str) {
        memory::save(&self.inner.workdir, content);
    }

    pub fn load_memory(&self) -> String {
        memory::load(&self.inner.workdir)
    }

    pub fn background_tasks(&self) -> Vec<BackgroundTask> {
        self.inner.tasks.snapshot()
    }

    pub fn kill_background_task(&self, id: &str) -> bool {
        self.inner.tasks.kill(id)
    }

    /// Replace the conversation with a previously saved session.
    pub async fn restore_session(&self, id: &str) -> anyhow::Result<()> {
        let path = session_file_path(&self.inner.session_root, &self.inner.workdir, id);
        let restored = read_session(&path)?;
        let mut store = self.inner.store.lock().await;
        *store = MessageStore::restored(
            restored.meta,
            restored.messages,
            restored.usages,
            SessionLog::new(path),
            self.inner.observers.clone(),
        );
        load_subagent_children(
            &store,
            &self.inner.callbacks,
            &self.inner.session_root,
            &self.inner.workdir,
        );
        if let Some(cb) = &self.inner.callbacks.on_messages_change {
            if !self.inner.muted.load(Ordering::SeqCst) {
                cb(store.messages());
            }
        }
        Ok(())
    }

    /// Tear down: abort the in-flight turn and silence every observer.
    /// No callback fires after this returns.
    pub fn destroy(&self) {
        self.inner.muted.store(true, Ordering::SeqCst);
        self.inner.destroyed.store(true, Ordering::SeqCst);
        self.abort();
    }

    pub(crate) fn inner(&self) -> &Arc<AgentInner> {
        &self.inner
    }
}

fn fresh_store(session_root: &PathBuf, workdir: &PathBuf, observers: StoreObservers) -> MessageStore {
    let meta = SessionMeta::new(workdir);
    let path = session_file_path(session_root, workdir, &meta.id);
    MessageStore::new(meta, SessionLog::new(path), observers)
}

/// Load child sessions referenced by subagent blocks.  Missing children
/// are tolerated: the parent still loads.
fn load_subagent_children(
    store: &MessageStore,
    callbacks: &AgentCallbacks,
    session_root: &std::path::Path,
    workdir: &std::path::Path,
) {
    for message in store.messages() {
        for block in &message.blocks {
            if let crate::message::Block::Subagent { subagent_id, session_id, .. } = block {
                let path = session_file_path(session_root, workdir, session_id);
                match read_session(&path) {
                    Ok(child) => {
                        if let Some(cb) = &callbacks.on_subagent_messages_change {
                            cb(subagent_id, &child.messages);
                        }
                    }
                    Err(e) => {
                        warn!(%subagent_id, %session_id, error = %e,
                              "subagent session missing; parent loads without it");
                    }
                }
            }
        }
    }
}

fn spawn_task_listener(inner: &Arc<AgentInner>, mut rx: mpsc::UnboundedReceiver<String>) {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        while let Some(task_id) = rx.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            if inner.destroyed.load(Ordering::SeqCst) {
                break;
            }
            if !inner.muted.load(Ordering::SeqCst) {
                if let Some(cb) = &inner.callbacks.on_background_tasks_change {
                    cb(&inner.tasks.snapshot());
                }
            }
            // React only while idle: a turn in flight holds the store lock,
            // so waiting here defers the synthetic round until it ends.
            let mut store = inner.store.lock().await;
            if inner.destroyed.load(Ordering::SeqCst) {
                break;
            }
            inner.run_background_round(&mut store, &task_id).await;
        }
    });
}

impl AgentInner {
    fn begin_turn(&self, parent: Option<CancellationToken>) -> CancellationToken {
        let token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        *self.abort.lock().expect("abort lock poisoned") = token.clone();
        token
    }

    pub(crate) fn current_token(&self) -> CancellationToken {
        self.abort.lock().expect("abort lock poisoned").clone()
    }

    fn effective_system_prompt(&self) -> Option<String> {
        let memory = memory::load(&self.workdir);
        match (&self.system_prompt, memory.trim().is_empty()) {
            (Some(prompt), true) => Some(prompt.clone()),
            (Some(prompt), false) => Some(format!("{prompt}\n\n# Memory\n{memory}")),
            (None, true) => None,
            (None, false) => Some(format!("# Memory\n{memory}")),
        }
    }

    /// The recursive call/execute cycle for one turn.
    pub(crate) async fn run_loop(&self, store: &mut MessageStore, token: &CancellationToken) {
        let mut stop_retried = false;
        loop {
            let outcome = self.model_round(store, token).await;
            let (calls, had_tool_activity, needs_compression, errored) = match outcome {
                RoundOutcome::Aborted => {
                    store.finish_assistant();
                    return;
                }
                RoundOutcome::Completed { calls, had_tool_activity, needs_compression, errored } => {
                    (calls, had_tool_activity, needs_compression, errored)
                }
            };

            // Compression fires before the next recursion (and before the
            // turn finalises, so an oversized final round still compacts).
            if needs_compression {
                if let Err(e) =
                    compress::run(store, self.gateway.as_ref(), &self.live, self.fresh_window)
                        .await
                {
                    warn!(error = %e, "compression failed; continuing without summarising");
                }
            }

            if errored {
                store.finish_assistant();
                return;
            }

            if !had_tool_activity {
                store.finish_assistant();
                let outcome = self.hooks.fire(HookEvent::Stop, None).await;
                if outcome.blocked && !stop_retried {
                    // One Stop-retry per turn; a second block finalises to
                    // avoid an infinite loop.
                    stop_retried = true;
                    store.append_message(Message::user(outcome.stderr));
                    continue;
                }
                return;
            }

            let all_backgrounded = self.dispatch_round(store, token, calls).await;
            store.finish_assistant();

            if token.is_cancelled() {
                return;
            }
            if all_backgrounded {
                // Manual-background stop: the round's synchronous results
                // are all placeholders, so recursing would stall the model.
                debug!("all tool calls backgrounded; finalising turn");
                return;
            }
        }
    }

    /// Call the model once, streaming blocks into the store.
    async fn model_round(
        &self,
        store: &mut MessageStore,
        token: &CancellationToken,
    ) -> RoundOutcome {
        let mode = self.gate.mode();
        let model = self
            .model_override
            .clone()
            .unwrap_or_else(|| self.live.model_config().agent_model);

        let req = CompletionRequest {
            model: model.clone(),
            messages: store.wire_messages(self.effective_system_prompt().as_deref()),
            tools: self
                .tools
                .schemas_for_mode(mode)
                .into_iter()
                .map(|s| wave_model::ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect(),
            stream: true,
        };

        store.start_assistant();

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return RoundOutcome::Aborted,
            result = self.gateway.complete(req) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    store.append_error_block(&format!("Model request failed: {e}"));
                    return RoundOutcome::Completed {
                        calls: Vec::new(),
                        had_tool_activity: false,
                        needs_compression: false,
                        errored: true,
                    };
                }
            },
        };

        use futures::StreamExt;
        let mut needs_compression = false;
        let mut errored = false;
        let mut aborted = false;
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    aborted = true;
                    break;
                }
                event = stream.next() => event,
            };
            match event {
                None => break,
                Some(Err(e)) => {
                    store.append_error_block(&format!("Model stream failed: {e}"));
                    errored = true;
                    break;
                }
                Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                    store.append_text_delta(&delta);
                }
                Some(Ok(ResponseEvent::TextDelta(_))) => {}
                Some(Ok(ResponseEvent::ToolCall { index, id, name, arguments })) => {
                    store.tool_delta(index, &id, &name, &arguments);
                }
                Some(Ok(ResponseEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                })) => {
                    store.record_usage(Usage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens,
                        model: model.clone(),
                        operation_type: self.usage_kind,
                    });
                    let used = prompt_tokens as usize + completion_tokens as usize;
                    if used > self.live.max_input_tokens() {
                        needs_compression = true;
                    }
                }
                Some(Ok(ResponseEvent::Done)) => break,
                Some(Ok(ResponseEvent::Error(e))) => {
                    warn!("model stream warning: {e}");
                }
            }
        }

        if aborted {
            // Silently drop partially streamed tool calls; completed text
            // stays, and no error blocks for in-flight work.
            for block in store.current_tool_blocks() {
                if block.stage < crate::message::ToolStage::Running {
                    store.drop_tool_block(&block.id);
                }
            }
            return RoundOutcome::Aborted;
        }

        // Assemble the round's tool calls from the accumulated blocks.
        let mut calls = Vec::new();
        let blocks = store.current_tool_blocks();
        let had_tool_activity = !blocks.is_empty();
        for block in blocks {
            let parsed: Result<serde_json::Value, _> = if block.parameters.is_empty() {
                Ok(json!({}))
            } else {
                serde_json::from_str(&block.parameters)
            };
            match parsed {
                Ok(args) => calls.push(ParsedCall { block_id: block.id, name: block.name, args }),
                Err(_) if token.is_cancelled() => {
                    store.drop_tool_block(&block.id);
                }
                Err(e) => {
                    debug!(tool = %block.name, error = %e, "tool arguments failed to parse");
                    store.set_tool_parse_error(
                        &block.id,
                        format!("Failed to parse tool arguments for {}", block.name),
                    );
                }
            }
        }

        RoundOutcome::Completed { calls, had_tool_activity, needs_compression, errored }
    }

    /// Gate, hook, execute, and record one round of tool calls.  Returns
    /// true when every call in the round backgrounded itself.
    async fn dispatch_round(
        &self,
        store: &mut MessageStore,
        token: &CancellationToken,
        calls: Vec<ParsedCall>,
    ) -> bool {
        if calls.is_empty() {
            return false;
        }
        let ctx = ToolContext {
            workdir: self.workdir.clone(),
            cancel: token.clone(),
            tasks: self.tasks.clone(),
            session_id: store.session_id().to_string(),
        };

        // Phase 1: permission gate and PreToolUse, sequential because both
        // may suspend on interactive callbacks.
        let mut runnable: Vec<ParsedCall> = Vec::new();
        for call in calls {
            if token.is_cancelled() {
                // Aborted before dispatch: remaining calls never execute.
                return false;
            }
            let Some(tool) = self.tools.get(&call.name) else {
                store.tool_end(
                    &call.block_id,
                    false,
                    Some(format!("unknown tool: {}", call.name)),
                    Some(format!("unknown tool: {}", call.name)),
                    false,
                );
                continue;
            };
            let tool_call = ToolCall {
                id: call.block_id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            };
            match self.gate.check(tool.as_ref(), &tool_call).await {
                GateDecision::Denied { message } => {
                    store.tool_end(
                        &call.block_id,
                        false,
                        Some(message.clone()),
                        Some(message),
                        false,
                    );
                    continue;
                }
                GateDecision::Allowed => {}
            }
            let hook = self.hooks.fire(HookEvent::PreToolUse, Some(&call.name)).await;
            if hook.blocked {
                // The hook's stderr becomes the tool's result; the handler
                // is never invoked.
                store.tool_end(&call.block_id, false, Some(hook.stderr), None, false);
                continue;
            }
            runnable.push(call);
        }

        // Phase 2: execute in parallel; results are recorded in call order
        // below even when handlers complete out of order.
        for call in &runnable {
            store.tool_running(&call.block_id);
        }
        let mut handles = Vec::with_capacity(runnable.len());
        for call in &runnable {
            let registry = Arc::clone(&self.tools);
            let tool_call = ToolCall {
                id: call.block_id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            };
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move { registry.execute(&tool_call, &ctx).await }));
        }

        // Phase 3: record results and fire PostToolUse per call.
        let mut post_notices: Vec<String> = Vec::new();
        for (call, handle) in runnable.iter().zip(handles) {
            let output = match handle.await {
                Ok(output) => output,
                Err(e) => ToolOutput::err(&call.block_id, format!("tool execution panicked: {e}")),
            };
            if let Some(task_id) = &output.background_task_id {
                self.announce_background_task(task_id);
            }
            store.tool_end(
                &call.block_id,
                !output.is_error,
                Some(output.content.clone()),
                output.is_error.then(|| output.content.clone()),
                output.manually_backgrounded,
            );
            self.drain_tool_events();

            let hook = self.hooks.fire(HookEvent::PostToolUse, Some(&call.name)).await;
            if hook.blocked {
                post_notices.push(hook.stderr);
            }
        }
        // A blocking PostToolUse surfaces to the model as a synthetic user
        // message on the next round.
        for notice in post_notices {
            store.append_message(Message::user(notice));
        }

        let blocks = store.current_tool_blocks();
        !blocks.is_empty() && blocks.iter().all(|b| b.manually_backgrounded)
    }

    /// Background-task completion trigger: synthesise a
    /// `TaskOutput(task_id, block=false)` call and run a full model round
    /// so the model can react.
    async fn run_background_round(&self, store: &mut MessageStore, task_id: &str) {
        debug!(task_id, "background task finished; synthesising TaskOutput round");
        let token = self.begin_turn(None);
        let args = json!({ "task_id": task_id, "block": false });
        let block_id = store.append_synthetic_tool_call("TaskOutput", &args);
        self.dispatch_round(
            store,
            &token,
            vec![ParsedCall { block_id, name: "TaskOutput".to_string(), args }],
        )
        .await;
        store.finish_assistant();
        self.run_loop(store, &token).await;
        store.touch();
    }

    fn drain_tool_events(&self) {
        let mut rx = self.tool_events.lock().expect("tool events lock poisoned");
        while let Ok(event) = rx.try_recv() {
            match event {
                ToolEvent::ModeChanged(mode) => {
                    if !self.muted.load(Ordering::SeqCst) {
                        if let Some(cb) = &self.callbacks.on_permission_mode_change {
                            cb(mode);
                        }
                    }
                }
            }
        }
    }

    fn announce_background_task(&self, task_id: &str) {
        if self.muted.load(Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.tasks.get(task_id) {
            if let Some(cb) = &self.callbacks.on_background_current_task {
                cb(&task);
            }
        }
        if let Some(cb) = &self.callbacks.on_background_tasks_change {
            cb(&self.tasks.snapshot());
        }
    }
}
