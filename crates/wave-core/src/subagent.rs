// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subagent manager: child turn controllers with their own stores and
//! session files, driven by a different system prompt and possibly model.
//!
//! A subagent shares the parent's live-config capability object, so env
//! updates propagate immediately; `Inherit` resolves the parent's current
//! model on every round.  Aborts flow parent → child through a child
//! cancellation token; a child abort never touches the parent.

use std::sync::{Arc, RwLock};

use anyhow::bail;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use wave_config::{load_settings, LiveConfig, LocalSettingsFile, ModelConfig};
use wave_hooks::HookEngine;
use wave_tools::{BackgroundTasks, PermissionGate, RuleSet};

use crate::agent::{Agent, AgentParts};
use crate::message::{Block, Message, OperationType, Role, SubagentStatus};
use crate::options::AgentCallbacks;
use crate::session::{session_file_path, SessionLog, SessionMeta};
use crate::store::{MessageStore, StoreObservers};

/// Model policy for a subagent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubagentModel {
    /// Use the parent's current model, resolved on every round.
    Inherit,
    Override(String),
}

#[derive(Debug, Clone)]
pub struct SubagentConfig {
    pub name: String,
    pub system_prompt: String,
    /// Names of parent tools to expose; empty exposes the full registry.
    pub tools: Vec<String>,
    pub model: SubagentModel,
}

/// A running subagent instance.
pub struct SubagentHandle {
    pub id: String,
    /// The child's session id (also recorded on the parent's block).
    pub session_id: String,
    model: SubagentModel,
    live: LiveConfig,
    agent: Agent,
    parent: Agent,
}

impl SubagentHandle {
    /// The model selection this subagent runs with right now.  `Inherit`
    /// tracks the parent's live config, so env changes show up here.
    pub fn model_config(&self) -> ModelConfig {
        let base = self.live.model_config();
        match &self.model {
            SubagentModel::Inherit => base,
            SubagentModel::Override(name) => ModelConfig {
                agent_model: name.clone(),
                fast_model: base.fast_model,
            },
        }
    }

    /// Run one subagent turn and return its final assistant text.  The
    /// parent's `subagent` block status is updated when the turn ends.
    pub async fn run(&self, prompt: &str) -> anyhow::Result<String> {
        let parent_token = self.parent.inner().current_token();
        let result = self
            .agent
            .send_message_linked(prompt, Vec::new(), Some(parent_token))
            .await;

        let status = if result.is_ok() {
            SubagentStatus::Completed
        } else {
            SubagentStatus::Failed
        };
        self.parent
            .inner()
            .store
            .lock()
            .await
            .update_subagent_status(&self.id, status);
        result?;
        Ok(self.agent.last_assistant_text().await)
    }

    /// Abort the child's in-flight turn only; the parent is unaffected.
    pub fn abort(&self) {
        self.agent.abort();
    }

    /// The child agent (its store, usages, and session are independent).
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

impl Agent {
    /// Create a child turn controller + store for `config`.  The parent
    /// records a `subagent` block referencing the child session id.
    pub async fn spawn_subagent(&self, config: SubagentConfig) -> anyhow::Result<SubagentHandle> {
        let inner = self.inner();
        if inner.destroyed.load(std::sync::atomic::Ordering::SeqCst) {
            bail!("agent has been destroyed");
        }

        let subagent_id = Uuid::new_v4().to_string();
        let child_meta = SessionMeta::new(&inner.workdir);
        let child_session_id = child_meta.id.clone();
        let child_path =
            session_file_path(&inner.session_root, &inner.workdir, &child_session_id);

        // Child message changes surface through the parent's per-subagent
        // callback rather than the main messages-change channel.
        let routed = inner.callbacks.on_subagent_messages_change.clone().map(|cb| {
            let id = subagent_id.clone();
            Arc::new(move |messages: &[Message]| cb(&id, messages))
                as Arc<dyn Fn(&[Message]) + Send + Sync>
        });
        let child_observers = StoreObservers {
            on_messages_change: routed,
            on_usages_change: None,
            on_tool_block_updated: None,
            muted: Arc::clone(&inner.muted),
        };
        let child_store = MessageStore::new(
            child_meta,
            SessionLog::new(child_path),
            child_observers.clone(),
        );

        let tool_names = if config.tools.is_empty() {
            inner.tools.names()
        } else {
            config.tools.clone()
        };
        let child_registry = inner.tools.subset(&tool_names);

        let settings = load_settings(&inner.workdir);
        let child_mode = Arc::new(RwLock::new(inner.gate.mode()));
        let child_gate = PermissionGate::new(
            child_mode,
            RuleSet::from_strings(&settings.permissions.allow),
            Arc::new(LocalSettingsFile::new(&inner.workdir)),
            None,
            None,
        );

        let (tasks, task_rx) = BackgroundTasks::new();
        let (_tool_event_tx, tool_event_rx) = mpsc::unbounded_channel();
        let model_override = match &config.model {
            SubagentModel::Override(name) => Some(name.clone()),
            SubagentModel::Inherit => None,
        };

        let child = Agent::from_parts(AgentParts {
            workdir: inner.workdir.clone(),
            live: inner.live.clone(),
            gateway: Arc::clone(&inner.gateway),
            tools: Arc::new(child_registry),
            gate: child_gate,
            hooks: HookEngine::empty(inner.workdir.clone()),
            tasks,
            task_rx,
            store: child_store,
            observers: child_observers,
            callbacks: AgentCallbacks::default(),
            muted: Arc::clone(&inner.muted),
            system_prompt: Some(config.system_prompt.clone()),
            fresh_window: inner.fresh_window,
            usage_kind: OperationType::Subagent,
            model_override,
            tool_events: tool_event_rx,
            session_root: inner.session_root.clone(),
        });

        let model_label = match &config.model {
            SubagentModel::Inherit => "inherit".to_string(),
            SubagentModel::Override(name) => name.clone(),
        };
        let block = Block::Subagent {
            subagent_id: subagent_id.clone(),
            subagent_name: config.name.clone(),
            status: SubagentStatus::Running,
            session_id: child_session_id.clone(),
            configuration: json!({
                "name": config.name,
                "tools": tool_names,
                "model": model_label,
            }),
        };
        let message = Message {
            role: Role::Assistant,
            blocks: vec![block],
            usage: None,
            session_id: Some(child_session_id.clone()),
            attachments: Vec::new(),
        };
        inner.store.lock().await.append_message(message);

        Ok(SubagentHandle {
            id: subagent_id,
            session_id: child_session_id,
            model: config.model,
            live: inner.live.clone(),
            agent: child,
            parent: self.clone(),
        })
    }
}
