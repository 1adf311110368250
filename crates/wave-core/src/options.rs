// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use wave_config::{OptionsError, PermissionMode};
use wave_model::Gateway;
use wave_tools::{BackgroundTask, CanUseTool, Tool};

use crate::message::{Message, ToolBlock, Usage};

/// Host observer callbacks.  All fire synchronously before control
/// returns from the mutation, and none fires after `destroy()` returns.
#[derive(Clone, Default)]
pub struct AgentCallbacks {
    pub on_messages_change: Option<Arc<dyn Fn(&[Message]) + Send + Sync>>,
    pub on_usages_change: Option<Arc<dyn Fn(&[Usage]) + Send + Sync>>,
    pub on_tool_block_updated: Option<Arc<dyn Fn(&ToolBlock) + Send + Sync>>,
    pub on_subagent_messages_change: Option<Arc<dyn Fn(&str, &[Message]) + Send + Sync>>,
    pub on_permission_mode_change: Option<Arc<dyn Fn(PermissionMode) + Send + Sync>>,
    pub on_background_tasks_change: Option<Arc<dyn Fn(&[BackgroundTask]) + Send + Sync>>,
    pub on_background_current_task: Option<Arc<dyn Fn(&BackgroundTask) + Send + Sync>>,
}

/// Construction options for [`crate::Agent`].
///
/// Validation is fail-fast: these are the only errors that escape the
/// engine as `Err` — everything at runtime is recovered into the
/// conversation.
#[derive(Clone)]
pub struct AgentOptions {
    pub workdir: PathBuf,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub agent_model: Option<String>,
    pub fast_model: Option<String>,
    pub max_input_tokens: Option<usize>,
    pub permission_mode: Option<PermissionMode>,
    pub system_prompt: Option<String>,
    pub session_dir: Option<PathBuf>,
    pub restore_session_id: Option<String>,
    pub continue_last_session: bool,
    /// Messages kept verbatim at compression time (default 7).
    pub fresh_window: Option<usize>,
    /// Seed conversation for a fresh session.
    pub messages: Vec<Message>,
    pub can_use_tool: Option<CanUseTool>,
    pub callbacks: AgentCallbacks,
    /// Extra tools registered alongside the built-ins.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Gateway override (tests inject scripted gateways here).
    pub gateway: Option<Arc<dyn Gateway>>,
}

impl AgentOptions {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            api_key: None,
            base_url: None,
            default_headers: Vec::new(),
            agent_model: None,
            fast_model: None,
            max_input_tokens: None,
            permission_mode: None,
            system_prompt: None,
            session_dir: None,
            restore_session_id: None,
            continue_last_session: false,
            fresh_window: None,
            messages: Vec::new(),
            can_use_tool: None,
            callbacks: AgentCallbacks::default(),
            tools: Vec::new(),
            gateway: None,
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.workdir.as_os_str().is_empty() {
            return Err(OptionsError::EmptyWorkdir);
        }
        if self.api_key.as_deref() == Some("") {
            return Err(OptionsError::EmptyApiKey);
        }
        if self.base_url.as_deref() == Some("") {
            return Err(OptionsError::EmptyBaseUrl);
        }
        if self.max_input_tokens == Some(0) {
            return Err(OptionsError::InvalidMaxInputTokens(0));
        }
        if self.agent_model.as_deref() == Some("") || self.fast_model.as_deref() == Some("") {
            return Err(OptionsError::EmptyModelName);
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        assert!(AgentOptions::new("/tmp/w").validate().is_ok());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let mut o = AgentOptions::new("/tmp/w");
        o.api_key = Some(String::new());
        assert!(matches!(o.validate(), Err(OptionsError::EmptyApiKey)));
    }

    #[test]
    fn zero_max_input_tokens_is_rejected() {
        let mut o = AgentOptions::new("/tmp/w");
        o.max_input_tokens = Some(0);
        assert!(matches!(o.validate(), Err(OptionsError::InvalidMaxInputTokens(0))));
    }

    #[test]
    fn empty_workdir_is_rejected() {
        let o = AgentOptions::new("");
        assert!(matches!(o.validate(), Err(OptionsError::EmptyWorkdir)));
    }

    #[test]
    fn empty_model_name_is_rejected() {
        let mut o = AgentOptions::new("/tmp/w");
        o.agent_model = Some(String::new());
        assert!(matches!(o.validate(), Err(OptionsError::EmptyModelName)));
    }
}
