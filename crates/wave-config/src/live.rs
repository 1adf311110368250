// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Live configuration capability object.
//!
//! The engine resolves gateway, model, and limit settings on every use
//! rather than snapshotting them at construction, so env mutation from a
//! live-config watcher takes immediate effect.  Subagents hold a clone of
//! the parent's [`LiveConfig`] so the same resolution is observed on both
//! sides.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::gateway::{resolve_gateway, GatewayConfig, GatewayOverrides};

/// Compression trigger ceiling: `prompt_tokens + completion_tokens` above
/// this invokes the compression engine before the next model call.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 96_000;

const DEFAULT_AGENT_MODEL: &str = "gpt-4o";
const DEFAULT_FAST_MODEL: &str = "gpt-4o-mini";

/// Resolved model selection for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Primary model driving agent turns.
    pub agent_model: String,
    /// Secondary fast model used for compression summaries.
    pub fast_model: String,
}

#[derive(Debug, Default)]
struct LiveState {
    gateway: GatewayOverrides,
    agent_model: Option<String>,
    fast_model: Option<String>,
    max_input_tokens: Option<usize>,
    settings_env: HashMap<String, String>,
}

/// Partial gateway update for [`LiveConfig::update`].
#[derive(Debug, Clone, Default)]
pub struct GatewayUpdate {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
}

/// Hot-update payload: `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub gateway: Option<GatewayUpdate>,
    pub agent_model: Option<String>,
    pub fast_model: Option<String>,
    pub max_input_tokens: Option<usize>,
}

/// Cheap clonable handle over the shared mutable configuration state.
#[derive(Debug, Clone, Default)]
pub struct LiveConfig {
    inner: Arc<RwLock<LiveState>>,
}

impl LiveConfig {
    pub fn new(
        gateway: GatewayOverrides,
        agent_model: Option<String>,
        fast_model: Option<String>,
        max_input_tokens: Option<usize>,
        settings_env: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LiveState {
                gateway,
                agent_model,
                fast_model,
                max_input_tokens,
                settings_env,
            })),
        }
    }

    /// Resolve the gateway config for one request (programmatic > env >
    /// settings env block).
    pub fn gateway_config(&self) -> GatewayConfig {
        let state = self.inner.read().expect("live config poisoned");
        resolve_gateway(&state.gateway, &state.settings_env)
    }

    /// Resolve the model selection.  The process environment wins so a
    /// live env change (`WAVE_AGENT_MODEL` / `WAVE_FAST_MODEL`) propagates
    /// to running agents and their subagents without reconstruction.
    pub fn model_config(&self) -> ModelConfig {
        let state = self.inner.read().expect("live config poisoned");
        let env_model = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        ModelConfig {
            agent_model: env_model("WAVE_AGENT_MODEL")
                .or_else(|| state.agent_model.clone())
                .unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string()),
            fast_model: env_model("WAVE_FAST_MODEL")
                .or_else(|| state.fast_model.clone())
                .unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string()),
        }
    }

    pub fn max_input_tokens(&self) -> usize {
        self.inner
            .read()
            .expect("live config poisoned")
            .max_input_tokens
            .unwrap_or(DEFAULT_MAX_INPUT_TOKENS)
    }

    /// Apply a hot update.  Present fields replace the programmatic layer;
    /// absent fields are untouched.
    pub fn update(&self, update: ConfigUpdate) {
        let mut state = self.inner.write().expect("live config poisoned");
        if let Some(gw) = update.gateway {
            if gw.api_key.is_some() {
                state.gateway.api_key = gw.api_key;
            }
            if gw.base_url.is_some() {
                state.gateway.base_url = gw.base_url;
            }
            if let Some(headers) = gw.headers {
                state.gateway.headers = headers;
            }
        }
        if update.agent_model.is_some() {
            state.agent_model = update.agent_model;
        }
        if update.fast_model.is_some() {
            state.fast_model = update.fast_model;
        }
        if update.max_input_tokens.is_some() {
            state.max_input_tokens = update.max_input_tokens;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> LiveConfig {
        LiveConfig::new(
            GatewayOverrides::default(),
            Some("m-agent".into()),
            Some("m-fast".into()),
            None,
            HashMap::new(),
        )
    }

    #[test]
    fn model_config_uses_programmatic_values() {
        let cfg = live().model_config();
        assert_eq!(cfg.agent_model, "m-agent");
        assert_eq!(cfg.fast_model, "m-fast");
    }

    #[test]
    fn max_input_tokens_defaults_to_96000() {
        assert_eq!(live().max_input_tokens(), DEFAULT_MAX_INPUT_TOKENS);
    }

    #[test]
    fn update_gateway_api_key_is_visible_immediately() {
        let l = live();
        l.update(ConfigUpdate {
            gateway: Some(GatewayUpdate {
                api_key: Some("k-new".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(l.gateway_config().api_key.as_deref(), Some("k-new"));
    }

    #[test]
    fn update_leaves_absent_fields_untouched() {
        let l = live();
        l.update(ConfigUpdate {
            agent_model: Some("m2".into()),
            ..Default::default()
        });
        let cfg = l.model_config();
        assert_eq!(cfg.agent_model, "m2");
        assert_eq!(cfg.fast_model, "m-fast");
    }

    #[test]
    fn clones_share_state() {
        let a = live();
        let b = a.clone();
        a.update(ConfigUpdate {
            max_input_tokens: Some(123),
            ..Default::default()
        });
        assert_eq!(b.max_input_tokens(), 123);
    }
}
