// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use wave_config::{LocalSettingsFile, PermissionMode};

use crate::rules::{split_rule_on_and, RuleSet};
use crate::{Tool, ToolCall, ToolClass};

/// The request handed to the user approval callback.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub tool_input: Value,
}

/// The callback's verdict.
#[derive(Debug, Clone)]
pub enum PermissionResponse {
    Allow {
        /// Switch the gate to a new mode for subsequent calls.
        new_permission_mode: Option<PermissionMode>,
        /// Persist a rule so future matching calls skip the callback.
        new_permission_rule: Option<String>,
    },
    Deny {
        message: String,
    },
}

/// Async approval callback supplied by the host.
pub type CanUseTool = Arc<
    dyn Fn(PermissionRequest) -> BoxFuture<'static, anyhow::Result<PermissionResponse>>
        + Send
        + Sync,
>;

/// Outcome of the gate check for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// Do not execute; the message becomes the synthetic failed tool result.
    Denied { message: String },
}

/// The permission gate: mode + persistent rules + user callback.
pub struct PermissionGate {
    mode: Arc<RwLock<PermissionMode>>,
    rules: RwLock<RuleSet>,
    local: Arc<LocalSettingsFile>,
    callback: Option<CanUseTool>,
    on_mode_change: Option<Arc<dyn Fn(PermissionMode) + Send + Sync>>,
}

impl PermissionGate {
    pub fn new(
        mode: Arc<RwLock<PermissionMode>>,
        initial_rules: RuleSet,
        local: Arc<LocalSettingsFile>,
        callback: Option<CanUseTool>,
        on_mode_change: Option<Arc<dyn Fn(PermissionMode) + Send + Sync>>,
    ) -> Self {
        Self {
            mode,
            rules: RwLock::new(initial_rules),
            local,
            callback,
            on_mode_change,
        }
    }

    pub fn mode(&self) -> PermissionMode {
        *self.mode.read().expect("mode lock poisoned")
    }

    pub fn set_mode(&self, mode: PermissionMode) {
        *self.mode.write().expect("mode lock poisoned") = mode;
        if let Some(cb) = &self.on_mode_change {
            cb(mode);
        }
    }

    /// Decide whether a restricted tool invocation may execute.
    ///
    /// 1. Mode allows outright → allow.
    /// 2. Merged rule set matches → allow.
    /// 3. User callback → allow (optionally persisting a rule / switching
    ///    mode) or deny.  Absent or failing callback → deny.
    pub async fn check(&self, tool: &dyn Tool, call: &ToolCall) -> GateDecision {
        if tool.classification() == ToolClass::Unrestricted {
            return GateDecision::Allowed;
        }

        match self.mode() {
            PermissionMode::BypassPermissions => return GateDecision::Allowed,
            PermissionMode::AcceptEdits if tool.is_edit_tool() => {
                return GateDecision::Allowed;
            }
            PermissionMode::Plan => {
                return GateDecision::Denied {
                    message: format!(
                        "Permission denied: {} is not available in plan mode",
                        call.name
                    ),
                };
            }
            _ => {}
        }

        let argument = tool.permission_argument(&call.args);
        if self
            .rules
            .read()
            .expect("rules lock poisoned")
            .matches(&call.name, &argument)
        {
            debug!(tool = %call.name, "allowed by persistent rule");
            return GateDecision::Allowed;
        }

        let Some(callback) = &self.callback else {
            return GateDecision::Denied {
                message: format!(
                    "Permission denied: no approval available for {}",
                    call.name
                ),
            };
        };

        let request = PermissionRequest {
            tool_name: call.name.clone(),
            tool_input: call.args.clone(),
        };
        match callback(request).await {
            Ok(PermissionResponse::Allow { new_permission_mode, new_permission_rule }) => {
                if let Some(rule) = new_permission_rule {
                    self.persist_rule(&rule).await;
                }
                if let Some(mode) = new_permission_mode {
                    self.set_mode(mode);
                }
                GateDecision::Allowed
            }
            Ok(PermissionResponse::Deny { message }) => GateDecision::Denied { message },
            Err(e) => GateDecision::Denied {
                message: format!("Permission callback failed: {e}"),
            },
        }
    }

    /// Persist a rule to `settings.local.json` and the in-memory set.
    /// Compound predicates are decomposed so only individual sub-commands
    /// are stored.  Persistence failures are logged; the in-memory rule
    /// still applies for this process.
    async fn persist_rule(&self, rule: &str) {
        let parts = split_rule_on_and(rule);
        {
            let mut rules = self.rules.write().expect("rules lock poisoned");
            for part in &parts {
                rules.add(part);
            }
        }
        if let Err(e) = self.local.append_rules(&parts).await {
            warn!(rule, error = %e, "failed to persist permission rule");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::ToolContext;
    use crate::ToolOutput;

    struct StubTool {
        name: &'static str,
        class: ToolClass,
        edit: bool,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type":"object"})
        }
        fn classification(&self) -> ToolClass {
            self.class
        }
        fn is_edit_tool(&self) -> bool {
            self.edit
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ran")
        }
    }

    fn bash() -> StubTool {
        StubTool { name: "Bash", class: ToolClass::Restricted, edit: false }
    }

    fn edit_tool() -> StubTool {
        StubTool { name: "EditFile", class: ToolClass::Restricted, edit: true }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), args }
    }

    fn gate_in(
        dir: &std::path::Path,
        mode: PermissionMode,
        rules: &[&str],
        callback: Option<CanUseTool>,
    ) -> PermissionGate {
        PermissionGate::new(
            Arc::new(RwLock::new(mode)),
            RuleSet::from_strings(rules),
            Arc::new(LocalSettingsFile::new(dir)),
            callback,
            None,
        )
    }

    fn counting_allow(rule: Option<&str>) -> (CanUseTool, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&count);
        let rule = rule.map(str::to_string);
        let cb: CanUseTool = Arc::new(move |_req| {
            c2.fetch_add(1, Ordering::SeqCst);
            let rule = rule.clone();
            Box::pin(async move {
                Ok(PermissionResponse::Allow {
                    new_permission_mode: None,
                    new_permission_rule: rule,
                })
            })
        });
        (cb, count)
    }

    #[tokio::test]
    async fn bypass_mode_always_allows() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_in(dir.path(), PermissionMode::BypassPermissions, &[], None);
        let d = gate.check(&bash(), &call("Bash", json!({"command":"rm -rf /"}))).await;
        assert_eq!(d, GateDecision::Allowed);
    }

    #[tokio::test]
    async fn plan_mode_denies_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_in(dir.path(), PermissionMode::Plan, &[], None);
        let d = gate.check(&bash(), &call("Bash", json!({"command":"ls"}))).await;
        assert!(matches!(d, GateDecision::Denied { message } if message.contains("plan mode")));
    }

    #[tokio::test]
    async fn accept_edits_auto_allows_edit_tools_only() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_in(dir.path(), PermissionMode::AcceptEdits, &[], None);
        let allowed = gate
            .check(&edit_tool(), &call("EditFile", json!({"path":"a"})))
            .await;
        assert_eq!(allowed, GateDecision::Allowed);
        let denied = gate.check(&bash(), &call("Bash", json!({"command":"ls"}))).await;
        assert!(matches!(denied, GateDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn matching_rule_skips_callback() {
        let dir = tempfile::tempdir().unwrap();
        let (cb, count) = counting_allow(None);
        let gate = gate_in(dir.path(), PermissionMode::Default, &["Bash(whoami)"], Some(cb));
        let d = gate.check(&bash(), &call("Bash", json!({"command":"whoami"}))).await;
        assert_eq!(d, GateDecision::Allowed);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_invoked_once_when_rule_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (cb, count) = counting_allow(Some("Bash(whoami)"));
        let gate = gate_in(dir.path(), PermissionMode::Default, &[], Some(cb));

        let first = gate.check(&bash(), &call("Bash", json!({"command":"whoami"}))).await;
        assert_eq!(first, GateDecision::Allowed);
        let second = gate.check(&bash(), &call("Bash", json!({"command":"whoami"}))).await;
        assert_eq!(second, GateDecision::Allowed);
        assert_eq!(count.load(Ordering::SeqCst), 1, "second call must match the persisted rule");

        let local = LocalSettingsFile::new(dir.path());
        assert!(local.rules().contains(&"Bash(whoami)".to_string()));
    }

    #[tokio::test]
    async fn compound_rule_is_persisted_decomposed() {
        let dir = tempfile::tempdir().unwrap();
        let (cb, _count) = counting_allow(Some("Bash(mkdir -p x && cd x)"));
        let gate = gate_in(dir.path(), PermissionMode::Default, &[], Some(cb));
        let d = gate
            .check(&bash(), &call("Bash", json!({"command":"mkdir -p x && cd x"})))
            .await;
        assert_eq!(d, GateDecision::Allowed);
        let rules = LocalSettingsFile::new(dir.path()).rules();
        assert!(rules.contains(&"Bash(mkdir -p x)".to_string()));
        assert!(rules.contains(&"Bash(cd x)".to_string()));
        assert!(!rules.iter().any(|r| r.contains("&&")));
    }

    #[tokio::test]
    async fn missing_callback_denies() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_in(dir.path(), PermissionMode::Default, &[], None);
        let d = gate.check(&bash(), &call("Bash", json!({"command":"ls"}))).await;
        assert!(matches!(d, GateDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn deny_response_carries_message() {
        let dir = tempfile::tempdir().unwrap();
        let cb: CanUseTool = Arc::new(|_req| {
            Box::pin(async {
                Ok(PermissionResponse::Deny { message: "not on my watch".into() })
            })
        });
        let gate = gate_in(dir.path(), PermissionMode::Default, &[], Some(cb));
        let d = gate.check(&bash(), &call("Bash", json!({"command":"ls"}))).await;
        assert!(matches!(d, GateDecision::Denied { message } if message == "not on my watch"));
    }

    #[tokio::test]
    async fn callback_mode_switch_applies_to_gate() {
        let dir = tempfile::tempdir().unwrap();
        let cb: CanUseTool = Arc::new(|_req| {
            Box::pin(async {
                Ok(PermissionResponse::Allow {
                    new_permission_mode: Some(PermissionMode::BypassPermissions),
                    new_permission_rule: None,
                })
            })
        });
        let gate = gate_in(dir.path(), PermissionMode::Default, &[], Some(cb));
        let _ = gate.check(&bash(), &call("Bash", json!({"command":"ls"}))).await;
        assert_eq!(gate.mode(), PermissionMode::BypassPermissions);
    }

    #[tokio::test]
    async fn unrestricted_tool_never_gates() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_in(dir.path(), PermissionMode::Plan, &[], None);
        let tool = StubTool { name: "TaskOutput", class: ToolClass::Unrestricted, edit: false };
        let d = gate.check(&tool, &call("TaskOutput", json!({}))).await;
        assert_eq!(d, GateDecision::Allowed);
    }
}
