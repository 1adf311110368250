// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use wave_config::HookEntry;

use crate::denylist::is_denied_command;
use crate::exec::run_shell_command;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Lifecycle events hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    Stop,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::Stop => "Stop",
        }
    }

    /// Events that carry a tool name (and therefore honour matchers).
    fn has_tool(&self) -> bool {
        matches!(self, Self::PreToolUse | Self::PostToolUse)
    }
}

/// Result of firing one event's hook list.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    /// A command exited with code 2; remaining hooks were not run and the
    /// caller applies the event-specific blocking semantics.
    pub blocked: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs configured lifecycle command hooks.
pub struct HookEngine {
    entries: HashMap<String, Vec<HookEntry>>,
    project_dir: PathBuf,
}

impl HookEngine {
    pub fn new(entries: HashMap<String, Vec<HookEntry>>, project_dir: PathBuf) -> Self {
        Self { entries, project_dir }
    }

    pub fn empty(project_dir: PathBuf) -> Self {
        Self::new(HashMap::new(), project_dir)
    }

    /// Fire all hooks for `event` in configuration order.
    ///
    /// A command exiting with code 2 is a blocking failure: the remaining
    /// hooks in the list are skipped and `blocked` is set with that
    /// command's stderr.  Any other failure (nonzero exit, timeout, spawn
    /// error) is logged and the list continues.
    pub async fn fire(&self, event: HookEvent, tool_name: Option<&str>) -> HookOutcome {
        let Some(entries) = self.entries.get(event.as_str()) else {
            return HookOutcome::default();
        };

        let mut outcome = HookOutcome::default();
        for entry in entries {
            if event.has_tool() {
                if let Some(matcher) = &entry.matcher {
                    let matched = tool_name
                        .map(|name| matcher_matches(matcher, name))
                        .unwrap_or(false);
                    if !matched {
                        continue;
                    }
                }
            }

            let timeout = Duration::from_secs(
                entry
                    .timeout_secs
                    .unwrap_or(DEFAULT_TIMEOUT_SECS)
                    .min(MAX_TIMEOUT_SECS),
            );
            let envs = self.hook_env(event, tool_name);

            for command in &entry.commands {
                if is_denied_command(command) {
                    warn!(event = event.as_str(), %command, "hook command rejected by denylist");
                    continue;
                }
                debug!(event = event.as_str(), %command, "running hook");
                match run_shell_command(command, &envs, &self.project_dir, timeout).await {
                    Ok(result) => {
                        if result.timed_out {
                            warn!(event = event.as_str(), %command, "hook timed out");
                            continue;
                        }
                        outcome.stdout.push_str(&result.stdout);
                        if result.exit_code == Some(2) {
                            outcome.blocked = true;
                            outcome.stderr = result.stderr;
                            return outcome;
                        }
                        if result.exit_code != Some(0) {
                            warn!(
                                event = event.as_str(),
                                %command,
                                exit_code = ?result.exit_code,
                                "hook exited nonzero"
                            );
                        }
                        outcome.stderr.push_str(&result.stderr);
                    }
                    Err(e) => {
                        warn!(event = event.as_str(), %command, error = %e, "hook failed to run");
                    }
                }
            }
        }
        outcome
    }

    fn hook_env(&self, event: HookEvent, tool_name: Option<&str>) -> Vec<(String, String)> {
        let mut envs = vec![
            (
                "PROJECT_DIR".to_string(),
                self.project_dir.to_string_lossy().to_string(),
            ),
            ("HOOK_EVENT".to_string(), event.as_str().to_string()),
            ("TIMESTAMP".to_string(), Utc::now().to_rfc3339()),
        ];
        if let Some(name) = tool_name {
            envs.push(("TOOL_NAME".to_string(), name.to_string()));
        }
        envs
    }
}

/// Tool-name matcher: a simple glob where `*` matches anything and `?`
/// matches one character.  Anything else is literal.
fn matcher_matches(pattern: &str, tool_name: &str) -> bool {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|re| re.is_match(tool_name)).unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
