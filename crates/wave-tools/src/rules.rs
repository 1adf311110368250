// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent permission rules of the form `ToolName(arg-predicate)`.
//!
//! `Bash(whoami)` allows the `Bash` tool when its command string is
//! `whoami`.  A bare `ToolName` (no parentheses) allows the tool for any
//! arguments.  Compound shell commands are decomposed on `&&` — an
//! invocation like `mkdir -p x && cd x` is allowed only when every
//! sub-command matches a rule, and a new rule persisted for a compound
//! command is stored as one rule per sub-command.

/// A parsed allow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    pub tool: String,
    /// `None` matches any arguments.
    pub predicate: Option<String>,
}

impl PermissionRule {
    /// Parse `ToolName(predicate)` or bare `ToolName`.  Returns `None` for
    /// strings that are not syntactically a rule (empty name, unbalanced
    /// parens).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('(') {
            None => Some(Self { tool: raw.to_string(), predicate: None }),
            Some((tool, rest)) => {
                let tool = tool.trim();
                let predicate = rest.strip_suffix(')')?.trim();
                if tool.is_empty() {
                    return None;
                }
                Some(Self {
                    tool: tool.to_string(),
                    predicate: Some(predicate.to_string()),
                })
            }
        }
    }

    fn matches_part(&self, tool_name: &str, part: &str) -> bool {
        if self.tool != tool_name {
            return false;
        }
        match &self.predicate {
            None => true,
            Some(p) => p == part,
        }
    }
}

/// Split a command string on `&&` into trimmed sub-commands.
fn split_command(command: &str) -> Vec<&str> {
    command
        .split("&&")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Decompose a rule string with a compound predicate into one rule per
/// sub-command, so only individually-matchable commands are persisted:
/// `Bash(mkdir -p x && cd x)` → `["Bash(mkdir -p x)", "Bash(cd x)"]`.
/// Rules without a compound predicate pass through unchanged.
pub fn split_rule_on_and(raw: &str) -> Vec<String> {
    match PermissionRule::parse(raw) {
        Some(PermissionRule { tool, predicate: Some(p) }) if p.contains("&&") => {
            split_command(&p)
                .into_iter()
                .map(|part| format!("{tool}({part})"))
                .collect()
        }
        _ => vec![raw.trim().to_string()],
    }
}

/// The merged, queryable set of allow rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<PermissionRule>,
}

impl RuleSet {
    pub fn from_strings<S: AsRef<str>>(raw: &[S]) -> Self {
        let rules = raw
            .iter()
            .filter_map(|s| PermissionRule::parse(s.as_ref()))
            .collect();
        Self { rules }
    }

    pub fn add(&mut self, raw: &str) {
        if let Some(rule) = PermissionRule::parse(raw) {
            if !self.rules.contains(&rule) {
                self.rules.push(rule);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Match an invocation.  Compound command strings are decomposed on
    /// `&&`; every sub-command must match some rule.
    pub fn matches(&self, tool_name: &str, argument: &str) -> bool {
        let parts = split_command(argument);
        if parts.is_empty() {
            return self
                .rules
                .iter()
                .any(|r| r.matches_part(tool_name, argument.trim()));
        }
        parts.iter().all(|part| {
            self.rules.iter().any(|r| r.matches_part(tool_name, part))
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
