// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::Regex;

/// Hook commands that are never executed, regardless of configuration:
/// recursive deletion of root/home/wildcard paths, raw disk writers,
/// filesystem formatters, fork bombs, `eval` of command substitutions,
/// and process replacement via `exec`.
fn denied_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // rm -rf / , rm -rf ~ , rm -rf $HOME , rm -rf /* , rm -rf *
            r"\brm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(/|~|\$HOME|\*|/\*)(\s|$)",
            r"\brm\s+-[a-zA-Z]*[rR]f?\s+--no-preserve-root",
            // raw device writers
            r"\bdd\s+[^|;]*\bof=/dev/",
            r">\s*/dev/(sd|nvme|hd)",
            // filesystem formatters
            r"\bmkfs(\.[a-z0-9]+)?\b",
            // classic fork bomb
            r":\s*\(\s*\)\s*\{[^}]*:\s*\|\s*:",
            // eval of command substitution
            r"\beval\s+[^;|&]*\$\(",
            // process replacement
            r"^\s*exec\s",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("denylist pattern must compile"))
        .collect()
    })
}

/// Return `true` when the command matches the hook denylist and must be
/// rejected without running.
pub fn is_denied_command(command: &str) -> bool {
    denied_patterns().iter().any(|re| re.is_match(command))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
