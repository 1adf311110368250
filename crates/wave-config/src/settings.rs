// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One hook registration: an optional tool-name matcher plus the shell
/// commands to run when the event fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    /// Per-entry timeout override in seconds.  Clamped to 300 by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsSettings {
    /// Persistent allow rules of the form `ToolName(arg-predicate)`.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Startup permission mode.  Invalid values are ignored with a warning
    /// so a typo in a settings file cannot brick the agent.
    #[serde(default, rename = "defaultMode", skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<String>,
}

/// Merged view of the settings files.
///
/// Sources, lowest to highest priority for scalar fields:
/// `<home>/.wave/settings.json`, then `<workdir>/.wave/settings.json`.
/// Rules from `<workdir>/.wave/settings.local.json` (the runtime-writable
/// file) are appended to the allow list; hook lists are concatenated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub permissions: PermissionsSettings,
    /// Event name → hook entries.  Event names are the literal lifecycle
    /// identifiers (`UserPromptSubmit`, `PreToolUse`, `PostToolUse`, `Stop`).
    #[serde(default)]
    pub hooks: HashMap<String, Vec<HookEntry>>,
    /// Environment block applied as the lowest-priority gateway config layer.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn read_settings_file(path: &Path) -> Option<Settings> {
    if !path.is_file() {
        return None;
    }
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read settings file");
            return None;
        }
    };
    match serde_json::from_str::<Settings>(&text) {
        Ok(s) => {
            debug!(path = %path.display(), "loaded settings layer");
            Some(s)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse settings file");
            None
        }
    }
}

fn merge_layer(base: &mut Settings, layer: Settings) {
    base.permissions.allow.extend(layer.permissions.allow);
    if layer.permissions.default_mode.is_some() {
        base.permissions.default_mode = layer.permissions.default_mode;
    }
    for (event, entries) in layer.hooks {
        base.hooks.entry(event).or_default().extend(entries);
    }
    for (k, v) in layer.env {
        base.env.insert(k, v);
    }
}

/// Load and merge the user, workdir, and workdir-local settings files.
pub fn load_settings(workdir: &Path) -> Settings {
    let mut merged = Settings::default();
    if let Some(home) = dirs::home_dir() {
        if let Some(layer) = read_settings_file(&home.join(".wave/settings.json")) {
            merge_layer(&mut merged, layer);
        }
    }
    if let Some(layer) = read_settings_file(&workdir.join(".wave/settings.json")) {
        merge_layer(&mut merged, layer);
    }
    // The local file carries runtime-persisted rules only; its other fields
    // are ignored so the agent cannot write itself new hooks or env vars.
    if let Some(layer) = read_settings_file(&workdir.join(".wave/settings.local.json")) {
        merged.permissions.allow.extend(layer.permissions.allow);
    }
    merged
}

/// The runtime-writable rules file (`<workdir>/.wave/settings.local.json`).
///
/// Writes serialise through an in-process async lock so that concurrent
/// rule persistence cannot tear the JSON.  Unknown fields present in the
/// file are preserved across writes.
#[derive(Debug)]
pub struct LocalSettingsFile {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalSettingsFile {
    pub fn new(workdir: &Path) -> Self {
        Self {
            path: workdir.join(".wave/settings.local.json"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current allow rules in the local file.
    pub fn rules(&self) -> Vec<String> {
        read_settings_file(&self.path)
            .map(|s| s.permissions.allow)
            .unwrap_or_default()
    }

    /// Append allow rules, creating the file (and `.wave/`) on first write.
    /// Duplicate rules are skipped.
    pub async fn append_rules(&self, rules: &[String]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut doc: serde_json::Value = match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", self.path.display()))?,
            Err(_) => serde_json::json!({}),
        };

        let allow = doc
            .as_object_mut()
            .context("settings.local.json root is not an object")?
            .entry("permissions")
            .or_insert_with(|| serde_json::json!({}))
            .as_object_mut()
            .context("permissions is not an object")?
            .entry("allow")
            .or_insert_with(|| serde_json::json!([]));
        let list = allow
            .as_array_mut()
            .context("permissions.allow is not an array")?;
        for rule in rules {
            if !list.iter().any(|v| v.as_str() == Some(rule)) {
                list.push(serde_json::Value::String(rule.clone()));
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, json: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, json).unwrap();
    }

    #[test]
    fn missing_files_yield_default_settings() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings(dir.path());
        assert!(s.permissions.allow.is_empty());
        assert!(s.hooks.is_empty());
    }

    #[test]
    fn workdir_rules_and_local_rules_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(".wave/settings.json"),
            r#"{"permissions":{"allow":["Bash(ls)"]}}"#,
        );
        write(
            &dir.path().join(".wave/settings.local.json"),
            r#"{"permissions":{"allow":["Bash(whoami)"]}}"#,
        );
        let s = load_settings(dir.path());
        assert!(s.permissions.allow.contains(&"Bash(ls)".to_string()));
        assert!(s.permissions.allow.contains(&"Bash(whoami)".to_string()));
    }

    #[test]
    fn local_file_cannot_contribute_hooks_or_env() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(".wave/settings.local.json"),
            r#"{"permissions":{"allow":[]},"env":{"WAVE_API_KEY":"sneaky"},
               "hooks":{"PreToolUse":[{"commands":["echo hi"]}]}}"#,
        );
        let s = load_settings(dir.path());
        assert!(s.env.is_empty());
        assert!(s.hooks.is_empty());
    }

    #[test]
    fn malformed_settings_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".wave/settings.json"), "{not json");
        let s = load_settings(dir.path());
        assert!(s.permissions.allow.is_empty());
    }

    #[tokio::test]
    async fn append_rules_creates_file_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSettingsFile::new(dir.path());
        local
            .append_rules(&["Bash(whoami)".to_string()])
            .await
            .unwrap();
        local
            .append_rules(&["Bash(whoami)".to_string(), "Bash(ls)".to_string()])
            .await
            .unwrap();
        let rules = local.rules();
        assert_eq!(rules, vec!["Bash(whoami)", "Bash(ls)"]);
    }

    #[tokio::test]
    async fn append_rules_preserves_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSettingsFile::new(dir.path());
        write(
            local.path(),
            r#"{"futureField":{"x":1},"permissions":{"allow":[]}}"#,
        );
        local
            .append_rules(&["Bash(pwd)".to_string()])
            .await
            .unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(local.path()).unwrap()).unwrap();
        assert_eq!(doc["futureField"]["x"], 1);
        assert_eq!(doc["permissions"]["allow"][0], "Bash(pwd)");
    }

    #[test]
    fn hook_lists_concatenate_across_layers() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join(".wave/settings.json"),
            r#"{"hooks":{"PreToolUse":[{"matcher":"Bash","commands":["echo a"]}]}}"#,
        );
        let s = load_settings(dir.path());
        assert_eq!(s.hooks["PreToolUse"].len(), 1);
        assert_eq!(s.hooks["PreToolUse"][0].matcher.as_deref(), Some("Bash"));
    }
}
