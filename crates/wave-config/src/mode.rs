// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::OptionsError;

/// Permission mode governing the tool gate.
///
/// The wire spelling (settings files, callbacks) is camelCase:
/// `default | acceptEdits | bypassPermissions | plan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Restricted tools require a matching rule or the user callback.
    #[default]
    Default,
    /// Edit-class restricted tools are auto-allowed; others still gate.
    AcceptEdits,
    /// Never gate.
    BypassPermissions,
    /// All effectful tools are disallowed; only the plan-exit tool can
    /// lift the mode.
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            "plan" => Ok(Self::Plan),
            other => Err(OptionsError::UnknownPermissionMode(other.to_string())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
