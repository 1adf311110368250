// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod error;
mod gateway;
mod live;
mod mode;
mod settings;

pub use error::OptionsError;
pub use gateway::{parse_custom_headers, resolve_gateway, GatewayConfig, GatewayOverrides};
pub use live::{ConfigUpdate, GatewayUpdate, LiveConfig, ModelConfig, DEFAULT_MAX_INPUT_TOKENS};
pub use mode::PermissionMode;
pub use settings::{
    load_settings, HookEntry, LocalSettingsFile, PermissionsSettings, Settings,
};
