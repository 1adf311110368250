// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Construction-time option validation errors.
///
/// These are the only errors that escape agent construction; everything
/// after construction is recovered into the conversation (error blocks,
/// failed tool blocks) rather than propagated.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("workdir must not be empty")]
    EmptyWorkdir,
    #[error("apiKey must not be an empty string")]
    EmptyApiKey,
    #[error("baseURL must not be an empty string")]
    EmptyBaseUrl,
    #[error("maxInputTokens must be a positive integer (got {0})")]
    InvalidMaxInputTokens(usize),
    #[error("unknown permission mode: {0:?}")]
    UnknownPermissionMode(String),
    #[error("model name must not be an empty string")]
    EmptyModelName,
}
