// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod gateway;
mod mock;
mod types;

pub use gateway::{Gateway, GatewayEndpoint, HttpGateway, ResponseStream};
pub use mock::{MockGateway, Script, ScriptedGateway};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    ToolSchema,
};
