// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests for the engine surface using the mock gateways.
use std::sync::Arc;

use wave::model::{MockGateway, ResponseEvent, ScriptedGateway};
use wave::{Agent, AgentOptions, PermissionMode};

fn options_in(dir: &tempfile::TempDir) -> AgentOptions {
    let mut options = AgentOptions::new(dir.path());
    options.session_dir = Some(dir.path().join("sessions"));
    options
}

#[tokio::test]
async fn agent_returns_mock_response() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = options_in(&dir);
    options.gateway = Some(Arc::new(MockGateway));
    let agent = Agent::new(options).unwrap();

    agent.send_message("hello", vec![]).await.unwrap();

    let reply = agent.last_assistant_text().await;
    assert!(reply.contains("MOCK: hello"), "got: {reply}");
}

#[tokio::test]
async fn turn_survives_a_gateway_failure() {
    // No gateway override and no key configured: the HTTP gateway fails
    // fast, and the failure lands as an error block rather than an Err.
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::new(options_in(&dir)).unwrap();

    agent.send_message("hello", vec![]).await.unwrap();

    let messages = agent.messages().await;
    assert_eq!(messages.len(), 2);
    assert!(matches!(
        &messages[1].blocks[0],
        wave::Block::Error { content } if content.contains("Model request failed")
    ));
}

#[tokio::test]
async fn session_persists_across_engine_instances() {
    let dir = tempfile::tempdir().unwrap();
    let session_id = {
        let mut options = options_in(&dir);
        options.gateway = Some(Arc::new(ScriptedGateway::always_text("first reply")));
        let agent = Agent::new(options).unwrap();
        agent.send_message("remember me", vec![]).await.unwrap();
        let id = agent.session_id().await;
        agent.destroy();
        id
    };

    let mut options = options_in(&dir);
    options.restore_session_id = Some(session_id);
    options.gateway = Some(Arc::new(ScriptedGateway::always_text("second reply")));
    let agent = Agent::new(options).unwrap();

    let messages = agent.messages().await;
    assert!(messages.iter().any(|m| m.text_content() == "remember me"));
    assert!(messages.iter().any(|m| m.text_content() == "first reply"));
}

#[tokio::test]
async fn permission_mode_round_trips_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = options_in(&dir);
    options.permission_mode = Some(PermissionMode::Plan);
    let agent = Agent::new(options).unwrap();
    assert_eq!(agent.permission_mode(), PermissionMode::Plan);
    agent.set_permission_mode(PermissionMode::Default);
    assert_eq!(agent.permission_mode(), PermissionMode::Default);
}

#[tokio::test]
async fn streamed_deltas_accumulate_into_one_text_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = options_in(&dir);
    options.gateway = Some(Arc::new(ScriptedGateway::from_events(vec![vec![
        ResponseEvent::TextDelta("stre".into()),
        ResponseEvent::TextDelta("amed".into()),
        ResponseEvent::Done,
    ]])));
    let agent = Agent::new(options).unwrap();

    agent.send_message("go", vec![]).await.unwrap();

    assert_eq!(agent.last_assistant_text().await, "streamed");
    let messages = agent.messages().await;
    assert_eq!(messages[1].blocks.len(), 1, "deltas merge into a single text block");
}
