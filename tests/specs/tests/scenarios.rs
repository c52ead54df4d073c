// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: real listener sockets, real orchestrator sockets.

use std::time::Duration;

use serde_json::json;

use agentlink::push::correlator::CorrelationError;
use agentlink::registry::client::RegistryClient;
use agentlink::test_support::{sample_card, spawn_router, MockOrchestrator};
use agentlink_specs::{http_client, Listener};

#[tokio::test]
async fn bearer_callback_reaches_waiter() -> anyhow::Result<()> {
    let listener = Listener::bearer("secret123").await?;
    let handle = listener.correlator.register_token("T1", "session-1", "ctx-1")?;

    let resp = http_client()?
        .post(listener.notify_url())
        .header("Authorization", "Bearer secret123")
        .json(&json!({ "requestToken": "T1", "result": "42" }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let result = listener.correlator.wait(handle, Duration::from_secs(5)).await?;
    assert_eq!(result.text().as_deref(), Some("42"));
    listener.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn wrong_bearer_leaves_waiter_to_time_out() -> anyhow::Result<()> {
    let listener = Listener::bearer("secret123").await?;
    let handle = listener.correlator.register_token("T1", "session-1", "ctx-1")?;

    let resp = http_client()?
        .post(listener.notify_url())
        .header("Authorization", "Bearer wrong")
        .json(&json!({ "requestToken": "T1", "result": "42" }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let err = listener.correlator.wait(handle, Duration::from_millis(200)).await.err();
    assert!(matches!(err, Some(CorrelationError::Timeout { .. })));
    listener.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn callbacks_resolve_in_any_order() -> anyhow::Result<()> {
    let listener = Listener::bearer("secret123").await?;
    let first = listener.correlator.register("session-1", "ctx-1");
    let second = listener.correlator.register("session-1", "ctx-2");
    let client = http_client()?;

    for (token, value) in [(second.token(), "two"), (first.token(), "one")] {
        let resp = client
            .post(listener.notify_url())
            .bearer_auth("secret123")
            .json(&json!({ "requestToken": token, "result": value }))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    let one = listener.correlator.wait(first, Duration::from_secs(5)).await?;
    let two = listener.correlator.wait(second, Duration::from_secs(5)).await?;
    assert_eq!(one.text().as_deref(), Some("one"));
    assert_eq!(two.text().as_deref(), Some("two"));
    listener.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn list_reports_orchestrator_agents() -> anyhow::Result<()> {
    let orchestrator = MockOrchestrator::with_cards([
        sample_card("weather", "http://localhost:9001", &["forecast", "alerts"]),
        sample_card("billing", "http://localhost:9002", &["invoice"]),
        sample_card("search", "http://localhost:9003", &["web", "news", "images"]),
    ]);
    let (addr, task) = spawn_router(orchestrator.router()).await?;
    let client = RegistryClient::with_client(&format!("http://{addr}"), http_client()?);

    let catalogue = client.list().await?;
    assert_eq!(catalogue.len(), 3);
    let expected = [
        ("weather", "http://localhost:9001", 2),
        ("billing", "http://localhost:9002", 1),
        ("search", "http://localhost:9003", 3),
    ];
    for (agent, (name, url, skills)) in catalogue.iter().zip(expected) {
        assert_eq!(agent.name, name);
        assert_eq!(agent.url, url);
        assert_eq!(agent.skills.len(), skills);
    }
    task.abort();
    Ok(())
}
