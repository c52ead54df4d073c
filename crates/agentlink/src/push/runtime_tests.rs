// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::UnknownTokenStatus;
use crate::test_support::{jwks_router, spawn_router, TestSigner};

const AGENT: &str = "http://localhost:8000";

fn push_config(auth: AuthScheme, secret: Option<&str>) -> PushConfig {
    PushConfig {
        use_push_notifications: true,
        push_notification_receiver: "http://127.0.0.1:0".to_owned(),
        webhook_path: "/notify".to_owned(),
        push_auth: auth,
        push_secret: secret.map(str::to_owned),
        push_issuer: None,
        push_audience: None,
        key_ttl_secs: 300,
        token_max_age_secs: 300,
        await_timeout_secs: 5,
        unknown_token_status: UnknownTokenStatus::Ack,
    }
}

fn http() -> anyhow::Result<reqwest::Client> {
    crate::ensure_crypto();
    Ok(reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?)
}

#[tokio::test]
async fn bearer_turn_round_trip() -> anyhow::Result<()> {
    let http = http()?;
    let runtime =
        PushRuntime::start(&push_config(AuthScheme::Bearer, Some("secret123")), AGENT, http.clone())
            .await?;
    assert_eq!(runtime.receiver_url(), format!("http://{}/notify", runtime.local_addr()));

    let (handle, config) = runtime.begin_turn("session-1", "ctx-1");
    assert_eq!(config.token.as_deref(), Some(handle.token()));
    assert_eq!(config.scheme(), AuthScheme::Bearer);
    let secret = config.authentication.as_ref().and_then(|a| a.credentials.clone());
    assert_eq!(secret.as_deref(), Some("secret123"));

    let resp = http
        .post(&config.url)
        .bearer_auth("secret123")
        .json(&json!({ "requestToken": handle.token(), "result": "42" }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let result = runtime.finish_turn(handle, &CancellationToken::new()).await?;
    assert_eq!(result.text().as_deref(), Some("42"));
    runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn generated_secret_is_advertised() -> anyhow::Result<()> {
    let runtime = PushRuntime::start(&push_config(AuthScheme::Bearer, None), AGENT, http()?).await?;
    let secret = runtime.template().authentication.as_ref().and_then(|a| a.credentials.clone());
    assert!(secret.is_some_and(|s| s.len() >= 32));
    assert!(runtime.template().token.is_none());
    runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn open_listener_advertises_no_authentication() -> anyhow::Result<()> {
    let http = http()?;
    let runtime = PushRuntime::start(&push_config(AuthScheme::None, None), AGENT, http.clone()).await?;
    assert!(runtime.template().authentication.is_none());

    let (handle, config) = runtime.begin_turn("s", "c");
    http.post(&config.url)
        .json(&json!({ "requestToken": handle.token(), "result": "open" }))
        .send()
        .await?;
    let result = runtime.finish_turn(handle, &CancellationToken::new()).await?;
    assert_eq!(result.text().as_deref(), Some("open"));
    runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelled_turn_is_invalidated() -> anyhow::Result<()> {
    let runtime = PushRuntime::start(&push_config(AuthScheme::None, None), AGENT, http()?).await?;
    let (handle, _) = runtime.begin_turn("s", "c");
    let token = handle.token().to_owned();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = runtime.finish_turn(handle, &cancel).await.err();
    assert_eq!(err, Some(CorrelationError::Cancelled { token: token.clone() }));
    assert!(!runtime.correlator().is_pending(&token));
    runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn jwks_turn_fetches_issuer_keys() -> anyhow::Result<()> {
    let http = http()?;
    let signer = TestSigner::es256("agent-key")?;
    let (issuer_addr, issuer_task) = spawn_router(jwks_router(signer.jwk_set())).await?;
    let issuer = format!("http://{issuer_addr}");

    let runtime =
        PushRuntime::start(&push_config(AuthScheme::Jwks, None), &issuer, http.clone()).await?;
    let (handle, config) = runtime.begin_turn("s", "c");
    assert_eq!(config.scheme(), AuthScheme::Jwks);

    let now = crate::push::epoch_secs(std::time::SystemTime::now());
    let jwt = signer.sign(&json!({ "iss": issuer, "iat": now }))?;
    let resp = http
        .post(&config.url)
        .bearer_auth(jwt)
        .json(&json!({ "requestToken": handle.token(), "result": "signed" }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let result = runtime.finish_turn(handle, &CancellationToken::new()).await?;
    assert_eq!(result.text().as_deref(), Some("signed"));
    runtime.shutdown().await;
    issuer_task.abort();
    Ok(())
}

#[tokio::test]
async fn bind_failure_is_returned() -> anyhow::Result<()> {
    let first = PushRuntime::start(&push_config(AuthScheme::None, None), AGENT, http()?).await?;
    let mut config = push_config(AuthScheme::None, None);
    config.push_notification_receiver = format!("http://127.0.0.1:{}", first.local_addr().port());

    let second = PushRuntime::start(&config, AGENT, http()?).await;
    assert!(second.is_err());
    first.shutdown().await;
    Ok(())
}
