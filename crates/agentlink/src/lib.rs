// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agentlink: client side of A2A agent conversations.
//!
//! Discovers agents through an orchestrator's management API and receives
//! task results as authenticated push notifications, correlated back to the
//! turn that is waiting for them.

pub mod config;
pub mod error;
pub mod push;
pub mod registry;
pub mod test_support;
pub mod transport;

use std::sync::Once;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Command, Config};
use crate::push::correlator::CorrelationError;
use crate::push::runtime::PushRuntime;
use crate::registry::client::RegistryClient;

static CRYPTO: Once = Once::new();

/// Install the ring provider for rustls. Safe to call repeatedly.
pub fn ensure_crypto() {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run one CLI command to completion.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    ensure_crypto();
    let http = reqwest::Client::builder()
        .default_headers(config.parse_headers()?)
        .timeout(config.request_timeout())
        .build()?;
    let registry = RegistryClient::with_client(&config.agent, http.clone());

    match &config.command {
        Command::Card => {
            let card = registry.fetch_card(&config.agent).await?;
            let orchestrator = card.is_orchestrator();
            print_json(&json!({ "card": card, "orchestrator": orchestrator }))?;
            if orchestrator {
                let catalogue = registry.list().await?;
                print_json(&json!({ "agents": catalogue.iter().collect::<Vec<_>>() }))?;
            }
        }
        Command::List => {
            let catalogue = registry.list().await?;
            print_json(&json!({
                "total_count": catalogue.len(),
                "agents": catalogue.iter().collect::<Vec<_>>(),
            }))?;
        }
        Command::Register { url } => {
            registry.list().await?;
            let registration = registry.register(url).await?;
            print_json(&json!({
                "message": registration.message,
                "agent": registration.agent,
                "total_count": registration.total_count,
            }))?;
        }
        Command::Unregister { identifier } => {
            registry.list().await?;
            let removed = registry.unregister(identifier).await?;
            print_json(&json!({
                "message": removed.message,
                "agent": removed.removed,
                "total_count": removed.total_count,
            }))?;
        }
        Command::Listen => listen(&config, http).await?,
    }
    Ok(())
}

/// Serve push notifications until Ctrl-C, one pending turn at a time.
///
/// Each turn prints the receiver config to attach to an outgoing message,
/// then the result its callback delivers.
async fn listen(config: &Config, http: reqwest::Client) -> anyhow::Result<()> {
    let issuer = config.push.issuer(&config.agent_url());
    let runtime = PushRuntime::start(&config.push, &issuer, http).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
            }
            shutdown.cancel();
        }
    });

    let session = config.session_id();
    let mut turn = 0u64;
    while !shutdown.is_cancelled() {
        turn += 1;
        let context_id = format!("{session}-{turn}");
        let (handle, push) = runtime.begin_turn(&session, &context_id);
        print_json(&json!({ "contextId": context_id, "pushNotificationConfig": push }))?;

        match runtime.finish_turn(handle, &shutdown).await {
            Ok(result) => print_json(&json!({
                "contextId": context_id,
                "state": result.state(),
                "text": result.text(),
                "result": result.raw,
            }))?,
            Err(CorrelationError::Cancelled { .. }) => break,
            Err(e) => warn!(err = %e, context_id = %context_id, "turn ended without a callback"),
        }
    }

    runtime.correlator().end_session(&session);
    runtime.shutdown().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
