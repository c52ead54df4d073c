// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP listener that receives push notifications from remote agents.

pub mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::UnknownTokenStatus;
use crate::push::correlator::SessionCorrelator;
use crate::push::verify::TokenVerifier;
use crate::push::AuthScheme;

/// Path the listener accepts callbacks on unless configured otherwise.
pub const DEFAULT_WEBHOOK_PATH: &str = "/notify";

/// Shared state for listener handlers.
pub struct ListenerState {
    pub correlator: SessionCorrelator,
    pub verifier: TokenVerifier,
    /// Expected token issuer: the remote agent's base URL.
    pub issuer: String,
    pub unknown_token: UnknownTokenStatus,
    pub webhook_path: String,
}

impl ListenerState {
    pub fn new(correlator: SessionCorrelator, verifier: TokenVerifier, issuer: &str) -> Self {
        Self {
            correlator,
            verifier,
            issuer: issuer.to_owned(),
            unknown_token: UnknownTokenStatus::default(),
            webhook_path: DEFAULT_WEBHOOK_PATH.to_owned(),
        }
    }

    pub fn with_webhook_path(mut self, path: impl Into<String>) -> Self {
        self.webhook_path = path.into();
        self
    }

    pub fn with_unknown_token(mut self, status: UnknownTokenStatus) -> Self {
        self.unknown_token = status;
        self
    }
}

/// Build the axum `Router` for the notification listener.
pub fn build_router(state: Arc<ListenerState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route(
            &state.webhook_path,
            get(http::validate_receiver).post(http::receive_notification),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running listener. Dropping it leaves the server running; call
/// [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight handlers to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(err = %e, "notification listener task failed");
        }
        info!(addr = %self.local_addr, "notification listener stopped");
    }
}

/// Bind `host:port` and serve the listener in the background.
///
/// A bind failure is returned to the caller and not retried.
pub async fn start_listener(
    host: &str,
    port: u16,
    state: Arc<ListenerState>,
) -> anyhow::Result<ListenerHandle> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind notification listener on {addr}"))?;
    let local_addr = listener.local_addr()?;

    if state.verifier.scheme() == AuthScheme::None {
        warn!("push notifications are accepted without authentication");
    }
    info!(
        addr = %local_addr,
        path = %state.webhook_path,
        auth = %state.verifier.scheme(),
        "notification listener started"
    );

    let shutdown = CancellationToken::new();
    let router = build_router(state);
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = served {
                error!(err = %e, "notification listener failed");
            }
        }
    });

    Ok(ListenerHandle { local_addr, shutdown, task })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
