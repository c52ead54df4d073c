// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end scenarios over real TCP.
//!
//! Starts the notification listener on a free port and talks to it, and to
//! mock orchestrators, with a plain HTTP client.

use std::sync::Arc;
use std::time::Duration;

use agentlink::push::correlator::SessionCorrelator;
use agentlink::push::verify::TokenVerifier;
use agentlink::transport::{start_listener, ListenerHandle, ListenerState};

pub use agentlink::ensure_crypto;

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// HTTP client with a short timeout for scenario requests.
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    ensure_crypto();
    Ok(reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?)
}

/// A listener on a free port with its correlator, stopped by [`shutdown`](Self::shutdown).
pub struct Listener {
    pub correlator: SessionCorrelator,
    handle: ListenerHandle,
}

impl Listener {
    /// Listener that accepts `Authorization: Bearer <secret>` callbacks.
    pub async fn bearer(secret: &str) -> anyhow::Result<Self> {
        let correlator = SessionCorrelator::new();
        let state = ListenerState::new(
            correlator.clone(),
            TokenVerifier::bearer(secret),
            "http://localhost:8000",
        );
        let handle = start_listener("127.0.0.1", free_port()?, Arc::new(state)).await?;
        Ok(Self { correlator, handle })
    }

    pub fn notify_url(&self) -> String {
        format!("http://{}/notify", self.handle.local_addr())
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}
