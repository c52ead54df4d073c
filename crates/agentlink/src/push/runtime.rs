// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wiring of listener, verifier, and correlator for one client process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PushConfig;
use crate::push::correlator::{CorrelationError, PendingHandle, SessionCorrelator};
use crate::push::jwks::{HttpKeySource, KeyCache};
use crate::push::payload::TaskResult;
use crate::push::verify::TokenVerifier;
use crate::push::{generate_secret, AuthScheme, PushNotificationConfig};
use crate::transport::{start_listener, ListenerHandle, ListenerState};

/// A running notification listener plus the receiver config to advertise.
pub struct PushRuntime {
    listener: ListenerHandle,
    correlator: SessionCorrelator,
    template: PushNotificationConfig,
    await_timeout: Duration,
}

impl PushRuntime {
    /// Start the listener described by `config`.
    ///
    /// `issuer` is the agent whose callbacks are accepted; `http` fetches its
    /// key set when the scheme is JWKS.
    pub async fn start(
        config: &PushConfig,
        issuer: &str,
        http: reqwest::Client,
    ) -> anyhow::Result<Self> {
        let (verifier, credential) = match config.push_auth {
            AuthScheme::None => (TokenVerifier::open(), None),
            AuthScheme::Bearer => {
                let secret = config.push_secret.clone().unwrap_or_else(generate_secret);
                (TokenVerifier::bearer(secret.clone()), Some(secret))
            }
            AuthScheme::Jwks => {
                let cache = KeyCache::new(Arc::new(HttpKeySource::new(http)), config.key_ttl());
                let verifier = TokenVerifier::jwks(
                    Arc::new(cache),
                    config.push_audience.clone(),
                    config.token_max_age(),
                );
                (verifier, None)
            }
        };

        let correlator = SessionCorrelator::new();
        let state = ListenerState::new(correlator.clone(), verifier, issuer)
            .with_webhook_path(config.webhook_path.clone())
            .with_unknown_token(config.unknown_token_status);
        let (host, port) = config.bind_addr()?;
        let listener = start_listener(&host, port, Arc::new(state)).await?;

        // An ephemeral port is only known after binding.
        let receiver_url = if port == 0 {
            format!("http://{}{}", listener.local_addr(), config.webhook_path)
        } else {
            config.receiver_url()
        };

        Ok(Self {
            listener,
            correlator,
            template: PushNotificationConfig::new(receiver_url, config.push_auth, credential),
            await_timeout: config.await_timeout(),
        })
    }

    /// Open a pending request and return the receiver config that carries
    /// its token, ready to attach to the outgoing message.
    pub fn begin_turn(
        &self,
        session_id: &str,
        context_id: &str,
    ) -> (PendingHandle, PushNotificationConfig) {
        let handle = self.correlator.register(session_id, context_id);
        debug!(token = %handle.token(), session_id, context_id, "push turn started");
        let config = self.template.with_token(handle.token());
        (handle, config)
    }

    /// Wait for the callback of a turn started with [`begin_turn`](Self::begin_turn).
    pub async fn finish_turn(
        &self,
        handle: PendingHandle,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, CorrelationError> {
        self.correlator.wait_cancellable(handle, self.await_timeout, cancel).await
    }

    pub fn correlator(&self) -> &SessionCorrelator {
        &self.correlator
    }

    /// Receiver config without a request token.
    pub fn template(&self) -> &PushNotificationConfig {
        &self.template
    }

    pub fn receiver_url(&self) -> &str {
        &self.template.url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub async fn shutdown(self) {
        self.listener.shutdown().await;
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
