// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push notifications: outbound receiver config, inbound callback
//! verification, and correlation back to the waiting conversation turn.

pub mod correlator;
pub mod jwks;
pub mod jwt;
pub mod payload;
pub mod runtime;
pub mod verify;

use std::time::SystemTime;

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Header some agents use to echo the correlation token instead of the body.
pub const NOTIFICATION_TOKEN_HEADER: &str = "x-a2a-notification-token";

/// How the remote agent authenticates its callbacks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// No authentication. Development only.
    None,
    /// Shared secret echoed as `Authorization: Bearer <secret>`.
    #[default]
    Bearer,
    /// Signed JWT verified against the issuer's published key set.
    #[serde(alias = "hmac-jwk")]
    #[value(alias = "hmac-jwk")]
    Jwks,
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Bearer => f.write_str("bearer"),
            Self::Jwks => f.write_str("jwks"),
        }
    }
}

/// Receiver config attached to an outgoing request.
///
/// Serializes to the shape remote agents expect:
/// `{"url", "token", "authentication": {"schemes": [...], "credentials"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<PushAuthentication>,
}

/// Authentication block of a [`PushNotificationConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAuthentication {
    pub schemes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

impl PushNotificationConfig {
    pub fn new(url: impl Into<String>, scheme: AuthScheme, credential: Option<String>) -> Self {
        let authentication = match scheme {
            AuthScheme::None => None,
            AuthScheme::Bearer => {
                Some(PushAuthentication { schemes: vec!["Bearer".to_owned()], credentials: credential })
            }
            AuthScheme::Jwks => {
                Some(PushAuthentication { schemes: vec!["JWT".to_owned()], credentials: None })
            }
        };
        Self { url: url.into(), token: None, authentication }
    }

    /// Copy of this config carrying a per-request correlation token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self { token: Some(token.into()), ..self.clone() }
    }

    pub fn scheme(&self) -> AuthScheme {
        match &self.authentication {
            None => AuthScheme::None,
            Some(auth) if auth.schemes.iter().any(|s| s.eq_ignore_ascii_case("jwt")) => {
                AuthScheme::Jwks
            }
            Some(_) => AuthScheme::Bearer,
        }
    }
}

/// Generate a random shared secret (32 bytes, base64url without padding).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// One webhook call as received, before any verification.
#[derive(Debug, Clone)]
pub struct InboundNotification {
    pub raw_body: Bytes,
    pub headers: HeaderMap,
    pub received_at: SystemTime,
}

impl InboundNotification {
    pub fn new(raw_body: Bytes, headers: HeaderMap) -> Self {
        Self { raw_body, headers, received_at: SystemTime::now() }
    }

    /// Correlation token carried in [`NOTIFICATION_TOKEN_HEADER`], if any.
    pub fn header_token(&self) -> Option<&str> {
        self.headers
            .get(NOTIFICATION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs(at: SystemTime) -> i64 {
    at.duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
