// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication of inbound push notifications.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::ErrorCode;
use crate::push::jwks::KeyCache;
use crate::push::jwt::{ClaimRules, Claims, SignedToken};
use crate::push::{epoch_secs, AuthScheme, InboundNotification};

/// Clock skew tolerated on `exp`, `nbf`, and `iat`.
pub const CLOCK_LEEWAY: Duration = Duration::from_secs(60);

/// Why a notification failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeader,
    MalformedToken,
    Expired,
    NotYetValid,
    SignatureMismatch,
    UnknownKey,
    KeySourceUnreachable,
    IssuerMismatch,
    AudienceMismatch,
    BodyDigestMismatch,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing authorization header",
            Self::MalformedToken => "malformed token",
            Self::Expired => "token expired",
            Self::NotYetValid => "token not yet valid",
            Self::SignatureMismatch => "signature mismatch",
            Self::UnknownKey => "unknown signing key",
            Self::KeySourceUnreachable => "key source unreachable",
            Self::IssuerMismatch => "issuer mismatch",
            Self::AudienceMismatch => "audience mismatch",
            Self::BodyDigestMismatch => "request body digest mismatch",
        }
    }

    /// 401 when the credential itself is bad, 403 when a valid credential
    /// was issued for something else.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::IssuerMismatch | Self::AudienceMismatch | Self::BodyDigestMismatch => {
                ErrorCode::Forbidden
            }
            _ => ErrorCode::Unauthorized,
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for AuthFailure {}

/// A rejected notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub reason: AuthFailure,
}

impl From<AuthFailure> for AuthError {
    fn from(reason: AuthFailure) -> Self {
        Self { reason }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason.as_str())
    }
}

impl std::error::Error for AuthError {}

/// A notification whose origin has been established.
#[derive(Debug, Clone)]
pub struct VerifiedPayload {
    pub body: Bytes,
    pub scheme: AuthScheme,
    /// Present in JWKS mode.
    pub claims: Option<Claims>,
}

/// Verification strategy, fixed when the listener starts.
enum Mode {
    Open,
    Bearer { secret: String },
    Jwks { cache: Arc<KeyCache>, audience: Option<String>, max_age: Duration },
}

/// Checks that a callback was sent by the agent we handed our receiver to.
pub struct TokenVerifier {
    mode: Mode,
}

impl TokenVerifier {
    /// Accept every notification.
    pub fn open() -> Self {
        Self { mode: Mode::Open }
    }

    /// Require `Authorization: Bearer <secret>`.
    pub fn bearer(secret: impl Into<String>) -> Self {
        Self { mode: Mode::Bearer { secret: secret.into() } }
    }

    /// Require a JWT signed by a key the issuer publishes.
    pub fn jwks(cache: Arc<KeyCache>, audience: Option<String>, max_age: Duration) -> Self {
        Self { mode: Mode::Jwks { cache, audience, max_age } }
    }

    pub fn scheme(&self) -> AuthScheme {
        match self.mode {
            Mode::Open => AuthScheme::None,
            Mode::Bearer { .. } => AuthScheme::Bearer,
            Mode::Jwks { .. } => AuthScheme::Jwks,
        }
    }

    pub async fn verify(
        &self,
        notification: &InboundNotification,
        expected_issuer: &str,
    ) -> Result<VerifiedPayload, AuthError> {
        let now = epoch_secs(notification.received_at);
        let claims = match &self.mode {
            Mode::Open => None,
            Mode::Bearer { secret } => {
                let token = bearer_token(&notification.headers)?;
                if !constant_time_eq(token, secret) {
                    return Err(AuthFailure::SignatureMismatch.into());
                }
                None
            }
            Mode::Jwks { cache, audience, max_age } => {
                let token = bearer_token(&notification.headers)?;
                let rules = ClaimRules {
                    issuer: expected_issuer,
                    audience: audience.as_deref(),
                    max_age: *max_age,
                    leeway: CLOCK_LEEWAY,
                    now,
                };
                let claims = verify_jwt(cache, token, &rules).await?;
                if let Some(ref expected) = claims.request_body_sha256 {
                    if !body_digest_matches(&notification.raw_body, expected) {
                        return Err(AuthFailure::BodyDigestMismatch.into());
                    }
                }
                Some(claims)
            }
        };

        Ok(VerifiedPayload { body: notification.raw_body.clone(), scheme: self.scheme(), claims })
    }
}

/// Verify signature and claims of `token`. An unknown `kid` triggers at most
/// one key set refresh.
async fn verify_jwt(
    cache: &KeyCache,
    token: &str,
    rules: &ClaimRules<'_>,
) -> Result<Claims, AuthFailure> {
    let signed = SignedToken::parse(token)?;
    let alg = signed.algorithm()?;

    let cached = cache.keys(rules.issuer).await?;
    let jwk = match cached.keys.find(signed.kid(), alg) {
        Some(jwk) => jwk.clone(),
        None => {
            tracing::debug!(kid = ?signed.kid(), "signing key not cached, refreshing");
            let refreshed = cache.refresh(rules.issuer, Some(cached.fetched_at)).await?;
            refreshed.keys.find(signed.kid(), alg).cloned().ok_or(AuthFailure::UnknownKey)?
        }
    };

    jwk.verify(alg, signed.signing_input(), signed.signature())?;
    signed.claims.check(rules)?;
    Ok(signed.claims)
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Extract the credential from `Authorization: Bearer <token>`. The scheme
/// name is case-insensitive (RFC 7235).
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthFailure> {
    let header = headers
        .get("authorization")
        .ok_or(AuthFailure::MissingHeader)?
        .to_str()
        .map_err(|_| AuthFailure::MalformedToken)?;
    let (scheme, token) = header.trim_start().split_once(' ').ok_or(AuthFailure::MalformedToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthFailure::MalformedToken);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthFailure::MalformedToken);
    }
    Ok(token)
}

/// Compare `expected` (hex SHA-256) against the raw body, falling back to the
/// body's canonical JSON form (sorted keys, compact separators).
fn body_digest_matches(body: &[u8], expected: &str) -> bool {
    let expected = expected.to_ascii_lowercase();
    if constant_time_eq(&hex_sha256(body), &expected) {
        return true;
    }
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => {
            let mut canonical = String::new();
            write_canonical(&value, &mut canonical);
            constant_time_eq(&hex_sha256(canonical.as_bytes()), &expected)
        }
        Err(_) => false,
    }
}

fn hex_sha256(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
