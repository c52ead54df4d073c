// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Issuer key sets: JWK parsing, signature checks, and a TTL cache with
//! single-flight refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::push::jwt::Algorithm;
use crate::push::verify::AuthFailure;
use crate::registry::normalize_url;

/// Well-known path an issuer publishes its key set under.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// One public key from a JWK set. Only the members needed for RSA, P-256,
/// and Ed25519 verification are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    fn usable_for(&self, alg: Algorithm) -> bool {
        self.kty == alg.key_type()
            && self.alg.as_deref().map_or(true, |a| a == alg.as_str())
            && self.key_use.as_deref().map_or(true, |u| u == "sig")
    }

    /// Verify `signature` over `message` with this key.
    pub fn verify(&self, alg: Algorithm, message: &[u8], sig: &[u8]) -> Result<(), AuthFailure> {
        if !self.usable_for(alg) {
            return Err(AuthFailure::UnknownKey);
        }
        let verified = match alg {
            Algorithm::Rs256 => {
                let n = member(&self.n)?;
                let e = member(&self.e)?;
                RsaPublicKeyComponents { n: &n, e: &e }.verify(
                    &signature::RSA_PKCS1_2048_8192_SHA256,
                    message,
                    sig,
                )
            }
            Algorithm::Es256 => {
                if self.crv.as_deref() != Some("P-256") {
                    return Err(AuthFailure::UnknownKey);
                }
                let x = member(&self.x)?;
                let y = member(&self.y)?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(AuthFailure::MalformedToken);
                }
                let mut point = Vec::with_capacity(65);
                point.push(0x04);
                point.extend_from_slice(&x);
                point.extend_from_slice(&y);
                UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_FIXED, point)
                    .verify(message, sig)
            }
            Algorithm::EdDsa => {
                if self.crv.as_deref() != Some("Ed25519") {
                    return Err(AuthFailure::UnknownKey);
                }
                let x = member(&self.x)?;
                UnparsedPublicKey::new(&signature::ED25519, x).verify(message, sig)
            }
        };
        verified.map_err(|_| AuthFailure::SignatureMismatch)
    }
}

fn member(value: &Option<String>) -> Result<Vec<u8>, AuthFailure> {
    let encoded = value.as_deref().ok_or(AuthFailure::MalformedToken)?;
    URL_SAFE_NO_PAD.decode(encoded).map_err(|_| AuthFailure::MalformedToken)
}

/// A published key set (`{"keys": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find the key for a token. With a `kid` the match is exact; without one
    /// the set must hold exactly one usable key.
    pub fn find(&self, kid: Option<&str>, alg: Algorithm) -> Option<&Jwk> {
        match kid {
            Some(kid) => {
                self.keys.iter().find(|k| k.kid.as_deref() == Some(kid) && k.usable_for(alg))
            }
            None => {
                let mut usable = self.keys.iter().filter(|k| k.usable_for(alg));
                match (usable.next(), usable.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
        }
    }
}

/// Where key sets come from. Boxed future so the cache can hold any source.
pub trait KeySource: Send + Sync {
    fn fetch<'a>(&'a self, jwks_url: &'a str) -> BoxFuture<'a, anyhow::Result<JwkSet>>;
}

/// Fetches key sets over HTTP.
pub struct HttpKeySource {
    client: reqwest::Client,
}

impl HttpKeySource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl KeySource for HttpKeySource {
    fn fetch<'a>(&'a self, jwks_url: &'a str) -> BoxFuture<'a, anyhow::Result<JwkSet>> {
        Box::pin(async move {
            let resp = self.client.get(jwks_url).send().await?.error_for_status()?;
            let set: JwkSet = resp.json().await?;
            Ok(set)
        })
    }
}

/// Cached key set for one issuer.
#[derive(Clone)]
pub struct CachedKeys {
    pub keys: Arc<JwkSet>,
    pub fetched_at: Instant,
}

/// Issuer-keyed key set cache.
///
/// Lookups share a read lock. A refresh for one issuer is single-flight: the
/// first caller fetches while the rest wait on the per-issuer gate and then
/// reuse whatever it stored.
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedKeys>>,
    gates: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
            gates: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Key set discovery URL for an issuer.
    pub fn jwks_url(issuer: &str) -> String {
        format!("{}{JWKS_PATH}", normalize_url(issuer))
    }

    /// Keys for `issuer`, fetching when absent or older than the TTL.
    pub async fn keys(&self, issuer: &str) -> Result<CachedKeys, AuthFailure> {
        let issuer = normalize_url(issuer);
        let seen = {
            let entries = self.entries.read().await;
            match entries.get(&issuer) {
                Some(cached) if cached.fetched_at.elapsed() < self.ttl => {
                    return Ok(cached.clone());
                }
                Some(stale) => Some(stale.fetched_at),
                None => None,
            }
        };
        self.refresh(&issuer, seen).await
    }

    /// Force a refresh unless another caller already replaced the entry that
    /// was observed at `seen`.
    pub async fn refresh(
        &self,
        issuer: &str,
        seen: Option<Instant>,
    ) -> Result<CachedKeys, AuthFailure> {
        let issuer = normalize_url(issuer);
        let gate = Arc::clone(self.gates.lock().entry(issuer.clone()).or_default());
        let _flight = gate.lock().await;

        if let Some(cached) = self.entries.read().await.get(&issuer) {
            if Some(cached.fetched_at) != seen && cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.clone());
            }
        }

        let set = self.fetch_with_retry(&issuer).await?;
        let cached = CachedKeys { keys: Arc::new(set), fetched_at: Instant::now() };
        self.entries.write().await.insert(issuer.clone(), cached.clone());
        info!(issuer = %issuer, keys = cached.keys.keys.len(), "refreshed issuer key set");
        Ok(cached)
    }

    async fn fetch_with_retry(&self, issuer: &str) -> Result<JwkSet, AuthFailure> {
        let url = Self::jwks_url(issuer);
        match self.source.fetch(&url).await {
            Ok(set) => return Ok(set),
            Err(e) => debug!(url = %url, err = %e, "key set fetch failed, retrying once"),
        }
        self.source.fetch(&url).await.map_err(|e| {
            warn!(url = %url, err = %e, "key set unreachable");
            AuthFailure::KeySourceUnreachable
        })
    }
}

#[cfg(test)]
#[path = "jwks_tests.rs"]
mod tests;
