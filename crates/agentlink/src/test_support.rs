// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token signers, mock key sources, and mock
//! orchestrator and agent servers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    RSA_PKCS1_SHA256,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::push::jwks::{Jwk, JwkSet, KeySource, JWKS_PATH};
use crate::registry::{normalize_url, AGENT_CARD_PATH};

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Fixed 2048-bit RSA key (PKCS#8 DER); ring cannot generate RSA keys.
const RSA_PKCS8: &[u8] = include_bytes!("testdata/rsa2048.pk8");

/// Base64url modulus and exponent of [`RSA_PKCS8`].
const RSA_MODULUS: &str = concat!(
    "h0uvHnyzr4RpSAa45y9ktsBfW4UlYmgqePJin1SR4Yik1iMnz0YB7EQ1t6mIfLqDMlS1pHDzeiixnCfapojvHurK",
    "1qZaasy-tDh_Zixa-GIRjYtoUNOSlt8FccqqA-eSED0bPEf1raQAVGuKYrj12QSrEoKwkg2AVG0C7tRAHrGDs_vV",
    "mEWXybqx7KBGLeyp9jkGoewv-YMkrs4ZeGcLv_fClq11YcPcGpWyX9sd2-5b-WNyVczUGZ6HwV2tV5q3bB9T1vDB",
    "FWlal45Z11akk4NdQfcuY6En8YrjnMyZFqv8yMMik_Sl7uoqWFhFzmY_3svVuFeorzVIlfVSd4x1Tw",
);
const RSA_EXPONENT: &str = "AQAB";

enum SigningKey {
    Rs256(RsaKeyPair),
    Es256(EcdsaKeyPair),
    EdDsa(Ed25519KeyPair),
}

/// Signs compact JWS tokens the way a remote agent would.
pub struct TestSigner {
    kid: String,
    key: SigningKey,
    rng: SystemRandom,
}

impl TestSigner {
    pub fn rs256(kid: &str) -> anyhow::Result<Self> {
        let pair = RsaKeyPair::from_pkcs8(RSA_PKCS8)
            .map_err(|e| anyhow::anyhow!("load RSA key: {e}"))?;
        Ok(Self { kid: kid.to_owned(), key: SigningKey::Rs256(pair), rng: SystemRandom::new() })
    }

    pub fn es256(kid: &str) -> anyhow::Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| anyhow::anyhow!("generate P-256 key: {e}"))?;
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .map_err(|e| anyhow::anyhow!("load P-256 key: {e}"))?;
        Ok(Self { kid: kid.to_owned(), key: SigningKey::Es256(pair), rng })
    }

    pub fn ed25519(kid: &str) -> anyhow::Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| anyhow::anyhow!("generate Ed25519 key: {e}"))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| anyhow::anyhow!("load Ed25519 key: {e}"))?;
        Ok(Self { kid: kid.to_owned(), key: SigningKey::EdDsa(pair), rng })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn alg(&self) -> &'static str {
        match self.key {
            SigningKey::Rs256(_) => "RS256",
            SigningKey::Es256(_) => "ES256",
            SigningKey::EdDsa(_) => "EdDSA",
        }
    }

    /// Public half as a JWK.
    pub fn jwk(&self) -> Jwk {
        let base = Jwk {
            kty: String::new(),
            kid: Some(self.kid.clone()),
            alg: Some(self.alg().to_owned()),
            key_use: Some("sig".to_owned()),
            crv: None,
            n: None,
            e: None,
            x: None,
            y: None,
        };
        match &self.key {
            SigningKey::Rs256(_) => Jwk {
                kty: "RSA".to_owned(),
                n: Some(RSA_MODULUS.to_owned()),
                e: Some(RSA_EXPONENT.to_owned()),
                ..base
            },
            SigningKey::Es256(pair) => {
                // Uncompressed SEC1 point: 0x04 || x || y.
                let point = pair.public_key().as_ref();
                Jwk {
                    kty: "EC".to_owned(),
                    crv: Some("P-256".to_owned()),
                    x: point.get(1..33).map(|x| URL_SAFE_NO_PAD.encode(x)),
                    y: point.get(33..65).map(|y| URL_SAFE_NO_PAD.encode(y)),
                    ..base
                }
            }
            SigningKey::EdDsa(pair) => Jwk {
                kty: "OKP".to_owned(),
                crv: Some("Ed25519".to_owned()),
                x: Some(URL_SAFE_NO_PAD.encode(pair.public_key().as_ref())),
                ..base
            },
        }
    }

    pub fn jwk_set(&self) -> JwkSet {
        JwkSet { keys: vec![self.jwk()] }
    }

    /// Sign `claims` under this key's `kid`.
    pub fn sign(&self, claims: &Value) -> anyhow::Result<String> {
        let header = json!({ "alg": self.alg(), "kid": self.kid, "typ": "JWT" });
        self.sign_with_header(&header, claims)
    }

    /// Sign with an arbitrary JOSE header.
    pub fn sign_with_header(&self, header: &Value, claims: &Value) -> anyhow::Result<String> {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
        );
        let signature = match &self.key {
            SigningKey::Rs256(pair) => {
                let mut sig = vec![0; pair.public().modulus_len()];
                pair.sign(&RSA_PKCS1_SHA256, &self.rng, input.as_bytes(), &mut sig)
                    .map_err(|e| anyhow::anyhow!("sign: {e}"))?;
                sig
            }
            SigningKey::Es256(pair) => pair
                .sign(&self.rng, input.as_bytes())
                .map_err(|e| anyhow::anyhow!("sign: {e}"))?
                .as_ref()
                .to_vec(),
            SigningKey::EdDsa(pair) => pair.sign(input.as_bytes()).as_ref().to_vec(),
        };
        Ok(format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

/// In-memory [`KeySource`] that counts fetches and can be told to fail.
#[derive(Default)]
pub struct MockKeySource {
    keys: Mutex<JwkSet>,
    fetches: AtomicUsize,
    failures: AtomicUsize,
    delay: Mutex<Duration>,
    urls: Mutex<Vec<String>>,
}

impl MockKeySource {
    pub fn new(keys: JwkSet) -> Arc<Self> {
        Arc::new(Self { keys: Mutex::new(keys), ..Default::default() })
    }

    pub fn set_keys(&self, keys: JwkSet) {
        *self.keys.lock() = keys;
    }

    /// Fail the next `n` fetches.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Delay every fetch, to widen concurrent refresh windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl KeySource for MockKeySource {
    fn fetch<'a>(&'a self, jwks_url: &'a str) -> BoxFuture<'a, anyhow::Result<JwkSet>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().push(jwks_url.to_owned());
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                anyhow::bail!("key source offline");
            }
            Ok(self.keys.lock().clone())
        })
    }
}

/// Build a capability card document.
pub fn sample_card(name: &str, url: &str, skills: &[&str]) -> Value {
    let skills: Vec<Value> = skills
        .iter()
        .map(|skill| {
            json!({
                "id": skill,
                "name": skill,
                "description": format!("{skill} for {name}"),
                "tags": [skill],
            })
        })
        .collect();
    json!({
        "name": name,
        "description": format!("{name} agent"),
        "url": url,
        "version": "1.0.0",
        "skills": skills,
    })
}

/// Router serving one capability card.
pub fn agent_card_router(card: Value) -> Router {
    Router::new().route(AGENT_CARD_PATH, get(move || async move { Json(card) }))
}

/// Router publishing a key set at the well-known path.
pub fn jwks_router(keys: JwkSet) -> Router {
    Router::new().route(JWKS_PATH, get(move || async move { Json(keys) }))
}

/// In-memory orchestrator management API.
#[derive(Clone, Default)]
pub struct MockOrchestrator {
    agents: Arc<Mutex<Vec<Value>>>,
    overwrite_duplicates: bool,
    requests: Arc<AtomicUsize>,
    last_headers: Arc<Mutex<HeaderMap>>,
}

impl MockOrchestrator {
    /// Orchestrator already holding `cards`, listed the way a real one lists
    /// them (`agent_id`, `endpoint`).
    pub fn with_cards(cards: impl IntoIterator<Item = Value>) -> Self {
        let state = Self::default();
        state.agents.lock().extend(cards.into_iter().map(as_listing));
        state
    }

    /// Answer a duplicate register with 200 and replace the entry, as
    /// orchestrators keyed by agent name do.
    pub fn overwriting(mut self) -> Self {
        self.overwrite_duplicates = true;
        self
    }

    pub fn agent_count(&self) -> usize {
        self.agents.lock().len()
    }

    /// Management API requests served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.last_headers.lock().get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
    }

    fn record(&self, headers: &HeaderMap) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.last_headers.lock() = headers.clone();
    }

    fn position(&self, url: &str) -> Option<usize> {
        let url = normalize_url(url);
        self.agents.lock().iter().position(|a| {
            a.get("endpoint").and_then(Value::as_str).map(normalize_url).as_deref() == Some(url.as_str())
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/agents", get(list_agents))
            .route("/api/v1/agents/register", post(register_agent))
            .route("/api/v1/agents/unregister", post(unregister_agent))
            .with_state(self.clone())
    }
}

fn as_listing(card: Value) -> Value {
    json!({
        "agent_id": card.get("name").cloned().unwrap_or(Value::Null),
        "name": card.get("name").cloned().unwrap_or(Value::Null),
        "description": card.get("description").cloned().unwrap_or(Value::Null),
        "endpoint": card.get("url").cloned().unwrap_or(Value::Null),
        "skills": card.get("skills").cloned().unwrap_or_else(|| json!([])),
    })
}

async fn list_agents(State(s): State<MockOrchestrator>, headers: HeaderMap) -> impl IntoResponse {
    s.record(&headers);
    let agents = s.agents.lock().clone();
    Json(json!({
        "success": true,
        "message": format!("{} agents available", agents.len()),
        "total_count": agents.len(),
        "agents": agents,
    }))
}

async fn register_agent(
    State(s): State<MockOrchestrator>,
    headers: HeaderMap,
    Json(card): Json<Value>,
) -> impl IntoResponse {
    s.record(&headers);
    let url = card.get("url").and_then(Value::as_str).unwrap_or_default().to_owned();
    if let Some(i) = s.position(&url) {
        if s.overwrite_duplicates {
            let listing = as_listing(card);
            let total = {
                let mut agents = s.agents.lock();
                if let Some(slot) = agents.get_mut(i) {
                    *slot = listing.clone();
                }
                agents.len()
            };
            let body = json!({
                "success": true,
                "message": "registered",
                "agent": listing,
                "total_count": total,
            });
            return (StatusCode::OK, Json(body));
        }
        let existing = s.agents.lock().get(i).cloned();
        let body = json!({
            "success": false,
            "message": format!("agent at {url} is already registered"),
            "existing": existing,
        });
        return (StatusCode::CONFLICT, Json(body));
    }
    let listing = as_listing(card);
    let total = {
        let mut agents = s.agents.lock();
        agents.push(listing.clone());
        agents.len()
    };
    let body = json!({
        "success": true,
        "message": "registered",
        "agent": listing,
        "total_count": total,
    });
    (StatusCode::OK, Json(body))
}

async fn unregister_agent(
    State(s): State<MockOrchestrator>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> impl IntoResponse {
    s.record(&headers);
    let url = req.get("url").and_then(Value::as_str).unwrap_or_default();
    let Some(i) = s.position(url) else {
        let body = json!({ "success": false, "message": format!("agent not found: {url}") });
        return (StatusCode::NOT_FOUND, Json(body));
    };
    let (removed, total) = {
        let mut agents = s.agents.lock();
        let removed = agents.remove(i);
        (removed, agents.len())
    };
    let body = json!({
        "success": true,
        "message": "unregistered",
        "agent": removed,
        "total_count": total,
    });
    (StatusCode::OK, Json(body))
}

/// Serve `router` on an ephemeral localhost port.
pub async fn spawn_router(router: Router) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, task))
}
