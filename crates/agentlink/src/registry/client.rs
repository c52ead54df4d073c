// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client for an orchestrator's agent management API.
//!
//! Each operation issues one request to the orchestrator (register also
//! fetches the agent's card first). Retries are left to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{normalize_url, AgentCatalogue, AgentEndpoint, AGENT_CARD_PATH};

/// Failures surfaced to the caller. None are retried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Network failure or timeout.
    Unreachable(String),
    /// The response did not have the expected shape.
    MalformedResponse(String),
    /// The endpoint is already registered.
    Conflict { message: String, existing: Option<Box<AgentEndpoint>> },
    /// Nothing matches the identifier.
    NotFound { identifier: String },
    /// The orchestrator refused the request for another reason.
    Rejected { status: u16, message: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "orchestrator unreachable: {e}"),
            Self::MalformedResponse(e) => write!(f, "malformed response: {e}"),
            Self::Conflict { message, .. } => write!(f, "already registered: {message}"),
            Self::NotFound { identifier } => write!(f, "no agent matches {identifier:?}"),
            Self::Rejected { status, message } => write!(f, "rejected ({status}): {message}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

/// Result of a successful register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub agent: AgentEndpoint,
    pub total_count: usize,
    pub message: String,
}

/// Result of a successful unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistration {
    pub removed: AgentEndpoint,
    pub total_count: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: String,
    agents: Vec<AgentEndpoint>,
    #[serde(default)]
    total_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct MutationResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    agent: Option<AgentEndpoint>,
    #[serde(default)]
    existing: Option<AgentEndpoint>,
    #[serde(default)]
    total_count: Option<usize>,
}

impl MutationResponse {
    fn reason(&self) -> String {
        match (&self.error, self.message.is_empty()) {
            (Some(error), _) => error.clone(),
            (None, false) => self.message.clone(),
            (None, true) => "no message".to_owned(),
        }
    }
}

fn default_success() -> bool {
    true
}

/// Talks to one orchestrator and keeps the catalogue it last reported.
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
    snapshot: RwLock<Arc<AgentCatalogue>>,
}

impl RegistryClient {
    /// Build a client whose every request carries `headers`.
    pub fn new(base_url: &str, headers: HeaderMap, timeout: Duration) -> anyhow::Result<Self> {
        crate::ensure_crypto();
        let http = reqwest::Client::builder().default_headers(headers).timeout(timeout).build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: normalize_url(base_url),
            http,
            snapshot: RwLock::new(Arc::new(AgentCatalogue::default())),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Catalogue from the last successful list, register, or unregister.
    pub fn snapshot(&self) -> Arc<AgentCatalogue> {
        self.snapshot.read().clone()
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1/agents{path}", self.base_url)
    }

    /// Fetch and parse the capability card an agent publishes.
    pub async fn fetch_card(&self, agent_url: &str) -> Result<AgentEndpoint, RegistryError> {
        let (_, card) = self.fetch_card_document(agent_url).await?;
        Ok(card)
    }

    async fn fetch_card_document(
        &self,
        agent_url: &str,
    ) -> Result<(Value, AgentEndpoint), RegistryError> {
        let agent_url = normalize_url(agent_url);
        let url = format!("{agent_url}{AGENT_CARD_PATH}");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(RegistryError::Unreachable(format!(
                "card fetch from {url} returned {}",
                resp.status()
            )));
        }
        let mut doc: Value = resp.json().await?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| RegistryError::MalformedResponse("card is not an object".to_owned()))?;
        let has_url = obj.get("url").and_then(Value::as_str).is_some_and(|u| !u.trim().is_empty());
        if !has_url {
            obj.insert("url".to_owned(), Value::String(agent_url.clone()));
        }
        let card: AgentEndpoint = serde_json::from_value(doc.clone())
            .map_err(|e| RegistryError::MalformedResponse(format!("card: {e}")))?;
        debug!(url = %agent_url, name = %card.name, "fetched agent card");
        Ok((doc, card))
    }

    /// List the orchestrator's agents and replace the snapshot.
    pub async fn list(&self) -> Result<Arc<AgentCatalogue>, RegistryError> {
        let resp = self.http.get(self.api("")).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(RegistryError::Rejected {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let parsed: ListResponse = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::MalformedResponse(e.to_string()))?;
        if !parsed.success {
            return Err(RegistryError::Rejected { status: status.as_u16(), message: parsed.message });
        }

        let catalogue = Arc::new(AgentCatalogue::from_endpoints(parsed.agents));
        if let Some(total) = parsed.total_count {
            if total != catalogue.len() {
                debug!(total, listed = catalogue.len(), "total_count disagrees with agent list");
            }
        }
        *self.snapshot.write() = Arc::clone(&catalogue);
        Ok(catalogue)
    }

    /// Fetch the card at `endpoint_url` and register it with the orchestrator.
    ///
    /// An endpoint already in the snapshot is a `Conflict` without contacting
    /// the orchestrator, and so is a success that does not grow the catalogue.
    pub async fn register(&self, endpoint_url: &str) -> Result<Registration, RegistryError> {
        self.ensure_unregistered(endpoint_url)?;
        let (doc, card) = self.fetch_card_document(endpoint_url).await?;
        self.ensure_unregistered(&card.url)?;
        let resp = self.http.post(self.api("/register")).json(&doc).send().await?;
        let status = resp.status();
        let parsed = decode_mutation(status, &resp.bytes().await?)?;

        if status == StatusCode::CONFLICT || parsed.existing.is_some() {
            return Err(RegistryError::Conflict {
                message: parsed.reason(),
                existing: parsed.existing.map(Box::new),
            });
        }
        if !status.is_success() || !parsed.success {
            return Err(RegistryError::Rejected { status: status.as_u16(), message: parsed.reason() });
        }

        let agent = parsed.agent.unwrap_or(card);
        let total_count = {
            let mut snapshot = self.snapshot.write();
            let Some(grown) = snapshot.with_added(agent.clone()) else {
                let existing = snapshot.get(&agent.url).cloned().map(Box::new);
                return Err(RegistryError::Conflict {
                    message: format!("{} is already registered", agent.url),
                    existing,
                });
            };
            *snapshot = Arc::new(grown);
            parsed.total_count.unwrap_or(snapshot.len())
        };
        info!(url = %agent.url, name = %agent.name, total_count, "registered agent");
        Ok(Registration { agent, total_count, message: parsed.message })
    }

    fn ensure_unregistered(&self, url: &str) -> Result<(), RegistryError> {
        match self.snapshot().get(url) {
            Some(existing) => Err(RegistryError::Conflict {
                message: format!("{} is already registered", existing.url),
                existing: Some(Box::new(existing.clone())),
            }),
            None => Ok(()),
        }
    }

    /// Unregister the agent `identifier` names: a URL, id, or name resolved
    /// against the last snapshot.
    pub async fn unregister(&self, identifier: &str) -> Result<Unregistration, RegistryError> {
        let not_found = || RegistryError::NotFound { identifier: identifier.to_owned() };
        let target = self.snapshot().find(identifier).cloned().ok_or_else(not_found)?;

        let resp =
            self.http.post(self.api("/unregister")).json(&json!({ "url": target.url })).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        let parsed = decode_mutation(status, &resp.bytes().await?)?;
        if !status.is_success() || !parsed.success {
            return Err(RegistryError::Rejected { status: status.as_u16(), message: parsed.reason() });
        }

        let total_count = {
            let mut snapshot = self.snapshot.write();
            if let Some(shrunk) = snapshot.without(&target.url) {
                *snapshot = Arc::new(shrunk);
            }
            parsed.total_count.unwrap_or(snapshot.len())
        };
        let removed = parsed.agent.unwrap_or(target);
        info!(url = %removed.url, name = %removed.name, total_count, "unregistered agent");
        Ok(Unregistration { removed, total_count, message: parsed.message })
    }
}

/// Decode a register/unregister body. Error statuses may carry an empty or
/// non-JSON body, which decodes to a default response.
fn decode_mutation(status: StatusCode, body: &[u8]) -> Result<MutationResponse, RegistryError> {
    match serde_json::from_slice::<MutationResponse>(body) {
        Ok(parsed) => Ok(parsed),
        Err(e) if status.is_success() => Err(RegistryError::MalformedResponse(e.to_string())),
        Err(_) => Ok(MutationResponse {
            success: false,
            message: String::from_utf8_lossy(body).into_owned(),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
