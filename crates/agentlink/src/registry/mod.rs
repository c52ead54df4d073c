// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent endpoints and the catalogue an orchestrator routes between.

pub mod client;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Path a remote agent publishes its capability card under.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

/// Normalize an endpoint URL for identity comparison: surrounding whitespace
/// and trailing slashes are insignificant.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

/// Whether `identifier` looks like an absolute http(s) URL.
pub fn is_url(identifier: &str) -> bool {
    let trimmed = identifier.trim();
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSkill {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// A remote agent as described by its capability card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CardDocument")]
pub struct AgentEndpoint {
    pub url: String,
    pub id: String,
    pub name: String,
    pub description: String,
    pub skills: Vec<AgentSkill>,
}

/// Card as found on the wire. Orchestrators list agents with `endpoint` and
/// `agent_id` instead of `url` and `id`.
#[derive(Deserialize)]
struct CardDocument {
    #[serde(default, alias = "endpoint")]
    url: String,
    #[serde(default, alias = "agent_id")]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    skills: Vec<AgentSkill>,
}

impl From<CardDocument> for AgentEndpoint {
    fn from(doc: CardDocument) -> Self {
        let id = doc.id.filter(|id| !id.is_empty()).unwrap_or_else(|| doc.name.clone());
        Self { url: doc.url, id, name: doc.name, description: doc.description, skills: doc.skills }
    }
}

impl AgentEndpoint {
    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }

    /// Whether this agent routes to other agents rather than doing work itself.
    pub fn is_orchestrator(&self) -> bool {
        self.name.to_lowercase().contains("orchestrator")
            || self.description.to_lowercase().contains("routing")
    }
}

/// Ordered set of agents, unique by normalized URL.
///
/// Immutable: every change produces a new catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCatalogue {
    agents: IndexMap<String, AgentEndpoint>,
}

impl AgentCatalogue {
    /// Build from a list; a later duplicate URL replaces the earlier entry
    /// in place.
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = AgentEndpoint>) -> Self {
        let mut agents = IndexMap::new();
        for endpoint in endpoints {
            agents.insert(endpoint.normalized_url(), endpoint);
        }
        Self { agents }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentEndpoint> {
        self.agents.values()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.agents.contains_key(&normalize_url(url))
    }

    pub fn get(&self, url: &str) -> Option<&AgentEndpoint> {
        self.agents.get(&normalize_url(url))
    }

    /// Resolve an identifier: exact id, then URL, then case-insensitive name,
    /// then a URL fragment such as `localhost:8080` that matches exactly one
    /// agent.
    pub fn find(&self, identifier: &str) -> Option<&AgentEndpoint> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }
        if let Some(agent) = self.iter().find(|a| a.id == identifier) {
            return Some(agent);
        }
        if let Some(agent) = self.get(identifier) {
            return Some(agent);
        }
        let lower = identifier.to_lowercase();
        if let Some(agent) = self.iter().find(|a| a.name.to_lowercase() == lower) {
            return Some(agent);
        }
        let mut partial = self.iter().filter(|a| a.url.contains(identifier));
        match (partial.next(), partial.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Copy with `endpoint` appended, or `None` when its URL is already present.
    pub fn with_added(&self, endpoint: AgentEndpoint) -> Option<Self> {
        let key = endpoint.normalized_url();
        if self.agents.contains_key(&key) {
            return None;
        }
        let mut agents = self.agents.clone();
        agents.insert(key, endpoint);
        Some(Self { agents })
    }

    /// Copy without the agent at `url`, or `None` when it is absent.
    pub fn without(&self, url: &str) -> Option<Self> {
        let key = normalize_url(url);
        if !self.agents.contains_key(&key) {
            return None;
        }
        let mut agents = self.agents.clone();
        agents.shift_remove(&key);
        Some(Self { agents })
    }
}

impl<'a> IntoIterator for &'a AgentCatalogue {
    type Item = &'a AgentEndpoint;
    type IntoIter = indexmap::map::Values<'a, String, AgentEndpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.agents.values()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
