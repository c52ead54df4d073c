// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::push::AuthScheme;
use crate::registry::{is_url, normalize_url};
use crate::transport::DEFAULT_WEBHOOK_PATH;

/// Response to a callback whose token matches no pending request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnknownTokenStatus {
    /// 200 `{"received": true}`, indistinguishable from a correlated callback.
    #[default]
    Ack,
    /// 404, useful while debugging an agent's callback wiring.
    NotFound,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Client for A2A agents, orchestrators, and their push notifications.
#[derive(Debug, Parser)]
#[command(name = "agentlink", version, about)]
pub struct Config {
    /// Base URL of the agent or orchestrator to talk to.
    #[arg(long, env = "AGENTLINK_AGENT", default_value = "http://localhost:8000")]
    pub agent: String,

    /// Extra header sent on every outbound request (`key=value`, repeatable).
    #[arg(long = "header", value_name = "KEY=VALUE")]
    pub headers: Vec<String>,

    /// Session id that groups pending requests. Random when unset.
    #[arg(long, env = "AGENTLINK_SESSION")]
    pub session: Option<String>,

    /// Timeout for outbound HTTP requests in seconds.
    #[arg(long, env = "AGENTLINK_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "AGENTLINK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub push: PushConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Fetch and print the agent's capability card.
    Card,
    /// List agents registered with the orchestrator.
    List,
    /// Register an agent endpoint with the orchestrator.
    Register {
        /// Base URL of the agent to register.
        url: String,
    },
    /// Remove an agent from the orchestrator by id, name, or URL.
    Unregister { identifier: String },
    /// Run the notification listener until interrupted.
    Listen,
}

/// Push notification settings.
#[derive(Debug, Clone, clap::Args)]
pub struct PushConfig {
    /// Receive task results by push notification.
    #[arg(long, env = "AGENTLINK_USE_PUSH")]
    pub use_push_notifications: bool,

    /// Public URL of the notification receiver; the listener binds its host and port.
    #[arg(long, env = "AGENTLINK_PUSH_RECEIVER", default_value = "http://localhost:5000")]
    pub push_notification_receiver: String,

    /// Path callbacks are posted to.
    #[arg(long, env = "AGENTLINK_WEBHOOK_PATH", default_value = DEFAULT_WEBHOOK_PATH)]
    pub webhook_path: String,

    /// How the agent authenticates its callbacks.
    #[arg(long, env = "AGENTLINK_PUSH_AUTH", value_enum, default_value_t = AuthScheme::Bearer)]
    pub push_auth: AuthScheme,

    /// Shared secret for bearer callbacks. Generated when unset.
    #[arg(long, env = "AGENTLINK_PUSH_SECRET", hide_env_values = true)]
    pub push_secret: Option<String>,

    /// Expected `iss` of signed callbacks. Defaults to the agent URL.
    #[arg(long, env = "AGENTLINK_PUSH_ISSUER")]
    pub push_issuer: Option<String>,

    /// Required `aud` of signed callbacks.
    #[arg(long, env = "AGENTLINK_PUSH_AUDIENCE")]
    pub push_audience: Option<String>,

    /// How long a fetched key set is reused, in seconds.
    #[arg(long, env = "AGENTLINK_KEY_TTL", default_value_t = 300)]
    pub key_ttl_secs: u64,

    /// Maximum age of a signed callback's `iat`, in seconds.
    #[arg(long, env = "AGENTLINK_TOKEN_MAX_AGE", default_value_t = 300)]
    pub token_max_age_secs: u64,

    /// How long a turn waits for its callback, in seconds.
    #[arg(long, env = "AGENTLINK_AWAIT_TIMEOUT", default_value_t = 600)]
    pub await_timeout_secs: u64,

    #[arg(
        long,
        env = "AGENTLINK_UNKNOWN_TOKEN_STATUS",
        value_enum,
        default_value_t = UnknownTokenStatus::Ack
    )]
    pub unknown_token_status: UnknownTokenStatus,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_url(&self.agent) {
            anyhow::bail!("--agent must be an http(s) URL: {}", self.agent);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("--request-timeout-secs must be positive");
        }
        if let Command::Register { url } = &self.command {
            if !is_url(url) {
                anyhow::bail!("register needs an http(s) URL: {url}");
            }
        }
        self.parse_headers()?;
        self.push.validate()?;
        if self.command == Command::Listen && !self.push.use_push_notifications {
            anyhow::bail!("listen needs --use-push-notifications");
        }
        Ok(())
    }

    /// Custom headers as a map for the HTTP client.
    pub fn parse_headers(&self) -> anyhow::Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for raw in &self.headers {
            let Some((key, value)) = raw.split_once('=') else {
                anyhow::bail!("invalid header (expected key=value): {raw}");
            };
            let name = HeaderName::from_bytes(key.trim().as_bytes())
                .map_err(|e| anyhow::anyhow!("invalid header name {key:?}: {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow::anyhow!("invalid value for header {key:?}: {e}"))?;
            map.append(name, value);
        }
        Ok(map)
    }

    pub fn agent_url(&self) -> String {
        normalize_url(&self.agent)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_id(&self) -> String {
        self.session.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

impl PushConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        // The listener serves only `--webhook-path` at the root.
        let receiver = self.receiver()?;
        if receiver.path() != "/" || receiver.query().is_some() {
            anyhow::bail!(
                "--push-notification-receiver cannot have a path or query \
                 (use --webhook-path): {}",
                self.push_notification_receiver
            );
        }
        let path = &self.webhook_path;
        if !path.starts_with('/') {
            anyhow::bail!("--webhook-path must start with '/': {path}");
        }
        if path == "/health" {
            anyhow::bail!("--webhook-path cannot be /health");
        }
        if path.contains(['{', '}', '*']) {
            anyhow::bail!("--webhook-path cannot contain route parameters: {path}");
        }
        if self.push_auth == AuthScheme::Bearer
            && self.push_secret.as_deref().is_some_and(|s| s.trim().is_empty())
        {
            anyhow::bail!("--push-secret cannot be empty");
        }
        if self.key_ttl_secs == 0 || self.token_max_age_secs == 0 {
            anyhow::bail!("key TTL and token max age must be positive");
        }
        Ok(())
    }

    /// Host and port the listener binds, taken from the receiver URL.
    pub fn bind_addr(&self) -> anyhow::Result<(String, u16)> {
        let url = self.receiver()?;
        let Some(host) = url.host_str() else {
            anyhow::bail!("receiver URL has no host: {}", self.push_notification_receiver);
        };
        let Some(port) = url.port_or_known_default() else {
            anyhow::bail!("receiver URL has no port: {}", self.push_notification_receiver);
        };
        Ok((host.trim_matches(['[', ']']).to_owned(), port))
    }

    fn receiver(&self) -> anyhow::Result<reqwest::Url> {
        reqwest::Url::parse(&self.push_notification_receiver).map_err(|e| {
            anyhow::anyhow!("invalid receiver URL {}: {e}", self.push_notification_receiver)
        })
    }

    /// Full callback URL handed to remote agents.
    pub fn receiver_url(&self) -> String {
        format!("{}{}", normalize_url(&self.push_notification_receiver), self.webhook_path)
    }

    /// Issuer signed callbacks must carry.
    pub fn issuer(&self, agent_url: &str) -> String {
        normalize_url(self.push_issuer.as_deref().unwrap_or(agent_url))
    }

    pub fn key_ttl(&self) -> Duration {
        Duration::from_secs(self.key_ttl_secs)
    }

    pub fn token_max_age(&self) -> Duration {
        Duration::from_secs(self.token_max_age_secs)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
