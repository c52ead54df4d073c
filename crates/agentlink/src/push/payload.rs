// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoding of completion callbacks into [`TaskResult`] records.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A decoded completion callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    /// Correlation token: `requestToken`, else the token header, else `taskId`/`id`.
    pub request_token: String,
    pub context_id: Option<String>,
    pub status: Option<Value>,
    pub result: Option<Value>,
    /// Full body as received.
    pub raw: Value,
}

/// Why a callback body could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    NotJson(String),
    NotObject,
    MissingToken,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJson(e) => write!(f, "body is not JSON: {e}"),
            Self::NotObject => f.write_str("body is not a JSON object"),
            Self::MissingToken => f.write_str("no requestToken, taskId, or id in body"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl TaskResult {
    pub fn decode(body: &[u8], header_token: Option<&str>) -> Result<Self, DecodeError> {
        let raw: Value =
            serde_json::from_slice(body).map_err(|e| DecodeError::NotJson(e.to_string()))?;
        let obj = raw.as_object().ok_or(DecodeError::NotObject)?;

        let field = |key: &str| obj.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty());
        let request_token = field("requestToken")
            .or(header_token)
            .or_else(|| field("taskId"))
            .or_else(|| field("id"))
            .ok_or(DecodeError::MissingToken)?
            .to_owned();
        let context_id = field("contextId").map(str::to_owned);

        Ok(Self {
            request_token,
            context_id,
            status: obj.get("status").cloned(),
            result: obj.get("result").cloned(),
            raw,
        })
    }

    /// Task state, when the status is either a bare string or `{"state": ...}`.
    pub fn state(&self) -> Option<&str> {
        match self.status.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            other => other.get("state").and_then(|v| v.as_str()),
        }
    }

    /// Best-effort text of the result: a string `result`, else the first
    /// text part of the first artifact that has one.
    pub fn text(&self) -> Option<String> {
        if let Some(Value::String(s)) = &self.result {
            return Some(s.clone());
        }
        let artifacts = self.raw.get("artifacts")?.as_array()?;
        artifacts
            .iter()
            .filter_map(|a| a.get("parts").and_then(|p| p.as_array()))
            .flatten()
            .find_map(|part| {
                let is_text = part.get("kind").and_then(|k| k.as_str()).map_or(true, |k| k == "text");
                if is_text {
                    part.get("text").and_then(|t| t.as_str()).map(str::to_owned)
                } else {
                    None
                }
            })
    }
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
