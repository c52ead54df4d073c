// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rejections the notification listener sends back to calling agents.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Why the listener turned a request away.
///
/// Messages paired with these codes carry no detail about pending tokens or
/// key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Credentials missing, malformed, expired, or unverifiable.
    Unauthorized,
    /// Verified credentials naming another issuer, audience, or body.
    Forbidden,
    /// A validation handshake or callback body that cannot be decoded.
    BadRequest,
    /// A callback token with no pending request, under `--unknown-token-status not-found`.
    NotFound,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Reply with this code and `message` in the `{"error": {...}}` envelope.
    pub fn to_http_response(self, message: impl Into<String>) -> Response {
        let body = ErrorResponse { error: Rejection { code: self, message: message.into() } };
        (self.status(), Json(body)).into_response()
    }
}

/// JSON body of every listener rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: Rejection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
