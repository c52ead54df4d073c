// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the notification listener.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::UnknownTokenStatus;
use crate::error::ErrorCode;
use crate::push::payload::TaskResult;
use crate::push::InboundNotification;
use crate::transport::ListenerState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub pending: usize,
    pub auth: String,
}

/// Acknowledgement for every accepted callback. Identical for correlated and
/// unknown tokens so callers cannot tell which tokens are live.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReceivedResponse {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidationQuery {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<ListenerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        pending: s.correlator.pending_count(),
        auth: s.verifier.scheme().to_string(),
    })
}

/// `GET {webhook}?validationToken=X`: echo `X` so an agent can check the
/// receiver before its first callback.
pub async fn validate_receiver(Query(q): Query<ValidationQuery>) -> Response {
    match q.validation_token {
        Some(token) => {
            debug!("answered receiver validation");
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], token).into_response()
        }
        None => ErrorCode::BadRequest.to_http_response("missing validationToken"),
    }
}

/// `POST {webhook}`: verify, decode, and correlate one completion callback.
pub async fn receive_notification(
    State(s): State<Arc<ListenerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let notification = InboundNotification::new(body, headers);

    let verified = match s.verifier.verify(&notification, &s.issuer).await {
        Ok(verified) => verified,
        Err(e) => {
            warn!(reason = %e, "rejected push notification");
            let code = e.reason.error_code();
            return code.to_http_response("notification rejected");
        }
    };

    let result = match TaskResult::decode(&verified.body, notification.header_token()) {
        Ok(result) => result,
        Err(e) => {
            debug!(err = %e, "undecodable push notification");
            return ErrorCode::BadRequest.to_http_response(e.to_string());
        }
    };

    let token = result.request_token.clone();
    match s.correlator.resolve(&token, result) {
        Ok(resolved) => {
            info!(
                token = %token,
                session_id = %resolved.session_id,
                waited_ms = resolved.waited.as_millis() as u64,
                "correlated push notification"
            );
        }
        Err(e) => {
            warn!(token = %token, err = %e, "dropped push notification");
            if s.unknown_token == UnknownTokenStatus::NotFound {
                return ErrorCode::NotFound.to_http_response("unknown request token");
            }
        }
    }
    Json(ReceivedResponse { received: true }).into_response()
}
