// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlation of completion callbacks to the turns waiting on them.
//!
//! Each pending request owns a `oneshot` slot keyed by a per-request token.
//! Every map access happens under one mutex, and the slot is filled inside
//! that critical section, so `register`, `resolve`, and the invalidation at
//! the end of `wait` are linearizable: a payload is either delivered to its
//! waiter or `resolve` reports `NotFound`, never both and never neither.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::push::payload::TaskResult;

type PendingMap = Mutex<HashMap<String, PendingRequest>>;

struct PendingRequest {
    session_id: String,
    context_id: String,
    issued_at: Instant,
    slot: oneshot::Sender<TaskResult>,
}

/// Correlation failures. None of them are fatal to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// Unknown, late, or duplicate token.
    NotFound { token: String },
    /// `register_token` with a token that is already pending.
    Duplicate { token: String },
    Timeout { token: String, after: Duration },
    Cancelled { token: String },
    /// The session was ended while the request was pending.
    SessionEnded { token: String },
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { token } => write!(f, "no pending request for token {token}"),
            Self::Duplicate { token } => write!(f, "token {token} is already pending"),
            Self::Timeout { token, after } => {
                write!(f, "request {token} timed out after {}ms", after.as_millis())
            }
            Self::Cancelled { token } => write!(f, "request {token} was cancelled"),
            Self::SessionEnded { token } => write!(f, "session ended before {token} resolved"),
        }
    }
}

impl std::error::Error for CorrelationError {}

/// Waiter side of one pending request.
///
/// Dropping the handle invalidates the request, so an abandoned turn never
/// leaves a slot behind for a late callback to fill.
pub struct PendingHandle {
    token: String,
    session_id: String,
    context_id: String,
    issued_at: Instant,
    rx: oneshot::Receiver<TaskResult>,
    pending: Weak<PendingMap>,
}

impl PendingHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

impl fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandle")
            .field("token", &self.token)
            .field("session_id", &self.session_id)
            .field("context_id", &self.context_id)
            .finish()
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.lock().remove(&self.token);
        }
    }
}

/// Where a resolved payload went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub session_id: String,
    pub context_id: String,
    pub waited: Duration,
}

/// Maps correlation tokens to pending requests.
#[derive(Clone, Default)]
pub struct SessionCorrelator {
    pending: Arc<PendingMap>,
}

impl SessionCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending request under a fresh random token.
    pub fn register(&self, session_id: &str, context_id: &str) -> PendingHandle {
        let mut pending = self.pending.lock();
        loop {
            let token = uuid::Uuid::new_v4().to_string();
            if !pending.contains_key(&token) {
                return self.insert_locked(&mut pending, token, session_id, context_id);
            }
        }
    }

    /// Create a pending request under a caller-chosen token, e.g. a task id
    /// the remote agent will echo back.
    pub fn register_token(
        &self,
        token: &str,
        session_id: &str,
        context_id: &str,
    ) -> Result<PendingHandle, CorrelationError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(token) {
            return Err(CorrelationError::Duplicate { token: token.to_owned() });
        }
        Ok(self.insert_locked(&mut pending, token.to_owned(), session_id, context_id))
    }

    fn insert_locked(
        &self,
        pending: &mut HashMap<String, PendingRequest>,
        token: String,
        session_id: &str,
        context_id: &str,
    ) -> PendingHandle {
        let (slot, rx) = oneshot::channel();
        let issued_at = Instant::now();
        pending.insert(
            token.clone(),
            PendingRequest {
                session_id: session_id.to_owned(),
                context_id: context_id.to_owned(),
                issued_at,
                slot,
            },
        );
        tracing::debug!(token = %token, session_id, "registered pending request");
        PendingHandle {
            token,
            session_id: session_id.to_owned(),
            context_id: context_id.to_owned(),
            issued_at,
            rx,
            pending: Arc::downgrade(&self.pending),
        }
    }

    /// Deliver `result` to the request registered under `token`.
    pub fn resolve(&self, token: &str, result: TaskResult) -> Result<Resolved, CorrelationError> {
        let mut pending = self.pending.lock();
        let not_found = || CorrelationError::NotFound { token: token.to_owned() };
        let entry = pending.remove(token).ok_or_else(not_found)?;
        entry.slot.send(result).map_err(|_| not_found())?;
        Ok(Resolved {
            session_id: entry.session_id,
            context_id: entry.context_id,
            waited: entry.issued_at.elapsed(),
        })
    }

    /// Wait for the request's payload, up to `timeout`.
    pub async fn wait(
        &self,
        handle: PendingHandle,
        timeout: Duration,
    ) -> Result<TaskResult, CorrelationError> {
        self.wait_cancellable(handle, timeout, &CancellationToken::new()).await
    }

    /// Like [`wait`](Self::wait), but also gives up when `cancel` fires.
    ///
    /// On timeout or cancellation the token is invalidated; a `resolve`
    /// arriving afterwards gets `NotFound`.
    pub async fn wait_cancellable(
        &self,
        mut handle: PendingHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, CorrelationError> {
        let token = handle.token.clone();
        let failure = tokio::select! {
            biased;
            received = &mut handle.rx => {
                return received.map_err(|_| CorrelationError::SessionEnded { token });
            }
            _ = cancel.cancelled() => CorrelationError::Cancelled { token: token.clone() },
            _ = tokio::time::sleep(timeout) => {
                CorrelationError::Timeout { token: token.clone(), after: timeout }
            }
        };

        // A resolve that won the race has already removed the entry and
        // filled the slot under the lock.
        let invalidated = self.pending.lock().remove(&token).is_some();
        if !invalidated {
            if let Ok(result) = handle.rx.try_recv() {
                return Ok(result);
            }
        }
        tracing::debug!(token = %token, err = %failure, "pending request abandoned");
        Err(failure)
    }

    /// Discard every pending request of `session_id`. Their waiters get
    /// `SessionEnded`.
    pub fn end_session(&self, session_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, req| req.session_id != session_id);
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.pending.lock().contains_key(token)
    }
}

#[cfg(test)]
#[path = "correlator_tests.rs"]
mod tests;
