// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::push::payload::TaskResult;

fn result(token: &str, value: &str) -> anyhow::Result<TaskResult> {
    let body = json!({ "requestToken": token, "result": value }).to_string();
    Ok(TaskResult::decode(body.as_bytes(), None)?)
}

#[tokio::test]
async fn resolve_delivers_to_waiter() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("session-1", "ctx-1");
    let token = handle.token().to_owned();
    assert!(correlator.is_pending(&token));

    let resolved = correlator.resolve(&token, result(&token, "42")?)?;
    assert_eq!(resolved.session_id, "session-1");
    assert_eq!(resolved.context_id, "ctx-1");

    let delivered = correlator.wait(handle, Duration::from_secs(1)).await?;
    assert_eq!(delivered.text().as_deref(), Some("42"));
    assert_eq!(correlator.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn waiter_wakes_on_later_resolve() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("s", "c");
    let token = handle.token().to_owned();

    let resolver = correlator.clone();
    let payload = result(&token, "late")?;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = resolver.resolve(&token, payload);
    });

    let delivered = correlator.wait(handle, Duration::from_secs(5)).await?;
    assert_eq!(delivered.text().as_deref(), Some("late"));
    Ok(())
}

#[test]
fn second_resolve_is_rejected() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("s", "c");
    let token = handle.token().to_owned();

    correlator.resolve(&token, result(&token, "first")?)?;
    assert_eq!(
        correlator.resolve(&token, result(&token, "second")?).err(),
        Some(CorrelationError::NotFound { token: token.clone() })
    );
    drop(handle);
    Ok(())
}

#[test]
fn unknown_token_is_not_found() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    crate::assert_err_contains!(
        correlator.resolve("nope", result("nope", "x")?),
        "no pending request for token nope"
    );
    Ok(())
}

#[tokio::test]
async fn zero_timeout_then_late_resolve() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("s", "c");
    let token = handle.token().to_owned();

    let err = correlator.wait(handle, Duration::ZERO).await.err();
    assert!(matches!(err, Some(CorrelationError::Timeout { .. })));
    assert!(!correlator.is_pending(&token));
    assert_eq!(
        correlator.resolve(&token, result(&token, "late")?).err(),
        Some(CorrelationError::NotFound { token: token.clone() })
    );
    Ok(())
}

#[tokio::test]
async fn payload_already_delivered_wins_over_zero_timeout() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("s", "c");
    let token = handle.token().to_owned();
    correlator.resolve(&token, result(&token, "ready")?)?;

    let delivered = correlator.wait(handle, Duration::ZERO).await?;
    assert_eq!(delivered.text().as_deref(), Some("ready"));
    Ok(())
}

#[tokio::test]
async fn cancellation_invalidates_token() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("s", "c");
    let token = handle.token().to_owned();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = correlator.wait_cancellable(handle, Duration::from_secs(30), &cancel).await.err();
    assert_eq!(err, Some(CorrelationError::Cancelled { token: token.clone() }));
    assert!(correlator.resolve(&token, result(&token, "x")?).is_err());
    Ok(())
}

#[test]
fn dropping_handle_invalidates_token() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handle = correlator.register("s", "c");
    let token = handle.token().to_owned();
    drop(handle);

    assert_eq!(correlator.pending_count(), 0);
    assert!(correlator.resolve(&token, result(&token, "x")?).is_err());
    Ok(())
}

#[tokio::test]
async fn end_session_discards_only_that_session() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let a1 = correlator.register("a", "c1");
    let a2 = correlator.register("a", "c2");
    let b = correlator.register("b", "c3");
    assert_eq!(correlator.pending_count(), 3);

    assert_eq!(correlator.end_session("a"), 2);
    assert_eq!(correlator.pending_count(), 1);
    assert!(correlator.is_pending(b.token()));

    let token = a1.token().to_owned();
    let err = correlator.wait(a1, Duration::from_secs(5)).await.err();
    assert_eq!(err, Some(CorrelationError::SessionEnded { token }));
    drop(a2);
    Ok(())
}

#[test]
fn register_token_rejects_duplicates() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let first = correlator.register_token("task-7", "s", "c")?;
    assert_eq!(first.token(), "task-7");
    assert_eq!(
        correlator.register_token("task-7", "s", "c").err(),
        Some(CorrelationError::Duplicate { token: "task-7".to_owned() })
    );
    Ok(())
}

#[test]
fn tokens_are_unique_uuids() {
    let correlator = SessionCorrelator::new();
    let a = correlator.register("s", "c");
    let b = correlator.register("s", "c");
    assert_ne!(a.token(), b.token());
    assert!(uuid::Uuid::parse_str(a.token()).is_ok());
}

#[tokio::test]
async fn out_of_order_resolution_reaches_each_waiter() -> anyhow::Result<()> {
    let correlator = SessionCorrelator::new();
    let handles: Vec<_> = (0..5).map(|i| correlator.register("s", &format!("c{i}"))).collect();
    let tokens: Vec<String> = handles.iter().map(|h| h.token().to_owned()).collect();

    for (i, token) in tokens.iter().enumerate().rev() {
        correlator.resolve(token, result(token, &format!("r{i}"))?)?;
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let delivered = correlator.wait(handle, Duration::from_secs(1)).await?;
        assert_eq!(delivered.text(), Some(format!("r{i}")));
    }
    Ok(())
}

proptest! {
    /// Racing resolve against a zero-timeout wait: the payload is either
    /// delivered to the waiter or resolve reports NotFound, never both.
    #[test]
    fn delivered_exactly_once(resolve_first in any::<bool>(), spin in 0u8..4) {
        let Ok(rt) = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
        else {
            return Err(TestCaseError::fail("runtime"));
        };
        let Ok(payload) = result("p", "v") else {
            return Err(TestCaseError::fail("payload"));
        };

        let (delivered, resolved) = rt.block_on(async move {
            let correlator = SessionCorrelator::new();
            let handle = correlator.register("s", "c");
            let token = handle.token().to_owned();
            let resolver = correlator.clone();
            let resolving = tokio::spawn(async move {
                for _ in 0..spin {
                    tokio::task::yield_now().await;
                }
                resolver.resolve(&token, payload).is_ok()
            });
            if resolve_first {
                tokio::task::yield_now().await;
            }
            let delivered = correlator.wait(handle, Duration::ZERO).await.is_ok();
            let resolved = resolving.await.unwrap_or(false);
            (delivered, resolved)
        });

        prop_assert_eq!(delivered, resolved);
    }
}
