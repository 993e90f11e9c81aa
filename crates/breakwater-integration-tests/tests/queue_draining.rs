//! Integration tests for queue draining and crash recovery
//!
//! These tests verify:
//! - Operations replay in priority order
//! - Failed replays are rescheduled with exponential backoff
//! - The reaper returns crashed-drainer claims to pending
//! - Exhausted retry budgets mark operations terminally failed
//! - Queue capacity and terminal retention are enforced

mod common;

use breakwater_core::{
    EnqueueRequest, NotificationKind, OperationPriority, OperationStatus, QueueError,
    ResilienceStore, Timestamp,
};
use common::{dep, fast_breaker, fast_queue, stack, stack_tuned, store_payload, user, PRIMARY};
use std::time::Duration;
use tokio::time::sleep;

/// Verify that a drain pass with batch size one replays the highest
/// priority operation first, regardless of enqueue order.
#[tokio::test]
async fn test_operations_drain_in_priority_order() {
    let mut queue_config = fast_queue();
    queue_config.drain_batch_size = 1;
    let h = stack_tuned(&[PRIMARY], fast_breaker(), queue_config).await;
    let primary = h.objects_for(PRIMARY);

    for (key, priority) in [
        ("reports/low", OperationPriority::LOWEST),
        ("reports/high", OperationPriority::HIGHEST),
        ("reports/mid", OperationPriority::NORMAL),
    ] {
        h.queue
            .enqueue(EnqueueRequest {
                priority,
                ..EnqueueRequest::new(dep(PRIMARY), store_payload(key))
            })
            .await
            .unwrap();
    }

    h.drainer.drain_once().await.unwrap();
    assert!(primary.contains("reports/high").await);
    assert!(!primary.contains("reports/mid").await);

    h.drainer.drain_once().await.unwrap();
    assert!(primary.contains("reports/mid").await);
    assert!(!primary.contains("reports/low").await);

    h.drainer.drain_once().await.unwrap();
    assert!(primary.contains("reports/low").await);
}

/// Verify that a transient replay failure reschedules the operation
/// with backoff instead of completing or dead-lettering it.
#[tokio::test]
async fn test_retry_backoff_defers_the_next_attempt() {
    let h = stack(&[PRIMARY]).await;
    let primary = h.objects_for(PRIMARY);
    primary.fail_next(1);

    let id = h
        .queue
        .enqueue(EnqueueRequest::new(
            dep(PRIMARY),
            store_payload("reports/deferred"),
        ))
        .await
        .unwrap();

    let summary = h.drainer.drain_once().await.unwrap();
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.completed, 0);

    // The rescheduled operation is not due yet.
    let summary = h.drainer.drain_once().await.unwrap();
    assert_eq!(summary.claimed, 0);

    sleep(Duration::from_millis(30)).await;
    let summary = h.drainer.drain_once().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert!(primary.contains("reports/deferred").await);

    let operation = h.queue.operation(&id).await.unwrap().unwrap();
    assert_eq!(operation.status, OperationStatus::Completed);
    assert_eq!(operation.retry_count, 1);
}

/// Verify that claims abandoned by a crashed drainer go back to pending
/// once the claim timeout elapses, and then replay normally.
#[tokio::test]
async fn test_reaper_returns_crashed_claims_to_pending() {
    let h = stack(&[PRIMARY]).await;
    let primary = h.objects_for(PRIMARY);

    h.queue
        .enqueue(EnqueueRequest::new(
            dep(PRIMARY),
            store_payload("reports/orphaned"),
        ))
        .await
        .unwrap();

    // Claim directly, simulating a drainer that died mid-pass.
    let claimed = h
        .store
        .claim_due_operations(Timestamp::now(), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(h.queue.stats().await.unwrap().processing, 1);

    // A fresh claim is not stuck yet.
    assert_eq!(h.drainer.reap_stuck().await.unwrap(), 0);

    sleep(Duration::from_millis(60)).await;
    assert_eq!(h.drainer.reap_stuck().await.unwrap(), 1);
    assert_eq!(h.queue.stats().await.unwrap().pending, 1);

    let summary = h.drainer.drain_once().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert!(primary.contains("reports/orphaned").await);
}

/// Verify that an operation out of retry budget is marked failed and
/// its user is told, rather than retrying forever.
#[tokio::test]
async fn test_exhausted_retries_mark_the_operation_failed() {
    let h = stack(&[PRIMARY]).await;
    h.objects_for(PRIMARY).set_unavailable(true);

    let id = h
        .queue
        .enqueue(EnqueueRequest {
            user_id: Some(user()),
            max_retries: Some(1),
            ..EnqueueRequest::new(dep(PRIMARY), store_payload("reports/doomed"))
        })
        .await
        .unwrap();

    let summary = h.drainer.drain_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let operation = h.queue.operation(&id).await.unwrap().unwrap();
    assert_eq!(operation.status, OperationStatus::Failed);
    assert!(operation.error_message.is_some());
    assert_eq!(h.queue.stats().await.unwrap().failed, 1);

    let notifications = h.store.notifications_for_user(&user(), 10).await.unwrap();
    assert!(notifications
        .iter()
        .any(|n| n.kind == NotificationKind::OperationFailed));
}

/// Verify that enqueueing beyond the configured capacity fails without
/// dropping the operations already queued.
#[tokio::test]
async fn test_full_queue_rejects_new_work() {
    let mut queue_config = fast_queue();
    queue_config.max_queue_size = 2;
    let h = stack_tuned(&[PRIMARY], fast_breaker(), queue_config).await;

    for key in ["reports/one", "reports/two"] {
        h.queue
            .enqueue(EnqueueRequest::new(dep(PRIMARY), store_payload(key)))
            .await
            .unwrap();
    }

    let error = h
        .queue
        .enqueue(EnqueueRequest::new(
            dep(PRIMARY),
            store_payload("reports/three"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(error, QueueError::QueueFull { capacity: 2 }));
    assert_eq!(h.queue.stats().await.unwrap().pending, 2);
}

/// Verify that terminal operations are purged once they age past the
/// retention window.
#[tokio::test]
async fn test_purge_removes_terminal_operations_past_retention() {
    let mut queue_config = fast_queue();
    queue_config.terminal_retention_ms = 10;
    let h = stack_tuned(&[PRIMARY], fast_breaker(), queue_config).await;

    h.queue
        .enqueue(EnqueueRequest::new(
            dep(PRIMARY),
            store_payload("reports/ephemeral"),
        ))
        .await
        .unwrap();
    h.drainer.drain_once().await.unwrap();
    assert_eq!(h.queue.stats().await.unwrap().completed, 1);

    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.drainer.purge_terminal().await.unwrap(), 1);
    assert_eq!(h.queue.stats().await.unwrap().completed, 0);
}

/// Verify that the background loops drain the queue without manual
/// passes once started, and stop cleanly.
#[tokio::test]
async fn test_background_loops_drain_without_manual_passes() {
    let h = stack(&[PRIMARY]).await;
    let primary = h.objects_for(PRIMARY);

    assert!(h.drainer.start().await);
    h.queue
        .enqueue(EnqueueRequest::new(
            dep(PRIMARY),
            store_payload("reports/background"),
        ))
        .await
        .unwrap();

    sleep(Duration::from_millis(150)).await;
    assert!(primary.contains("reports/background").await);
    assert_eq!(h.queue.stats().await.unwrap().completed, 1);

    assert!(h.drainer.stop().await);
    assert!(!h.drainer.is_running().await);
}
