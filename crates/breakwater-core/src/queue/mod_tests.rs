use super::*;
use crate::adapters::MemoryResilienceStore;
use crate::metrics::NoOpMetrics;
use crate::persistence::NotificationKind;
use crate::UserId;
use bytes::Bytes;

fn dep() -> DependencyName {
    "blob-primary".parse().unwrap()
}

fn store_payload(key: &str) -> OperationPayload {
    OperationPayload::StoreObject {
        key: key.to_string(),
        content_type: Some("text/plain".to_string()),
        data: Bytes::from("deferred"),
    }
}

fn test_queue(config: QueueConfig) -> (OperationQueue, Arc<MemoryResilienceStore>) {
    let store = Arc::new(MemoryResilienceStore::new());
    let queue = OperationQueue::new(
        config,
        Arc::clone(&store) as Arc<dyn ResilienceStore>,
        Arc::new(NoOpMetrics),
    );
    (queue, store)
}

mod enqueue {
    use super::*;

    #[tokio::test]
    async fn persists_a_pending_operation_scheduled_now() {
        let (queue, store) = test_queue(QueueConfig::default());
        let before = Timestamp::now();

        let id = queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("reports/a.txt")))
            .await
            .unwrap();

        let operation = store.operation(&id).await.unwrap().unwrap();
        assert_eq!(operation.status, OperationStatus::Pending);
        assert_eq!(operation.priority, OperationPriority::NORMAL);
        assert_eq!(operation.retry_count, 0);
        assert_eq!(operation.max_retries, 5);
        assert!(operation.scheduled_at >= before);
        assert!(operation.claimed_at.is_none());
        assert!(operation.completed_at.is_none());
    }

    #[tokio::test]
    async fn carries_caller_context_onto_the_row() {
        let (queue, store) = test_queue(QueueConfig::default());
        let user = UserId::new("user-17").unwrap();
        let correlation = CorrelationId::new();

        let mut request = EnqueueRequest::new(dep(), store_payload("reports/b.txt"));
        request.priority = OperationPriority::HIGHEST;
        request.user_id = Some(user.clone());
        request.resource_id = Some("report-b".to_string());
        request.correlation_id = Some(correlation.clone());
        request.max_retries = Some(2);

        let id = queue.enqueue(request).await.unwrap();

        let operation = store.operation(&id).await.unwrap().unwrap();
        assert_eq!(operation.priority, OperationPriority::HIGHEST);
        assert_eq!(operation.user_id, Some(user));
        assert_eq!(operation.resource_id, Some("report-b".to_string()));
        assert_eq!(operation.correlation_id, Some(correlation));
        assert_eq!(operation.max_retries, 2);
    }

    #[tokio::test]
    async fn records_a_queued_notification_for_the_user() {
        let (queue, store) = test_queue(QueueConfig::default());
        let user = UserId::new("user-17").unwrap();

        let mut request = EnqueueRequest::new(dep(), store_payload("reports/c.txt"));
        request.user_id = Some(user.clone());
        queue.enqueue(request).await.unwrap();

        let notifications = store.notifications_for_user(&user, 10).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::OperationQueued);
    }

    #[tokio::test]
    async fn full_queue_rejects_and_persists_nothing() {
        let config = QueueConfig {
            max_queue_size: 2,
            ..QueueConfig::default()
        };
        let (queue, store) = test_queue(config);

        queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("a")))
            .await
            .unwrap();
        queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("b")))
            .await
            .unwrap();

        let result = queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("c")))
            .await;
        assert!(matches!(result, Err(QueueError::QueueFull { capacity: 2 })));

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn terminal_rows_do_not_count_against_capacity() {
        let config = QueueConfig {
            max_queue_size: 1,
            ..QueueConfig::default()
        };
        let (queue, store) = test_queue(config);

        let id = queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("a")))
            .await
            .unwrap();

        let mut operation = store.operation(&id).await.unwrap().unwrap();
        operation.status = OperationStatus::Completed;
        operation.completed_at = Some(Timestamp::now());
        store.update_operation(&operation).await.unwrap();

        queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("b")))
            .await
            .unwrap();
    }
}

mod cancel {
    use super::*;

    #[tokio::test]
    async fn pending_operation_can_be_cancelled() {
        let (queue, store) = test_queue(QueueConfig::default());
        let id = queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("a")))
            .await
            .unwrap();

        let cancelled = queue.cancel(&id).await.unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        let stored = store.operation(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Cancelled);
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let (queue, _store) = test_queue(QueueConfig::default());
        let missing = OperationId::new();

        let result = queue.cancel(&missing).await;
        assert!(matches!(result, Err(QueueError::NotFound { id }) if id == missing));
    }

    #[tokio::test]
    async fn completed_operation_cannot_be_cancelled() {
        let (queue, store) = test_queue(QueueConfig::default());
        let id = queue
            .enqueue(EnqueueRequest::new(dep(), store_payload("a")))
            .await
            .unwrap();

        let mut operation = store.operation(&id).await.unwrap().unwrap();
        operation.status = OperationStatus::Completed;
        operation.completed_at = Some(Timestamp::now());
        store.update_operation(&operation).await.unwrap();

        let result = queue.cancel(&id).await;
        assert!(matches!(
            result,
            Err(QueueError::NotCancellable {
                status: OperationStatus::Completed,
                ..
            })
        ));
    }
}

mod config {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = QueueConfig {
            max_queue_size: 0,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_ceiling_below_base_is_rejected() {
        let config = QueueConfig {
            backoff_base_ms: 1_000,
            max_backoff_ms: 500,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_per_attempt_and_caps() {
        let config = QueueConfig {
            backoff_base_ms: 100,
            max_backoff_ms: 1_000,
            ..QueueConfig::default()
        };

        assert_eq!(config.backoff_delay_ms(1), 200);
        assert_eq!(config.backoff_delay_ms(2), 400);
        assert_eq!(config.backoff_delay_ms(3), 800);
        assert_eq!(config.backoff_delay_ms(4), 1_000);
        assert_eq!(config.backoff_delay_ms(60), 1_000);
    }

    #[test]
    fn queue_errors_classify_transience() {
        assert!(!QueueError::QueueFull { capacity: 10 }.is_transient());
        assert!(!QueueError::NotFound {
            id: OperationId::new()
        }
        .is_transient());
        assert!(QueueError::Store(StoreError::Io {
            message: "flaky".to_string()
        })
        .is_transient());
    }
}
