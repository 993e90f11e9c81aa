use super::*;

fn payload(text: &str) -> Bytes {
    Bytes::from(text.as_bytes().to_vec())
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let store = MemoryObjectStore::new();

    let meta = store
        .put(
            "reports/2026/summary.json",
            payload("{\"rows\":3}"),
            PutOptions::with_content_type("application/json"),
        )
        .await
        .unwrap();
    assert_eq!(meta.key, "reports/2026/summary.json");
    assert_eq!(meta.size_bytes, 10);
    assert_eq!(meta.content_type.as_deref(), Some("application/json"));

    let object = store.get("reports/2026/summary.json").await.unwrap();
    assert_eq!(object.data, payload("{\"rows\":3}"));
    assert_eq!(object.meta.checksum, meta.checksum);
}

#[tokio::test]
async fn get_missing_key_is_not_found() {
    let store = MemoryObjectStore::new();

    let result = store.get("absent").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound { .. })));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = MemoryObjectStore::new();
    store
        .put("doomed", payload("x"), PutOptions::default())
        .await
        .unwrap();

    store.delete("doomed").await.unwrap();
    assert!(!store.contains("doomed").await);

    // Second delete of the same key still succeeds.
    store.delete("doomed").await.unwrap();
}

#[tokio::test]
async fn list_filters_by_prefix_and_truncates() {
    let store = MemoryObjectStore::new();
    for key in ["a/1", "a/2", "a/3", "b/1"] {
        store.put(key, payload("x"), PutOptions::default()).await.unwrap();
    }

    let metas = store.list("a/", 2).await.unwrap();
    assert_eq!(metas.len(), 2);
    assert_eq!(metas[0].key, "a/1");
    assert_eq!(metas[1].key, "a/2");

    let all = store.list("", 10).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn head_returns_metadata_without_payload() {
    let store = MemoryObjectStore::new();
    let mut options = PutOptions::default();
    options.metadata.insert("owner".to_string(), "reports".to_string());
    store.put("described", payload("abc"), options).await.unwrap();

    let meta = store.head("described").await.unwrap();
    assert_eq!(meta.size_bytes, 3);
    assert_eq!(meta.metadata.get("owner").map(String::as_str), Some("reports"));

    let missing = store.head("absent").await;
    assert!(matches!(missing, Err(ObjectStoreError::NotFound { .. })));
}

#[tokio::test]
async fn invalid_keys_are_rejected() {
    let store = MemoryObjectStore::new();

    let result = store.put("", payload("x"), PutOptions::default()).await;
    assert!(matches!(result, Err(ObjectStoreError::InvalidKey { .. })));

    let result = store.get("/leading-slash").await;
    assert!(matches!(result, Err(ObjectStoreError::InvalidKey { .. })));
}

mod fault_injection {
    use super::*;

    #[tokio::test]
    async fn unavailable_fails_every_operation_until_cleared() {
        let store = MemoryObjectStore::new();
        store.set_unavailable(true);

        let result = store.put("k", payload("x"), PutOptions::default()).await;
        assert!(matches!(result, Err(ObjectStoreError::Unavailable { .. })));
        let result = store.list("", 10).await;
        assert!(matches!(result, Err(ObjectStoreError::Unavailable { .. })));

        store.set_unavailable(false);
        store.put("k", payload("x"), PutOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn fail_next_budget_is_consumed_then_recovers() {
        let store = MemoryObjectStore::new();
        store.fail_next(2);

        assert!(store.get("k").await.is_err());
        assert!(store.get("k").await.is_err());

        // Budget spent: back to normal behavior (NotFound, not Unavailable).
        let result = store.get("k").await;
        assert!(matches!(result, Err(ObjectStoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn call_counters_track_attempts_including_failures() {
        let store = MemoryObjectStore::new();
        store.fail_next(1);

        let _ = store.put("k", payload("x"), PutOptions::default()).await;
        store.put("k", payload("x"), PutOptions::default()).await.unwrap();
        let _ = store.head("k").await;

        assert_eq!(store.put_calls(), 2);
        assert_eq!(store.head_calls(), 1);
        assert_eq!(store.total_calls(), 3);
    }
}
