//! Tests for the object store interface types.

use super::*;

#[test]
fn test_compute_checksum_is_stable() {
    let data = Bytes::from("payload");

    let first = compute_checksum(&data);
    let second = compute_checksum(&data);

    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
}

#[test]
fn test_verify_checksum_detects_mutation() {
    let data = Bytes::from("payload");
    let checksum = compute_checksum(&data);

    assert!(verify_checksum(&data, &checksum));
    assert!(!verify_checksum(&Bytes::from("tampered"), &checksum));
}

#[test]
fn test_validate_key_accepts_normal_keys() {
    assert!(validate_key("reports/2026/summary.json").is_ok());
    assert!(validate_key("a").is_ok());
    assert!(validate_key("health-probes/01J0000000000000000000000-abcd").is_ok());
}

#[test]
fn test_validate_key_rejects_bad_keys() {
    assert!(validate_key("").is_err());
    assert!(validate_key("/leading/slash").is_err());
    assert!(validate_key("a//double").is_err());
    assert!(validate_key("up/../traversal").is_err());
    assert!(validate_key("white space").is_err());
    assert!(validate_key(&"k".repeat(1025)).is_err());
}

#[test]
fn test_error_transience_classification() {
    assert!(ObjectStoreError::Unavailable {
        message: "503".to_string()
    }
    .is_transient());
    assert!(ObjectStoreError::Timeout { timeout_ms: 100 }.is_transient());
    assert!(ObjectStoreError::Io {
        message: "broken pipe".to_string()
    }
    .is_transient());

    assert!(!ObjectStoreError::NotFound {
        key: "x".to_string()
    }
    .is_transient());
    assert!(!ObjectStoreError::InvalidKey {
        key: "".to_string(),
        reason: "empty".to_string()
    }
    .is_transient());

    let corrupted = ObjectStoreError::ChecksumMismatch {
        key: "x".to_string(),
        expected: "aa".to_string(),
        actual: "bb".to_string(),
    };
    assert!(corrupted.is_corrupted());
    assert!(!corrupted.is_transient());
}

#[test]
fn test_stored_object_serde_round_trip() {
    let data = Bytes::from("contents");
    let object = StoredObject {
        meta: ObjectMeta {
            key: "docs/readme.md".to_string(),
            size_bytes: data.len() as u64,
            content_type: Some("text/markdown".to_string()),
            checksum: compute_checksum(&data),
            metadata: HashMap::from([("owner".to_string(), "ops".to_string())]),
            created_at: Timestamp::now(),
        },
        data,
    };

    let json = serde_json::to_string(&object).unwrap();
    let back: StoredObject = serde_json::from_str(&json).unwrap();

    assert_eq!(object, back);
}
