//! Tests for persisted record types.

use super::*;

fn dependency() -> DependencyName {
    DependencyName::new("blob-primary").unwrap()
}

#[test]
fn test_operation_payload_tagged_serialization() {
    let payload = OperationPayload::DeleteObject {
        key: "reports/old.csv".to_string(),
    };

    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["type"], "delete_object");
    assert_eq!(json["key"], "reports/old.csv");

    let back: OperationPayload = serde_json::from_value(json).unwrap();
    assert_eq!(back, payload);
}

#[test]
fn test_operation_payload_rejects_malformed_input() {
    let missing_key = serde_json::json!({ "type": "delete_object" });
    assert!(serde_json::from_value::<OperationPayload>(missing_key).is_err());

    let unknown_kind = serde_json::json!({ "type": "truncate_bucket", "key": "x" });
    assert!(serde_json::from_value::<OperationPayload>(unknown_kind).is_err());
}

#[test]
fn test_operation_payload_kind_and_key() {
    let payload = OperationPayload::StoreObject {
        key: "uploads/a.bin".to_string(),
        content_type: Some("application/octet-stream".to_string()),
        data: Bytes::from(vec![1, 2, 3]),
    };

    assert_eq!(payload.kind(), OperationKind::StoreObject);
    assert_eq!(payload.key(), "uploads/a.bin");
}

#[test]
fn test_queued_operation_initial_state() {
    let operation = QueuedOperation::new(
        dependency(),
        OperationPayload::DeleteObject {
            key: "x".to_string(),
        },
        OperationPriority::NORMAL,
        3,
    );

    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.retry_count, 0);
    assert_eq!(operation.scheduled_at, operation.created_at);
    assert!(operation.can_cancel());
    assert!(!operation.status.is_terminal());
}

#[test]
fn test_operation_status_terminality() {
    assert!(OperationStatus::Completed.is_terminal());
    assert!(OperationStatus::Failed.is_terminal());
    assert!(OperationStatus::Cancelled.is_terminal());
    assert!(!OperationStatus::Pending.is_terminal());
    assert!(!OperationStatus::Processing.is_terminal());
}

#[test]
fn test_health_check_config_validation() {
    let valid = HealthCheckConfig::default();
    assert!(valid.validate().is_ok());

    let mut too_fast = HealthCheckConfig::default();
    too_fast.interval_ms = 50;
    assert!(matches!(
        too_fast.validate(),
        Err(ValidationError::OutOfRange { .. })
    ));

    let mut no_probes = HealthCheckConfig::default();
    no_probes.probes.clear();
    assert!(matches!(
        no_probes.validate(),
        Err(ValidationError::Required { .. })
    ));

    let mut zero_slow = HealthCheckConfig::default();
    zero_slow.slow_threshold_ms = 0;
    assert!(zero_slow.validate().is_err());
}

#[test]
fn test_service_status_record_bootstrap() {
    let record = ServiceStatusRecord::healthy(dependency());

    assert!(record.status.is_healthy());
    assert_eq!(record.circuit_state, CircuitState::Closed);
    assert_eq!(record.failure_count, 0);
    assert!(record.circuit_opened_at.is_none());
}

#[test]
fn test_alert_activity() {
    let mut alert = ServiceAlert {
        id: AlertId::new(),
        dependency: dependency(),
        alert_type: AlertType::CircuitOpen,
        severity: AlertSeverity::Critical,
        message: "circuit open".to_string(),
        details: serde_json::Value::Null,
        occurrence_count: 1,
        created_at: Timestamp::now(),
        last_observed_at: Timestamp::now(),
        resolved_at: None,
        resolution_notes: None,
    };
    assert!(alert.is_active());

    alert.resolved_at = Some(Timestamp::now());
    assert!(!alert.is_active());
}

#[test]
fn test_alert_severity_ordering() {
    assert!(AlertSeverity::Low < AlertSeverity::Medium);
    assert!(AlertSeverity::Medium < AlertSeverity::High);
    assert!(AlertSeverity::High < AlertSeverity::Critical);
}

#[test]
fn test_queue_stats_depth() {
    let stats = QueueStats {
        pending: 3,
        processing: 2,
        completed: 10,
        failed: 1,
        cancelled: 1,
    };

    assert_eq!(stats.depth(), 5);
}

#[test]
fn test_system_event_construction() {
    let event = SystemEvent::new(
        "degradation.entered",
        Some(dependency()),
        serde_json::json!({"reason": "probe batch unhealthy"}),
    );

    assert_eq!(event.event_type, "degradation.entered");
    assert_eq!(event.dependency, Some(dependency()));
    assert!(event.correlation_id.is_none());
}
