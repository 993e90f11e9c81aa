use super::*;

mod circuit_state {
    use super::*;

    #[test]
    fn string_representations() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
    }

    #[test]
    fn closed_and_half_open_allow_calls() {
        assert!(CircuitState::Closed.allows_calls());
        assert!(CircuitState::HalfOpen.allows_calls());
        assert!(!CircuitState::Open.allows_calls());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"half_open\"");

        let state: CircuitState = serde_json::from_str("\"open\"").unwrap();
        assert_eq!(state, CircuitState::Open);
    }
}

mod defaults {
    use super::*;

    #[test]
    fn default_tuning_matches_documented_values() {
        let defaults = BreakerDefaults::default();
        assert_eq!(defaults.failure_threshold, 5);
        assert_eq!(defaults.recovery_timeout_ms, 30_000);
        assert_eq!(defaults.slow_call_threshold_ms, 2_000);
        assert_eq!(defaults.operation_timeout_ms, 10_000);
        assert_eq!(defaults.success_threshold, 3);
        assert_eq!(defaults.half_open_max_probes, 3);
        assert!(defaults.validate().is_ok());
    }

    #[test]
    fn zero_thresholds_fail_validation() {
        let defaults = BreakerDefaults {
            failure_threshold: 0,
            ..BreakerDefaults::default()
        };
        assert!(defaults.validate().is_err());

        let defaults = BreakerDefaults {
            success_threshold: 0,
            ..BreakerDefaults::default()
        };
        assert!(defaults.validate().is_err());

        let defaults = BreakerDefaults {
            half_open_max_probes: 0,
            ..BreakerDefaults::default()
        };
        assert!(defaults.validate().is_err());

        let defaults = BreakerDefaults {
            recovery_timeout_ms: 0,
            ..BreakerDefaults::default()
        };
        assert!(defaults.validate().is_err());
    }

    #[test]
    fn config_copies_shared_tuning() {
        let dependency: crate::DependencyName = "blob-primary".parse().unwrap();
        let defaults = BreakerDefaults {
            failure_threshold: 7,
            ..BreakerDefaults::default()
        };

        let config = CircuitBreakerConfig::from_defaults(dependency.clone(), &defaults);
        assert_eq!(config.dependency, dependency);
        assert_eq!(config.failure_threshold, 7);
        assert_eq!(config.recovery_timeout_ms, 30_000);
    }
}

mod errors {
    use super::*;

    type TestError = CircuitBreakerError<String>;

    #[test]
    fn only_real_outcomes_count_as_failures() {
        let failed: TestError = CircuitBreakerError::OperationFailed("boom".to_string());
        assert!(failed.counts_as_failure());

        let timeout: TestError = CircuitBreakerError::Timeout { timeout_ms: 100 };
        assert!(timeout.counts_as_failure());

        let open: TestError = CircuitBreakerError::CircuitOpen {
            retry_after_ms: Some(500),
        };
        assert!(!open.counts_as_failure());

        let capped: TestError = CircuitBreakerError::TooManyTrialCalls;
        assert!(!capped.counts_as_failure());
    }

    #[test]
    fn rejections_are_distinguished_from_failures() {
        let open: TestError = CircuitBreakerError::CircuitOpen {
            retry_after_ms: None,
        };
        assert!(open.is_rejection());

        let capped: TestError = CircuitBreakerError::TooManyTrialCalls;
        assert!(capped.is_rejection());

        let failed: TestError = CircuitBreakerError::OperationFailed("boom".to_string());
        assert!(!failed.is_rejection());
    }
}

mod metrics {
    use super::*;

    #[test]
    fn failure_rate_handles_zero_calls() {
        let metrics = BreakerMetrics::unavailable();
        assert_eq!(metrics.failure_rate(), 0.0);
    }

    #[test]
    fn failure_rate_is_failed_over_total() {
        let metrics = BreakerMetrics {
            total_calls: 10,
            failed_calls: 4,
            ..BreakerMetrics::unavailable()
        };
        assert!((metrics.failure_rate() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn unavailable_snapshot_fails_safe_to_open() {
        assert_eq!(BreakerMetrics::unavailable().state, CircuitState::Open);
    }
}
