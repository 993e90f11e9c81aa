use super::*;

fn dep() -> DependencyName {
    "blob-primary".parse().unwrap()
}

fn result(status: HealthStatus, response_time_ms: u64) -> HealthCheckResult {
    HealthCheckResult::record(dep(), ProbeKind::Write, status, response_time_ms, None)
}

mod classification {
    use super::*;

    #[test]
    fn fast_success_is_healthy() {
        assert_eq!(classify_latency(150, 2_000), HealthStatus::Healthy);
    }

    #[test]
    fn threshold_latency_is_degraded() {
        assert_eq!(classify_latency(2_000, 2_000), HealthStatus::Degraded);
        assert_eq!(classify_latency(5_000, 2_000), HealthStatus::Degraded);
    }

    #[test]
    fn statuses_have_stable_names() {
        assert_eq!(HealthStatus::Healthy.as_str(), "healthy");
        assert_eq!(HealthStatus::Degraded.as_str(), "degraded");
        assert_eq!(HealthStatus::Unhealthy.as_str(), "unhealthy");
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Degraded.is_healthy());
    }

    #[test]
    fn probe_kinds_have_stable_names() {
        assert_eq!(ProbeKind::Write.as_str(), "write");
        assert_eq!(ProbeKind::Read.as_str(), "read");
        assert_eq!(ProbeKind::Delete.as_str(), "delete");
        assert_eq!(ProbeKind::List.as_str(), "list");
        assert_eq!(ProbeKind::Metadata.as_str(), "metadata");
    }
}

mod aggregates {
    use super::*;

    #[test]
    fn empty_window_reports_full_uptime() {
        let aggregates = HealthAggregates::from_results(&[]);

        assert_eq!(aggregates.total_probes, 0);
        assert_eq!(aggregates.error_rate, 0.0);
        assert_eq!(aggregates.average_response_time_ms, 0.0);
        assert_eq!(aggregates.uptime_percent, 100.0);
    }

    #[test]
    fn mixed_window_computes_rates_and_latency() {
        let results = vec![
            result(HealthStatus::Healthy, 10),
            result(HealthStatus::Healthy, 20),
            result(HealthStatus::Degraded, 3_000),
            result(HealthStatus::Unhealthy, 50),
        ];

        let aggregates = HealthAggregates::from_results(&results);

        assert_eq!(aggregates.total_probes, 4);
        assert_eq!(aggregates.healthy, 2);
        assert_eq!(aggregates.degraded, 1);
        assert_eq!(aggregates.unhealthy, 1);
        assert_eq!(aggregates.error_rate, 0.25);
        assert_eq!(aggregates.average_response_time_ms, 770.0);
        assert_eq!(aggregates.uptime_percent, 75.0);
    }

    #[test]
    fn all_unhealthy_window_reports_zero_uptime() {
        let results = vec![
            result(HealthStatus::Unhealthy, 100),
            result(HealthStatus::Unhealthy, 200),
        ];

        let aggregates = HealthAggregates::from_results(&results);

        assert_eq!(aggregates.error_rate, 1.0);
        assert_eq!(aggregates.uptime_percent, 0.0);
    }
}

mod settings {
    use super::*;

    #[test]
    fn default_settings_probe_under_a_dedicated_prefix() {
        let settings = MonitorSettings::default();

        assert_eq!(settings.probe_prefix, "health-probes/");
        assert_eq!(settings.recovery_batches, 2);
    }

    #[test]
    fn alert_thresholds_are_ordered() {
        assert!(ERROR_RATE_MEDIUM < ERROR_RATE_HIGH);
    }
}
