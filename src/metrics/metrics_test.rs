use super::*;

#[test]
fn test_registry_exposes_store_metrics() {
    OPERATIONS.with_label_values(&["metrics_test"]).inc();
    OPERATION_DURATION.with_label_values(&["metrics_test"]).observe(1.5);
    TXN_MATCH_FAILURES.inc();

    let names: Vec<String> = REGISTRY
        .gather()
        .iter()
        .map(|m| m.get_name().to_string())
        .collect();
    for expected in [
        "dss_operations_total",
        "dss_operation_duration_ms",
        "dss_txn_match_failures_total",
        "dss_active_watches",
        "dss_update_conflicts_total",
    ] {
        assert!(names.iter().any(|n| n == expected), "Missing {expected}");
    }
}

#[test]
fn test_counter_increment() {
    let before = OPERATION_FAILURES.with_label_values(&["metrics_test"]).get();

    OPERATION_FAILURES.with_label_values(&["metrics_test"]).inc();
    OPERATION_FAILURES.with_label_values(&["metrics_test"]).inc();

    let value = OPERATION_FAILURES.with_label_values(&["metrics_test"]).get();
    assert_eq!(value - before, 2, "Counter should increment correctly");
}

#[test]
fn test_gather_metrics_text_format() {
    WATCH_EVENTS.with_label_values(&["new"]).inc();

    let body = gather_metrics();
    assert!(body.contains("# TYPE dss_watch_events_total counter"));
    assert!(body.contains("dss_watch_events_total{kind=\"new\"}"));
}
