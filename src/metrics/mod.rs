//! Prometheus instrumentation for the status store
//!
//! All collectors live in a private [`Registry`]; [`gather_metrics`]
//! renders it in the text exposition format for whatever exporter the
//! embedding process runs.

#[cfg(test)]
mod metrics_test;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

lazy_static! {
    pub static ref OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("dss_operations_total", "Status store operations issued"),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref OPERATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "dss_operation_failures_total",
            "Status store operations that failed with an I/O error"
        ),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref OPERATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "dss_operation_duration_ms",
            "Histogram of status store operation latency in ms"
        )
        .buckets(exponential_buckets(0.5, 2.0, 16).expect("buckets can be created")),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref TXN_MATCH_FAILURES: IntCounter = IntCounter::new(
        "dss_txn_match_failures_total",
        "Transactions rejected because a precondition did not hold"
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("dss_watch_events_total", "Watch events delivered to consumers"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHES: IntGauge =
        IntGauge::new("dss_active_watches", "Currently registered watches")
            .expect("metric can not be created");

    pub static ref UPDATE_CONFLICTS: IntCounter = IntCounter::new(
        "dss_update_conflicts_total",
        "Conflicting document updates seen by the retry processor"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(OPERATIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(OPERATION_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(OPERATION_DURATION.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(TXN_MATCH_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCH_EVENTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_WATCHES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(UPDATE_CONFLICTS.clone()))
        .expect("collector can be registered");
}

/// Renders every status store metric in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode status store metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(e) => {
            error!("status store metrics could not be from_utf8'd: {}", e);
            String::new()
        }
    }
}
