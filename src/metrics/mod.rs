#[cfg(test)]
mod metrics_test;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Gauge;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref CHANGES_APPENDED_METRIC: IntCounter =
        IntCounter::new("changes_appended", "Changes appended to the change log")
            .expect("metric can not be created");

    pub static ref CHANGES_DELIVERED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("changes_delivered", "Changes acknowledged by a client site"),
        &["site"]
    )
    .expect("metric can not be created");

    pub static ref CHANGES_REJECTED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("changes_rejected", "Changes refused by a client site"),
        &["site"]
    )
    .expect("metric can not be created");

    pub static ref TRANSIENT_FAILURES_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatch_transient_failures", "Batches that will be redelivered"),
        &["site"]
    )
    .expect("metric can not be created");

    pub static ref CURSOR_LAG_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("dispatch_cursor_lag", "Changes between a site cursor and the log head"),
        &["site"]
    )
    .expect("metric can not be created");

    pub static ref TRANSMIT_LATENCY_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("transmit_latency_ms", "Batch transmission latency in ms")
            .buckets(exponential_buckets(1.0, 2.0, 16).expect("valid buckets")),
        &["site"]
    )
    .expect("metric can not be created");

    pub static ref STORE_FAILURES_METRIC: IntCounter =
        IntCounter::new("store_failures", "Failed attempts to reach the change store")
            .expect("metric can not be created");

    pub static ref STORE_UNAVAILABLE_ALERT: Gauge = Gauge::new(
        "store_unavailable_alert",
        "1 while consecutive store failures exceed the alert threshold"
    )
    .expect("metric can not be created");

    pub static ref PAGES_INVALIDATED_METRIC: IntCounter =
        IntCounter::new("pages_invalidated", "Purge jobs submitted to the render queue")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(CHANGES_APPENDED_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CHANGES_DELIVERED_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CHANGES_REJECTED_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(TRANSIENT_FAILURES_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CURSOR_LAG_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(TRANSMIT_LATENCY_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(STORE_FAILURES_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(STORE_UNAVAILABLE_ALERT.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(PAGES_INVALIDATED_METRIC.clone()))
        .expect("collector can be registered");
}

/// Serves `/metrics` until the shutdown signal fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (addr, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    info!(%addr, "metrics server listening");
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let res = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };
    Ok(res)
}
