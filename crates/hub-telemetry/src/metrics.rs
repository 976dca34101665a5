//! Prometheus metrics for the communication hub.
//!
//! All metrics follow the naming convention: `hub_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // DELIVERY
    // =========================================================================

    /// Frames written and acknowledged, by frame kind
    pub static ref FRAMES_SENT: CounterVec = CounterVec::new(
        Opts::new("hub_delivery_frames_sent_total", "Frames delivered to a peer"),
        &["kind"]
    ).expect("metric creation failed");

    /// Delivery attempts that were rescheduled
    pub static ref SEND_RETRIES: Counter = Counter::new(
        "hub_delivery_retries_total",
        "Reliable send attempts rescheduled after a failure"
    ).expect("metric creation failed");

    /// Sends given up on, by reason
    pub static ref SENDS_ABANDONED: CounterVec = CounterVec::new(
        Opts::new("hub_delivery_abandoned_total", "Sends dropped without delivery"),
        &["reason"]  // unresolved, exhausted, rejected, best_effort
    ).expect("metric creation failed");

    /// Reliable sends currently waiting for a retry slot
    pub static ref PENDING_SENDS: Gauge = Gauge::new(
        "hub_delivery_pending_sends",
        "Reliable sends awaiting retry"
    ).expect("metric creation failed");

    /// Time from first attempt to acknowledgement
    pub static ref DELIVERY_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "hub_delivery_latency_seconds",
            "Time from submission to acknowledged delivery"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Frames read from peers, by frame kind
    pub static ref FRAMES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("hub_inbound_frames_received_total", "Frames received from peers"),
        &["kind"]
    ).expect("metric creation failed");

    /// Frames rejected as malformed or oversized
    pub static ref FRAMES_REJECTED: Counter = Counter::new(
        "hub_inbound_frames_rejected_total",
        "Inbound frames rejected as malformed"
    ).expect("metric creation failed");

    /// Application frames suppressed as retransmits
    pub static ref DUPLICATES_SUPPRESSED: Counter = Counter::new(
        "hub_inbound_duplicates_total",
        "Retransmitted application frames suppressed"
    ).expect("metric creation failed");

    // =========================================================================
    // REGISTRY
    // =========================================================================

    /// Registration announcements, by outcome
    pub static ref REGISTRATIONS: CounterVec = CounterVec::new(
        Opts::new("hub_registry_registrations_total", "Registration announcements processed"),
        &["outcome"]  // installed, superseded, unchanged, rejected
    ).expect("metric creation failed");

    /// Account keys with a live registration
    pub static ref KNOWN_PEERS: Gauge = Gauge::new(
        "hub_registry_known_peers",
        "Account keys with a live registration"
    ).expect("metric creation failed");

    /// Rediscovery queries broadcast
    pub static ref REDISCOVERY_QUERIES: Counter = Counter::new(
        "hub_registry_rediscovery_queries_total",
        "Rediscovery queries sent to the bootstrap set"
    ).expect("metric creation failed");

    // =========================================================================
    // BOUNDARY QUEUE
    // =========================================================================

    /// Frames waiting for the external consumer
    pub static ref QUEUE_DEPTH: Gauge = Gauge::new(
        "hub_queue_depth",
        "Frames waiting in the boundary queue"
    ).expect("metric creation failed");

    /// Frames evicted because the queue was full
    pub static ref QUEUE_EVICTIONS: Counter = Counter::new(
        "hub_queue_evictions_total",
        "Unread frames evicted from a full boundary queue"
    ).expect("metric creation failed");

    /// Frames too large for the boundary queue or the consumer's buffer
    pub static ref QUEUE_OVERSIZED: Counter = Counter::new(
        "hub_queue_oversized_total",
        "Frames refused or skipped by the boundary queue for their size"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call repeatedly; metrics already registered are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Delivery
        Box::new(FRAMES_SENT.clone()),
        Box::new(SEND_RETRIES.clone()),
        Box::new(SENDS_ABANDONED.clone()),
        Box::new(PENDING_SENDS.clone()),
        Box::new(DELIVERY_LATENCY.clone()),
        // Inbound
        Box::new(FRAMES_RECEIVED.clone()),
        Box::new(FRAMES_REJECTED.clone()),
        Box::new(DUPLICATES_SUPPRESSED.clone()),
        // Registry
        Box::new(REGISTRATIONS.clone()),
        Box::new(KNOWN_PEERS.clone()),
        Box::new(REDISCOVERY_QUERIES.clone()),
        // Boundary queue
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(QUEUE_EVICTIONS.clone()),
        Box::new(QUEUE_OVERSIZED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
