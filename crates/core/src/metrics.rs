//! Prometheus metrics for the acquisition pipeline.
//!
//! Collectors are process-global; the daemon registers them through
//! [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Poller
// =============================================================================

/// Feed fetches by outcome.
pub static FEED_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("kanshi_feed_polls_total", "Total feed fetches"),
        &["feed", "result"], // "fetched", "not_modified", "error"
    )
    .unwrap()
});

/// Feed items that passed change detection.
pub static FEED_NEW_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("kanshi_feed_new_items_total", "New feed items processed"),
        &["feed"],
    )
    .unwrap()
});

/// Feed items matched to a watched show.
pub static FEED_MATCHES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("kanshi_feed_matches_total", "Feed items matched to a show").unwrap()
});

/// Releases created, by origin.
pub static RELEASES_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("kanshi_releases_created_total", "Releases handed to the torrent client"),
        &["origin"], // "poll", "manual"
    )
    .unwrap()
});

// =============================================================================
// Downloader
// =============================================================================

/// State transitions persisted, by target state.
pub static ENTRY_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("kanshi_entry_transitions_total", "Release state transitions"),
        &["state"],
    )
    .unwrap()
});

/// Duration of one reconciliation pass.
pub static RECONCILE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "kanshi_reconcile_duration_seconds",
            "Duration of a reconciliation pass",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &[],
    )
    .unwrap()
});

/// Non-terminal releases that have not moved for longer than the stale threshold.
pub static STALE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("kanshi_stale_entries", "Releases stuck in a non-terminal state").unwrap()
});

// =============================================================================
// Encoder
// =============================================================================

/// Encodes finished, by result.
pub static ENCODES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("kanshi_encodes_total", "Total re-encode jobs"),
        &["result"], // "success", "failed", "skipped"
    )
    .unwrap()
});

/// Encode duration in seconds.
pub static ENCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("kanshi_encode_duration_seconds", "Duration of re-encode jobs")
            .buckets(vec![10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0]),
        &["result"],
    )
    .unwrap()
});

/// Transcoder processes currently running.
pub static ENCODES_ACTIVE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("kanshi_encodes_active", "Running re-encode jobs").unwrap());

// =============================================================================
// Torrent client
// =============================================================================

/// Torrent client calls by backend, operation and status.
pub static TORRENT_CLIENT_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "kanshi_torrent_client_requests_total",
            "Total torrent client requests",
        ),
        &["backend", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Count one torrent client call.
pub fn record_client_request<T, E>(backend: &str, operation: &str, result: &Result<T, E>) {
    let status = if result.is_ok() { "success" } else { "error" };
    TORRENT_CLIENT_REQUESTS
        .with_label_values(&[backend, operation, status])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Poller
        Box::new(FEED_POLLS.clone()),
        Box::new(FEED_NEW_ITEMS.clone()),
        Box::new(FEED_MATCHES.clone()),
        Box::new(RELEASES_CREATED.clone()),
        // Downloader
        Box::new(ENTRY_TRANSITIONS.clone()),
        Box::new(RECONCILE_DURATION.clone()),
        Box::new(STALE_ENTRIES.clone()),
        // Encoder
        Box::new(ENCODES_TOTAL.clone()),
        Box::new(ENCODE_DURATION.clone()),
        Box::new(ENCODES_ACTIVE.clone()),
        // Torrent client
        Box::new(TORRENT_CLIENT_REQUESTS.clone()),
    ]
}
