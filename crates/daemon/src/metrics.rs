//! Prometheus registry served on `/metrics`.
//!
//! Counters live in `kanshi_core::metrics` and are updated where the work
//! happens. The gauges here are sampled from the orchestrator status right
//! before each scrape.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use kanshi_core::Orchestrator;

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "kanshi_orchestrator_running",
        "Whether the poll and reconcile loops are running (1 = running)",
    )
    .unwrap()
});

pub static UNFINISHED_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "kanshi_unfinished_entries",
        "Releases not yet completed",
    )
    .unwrap()
});

pub static ENCODES_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("kanshi_encodes_queued", "Re-encodes waiting for a slot").unwrap()
});

fn register_metrics(registry: &Registry) {
    for collector in kanshi_core::metrics::all_metrics() {
        registry.register(collector).unwrap();
    }
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(UNFINISHED_ENTRIES.clone()))
        .unwrap();
    registry.register(Box::new(ENCODES_QUEUED.clone())).unwrap();
}

/// Refresh the sampled gauges.
pub async fn collect_dynamic_metrics(orchestrator: &Orchestrator) {
    match orchestrator.status().await {
        Ok(status) => {
            ORCHESTRATOR_RUNNING.set(status.running as i64);
            UNFINISHED_ENTRIES.set(status.downloader.unfinished as i64);
            ENCODES_QUEUED.set(
                status
                    .encoder
                    .map(|e| e.queued.len() as i64)
                    .unwrap_or_default(),
            );
        }
        Err(e) => tracing::warn!(error = %e, "Could not sample orchestrator status"),
    }
}

/// Text exposition of everything in [`REGISTRY`].
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
