//! Process-global Prometheus metrics, registered once behind a
//! `once_cell::sync::Lazy` the way the rest of this corpus wires metrics —
//! no dependency injection needed since there is exactly one discoverer per
//! process.

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static QUEUE_PENDING_CHECKS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "discoverer_queue_pending_checks",
        "Checks currently queued across all active jobs",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static WORKERS_BUSY: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("discoverer_workers_busy", "Workers currently dispatching a task").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("discoverer_jobs_active", "Jobs currently tracked by the queue").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static RESULTS_FLUSHED_TOTAL: Lazy<prometheus::IntCounter> = Lazy::new(|| {
    let counter = prometheus::IntCounter::new(
        "discoverer_results_flushed_total",
        "Host results flushed to the persistence collaborator",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static RULE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("discoverer_rule_errors_total", "RuleErrors recorded, by druleid"),
        &["druleid"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static HOSTMAP_REVISION: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("discoverer_hostmap_revision", "Current hostmap_revision per proxy group"),
        &["group"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

/// Renders the registry in Prometheus text format, used by the bare
/// `TcpListener` `/metrics` endpoint — no web framework needed for one route.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        QUEUE_PENDING_CHECKS.set(3);
        let text = render();
        assert!(text.contains("discoverer_queue_pending_checks"));
    }
}
