//! Process metrics (`SPEC_FULL.md` AMBIENT "metrics"): `prometheus`
//! counters/gauges/histograms, the crate the teacher's `aptos-metrics-core`
//! wraps. A single [`Metrics`] struct is constructed once and handed to
//! each subsystem by reference, mirroring the teacher's pattern of
//! threading config/handles through constructors rather than reaching for
//! process-global statics.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Process-wide metric handles. Every field is registered against the same
/// [`Registry`] so [`Metrics::gather`] returns a single consistent text
/// exposition (the shape an RPC/metrics endpoint — out of scope per
/// `spec.md` §1 — would serve).
pub struct Metrics {
    registry: Registry,

    pub blocks_processed: IntCounterVec,
    pub blocks_rejected: IntCounterVec,
    pub elections_active: IntGauge,
    pub elections_confirmed: IntCounter,
    pub elections_dropped: IntCounter,
    pub active_difficulty: Gauge,
    pub confirmation_height_queue_len: IntGauge,
    pub blocks_cemented: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let blocks_processed = IntCounterVec::new(
            Opts::new("lattice_blocks_processed_total", "Blocks processed by result code"),
            &["code"],
        )?;
        let blocks_rejected = IntCounterVec::new(
            Opts::new("lattice_blocks_rejected_total", "Blocks rejected by result code"),
            &["code"],
        )?;
        let elections_active = IntGauge::new("lattice_elections_active", "Live elections in active_transactions")?;
        let elections_confirmed = IntCounter::new("lattice_elections_confirmed_total", "Elections that reached quorum")?;
        let elections_dropped = IntCounter::new("lattice_elections_dropped_total", "Elections evicted without confirming")?;
        let active_difficulty = Gauge::new("lattice_active_difficulty", "Published active_difficulty")?;
        let confirmation_height_queue_len =
            IntGauge::new("lattice_confirmation_height_queue_len", "Pending confirmation-height queue depth")?;
        let blocks_cemented = IntCounter::new("lattice_blocks_cemented_total", "Blocks cemented by the confirmation-height processor")?;

        registry.register(Box::new(blocks_processed.clone()))?;
        registry.register(Box::new(blocks_rejected.clone()))?;
        registry.register(Box::new(elections_active.clone()))?;
        registry.register(Box::new(elections_confirmed.clone()))?;
        registry.register(Box::new(elections_dropped.clone()))?;
        registry.register(Box::new(active_difficulty.clone()))?;
        registry.register(Box::new(confirmation_height_queue_len.clone()))?;
        registry.register(Box::new(blocks_cemented.clone()))?;

        Ok(Metrics {
            registry,
            blocks_processed,
            blocks_rejected,
            elections_active,
            elections_confirmed,
            elections_dropped,
            active_difficulty,
            confirmation_height_queue_len,
            blocks_cemented,
        })
    }

    /// Renders the current snapshot in Prometheus text exposition format,
    /// for a front-end (out of scope per `spec.md` §1) to serve on
    /// `/metrics`.
    pub fn gather(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric registration with fixed, non-duplicate names never fails")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_reports_registered_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.blocks_processed.with_label_values(&["progress"]).inc();
        metrics.elections_active.set(3);
        let text = metrics.gather().unwrap();
        assert!(text.contains("lattice_blocks_processed_total"));
        assert!(text.contains("lattice_elections_active"));
    }
}
