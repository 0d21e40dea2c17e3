use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Queue metrics
    pub static ref TASKS_PENDING: IntGauge = IntGauge::new(
        "recognition_tasks_pending",
        "Current number of tasks waiting in the backlog"
    ).unwrap();

    pub static ref TASKS_RUNNING: IntGauge = IntGauge::new(
        "recognition_tasks_running",
        "Current number of tasks being executed"
    ).unwrap();

    pub static ref TASKS_COMPLETED: IntCounter = IntCounter::new(
        "recognition_tasks_completed_total",
        "Total number of tasks that reached a terminal outcome"
    ).unwrap();

    pub static ref TASKS_FAILED: IntCounter = IntCounter::new(
        "recognition_tasks_failed_total",
        "Total number of tasks that finished with the error sentinel"
    ).unwrap();

    pub static ref TASKS_SHORT_CIRCUITED: IntCounter = IntCounter::new(
        "recognition_tasks_short_circuited_total",
        "Total number of tasks answered from an existing stored prediction"
    ).unwrap();

    // Pipeline metrics
    pub static ref LINES_RECOGNIZED: IntCounter = IntCounter::new(
        "recognition_lines_total",
        "Total number of segmented text lines run through the model"
    ).unwrap();

    pub static ref SEGMENTATION_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "segmentation_duration_seconds",
            "Line segmentation round-trip latency in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ).unwrap();

    pub static ref INFERENCE_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Single-line model forward pass latency in seconds"
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).unwrap();

    pub static ref TASK_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "recognition_task_duration_seconds",
            "End-to-end task latency from dispatch to terminal outcome"
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(TASKS_PENDING.clone())).unwrap();
    REGISTRY.register(Box::new(TASKS_RUNNING.clone())).unwrap();
    REGISTRY.register(Box::new(TASKS_COMPLETED.clone())).unwrap();
    REGISTRY.register(Box::new(TASKS_FAILED.clone())).unwrap();
    REGISTRY.register(Box::new(TASKS_SHORT_CIRCUITED.clone())).unwrap();
    REGISTRY.register(Box::new(LINES_RECOGNIZED.clone())).unwrap();
    REGISTRY.register(Box::new(SEGMENTATION_LATENCY.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCE_LATENCY.clone())).unwrap();
    REGISTRY.register(Box::new(TASK_LATENCY.clone())).unwrap();

    tracing::info!(
        "Metrics registry initialized with {} collectors",
        REGISTRY.gather().len()
    );
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_includes_registered_counters() {
        init_metrics();
        TASKS_COMPLETED.inc();
        let exported = export_metrics();
        assert!(exported.contains("recognition_tasks_completed_total"));
    }
}
