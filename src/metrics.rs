//! Process-wide Prometheus metrics. One `MetricsRegistry` is built at
//! startup and shared (`Arc`) into every component, the same way the
//! teacher hands each manager its own `SystemMetrics` struct of
//! pre-registered collectors.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Debug)]
pub struct MetricsRegistry {
    registry: Registry,

    pub tasks_ingested_total: IntCounter,
    pub tasks_completed_total: IntCounter,
    pub tasks_failed_total: IntCounter,
    pub tasks_requeued_total: IntCounter,
    pub task_processing_seconds: Histogram,

    pub gateway_connections: IntGauge,
    pub gateway_events_sent_total: IntCounter,
    pub gateway_idle_closes_total: IntCounter,

    pub bus_publish_total: IntCounter,
    pub bus_publish_errors_total: IntCounter,

    pub cdc_notifications_total: IntCounter,
    pub cdc_reconnects_total: IntCounter,

    pub versions_saved_total: IntCounter,
    pub corruption_fallbacks_total: IntCounter,

    pub permission_checks_total: IntCounterVec,

    pub reaper_sessions_closed_total: IntCounter,
    pub reaper_tasks_requeued_total: IntCounter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tasks_ingested_total = IntCounter::new(
            "docflow_tasks_ingested_total",
            "Total OCR tasks accepted for processing",
        )
        .unwrap();
        let tasks_completed_total =
            IntCounter::new("docflow_tasks_completed_total", "Total OCR tasks completed").unwrap();
        let tasks_failed_total =
            IntCounter::new("docflow_tasks_failed_total", "Total OCR tasks that exhausted retries").unwrap();
        let tasks_requeued_total = IntCounter::new(
            "docflow_tasks_requeued_total",
            "Total OCR tasks returned to the queue after a worker crash or failure",
        )
        .unwrap();
        let task_processing_seconds = Histogram::with_opts(HistogramOpts::new(
            "docflow_task_processing_seconds",
            "Wall-clock time spent running a single OCR task attempt",
        ))
        .unwrap();

        let gateway_connections = IntGauge::new(
            "docflow_gateway_connections",
            "Currently open websocket connections",
        )
        .unwrap();
        let gateway_events_sent_total = IntCounter::new(
            "docflow_gateway_events_sent_total",
            "Total realtime events delivered to websocket clients",
        )
        .unwrap();
        let gateway_idle_closes_total = IntCounter::new(
            "docflow_gateway_idle_closes_total",
            "Total websocket connections closed for missing a ping",
        )
        .unwrap();

        let bus_publish_total =
            IntCounter::new("docflow_bus_publish_total", "Total events published to the bus").unwrap();
        let bus_publish_errors_total = IntCounter::new(
            "docflow_bus_publish_errors_total",
            "Total bus publish attempts that failed",
        )
        .unwrap();

        let cdc_notifications_total = IntCounter::new(
            "docflow_cdc_notifications_total",
            "Total LISTEN/NOTIFY payloads received from the metadata store",
        )
        .unwrap();
        let cdc_reconnects_total = IntCounter::new(
            "docflow_cdc_reconnects_total",
            "Total change-capture listener reconnect attempts",
        )
        .unwrap();

        let versions_saved_total = IntCounter::new(
            "docflow_versions_saved_total",
            "Total document versions written, draft or published",
        )
        .unwrap();
        let corruption_fallbacks_total = IntCounter::new(
            "docflow_corruption_fallbacks_total",
            "Total times a corrupted version forced a fallback to the original",
        )
        .unwrap();

        let permission_checks_total = IntCounterVec::new(
            Opts::new("docflow_permission_checks_total", "Total permission checks by outcome"),
            &["outcome"],
        )
        .unwrap();

        let reaper_sessions_closed_total = IntCounter::new(
            "docflow_reaper_sessions_closed_total",
            "Total edit sessions force-ended for exceeding the idle timeout",
        )
        .unwrap();
        let reaper_tasks_requeued_total = IntCounter::new(
            "docflow_reaper_tasks_requeued_total",
            "Total tasks requeued by the stuck-task sweep",
        )
        .unwrap();

        for c in [
            &tasks_ingested_total,
            &tasks_completed_total,
            &tasks_failed_total,
            &tasks_requeued_total,
        ] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        registry.register(Box::new(task_processing_seconds.clone())).unwrap();
        registry.register(Box::new(gateway_connections.clone())).unwrap();
        for c in [&gateway_events_sent_total, &gateway_idle_closes_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        for c in [&bus_publish_total, &bus_publish_errors_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        for c in [&cdc_notifications_total, &cdc_reconnects_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        for c in [&versions_saved_total, &corruption_fallbacks_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        registry.register(Box::new(permission_checks_total.clone())).unwrap();
        for c in [&reaper_sessions_closed_total, &reaper_tasks_requeued_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }

        Self {
            registry,
            tasks_ingested_total,
            tasks_completed_total,
            tasks_failed_total,
            tasks_requeued_total,
            task_processing_seconds,
            gateway_connections,
            gateway_events_sent_total,
            gateway_idle_closes_total,
            bus_publish_total,
            bus_publish_errors_total,
            cdc_notifications_total,
            cdc_reconnects_total,
            versions_saved_total,
            corruption_fallbacks_total,
            permission_checks_total,
            reaper_sessions_closed_total,
            reaper_tasks_requeued_total,
        }
    }

    /// Renders the Prometheus text exposition format for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode(&families, &mut buffer).expect("metrics encoding is infallible");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid utf-8")
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = MetricsRegistry::new();
        metrics.tasks_ingested_total.inc();
        let text = metrics.render();
        assert!(text.contains("docflow_tasks_ingested_total"));
    }

    #[test]
    fn permission_checks_split_by_outcome_label() {
        let metrics = MetricsRegistry::new();
        metrics.permission_checks_total.with_label_values(&["granted"]).inc();
        metrics.permission_checks_total.with_label_values(&["denied"]).inc();
        metrics.permission_checks_total.with_label_values(&["denied"]).inc();
        assert_eq!(metrics.permission_checks_total.with_label_values(&["denied"]).get(), 2);
    }
}
