// Metrics recording for the blotter services. This only emits through the
// `metrics` facade; installing an exporter is the embedder's choice.

use metrics::{counter, gauge};

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_event_applied(&self, event_type: &'static str) {
        counter!("blotter_events_applied_total", "type" => event_type).increment(1);
    }

    pub fn record_event_stale(&self, event_type: &'static str) {
        counter!("blotter_events_stale_total", "type" => event_type).increment(1);
    }

    pub fn record_event_duplicate(&self, event_type: &'static str) {
        counter!("blotter_events_duplicate_total", "type" => event_type).increment(1);
    }

    pub fn record_event_buffered(&self) {
        counter!("blotter_events_buffered_total").increment(1);
    }

    pub fn record_buffer_overflow(&self) {
        counter!("blotter_preseed_overflow_total").increment(1);
    }

    pub fn record_decode_error(&self, channel: &'static str, reason: &'static str) {
        counter!("blotter_decode_errors_total", "channel" => channel, "reason" => reason)
            .increment(1);
    }

    pub fn record_reconnect(&self, channel: &str) {
        counter!("blotter_reconnects_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn record_seed(&self, positions: usize, orders: usize, executions: usize) {
        counter!("blotter_seeds_total").increment(1);
        gauge!("blotter_seed_positions").set(positions as f64);
        gauge!("blotter_seed_orders").set(orders as f64);
        gauge!("blotter_seed_executions").set(executions as f64);
    }

    pub fn record_snapshot(&self, sequence: u64, positions: usize, orders: usize) {
        gauge!("blotter_snapshot_sequence").set(sequence as f64);
        gauge!("blotter_snapshot_positions").set(positions as f64);
        gauge!("blotter_snapshot_orders").set(orders as f64);
    }
}
