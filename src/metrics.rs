//! Pipeline Metrics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters, shared by the poller and the reply consumers
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    ticks: AtomicU64,
    requests_sent: AtomicU64,
    transport_failures: AtomicU64,
    flow_entries_seen: AtomicU64,
    flow_records: AtomicU64,
    port_records: AtomicU64,
    port_entries_dropped: AtomicU64,
    parse_failures: AtomicU64,
    storage_failures: AtomicU64,
    classifications: AtomicU64,
    classification_failures: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl PipelineMetrics {
            $(
                #[doc = concat!("Add to `", stringify!($field), "`")]
                pub fn $name(&self, n: u64) {
                    self.$field.fetch_add(n, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    add_ticks => ticks,
    add_requests_sent => requests_sent,
    add_transport_failures => transport_failures,
    add_flow_entries_seen => flow_entries_seen,
    add_flow_records => flow_records,
    add_port_records => port_records,
    add_port_entries_dropped => port_entries_dropped,
    add_parse_failures => parse_failures,
    add_storage_failures => storage_failures,
    add_classifications => classifications,
    add_classification_failures => classification_failures,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks: load(&self.ticks),
            requests_sent: load(&self.requests_sent),
            transport_failures: load(&self.transport_failures),
            flow_entries_seen: load(&self.flow_entries_seen),
            flow_records: load(&self.flow_records),
            port_records: load(&self.port_records),
            port_entries_dropped: load(&self.port_entries_dropped),
            parse_failures: load(&self.parse_failures),
            storage_failures: load(&self.storage_failures),
            classifications: load(&self.classifications),
            classification_failures: load(&self.classification_failures),
        }
    }

    /// Export as Prometheus format
    pub fn prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("flowclass_ticks_total", "Poller ticks", s.ticks),
            ("flowclass_requests_sent_total", "Stats requests sent", s.requests_sent),
            ("flowclass_transport_failures_total", "Stats requests that failed to send", s.transport_failures),
            ("flowclass_flow_entries_seen_total", "Priority-1 flow entries observed", s.flow_entries_seen),
            ("flowclass_flow_records_total", "Flow records persisted", s.flow_records),
            ("flowclass_port_records_total", "Port records persisted", s.port_records),
            ("flowclass_port_entries_dropped_total", "Port entries observed but not persisted", s.port_entries_dropped),
            ("flowclass_parse_failures_total", "Malformed replies or entries dropped", s.parse_failures),
            ("flowclass_storage_failures_total", "Failed record writes", s.storage_failures),
            ("flowclass_classifications_total", "Successful classification passes", s.classifications),
            ("flowclass_classification_failures_total", "Failed classification passes", s.classification_failures),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }
        output
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub requests_sent: u64,
    pub transport_failures: u64,
    pub flow_entries_seen: u64,
    pub flow_records: u64,
    pub port_records: u64,
    pub port_entries_dropped: u64,
    pub parse_failures: u64,
    pub storage_failures: u64,
    pub classifications: u64,
    pub classification_failures: u64,
}
