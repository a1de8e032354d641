//! Stats Reply Processors
//!
//! Flow replies are filtered down to classified (priority-1) entries and
//! persisted once they cross the packet threshold, which also arms the
//! begin latch. Port replies are persisted only behind the latch and only
//! for the uplink ports.

use crate::latch::BeginLatch;
use crate::metrics::PipelineMetrics;
use crate::protocol::{FlowStatsEntry, FlowStatsReply, MeterFeaturesReply, MeterStatsReply, PortStatsReply};
use crate::store::{FlowRecord, PortRecord, RecordStore};
use crate::Result;
use std::sync::Arc;

/// Flow entries at or below this packet count are not persisted
pub const PACKET_THRESHOLD: u64 = 300;

/// Priority of flow entries installed for classifiable traffic
pub const CLASSIFIED_PRIORITY: u16 = 1;

/// Highest port number persisted (ports 1 and 2 are the uplinks)
pub const MAX_UPLINK_PORT: u32 = 2;

/// Consumes flow stats replies
pub struct FlowStatsProcessor {
    store: Arc<dyn RecordStore>,
    latch: Arc<BeginLatch>,
    metrics: Arc<PipelineMetrics>,
    label: String,
}

impl FlowStatsProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        latch: Arc<BeginLatch>,
        metrics: Arc<PipelineMetrics>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            store,
            latch,
            metrics,
            label: label.into(),
        }
    }

    /// Handle one reply, returning the number of records written.
    ///
    /// Entries missing their match fields are dropped individually. A
    /// storage failure aborts the rest of this reply. The latch is armed
    /// only once a flow record has been written.
    pub fn handle(&self, reply: &FlowStatsReply) -> Result<usize> {
        let mut classified: Vec<(u32, &str, &FlowStatsEntry)> = Vec::new();
        for entry in reply.entries.iter().filter(|e| e.priority == CLASSIFIED_PRIORITY) {
            match entry.key() {
                Ok((in_port, eth_dst)) => classified.push((in_port, eth_dst, entry)),
                Err(e) => {
                    self.metrics.add_parse_failures(1);
                    tracing::warn!("datapath {:016x}: dropping flow entry: {}", reply.datapath_id, e);
                }
            }
        }
        classified.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        self.metrics.add_flow_entries_seen(classified.len() as u64);

        let mut written = 0;
        for (in_port, eth_dst, entry) in classified {
            tracing::debug!(
                "{:016x} in-port {:8x} eth-dst {:>17} out-port {:8x} packets {:8} bytes {:8}",
                reply.datapath_id,
                in_port,
                eth_dst,
                entry.output_port.unwrap_or(0),
                entry.packet_count,
                entry.byte_count
            );

            if entry.packet_count > PACKET_THRESHOLD {
                let record = FlowRecord {
                    switch_id: reply.datapath_id,
                    ingress_port: in_port,
                    destination_address: eth_dst.to_string(),
                    packet_count: entry.packet_count,
                    byte_count: entry.byte_count,
                    duration_seconds: entry.duration_sec,
                    label: self.label.clone(),
                };
                if let Err(e) = self.store.append_flow(record) {
                    self.metrics.add_storage_failures(1);
                    return Err(e);
                }
                self.latch.arm();
                self.metrics.add_flow_records(1);
                written += 1;
            }
        }

        Ok(written)
    }
}

/// Consumes port stats replies
pub struct PortStatsProcessor {
    store: Arc<dyn RecordStore>,
    latch: Arc<BeginLatch>,
    metrics: Arc<PipelineMetrics>,
}

impl PortStatsProcessor {
    pub fn new(store: Arc<dyn RecordStore>, latch: Arc<BeginLatch>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { store, latch, metrics }
    }

    /// Handle one reply, returning the number of records written
    pub fn handle(&self, reply: &PortStatsReply) -> Result<usize> {
        let mut entries: Vec<_> = reply.entries.iter().collect();
        entries.sort_by_key(|e| e.port_no);

        let mut written = 0;
        for stat in entries {
            tracing::debug!(
                "{:016x} port {:8x} rx-pkts {:8} rx-bytes {:8} rx-error {:8} tx-pkts {:8} tx-bytes {:8} tx-error {:8}",
                reply.datapath_id,
                stat.port_no,
                stat.rx_packets,
                stat.rx_bytes,
                stat.rx_errors,
                stat.tx_packets,
                stat.tx_bytes,
                stat.tx_errors
            );

            if !self.latch.is_armed() || !(1..=MAX_UPLINK_PORT).contains(&stat.port_no) {
                self.metrics.add_port_entries_dropped(1);
                continue;
            }

            let record = PortRecord {
                switch_id: reply.datapath_id,
                port_no: stat.port_no,
                rx_bytes: stat.rx_bytes,
                rx_packets: stat.rx_packets,
                tx_bytes: stat.tx_bytes,
                tx_packets: stat.tx_packets,
            };
            if let Err(e) = self.store.append_port(record) {
                self.metrics.add_storage_failures(1);
                return Err(e);
            }
            self.metrics.add_port_records(1);
            written += 1;
        }

        Ok(written)
    }
}

/// Log meter capabilities (never persisted)
pub fn log_meter_features(reply: &MeterFeaturesReply) {
    for stat in &reply.entries {
        tracing::debug!(
            "{:016x} meter features: max_meter={} band_types=0x{:08x} capabilities=0x{:08x} max_bands={} max_color={}",
            reply.datapath_id,
            stat.max_meter,
            stat.band_types,
            stat.capabilities,
            stat.max_bands,
            stat.max_color
        );
    }
}

/// Log meter counters (never persisted)
pub fn log_meter_stats(reply: &MeterStatsReply) {
    for stat in &reply.entries {
        tracing::debug!(
            "{:016x} meter 0x{:08x}: flow_count={} packet_in_count={} byte_in_count={} duration_sec={}",
            reply.datapath_id,
            stat.meter_id,
            stat.flow_count,
            stat.packet_in_count,
            stat.byte_in_count,
            stat.duration_sec
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FlowMatch, PortStatsEntry};
    use crate::store::{InMemoryRecordStore, Stored};
    use crate::FlowclassError;

    struct Fixture {
        store: Arc<InMemoryRecordStore>,
        latch: Arc<BeginLatch>,
        flows: FlowStatsProcessor,
        ports: PortStatsProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryRecordStore::new());
        let latch = Arc::new(BeginLatch::new());
        let metrics = Arc::new(PipelineMetrics::new());
        Fixture {
            flows: FlowStatsProcessor::new(store.clone(), latch.clone(), metrics.clone(), "vimeo"),
            ports: PortStatsProcessor::new(store.clone(), latch.clone(), metrics),
            store,
            latch,
        }
    }

    fn flow_entry(priority: u16, in_port: u32, eth_dst: &str, packets: u64) -> FlowStatsEntry {
        FlowStatsEntry {
            priority,
            matches: FlowMatch {
                in_port: Some(in_port),
                eth_dst: Some(eth_dst.to_string()),
            },
            packet_count: packets,
            byte_count: 50_000,
            duration_sec: 10,
            output_port: Some(2),
        }
    }

    fn port_entry(port_no: u32) -> PortStatsEntry {
        PortStatsEntry {
            port_no,
            rx_bytes: 1000,
            rx_packets: 10,
            tx_bytes: 2000,
            tx_packets: 20,
            ..Default::default()
        }
    }

    fn flow_reply(entries: Vec<FlowStatsEntry>) -> FlowStatsReply {
        FlowStatsReply { datapath_id: 1, entries }
    }

    fn port_reply(ports: &[u32]) -> PortStatsReply {
        PortStatsReply {
            datapath_id: 1,
            entries: ports.iter().map(|p| port_entry(*p)).collect(),
        }
    }

    #[test]
    fn test_qualifying_flow_arms_latch() {
        let f = fixture();
        let written = f
            .flows
            .handle(&flow_reply(vec![flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 350)]))
            .unwrap();

        assert_eq!(written, 1);
        assert!(f.latch.is_armed());

        let latest = f.store.latest_flow().unwrap().unwrap();
        assert_eq!(
            latest,
            Stored {
                seq: 1,
                record: FlowRecord {
                    switch_id: 1,
                    ingress_port: 1,
                    destination_address: "aa:bb:cc:dd:ee:ff".into(),
                    packet_count: 350,
                    byte_count: 50_000,
                    duration_seconds: 10,
                    label: "vimeo".into(),
                },
            }
        );
    }

    #[test]
    fn test_threshold_boundary() {
        let f = fixture();
        let written = f
            .flows
            .handle(&flow_reply(vec![
                flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 100),
                flow_entry(1, 2, "aa:bb:cc:dd:ee:01", PACKET_THRESHOLD),
            ]))
            .unwrap();

        assert_eq!(written, 0);
        assert!(!f.latch.is_armed());
        assert_eq!(f.store.flow_count(), 0);
    }

    #[test]
    fn test_non_classified_priority_ignored() {
        let f = fixture();
        let mut table_miss = flow_entry(0, 1, "aa:bb:cc:dd:ee:ff", 10_000);
        table_miss.matches = FlowMatch::default();

        let written = f
            .flows
            .handle(&flow_reply(vec![table_miss, flow_entry(2, 1, "aa:bb:cc:dd:ee:ff", 10_000)]))
            .unwrap();

        assert_eq!(written, 0);
        assert!(!f.latch.is_armed());
    }

    #[test]
    fn test_flows_sorted_by_port_then_address() {
        let f = fixture();
        f.flows
            .handle(&flow_reply(vec![
                flow_entry(1, 2, "00:00:00:00:00:01", 400),
                flow_entry(1, 1, "00:00:00:00:00:02", 400),
                flow_entry(1, 1, "00:00:00:00:00:01", 400),
            ]))
            .unwrap();

        let order: Vec<(u32, String)> = f
            .store
            .flows()
            .into_iter()
            .map(|r| (r.ingress_port, r.destination_address))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "00:00:00:00:00:01".to_string()),
                (1, "00:00:00:00:00:02".to_string()),
                (2, "00:00:00:00:00:01".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_entry_dropped_rest_kept() {
        let f = fixture();
        let mut broken = flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 500);
        broken.matches.eth_dst = None;

        let written = f
            .flows
            .handle(&flow_reply(vec![broken, flow_entry(1, 3, "aa:bb:cc:dd:ee:ff", 500)]))
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(f.store.flows()[0].ingress_port, 3);
    }

    #[test]
    fn test_latch_stays_armed_after_low_volume() {
        let f = fixture();
        f.flows
            .handle(&flow_reply(vec![flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 350)]))
            .unwrap();
        f.flows
            .handle(&flow_reply(vec![flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 5)]))
            .unwrap();

        assert!(f.latch.is_armed());
        assert_eq!(f.ports.handle(&port_reply(&[1])).unwrap(), 1);
    }

    #[test]
    fn test_ports_dropped_before_latch() {
        let f = fixture();
        assert_eq!(f.ports.handle(&port_reply(&[1, 2])).unwrap(), 0);
        assert_eq!(f.store.port_count(), 0);
    }

    #[test]
    fn test_only_uplink_ports_persisted() {
        let f = fixture();
        f.latch.arm();

        let written = f.ports.handle(&port_reply(&[3, 2, 0xfffffffe, 1])).unwrap();
        assert_eq!(written, 2);

        let ports: Vec<u32> = f.store.ports().iter().map(|p| p.port_no).collect();
        assert_eq!(ports, vec![1, 2]);
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn append_flow(&self, _: FlowRecord) -> Result<u64> {
            Err(FlowclassError::Storage("disk full".into()))
        }
        fn append_port(&self, _: PortRecord) -> Result<u64> {
            Err(FlowclassError::Storage("disk full".into()))
        }
        fn latest_flow(&self) -> Result<Option<Stored<FlowRecord>>> {
            Ok(None)
        }
        fn latest_port(&self) -> Result<Option<Stored<PortRecord>>> {
            Ok(None)
        }
        fn flow_count(&self) -> u64 {
            0
        }
        fn port_count(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_storage_error_propagates() {
        let metrics = Arc::new(PipelineMetrics::new());
        let processor = FlowStatsProcessor::new(
            Arc::new(FailingStore),
            Arc::new(BeginLatch::new()),
            metrics.clone(),
            "vimeo",
        );

        let err = processor
            .handle(&flow_reply(vec![flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 350)]))
            .unwrap_err();
        assert!(matches!(err, FlowclassError::Storage(_)));
        assert_eq!(metrics.snapshot().storage_failures, 1);
    }

    /// Persists ports but refuses every flow record
    struct FlowFailingStore(InMemoryRecordStore);

    impl RecordStore for FlowFailingStore {
        fn append_flow(&self, _: FlowRecord) -> Result<u64> {
            Err(FlowclassError::Storage("disk full".into()))
        }
        fn append_port(&self, record: PortRecord) -> Result<u64> {
            self.0.append_port(record)
        }
        fn latest_flow(&self) -> Result<Option<Stored<FlowRecord>>> {
            self.0.latest_flow()
        }
        fn latest_port(&self) -> Result<Option<Stored<PortRecord>>> {
            self.0.latest_port()
        }
        fn flow_count(&self) -> u64 {
            self.0.flow_count()
        }
        fn port_count(&self) -> u64 {
            self.0.port_count()
        }
    }

    #[test]
    fn test_failed_flow_write_leaves_latch_unarmed() {
        let store = Arc::new(FlowFailingStore(InMemoryRecordStore::new()));
        let latch = Arc::new(BeginLatch::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let flows = FlowStatsProcessor::new(store.clone(), latch.clone(), metrics.clone(), "vimeo");
        let ports = PortStatsProcessor::new(store.clone(), latch.clone(), metrics);

        assert!(flows
            .handle(&flow_reply(vec![flow_entry(1, 1, "aa:bb:cc:dd:ee:ff", 350)]))
            .is_err());
        assert!(!latch.is_armed());

        assert_eq!(ports.handle(&port_reply(&[1, 2])).unwrap(), 0);
        assert_eq!(store.port_count(), 0);
    }

    #[test]
    fn test_address_with_separator_dropped() {
        let store = Arc::new(InMemoryRecordStore::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let flows = FlowStatsProcessor::new(store.clone(), Arc::new(BeginLatch::new()), metrics.clone(), "vimeo");

        let written = flows
            .handle(&flow_reply(vec![
                flow_entry(1, 1, "aa:bb,cc:dd", 500),
                flow_entry(1, 2, "aa:bb:cc:dd:ee:ff", 500),
            ]))
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(metrics.snapshot().parse_failures, 1);
        assert_eq!(store.flows()[0].destination_address, "aa:bb:cc:dd:ee:ff");
    }
}
