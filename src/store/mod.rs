//! Record Persistence
//!
//! Two append-only streams, flow records and port records, with
//! "most recent record" read-back.

pub mod flat_file;
pub mod memory;

pub use flat_file::FlatFileRecordStore;
pub use memory::InMemoryRecordStore;

use crate::protocol::DatapathId;
use crate::{FlowclassError, Result};
use serde::{Deserialize, Serialize};

/// Persisted flow counters of one classified flow entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub switch_id: DatapathId,
    pub ingress_port: u32,
    pub destination_address: String,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_seconds: u32,
    /// Collection label (training target)
    pub label: String,
}

/// Persisted counters of one uplink port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub switch_id: DatapathId,
    pub port_no: u32,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Record with its storage-assigned sequence number (1-based)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub seq: u64,
    pub record: T,
}

/// Append-only record store
///
/// Appends and reads of the same stream are serialized by the store, so a
/// reader never observes a partially written record.
pub trait RecordStore: Send + Sync {
    /// Append a flow record, returning its sequence number
    fn append_flow(&self, record: FlowRecord) -> Result<u64>;

    /// Append a port record, returning its sequence number
    fn append_port(&self, record: PortRecord) -> Result<u64>;

    /// Most recently appended flow record
    fn latest_flow(&self) -> Result<Option<Stored<FlowRecord>>>;

    /// Most recently appended port record
    fn latest_port(&self) -> Result<Option<Stored<PortRecord>>>;

    /// Number of flow records
    fn flow_count(&self) -> u64;

    /// Number of port records
    fn port_count(&self) -> u64;
}

/// Ordered scalar row encoding shared by the flat-file streams
pub(crate) trait CsvRow: Sized {
    const HEADER: &'static str;

    fn to_row(&self) -> String;

    fn from_row(line: &str) -> Result<Self>;
}

fn field<T: std::str::FromStr>(value: Option<&str>, name: &str, line: &str) -> Result<T> {
    value
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| FlowclassError::Parse(format!("bad {} in row '{}'", name, line)))
}

impl CsvRow for FlowRecord {
    const HEADER: &'static str = "dp_id,in_port,eth_dst,packets,bytes,duration_sec,target";

    fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.switch_id,
            self.ingress_port,
            self.destination_address,
            self.packet_count,
            self.byte_count,
            self.duration_seconds,
            self.label
        )
    }

    fn from_row(line: &str) -> Result<Self> {
        // label is last so it may itself contain commas
        let mut parts = line.splitn(7, ',');
        let switch_id = field(parts.next(), "dp_id", line)?;
        let ingress_port = field(parts.next(), "in_port", line)?;
        let destination_address: String = field(parts.next(), "eth_dst", line)?;
        let packet_count = field(parts.next(), "packets", line)?;
        let byte_count = field(parts.next(), "bytes", line)?;
        let duration_seconds = field(parts.next(), "duration_sec", line)?;
        let label = parts
            .next()
            .map(|l| l.to_string())
            .ok_or_else(|| FlowclassError::Parse(format!("missing target in row '{}'", line)))?;

        Ok(Self {
            switch_id,
            ingress_port,
            destination_address,
            packet_count,
            byte_count,
            duration_seconds,
            label,
        })
    }
}

impl CsvRow for PortRecord {
    const HEADER: &'static str = "dp_id,port_no,rx_bytes,rx_pkts,tx_bytes,tx_pkts";

    fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.switch_id, self.port_no, self.rx_bytes, self.rx_packets, self.tx_bytes, self.tx_packets
        )
    }

    fn from_row(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 6 {
            return Err(FlowclassError::Parse(format!(
                "expected 6 fields, got {} in row '{}'",
                parts.len(),
                line
            )));
        }
        let mut it = parts.into_iter();

        Ok(Self {
            switch_id: field(it.next(), "dp_id", line)?,
            port_no: field(it.next(), "port_no", line)?,
            rx_bytes: field(it.next(), "rx_bytes", line)?,
            rx_packets: field(it.next(), "rx_pkts", line)?,
            tx_bytes: field(it.next(), "tx_bytes", line)?,
            tx_packets: field(it.next(), "tx_pkts", line)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_row_keeps_commas_in_label() {
        let record = FlowRecord {
            switch_id: 1,
            ingress_port: 2,
            destination_address: "aa:bb:cc:dd:ee:ff".into(),
            packet_count: 350,
            byte_count: 50_000,
            duration_seconds: 10,
            label: "video,hd".into(),
        };

        let row = record.to_row();
        assert_eq!(row, "1,2,aa:bb:cc:dd:ee:ff,350,50000,10,video,hd");
        assert_eq!(FlowRecord::from_row(&row).unwrap(), record);
    }

    #[test]
    fn test_port_row_rejects_short_line() {
        assert!(matches!(
            PortRecord::from_row("1,2,3"),
            Err(FlowclassError::Parse(_))
        ));
        assert!(matches!(
            PortRecord::from_row("1,x,3,4,5,6"),
            Err(FlowclassError::Parse(_))
        ));
    }
}
