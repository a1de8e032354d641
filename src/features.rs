//! Feature Assembly
//!
//! Joins the most recent flow record with the most recent port record.
//! The join is by recency alone: the two records may come from different
//! switches or different polling cycles.

use crate::protocol::DatapathId;
use crate::store::RecordStore;
use crate::{FlowclassError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Columns of a feature row, in row order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    SwitchIdFlow,
    IngressPort,
    DestinationAddress,
    Packets,
    Bytes,
    DurationSeconds,
    SwitchIdPort,
    PortNo,
    RxBytes,
    RxPackets,
    TxBytes,
    TxPackets,
}

impl Column {
    /// Every column, in row order
    pub const ALL: [Column; 12] = [
        Column::SwitchIdFlow,
        Column::IngressPort,
        Column::DestinationAddress,
        Column::Packets,
        Column::Bytes,
        Column::DurationSeconds,
        Column::SwitchIdPort,
        Column::PortNo,
        Column::RxBytes,
        Column::RxPackets,
        Column::TxBytes,
        Column::TxPackets,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::SwitchIdFlow => "switch_id_flow",
            Column::IngressPort => "ingress_port",
            Column::DestinationAddress => "destination_address",
            Column::Packets => "packets",
            Column::Bytes => "bytes",
            Column::DurationSeconds => "duration_seconds",
            Column::SwitchIdPort => "switch_id_port",
            Column::PortNo => "port_no",
            Column::RxBytes => "rx_bytes",
            Column::RxPackets => "rx_packets",
            Column::TxBytes => "tx_bytes",
            Column::TxPackets => "tx_packets",
        }
    }
}

/// Scalar value of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

/// One joined flow + port row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub switch_id_flow: DatapathId,
    pub ingress_port: u32,
    pub destination_address: String,
    pub packets: u64,
    pub bytes: u64,
    pub duration_seconds: u32,
    pub switch_id_port: DatapathId,
    pub port_no: u32,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

impl FeatureRow {
    /// Value of a column
    pub fn value(&self, column: Column) -> FeatureValue {
        use FeatureValue::Number;
        match column {
            Column::SwitchIdFlow => Number(self.switch_id_flow as f64),
            Column::IngressPort => Number(self.ingress_port as f64),
            Column::DestinationAddress => FeatureValue::Text(self.destination_address.clone()),
            Column::Packets => Number(self.packets as f64),
            Column::Bytes => Number(self.bytes as f64),
            Column::DurationSeconds => Number(self.duration_seconds as f64),
            Column::SwitchIdPort => Number(self.switch_id_port as f64),
            Column::PortNo => Number(self.port_no as f64),
            Column::RxBytes => Number(self.rx_bytes as f64),
            Column::RxPackets => Number(self.rx_packets as f64),
            Column::TxBytes => Number(self.tx_bytes as f64),
            Column::TxPackets => Number(self.tx_packets as f64),
        }
    }

    /// Numeric value of a column; text columns are a feature error
    pub fn numeric(&self, column: Column) -> Result<f64> {
        match self.value(column) {
            FeatureValue::Number(v) => Ok(v),
            FeatureValue::Text(_) => Err(FlowclassError::Feature(format!(
                "column {} is not numeric",
                column.name()
            ))),
        }
    }

    /// All columns as (name, value) pairs, in row order
    pub fn columns(&self) -> Vec<(&'static str, FeatureValue)> {
        Column::ALL.iter().map(|c| (c.name(), self.value(*c))).collect()
    }
}

/// Builds feature rows from the record store
pub struct FeatureAssembler {
    store: Arc<dyn RecordStore>,
}

/// Feature row plus the sequence numbers it was joined from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledRow {
    pub row: FeatureRow,
    pub flow_seq: u64,
    pub port_seq: u64,
}

impl FeatureAssembler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Join the latest flow and port records. `None` while either stream
    /// is empty.
    pub fn assemble(&self) -> Result<Option<AssembledRow>> {
        let (flow, port) = match (self.store.latest_flow()?, self.store.latest_port()?) {
            (Some(flow), Some(port)) => (flow, port),
            _ => return Ok(None),
        };

        let row = FeatureRow {
            switch_id_flow: flow.record.switch_id,
            ingress_port: flow.record.ingress_port,
            destination_address: flow.record.destination_address,
            packets: flow.record.packet_count,
            bytes: flow.record.byte_count,
            duration_seconds: flow.record.duration_seconds,
            switch_id_port: port.record.switch_id,
            port_no: port.record.port_no,
            rx_bytes: port.record.rx_bytes,
            rx_packets: port.record.rx_packets,
            tx_bytes: port.record.tx_bytes,
            tx_packets: port.record.tx_packets,
        };

        Ok(Some(AssembledRow {
            row,
            flow_seq: flow.seq,
            port_seq: port.seq,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{FlowRecord, InMemoryRecordStore, PortRecord};

    pub(crate) fn sample_row() -> FeatureRow {
        FeatureRow {
            switch_id_flow: 1,
            ingress_port: 1,
            destination_address: "aa:bb:cc:dd:ee:ff".into(),
            packets: 350,
            bytes: 50_000,
            duration_seconds: 10,
            switch_id_port: 1,
            port_no: 1,
            rx_bytes: 1000,
            rx_packets: 10,
            tx_bytes: 2000,
            tx_packets: 20,
        }
    }

    fn flow(switch_id: u64) -> FlowRecord {
        FlowRecord {
            switch_id,
            ingress_port: 1,
            destination_address: "aa:bb:cc:dd:ee:ff".into(),
            packet_count: 350,
            byte_count: 50_000,
            duration_seconds: 10,
            label: "vimeo".into(),
        }
    }

    fn port(switch_id: u64, port_no: u32) -> PortRecord {
        PortRecord {
            switch_id,
            port_no,
            rx_bytes: 1000,
            rx_packets: 10,
            tx_bytes: 2000,
            tx_packets: 20,
        }
    }

    #[test]
    fn test_none_until_both_streams_have_records() {
        let store = Arc::new(InMemoryRecordStore::new());
        let assembler = FeatureAssembler::new(store.clone());
        assert!(assembler.assemble().unwrap().is_none());

        store.append_flow(flow(1)).unwrap();
        assert!(assembler.assemble().unwrap().is_none());

        store.append_port(port(1, 1)).unwrap();
        let assembled = assembler.assemble().unwrap().unwrap();
        assert_eq!(assembled.row, sample_row());
        assert_eq!(assembled.row.columns().len(), 12);
    }

    #[test]
    fn test_join_uses_latest_regardless_of_switch() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.append_flow(flow(1)).unwrap();
        store.append_port(port(1, 1)).unwrap();
        store.append_port(port(9, 2)).unwrap();

        let assembled = FeatureAssembler::new(store).assemble().unwrap().unwrap();
        assert_eq!(assembled.row.switch_id_flow, 1);
        assert_eq!(assembled.row.switch_id_port, 9);
        assert_eq!(assembled.row.port_no, 2);
        assert_eq!((assembled.flow_seq, assembled.port_seq), (1, 2));
    }

    #[test]
    fn test_column_names_and_numeric_access() {
        let row = sample_row();
        let names: Vec<&str> = row.columns().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "switch_id_flow", "ingress_port", "destination_address", "packets", "bytes",
                "duration_seconds", "switch_id_port", "port_no", "rx_bytes", "rx_packets",
                "tx_bytes", "tx_packets",
            ]
        );

        assert_eq!(row.numeric(Column::TxPackets).unwrap(), 20.0);
        assert!(matches!(
            row.numeric(Column::DestinationAddress),
            Err(FlowclassError::Feature(_))
        ));
    }
}
