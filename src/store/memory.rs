//! In-memory record store

use super::{FlowRecord, PortRecord, RecordStore, Stored};
use crate::Result;
use parking_lot::RwLock;

/// In-memory record store (for testing and collection without disk)
pub struct InMemoryRecordStore {
    flows: RwLock<Vec<FlowRecord>>,
    ports: RwLock<Vec<PortRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(Vec::new()),
            ports: RwLock::new(Vec::new()),
        }
    }

    /// All flow records in insertion order
    pub fn flows(&self) -> Vec<FlowRecord> {
        self.flows.read().clone()
    }

    /// All port records in insertion order
    pub fn ports(&self) -> Vec<PortRecord> {
        self.ports.read().clone()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn last<T: Clone>(records: &[T]) -> Option<Stored<T>> {
    records.last().map(|record| Stored {
        seq: records.len() as u64,
        record: record.clone(),
    })
}

impl RecordStore for InMemoryRecordStore {
    fn append_flow(&self, record: FlowRecord) -> Result<u64> {
        let mut flows = self.flows.write();
        flows.push(record);
        Ok(flows.len() as u64)
    }

    fn append_port(&self, record: PortRecord) -> Result<u64> {
        let mut ports = self.ports.write();
        ports.push(record);
        Ok(ports.len() as u64)
    }

    fn latest_flow(&self) -> Result<Option<Stored<FlowRecord>>> {
        Ok(last(&self.flows.read()))
    }

    fn latest_port(&self) -> Result<Option<Stored<PortRecord>>> {
        Ok(last(&self.ports.read()))
    }

    fn flow_count(&self) -> u64 {
        self.flows.read().len() as u64
    }

    fn port_count(&self) -> u64 {
        self.ports.read().len() as u64
    }
}
