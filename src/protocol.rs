//! Switch Stats Protocol
//!
//! Messages exchanged with switches: stats requests going out, counter
//! replies and connection state changes coming back. Transport framing is
//! not modelled here; transports that carry JSON hand their payloads to
//! [`decode_event`].

use crate::{FlowclassError, Result};
use serde::{Deserialize, Serialize};

/// 64-bit datapath (switch) identifier
pub type DatapathId = u64;

/// Port selector for port stats requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSelector {
    /// All ports (OFPP_ANY)
    Any,
    /// A single port
    Port(u32),
}

/// Stats request sent to a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatsRequest {
    /// Flow table counters
    FlowStats,
    /// Port counters
    PortStats { port: PortSelector },
    /// Meter capabilities
    MeterFeatures,
    /// Counters of all meters
    MeterStats,
}

impl StatsRequest {
    /// Port stats request for every port
    pub const fn all_ports() -> Self {
        StatsRequest::PortStats { port: PortSelector::Any }
    }

    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StatsRequest::FlowStats => "flow_stats",
            StatsRequest::PortStats { .. } => "port_stats",
            StatsRequest::MeterFeatures => "meter_features",
            StatsRequest::MeterStats => "meter_stats",
        }
    }
}

/// Match fields of a flow entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    pub in_port: Option<u32>,
    pub eth_dst: Option<String>,
}

/// One flow table entry with its counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatsEntry {
    pub priority: u16,
    #[serde(rename = "match", default)]
    pub matches: FlowMatch,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_sec: u32,
    /// First output action port, if the entry forwards
    #[serde(default)]
    pub output_port: Option<u32>,
}

impl FlowStatsEntry {
    /// Ingress port and destination address of the entry.
    ///
    /// Classified entries always match on both; an entry missing either is
    /// malformed. The address ends up in a comma-separated row, so one
    /// carrying a separator or line break is rejected too.
    pub fn key(&self) -> Result<(u32, &str)> {
        match (self.matches.in_port, self.matches.eth_dst.as_deref()) {
            (Some(_), Some(eth_dst)) if eth_dst.contains(&[',', '\n', '\r'][..]) => Err(FlowclassError::Parse(
                format!("flow entry eth_dst {:?} contains a row separator", eth_dst),
            )),
            (Some(in_port), Some(eth_dst)) => Ok((in_port, eth_dst)),
            _ => Err(FlowclassError::Parse(format!(
                "flow entry (priority {}) missing in_port/eth_dst match",
                self.priority
            ))),
        }
    }
}

/// Counters of one switch port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatsEntry {
    pub port_no: u32,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

/// Meter capabilities of a switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterFeaturesEntry {
    pub max_meter: u32,
    pub band_types: u32,
    pub capabilities: u32,
    pub max_bands: u8,
    pub max_color: u8,
}

/// Counters of one meter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterStatsEntry {
    pub meter_id: u32,
    pub flow_count: u32,
    pub packet_in_count: u64,
    pub byte_in_count: u64,
    pub duration_sec: u32,
}

/// Flow stats reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatsReply {
    pub datapath_id: DatapathId,
    pub entries: Vec<FlowStatsEntry>,
}

/// Port stats reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatsReply {
    pub datapath_id: DatapathId,
    pub entries: Vec<PortStatsEntry>,
}

/// Meter features reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterFeaturesReply {
    pub datapath_id: DatapathId,
    pub entries: Vec<MeterFeaturesEntry>,
}

/// Meter stats reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterStatsReply {
    pub datapath_id: DatapathId,
    pub entries: Vec<MeterStatsEntry>,
}

/// Connection state of a datapath
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatapathState {
    Connected,
    Disconnected,
}

/// Datapath connect/disconnect notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub datapath_id: DatapathId,
    pub state: DatapathState,
}

/// Anything a switch can emit towards the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchEvent {
    StateChange(StateChange),
    FlowStats(FlowStatsReply),
    PortStats(PortStatsReply),
    MeterFeatures(MeterFeaturesReply),
    MeterStats(MeterStatsReply),
}

impl SwitchEvent {
    /// Datapath the event originates from
    pub fn datapath_id(&self) -> DatapathId {
        match self {
            SwitchEvent::StateChange(e) => e.datapath_id,
            SwitchEvent::FlowStats(r) => r.datapath_id,
            SwitchEvent::PortStats(r) => r.datapath_id,
            SwitchEvent::MeterFeatures(r) => r.datapath_id,
            SwitchEvent::MeterStats(r) => r.datapath_id,
        }
    }
}

/// Decode a JSON-encoded switch event
pub fn decode_event(payload: &[u8]) -> Result<SwitchEvent> {
    serde_json::from_slice(payload).map_err(|e| FlowclassError::Parse(e.to_string()))
}
