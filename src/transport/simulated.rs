//! Simulated switch fabric
//!
//! Stands in for real switches: keeps per-switch flow and port counters
//! that grow on every poll and answers each request with a delayed reply
//! event.

use super::StatsTransport;
use crate::protocol::{
    DatapathId, DatapathState, FlowMatch, FlowStatsEntry, FlowStatsReply, MeterFeaturesEntry,
    MeterFeaturesReply, MeterStatsEntry, MeterStatsReply, PortSelector, PortStatsEntry,
    PortStatsReply, StateChange, StatsRequest, SwitchEvent,
};
use crate::{FlowclassError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Local port of a switch (OFPP_LOCAL)
pub const LOCAL_PORT: u32 = 0xffff_fffe;

/// Average packet sizes cycled across simulated hosts
const PACKET_SIZES: [u64; 5] = [1350, 900, 1100, 180, 1250];

/// Simulated fabric settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of switches, with datapath ids `1..=datapaths`
    pub datapaths: u64,
    /// Hosts behind each switch; host `h` sits on port `h`
    pub hosts_per_switch: u32,
    /// Delay before each reply is delivered
    pub reply_delay_ms: u64,
    /// Fixed RNG seed for reproducible counters
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            datapaths: 2,
            hosts_per_switch: 3,
            reply_delay_ms: 20,
            seed: None,
        }
    }
}

struct SimFlow {
    in_port: u32,
    eth_dst: String,
    output_port: u32,
    packet_size: u64,
    packets: u64,
    bytes: u64,
}

struct SimSwitch {
    connected: bool,
    started: Instant,
    table_miss_packets: u64,
    flows: Vec<SimFlow>,
    ports: BTreeMap<u32, PortStatsEntry>,
}

impl SimSwitch {
    fn new(id: DatapathId, hosts: u32) -> Self {
        let uplink = hosts + 1;
        let flows = (1..=hosts)
            .map(|h| SimFlow {
                in_port: uplink,
                eth_dst: format!("00:00:00:00:{:02x}:{:02x}", id & 0xff, h & 0xff),
                output_port: h,
                packet_size: PACKET_SIZES[(h as usize - 1) % PACKET_SIZES.len()],
                packets: 0,
                bytes: 0,
            })
            .collect();

        let ports = (1..=uplink)
            .chain(std::iter::once(LOCAL_PORT))
            .map(|port_no| {
                (
                    port_no,
                    PortStatsEntry {
                        port_no,
                        ..Default::default()
                    },
                )
            })
            .collect();

        Self {
            connected: false,
            started: Instant::now(),
            table_miss_packets: 0,
            flows,
            ports,
        }
    }

    fn uptime(&self) -> u32 {
        u32::try_from(self.started.elapsed().as_secs()).unwrap_or(u32::MAX)
    }

    fn flow_stats(&mut self, rng: &mut StdRng) -> Vec<FlowStatsEntry> {
        let duration_sec = self.uptime();
        self.table_miss_packets += rng.gen_range(0..5);

        let mut entries = vec![FlowStatsEntry {
            priority: 0,
            matches: FlowMatch::default(),
            packet_count: self.table_miss_packets,
            byte_count: self.table_miss_packets * 90,
            duration_sec,
            output_port: None,
        }];

        for flow in &mut self.flows {
            let added = rng.gen_range(40..=160);
            flow.packets += added;
            flow.bytes += added * flow.packet_size;

            // mirror the traffic onto the port counters
            if let Some(port) = self.ports.get_mut(&flow.in_port) {
                port.rx_packets += added;
                port.rx_bytes += added * flow.packet_size;
            }
            if let Some(port) = self.ports.get_mut(&flow.output_port) {
                port.tx_packets += added;
                port.tx_bytes += added * flow.packet_size;
            }

            entries.push(FlowStatsEntry {
                priority: 1,
                matches: FlowMatch {
                    in_port: Some(flow.in_port),
                    eth_dst: Some(flow.eth_dst.clone()),
                },
                packet_count: flow.packets,
                byte_count: flow.bytes,
                duration_sec,
                output_port: Some(flow.output_port),
            });
        }
        entries
    }

    fn port_stats(&mut self, selector: PortSelector, rng: &mut StdRng) -> Vec<PortStatsEntry> {
        // background chatter on every port
        for port in self.ports.values_mut() {
            let rx = rng.gen_range(0..4);
            let tx = rng.gen_range(0..4);
            port.rx_packets += rx;
            port.rx_bytes += rx * 64;
            port.tx_packets += tx;
            port.tx_bytes += tx * 64;
        }

        self.ports
            .values()
            .filter(|p| match selector {
                PortSelector::Any => true,
                PortSelector::Port(n) => p.port_no == n,
            })
            .cloned()
            .collect()
    }

    fn meter_stats(&self) -> Vec<MeterStatsEntry> {
        let packets: u64 = self.flows.iter().map(|f| f.packets).sum();
        let bytes: u64 = self.flows.iter().map(|f| f.bytes).sum();
        vec![MeterStatsEntry {
            meter_id: 1,
            flow_count: self.flows.len() as u32,
            packet_in_count: packets,
            byte_in_count: bytes,
            duration_sec: self.uptime(),
        }]
    }
}

struct FabricState {
    switches: BTreeMap<DatapathId, SimSwitch>,
    rng: StdRng,
}

/// In-process switch fabric implementing [`StatsTransport`]
pub struct SimulatedFabric {
    config: SimulationConfig,
    state: Mutex<FabricState>,
    events: mpsc::Sender<SwitchEvent>,
}

impl SimulatedFabric {
    pub fn new(config: SimulationConfig, events: mpsc::Sender<SwitchEvent>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let switches = (1..=config.datapaths)
            .map(|id| (id, SimSwitch::new(id, config.hosts_per_switch)))
            .collect();

        Self {
            config,
            state: Mutex::new(FabricState { switches, rng }),
            events,
        }
    }

    /// Fabric plus the receiving end of its event channel
    pub fn channel(config: SimulationConfig, buffer: usize) -> (Self, mpsc::Receiver<SwitchEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(config, tx), rx)
    }

    /// Datapath ids of all simulated switches
    pub fn datapaths(&self) -> Vec<DatapathId> {
        self.state.lock().switches.keys().copied().collect()
    }

    /// Connect every switch, announcing each one
    pub async fn connect_all(&self) -> Result<()> {
        for id in self.datapaths() {
            self.set_state(id, DatapathState::Connected).await?;
        }
        Ok(())
    }

    /// Connect one switch
    pub async fn connect(&self, id: DatapathId) -> Result<()> {
        self.set_state(id, DatapathState::Connected).await
    }

    /// Disconnect one switch; later requests to it fail
    pub async fn disconnect(&self, id: DatapathId) -> Result<()> {
        self.set_state(id, DatapathState::Disconnected).await
    }

    async fn set_state(&self, id: DatapathId, state: DatapathState) -> Result<()> {
        {
            let mut fabric = self.state.lock();
            let switch = fabric
                .switches
                .get_mut(&id)
                .ok_or_else(|| FlowclassError::Transport(format!("unknown datapath {:016x}", id)))?;
            switch.connected = state == DatapathState::Connected;
        }

        self.events
            .send(SwitchEvent::StateChange(StateChange { datapath_id: id, state }))
            .await
            .map_err(|_| FlowclassError::Transport("event channel closed".into()))
    }

    fn reply(&self, id: DatapathId, request: StatsRequest) -> Result<SwitchEvent> {
        let mut fabric = self.state.lock();
        let FabricState { switches, rng } = &mut *fabric;

        let switch = switches
            .get_mut(&id)
            .filter(|s| s.connected)
            .ok_or_else(|| FlowclassError::Transport(format!("datapath {:016x} is not connected", id)))?;

        Ok(match request {
            StatsRequest::FlowStats => SwitchEvent::FlowStats(FlowStatsReply {
                datapath_id: id,
                entries: switch.flow_stats(rng),
            }),
            StatsRequest::PortStats { port } => SwitchEvent::PortStats(PortStatsReply {
                datapath_id: id,
                entries: switch.port_stats(port, rng),
            }),
            StatsRequest::MeterFeatures => SwitchEvent::MeterFeatures(MeterFeaturesReply {
                datapath_id: id,
                entries: vec![MeterFeaturesEntry {
                    max_meter: 64,
                    band_types: 0b11,
                    capabilities: 0b1111,
                    max_bands: 2,
                    max_color: 0,
                }],
            }),
            StatsRequest::MeterStats => SwitchEvent::MeterStats(MeterStatsReply {
                datapath_id: id,
                entries: switch.meter_stats(),
            }),
        })
    }
}

#[async_trait]
impl StatsTransport for SimulatedFabric {
    async fn send(&self, datapath_id: DatapathId, request: StatsRequest) -> Result<()> {
        let event = self.reply(datapath_id, request)?;
        let events = self.events.clone();
        let delay = Duration::from_millis(self.config.reply_delay_ms);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(event).await.is_err() {
                tracing::debug!("Event channel closed, dropping {} reply", request.kind());
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            datapaths: 2,
            hosts_per_switch: 2,
            reply_delay_ms: 5,
            seed: Some(7),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_all_announces_switches() {
        let (fabric, mut rx) = SimulatedFabric::channel(config(), 16);
        fabric.connect_all().await.unwrap();

        for id in [1, 2] {
            assert_eq!(
                rx.recv().await.unwrap(),
                SwitchEvent::StateChange(StateChange {
                    datapath_id: id,
                    state: DatapathState::Connected,
                })
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_counters_grow() {
        let (fabric, mut rx) = SimulatedFabric::channel(config(), 16);
        fabric.connect(1).await.unwrap();
        rx.recv().await.unwrap();

        let mut previous = 0;
        for _ in 0..3 {
            fabric.send(1, StatsRequest::FlowStats).await.unwrap();
            let reply = match rx.recv().await.unwrap() {
                SwitchEvent::FlowStats(reply) => reply,
                other => panic!("unexpected event {:?}", other),
            };
            assert_eq!(reply.entries.len(), 3);
            assert_eq!(reply.entries[0].priority, 0);

            let classified = &reply.entries[1];
            assert_eq!(classified.priority, 1);
            assert!(classified.key().is_ok());
            assert!(classified.packet_count > previous);
            previous = classified.packet_count;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_selector() {
        let (fabric, mut rx) = SimulatedFabric::channel(config(), 16);
        fabric.connect(2).await.unwrap();
        rx.recv().await.unwrap();

        fabric.send(2, StatsRequest::all_ports()).await.unwrap();
        match rx.recv().await.unwrap() {
            SwitchEvent::PortStats(reply) => {
                let ports: Vec<u32> = reply.entries.iter().map(|p| p.port_no).collect();
                assert_eq!(ports, vec![1, 2, 3, LOCAL_PORT]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        fabric
            .send(2, StatsRequest::PortStats { port: PortSelector::Port(3) })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            SwitchEvent::PortStats(reply) => {
                assert_eq!(reply.entries.len(), 1);
                assert_eq!(reply.entries[0].port_no, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_switch_rejects_requests() {
        let (fabric, mut rx) = SimulatedFabric::channel(config(), 16);
        assert!(matches!(
            fabric.send(1, StatsRequest::FlowStats).await,
            Err(FlowclassError::Transport(_))
        ));

        fabric.connect(1).await.unwrap();
        fabric.disconnect(1).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(fabric.send(1, StatsRequest::MeterStats).await.is_err());
        assert!(fabric.connect(99).await.is_err());
    }
}
