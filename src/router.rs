//! Event Router
//!
//! Applies datapath state changes to the registry and fans stats replies
//! out to one consumer task per reply type. Each consumer handles its
//! replies in arrival order; replies of different types may interleave.

use crate::metrics::PipelineMetrics;
use crate::processor::{log_meter_features, log_meter_stats, FlowStatsProcessor, PortStatsProcessor};
use crate::protocol::{decode_event, FlowStatsReply, MeterFeaturesReply, MeterStatsReply, PortStatsReply, SwitchEvent};
use crate::registry::DatapathRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Meter replies share one consumer
#[derive(Debug)]
pub enum MeterReply {
    Features(MeterFeaturesReply),
    Stats(MeterStatsReply),
}

/// Join handles of the reply consumers. Each finishes once the router is
/// dropped and its queue drains.
pub struct ReplyConsumers {
    pub flows: JoinHandle<()>,
    pub ports: JoinHandle<()>,
    pub meters: JoinHandle<()>,
}

impl ReplyConsumers {
    /// Wait for all consumers to finish
    pub async fn join(self) {
        for (name, handle) in [("flow", self.flows), ("port", self.ports), ("meter", self.meters)] {
            if let Err(e) = handle.await {
                tracing::error!("{} consumer task failed: {}", name, e);
            }
        }
    }
}

/// Routes switch events to the registry and the reply consumers
pub struct EventRouter {
    registry: Arc<DatapathRegistry>,
    metrics: Arc<PipelineMetrics>,
    flows: mpsc::Sender<FlowStatsReply>,
    ports: mpsc::Sender<PortStatsReply>,
    meters: mpsc::Sender<MeterReply>,
}

impl EventRouter {
    /// Spawn the consumer tasks and return the router feeding them
    pub fn spawn(
        registry: Arc<DatapathRegistry>,
        metrics: Arc<PipelineMetrics>,
        flow_processor: Arc<FlowStatsProcessor>,
        port_processor: Arc<PortStatsProcessor>,
        buffer: usize,
    ) -> (Self, ReplyConsumers) {
        let (flows, mut flow_rx) = mpsc::channel::<FlowStatsReply>(buffer);
        let (ports, mut port_rx) = mpsc::channel::<PortStatsReply>(buffer);
        let (meters, mut meter_rx) = mpsc::channel::<MeterReply>(buffer);

        let flow_task = tokio::spawn(async move {
            while let Some(reply) = flow_rx.recv().await {
                if let Err(e) = flow_processor.handle(&reply) {
                    tracing::warn!("datapath {:016x}: flow reply failed: {}", reply.datapath_id, e);
                }
            }
        });

        let port_task = tokio::spawn(async move {
            while let Some(reply) = port_rx.recv().await {
                if let Err(e) = port_processor.handle(&reply) {
                    tracing::warn!("datapath {:016x}: port reply failed: {}", reply.datapath_id, e);
                }
            }
        });

        let meter_task = tokio::spawn(async move {
            while let Some(reply) = meter_rx.recv().await {
                match reply {
                    MeterReply::Features(r) => log_meter_features(&r),
                    MeterReply::Stats(r) => log_meter_stats(&r),
                }
            }
        });

        let router = Self {
            registry,
            metrics,
            flows,
            ports,
            meters,
        };
        let consumers = ReplyConsumers {
            flows: flow_task,
            ports: port_task,
            meters: meter_task,
        };
        (router, consumers)
    }

    /// Route one event
    pub async fn route(&self, event: SwitchEvent) {
        let datapath_id = event.datapath_id();
        let delivered = match event {
            SwitchEvent::StateChange(change) => {
                self.registry.apply(&change);
                true
            }
            SwitchEvent::FlowStats(reply) => self.flows.send(reply).await.is_ok(),
            SwitchEvent::PortStats(reply) => self.ports.send(reply).await.is_ok(),
            SwitchEvent::MeterFeatures(reply) => {
                self.meters.send(MeterReply::Features(reply)).await.is_ok()
            }
            SwitchEvent::MeterStats(reply) => self.meters.send(MeterReply::Stats(reply)).await.is_ok(),
        };

        if !delivered {
            tracing::warn!("datapath {:016x}: reply consumer gone, event dropped", datapath_id);
        }
    }

    /// Decode and route a JSON-encoded event. Malformed payloads are dropped.
    pub async fn route_raw(&self, payload: &[u8]) {
        match decode_event(payload) {
            Ok(event) => self.route(event).await,
            Err(e) => {
                self.metrics.add_parse_failures(1);
                tracing::warn!("Dropping malformed switch event: {}", e);
            }
        }
    }

    /// Route events until the channel closes
    pub async fn run(self, mut events: mpsc::Receiver<SwitchEvent>) {
        while let Some(event) = events.recv().await {
            self.route(event).await;
        }
        tracing::info!("Switch event channel closed");
    }
}
