//! Telemetry Poller
//!
//! Fixed-period sampling of every live switch. A tick sends the stats
//! requests without waiting for replies, then runs one classification pass
//! over whatever records are already persisted.

use crate::classifier::{ClassifierDispatcher, VariantKind};
use crate::features::{FeatureAssembler, FeatureRow};
use crate::metrics::PipelineMetrics;
use crate::protocol::{DatapathId, StatsRequest};
use crate::registry::DatapathRegistry;
use crate::selector::VariantSelector;
use crate::transport::StatsTransport;
use crate::FlowclassError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Upper bound on a single request hand-off
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Latest successful classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub variant: VariantKind,
    pub application: String,
    pub qos: String,
    pub flow_seq: u64,
    pub port_seq: u64,
    pub row: FeatureRow,
    pub classified_at: DateTime<Utc>,
}

/// What the classification pass did on one tick
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Collection mode, no pass configured
    Disabled,
    /// No valid variant selected this tick
    NoSelection,
    /// Flow or port stream still empty
    NotReady,
    Classified(ClassificationReport),
    Failed(String),
}

/// One classification pass per tick
pub struct ClassificationPass {
    selector: VariantSelector,
    assembler: FeatureAssembler,
    dispatcher: ClassifierDispatcher,
    metrics: Arc<PipelineMetrics>,
    last: RwLock<Option<ClassificationReport>>,
}

impl ClassificationPass {
    pub fn new(
        selector: VariantSelector,
        assembler: FeatureAssembler,
        dispatcher: ClassifierDispatcher,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            selector,
            assembler,
            dispatcher,
            metrics,
            last: RwLock::new(None),
        }
    }

    /// Run the pass. A failure clears the last report; a skip leaves it.
    pub fn run(&self) -> PassOutcome {
        let Some(kind) = self.selector.refresh() else {
            return PassOutcome::NoSelection;
        };

        let assembled = match self.assembler.assemble() {
            Ok(Some(assembled)) => assembled,
            Ok(None) => {
                tracing::debug!("Classification skipped: no flow/port record pair yet");
                return PassOutcome::NotReady;
            }
            Err(e) => return self.fail(kind, e),
        };

        match self.dispatcher.classify(&assembled.row, kind) {
            Ok(result) => {
                tracing::info!(
                    "[{}] application: {} qos: {}",
                    kind,
                    result.application,
                    result.qos
                );
                let report = ClassificationReport {
                    variant: kind,
                    application: result.application,
                    qos: result.qos,
                    flow_seq: assembled.flow_seq,
                    port_seq: assembled.port_seq,
                    row: assembled.row,
                    classified_at: Utc::now(),
                };
                *self.last.write() = Some(report.clone());
                self.metrics.add_classifications(1);
                PassOutcome::Classified(report)
            }
            Err(e) => self.fail(kind, e),
        }
    }

    fn fail(&self, kind: VariantKind, e: FlowclassError) -> PassOutcome {
        tracing::warn!("[{}] classification failed: {}", kind, e);
        *self.last.write() = None;
        self.metrics.add_classification_failures(1);
        PassOutcome::Failed(e.to_string())
    }

    /// The pass task died (panicked model); treated as a failure
    fn aborted(&self, e: JoinError) -> PassOutcome {
        tracing::error!("Classification pass aborted: {}", e);
        *self.last.write() = None;
        self.metrics.add_classification_failures(1);
        PassOutcome::Failed(e.to_string())
    }

    pub fn last_report(&self) -> Option<ClassificationReport> {
        self.last.read().clone()
    }

    /// Most recently selected variant
    pub fn active_variant(&self) -> Option<VariantKind> {
        self.selector.current()
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub datapaths: usize,
    pub requests_sent: usize,
    pub transport_failures: usize,
    pub classification: PassOutcome,
}

/// Periodic stats sampler
pub struct TelemetryPoller {
    registry: Arc<DatapathRegistry>,
    transport: Arc<dyn StatsTransport>,
    metrics: Arc<PipelineMetrics>,
    period: Duration,
    send_timeout: Duration,
    request_meters: bool,
    classification: Option<Arc<ClassificationPass>>,
}

impl TelemetryPoller {
    pub fn new(
        registry: Arc<DatapathRegistry>,
        transport: Arc<dyn StatsTransport>,
        metrics: Arc<PipelineMetrics>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            metrics,
            period,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            request_meters: false,
            classification: None,
        }
    }

    /// Also request meter features and meter stats each tick
    pub fn with_meter_requests(mut self, enabled: bool) -> Self {
        self.request_meters = enabled;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Run a classification pass after each round of requests
    pub fn with_classification(mut self, pass: Arc<ClassificationPass>) -> Self {
        self.classification = Some(pass);
        self
    }

    fn requests(&self) -> Vec<StatsRequest> {
        let mut requests = vec![StatsRequest::FlowStats, StatsRequest::all_ports()];
        if self.request_meters {
            requests.push(StatsRequest::MeterFeatures);
            requests.push(StatsRequest::MeterStats);
        }
        requests
    }

    /// Send the request set to one switch. Stops at the first failure.
    async fn poll_datapath(&self, id: DatapathId, requests: &[StatsRequest]) -> (usize, bool) {
        tracing::debug!("send stats request: {:016x}", id);
        let mut sent = 0;
        for request in requests {
            let result = match timeout(self.send_timeout, self.transport.send(id, *request)).await {
                Ok(result) => result,
                Err(_) => Err(FlowclassError::Transport(format!(
                    "{} request timed out after {:?}",
                    request.kind(),
                    self.send_timeout
                ))),
            };

            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!("datapath {:016x}: {} request failed: {}", id, request.kind(), e);
                    return (sent, false);
                }
            }
        }
        (sent, true)
    }

    /// One polling round
    pub async fn tick(&self) -> TickSummary {
        let datapaths = self.registry.list();
        let requests = self.requests();

        let mut requests_sent = 0;
        let mut transport_failures = 0;
        for id in &datapaths {
            let (sent, ok) = self.poll_datapath(*id, &requests).await;
            requests_sent += sent;
            if !ok {
                transport_failures += 1;
            }
        }

        self.metrics.add_ticks(1);
        self.metrics.add_requests_sent(requests_sent as u64);
        self.metrics.add_transport_failures(transport_failures as u64);

        // model inference is CPU-bound; keep it off the async workers
        let classification = match &self.classification {
            Some(pass) => {
                let worker = pass.clone();
                match tokio::task::spawn_blocking(move || worker.run()).await {
                    Ok(outcome) => outcome,
                    Err(e) => pass.aborted(e),
                }
            }
            None => PassOutcome::Disabled,
        };

        TickSummary {
            datapaths: datapaths.len(),
            requests_sent,
            transport_failures,
            classification,
        }
    }

    /// Tick forever at the configured period
    pub async fn run(&self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Telemetry poller started ({:?} period)", self.period);
        loop {
            ticker.tick().await;
            let summary = self.tick().await;
            tracing::debug!(
                "tick: {} datapaths, {} requests, {} failures",
                summary.datapaths,
                summary.requests_sent,
                summary.transport_failures
            );
        }
    }
}
