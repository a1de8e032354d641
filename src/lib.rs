//! OpenSASE Flow Classifier - Switch Telemetry and Traffic Classification
//!
//! Periodically samples flow and port counters from every connected
//! switch, persists the qualifying samples, and classifies the latest
//! flow/port pair into an application and a QoS tier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        OPENSASE FLOW CLASSIFIER                      │
//! │                                                                      │
//! │  ┌──────────────────┐   stats requests    ┌───────────────────────┐  │
//! │  │ TELEMETRY POLLER │ ──────────────────▶ │   SWITCH TRANSPORT    │  │
//! │  │  every N seconds │                     │  (fire-and-forget)    │  │
//! │  └───┬──────────┬───┘                     └───────────┬───────────┘  │
//! │      │          │                                     │ events       │
//! │      │ list     │ classify                ┌───────────▼───────────┐  │
//! │  ┌───▼──────┐   │                         │     EVENT ROUTER      │  │
//! │  │ DATAPATH │◀──┼──── connect/disconnect ─┤ flow | port | meter   │  │
//! │  │ REGISTRY │   │                         └───┬───────┬───────┬───┘  │
//! │  └──────────┘   │                             │       │       │      │
//! │                 │                     ┌───────▼──┐ ┌──▼─────┐ │ log  │
//! │                 │                     │   FLOW   │ │  PORT  │ ▼      │
//! │                 │                     │ PROCESSOR│ │PROCESSR│        │
//! │                 │                     └────┬─────┘ └───┬────┘        │
//! │                 │         arms BeginLatch  │  gated by │             │
//! │                 │                     ┌────▼───────────▼────┐        │
//! │                 │                     │    RECORD STORE     │        │
//! │                 │                     └──────────┬──────────┘        │
//! │  ┌──────────────▼─────────────────────────────────▼─────────────┐    │
//! │  │ CLASSIFICATION PASS                                           │    │
//! │  │  selection file → feature assembler → tree | kmeans | svm | nb │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod classifier;
pub mod config;
pub mod features;
pub mod latch;
pub mod metrics;
pub mod poller;
pub mod processor;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod selector;
pub mod store;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use classifier::{Classification, ClassifierDispatcher, VariantKind};
pub use config::{FlowclassConfig, StorageBackend};
pub use features::{FeatureAssembler, FeatureRow};
pub use latch::BeginLatch;
pub use metrics::PipelineMetrics;
pub use poller::{ClassificationPass, ClassificationReport, TelemetryPoller};
pub use processor::{FlowStatsProcessor, PortStatsProcessor};
pub use protocol::{DatapathId, StatsRequest, SwitchEvent};
pub use registry::DatapathRegistry;
pub use router::EventRouter;
pub use store::{FlatFileRecordStore, InMemoryRecordStore, RecordStore};
pub use transport::{SimulatedFabric, StatsTransport};

use classifier::FileModelLoader;
use selector::VariantSelector;

/// Capacity of each reply queue
const EVENT_BUFFER: usize = 1024;

/// Flow classifier error types
#[derive(Debug, Error)]
pub enum FlowclassError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("feature error: {0}")]
    Feature(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate result type
pub type Result<T> = std::result::Result<T, FlowclassError>;

/// Fully wired pipeline
pub struct FlowClassifier {
    /// Configuration
    pub config: FlowclassConfig,
    /// Live switches
    pub registry: Arc<DatapathRegistry>,
    /// Gate for port record persistence
    pub latch: Arc<BeginLatch>,
    /// Flow and port records
    pub store: Arc<dyn RecordStore>,
    /// Pipeline counters
    pub metrics: Arc<PipelineMetrics>,
    /// Per-tick classification; `None` in collection mode
    pub classification: Option<Arc<ClassificationPass>>,
    flow_processor: Arc<FlowStatsProcessor>,
    port_processor: Arc<PortStatsProcessor>,
}

impl FlowClassifier {
    /// Create the pipeline, opening the configured record store
    pub fn new(config: FlowclassConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn RecordStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryRecordStore::new()),
            StorageBackend::FlatFile => Arc::new(FlatFileRecordStore::open(&config.storage.dir)?),
        };
        Ok(Self::with_store(config, store))
    }

    /// Create the pipeline over an existing store
    pub fn with_store(config: FlowclassConfig, store: Arc<dyn RecordStore>) -> Self {
        let registry = Arc::new(DatapathRegistry::new());
        let latch = Arc::new(BeginLatch::new());
        let metrics = Arc::new(PipelineMetrics::new());

        let flow_processor = Arc::new(FlowStatsProcessor::new(
            store.clone(),
            latch.clone(),
            metrics.clone(),
            config.collection_label.clone(),
        ));
        let port_processor = Arc::new(PortStatsProcessor::new(store.clone(), latch.clone(), metrics.clone()));

        let classification = if config.classification_enabled {
            let loader = Arc::new(FileModelLoader::new(&config.models.dir));
            Some(Arc::new(ClassificationPass::new(
                VariantSelector::new(&config.algorithm_file, config.default_algorithm),
                FeatureAssembler::new(store.clone()),
                ClassifierDispatcher::new(loader, &config.scaling),
                metrics.clone(),
            )))
        } else {
            tracing::info!("Classification disabled, collecting with label {:?}", config.collection_label);
            None
        };

        Self {
            config,
            registry,
            latch,
            store,
            metrics,
            classification,
            flow_processor,
            port_processor,
        }
    }

    /// Poller over this pipeline's registry
    pub fn poller(&self, transport: Arc<dyn StatsTransport>) -> TelemetryPoller {
        let poller = TelemetryPoller::new(
            self.registry.clone(),
            transport,
            self.metrics.clone(),
            Duration::from_secs(self.config.poll_interval_secs),
        )
        .with_meter_requests(self.config.request_meter_stats);

        match &self.classification {
            Some(pass) => poller.with_classification(pass.clone()),
            None => poller,
        }
    }

    /// Handles for the local API
    pub fn api_state(&self) -> Arc<api::ApiState> {
        Arc::new(api::ApiState {
            registry: self.registry.clone(),
            latch: self.latch.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            classification: self.classification.clone(),
        })
    }

    /// Run until shutdown or until the event stream ends
    pub async fn run(
        &self,
        transport: Arc<dyn StatsTransport>,
        events: mpsc::Receiver<SwitchEvent>,
    ) -> Result<()> {
        let (router, consumers) = EventRouter::spawn(
            self.registry.clone(),
            self.metrics.clone(),
            self.flow_processor.clone(),
            self.port_processor.clone(),
            EVENT_BUFFER,
        );
        let poller = self.poller(transport);

        let api_enabled = self.config.api.enabled;
        let listen = self.config.api.listen.clone();
        let state = self.api_state();
        let api_server = async move {
            if api_enabled {
                api::start_server(&listen, state).await
            } else {
                std::future::pending::<Result<()>>().await
            }
        };

        tracing::info!("OpenSASE Flow Classifier running");
        let outcome = tokio::select! {
            _ = router.run(events) => {
                tracing::warn!("Switch event stream ended");
                Ok(())
            }
            _ = poller.run() => Ok(()),
            result = api_server => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                Ok(())
            }
        };

        // router dropped: consumers drain their queues and exit
        consumers.join().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulationConfig;

    fn collection_config() -> FlowclassConfig {
        let mut config = FlowclassConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.classification_enabled = false;
        config.collection_label = "youtube".into();
        config.api.enabled = false;
        config
    }

    #[test]
    fn test_collection_mode_has_no_pass() {
        let classifier = FlowClassifier::new(collection_config()).unwrap();
        assert!(classifier.classification.is_none());
        assert!(!classifier.latch.is_armed());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = collection_config();
        config.poll_interval_secs = 0;
        assert!(matches!(FlowClassifier::new(config), Err(FlowclassError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_collects_from_simulated_fabric() {
        let classifier = Arc::new(FlowClassifier::new(collection_config()).unwrap());
        let (fabric, events) = SimulatedFabric::channel(
            SimulationConfig {
                datapaths: 2,
                hosts_per_switch: 2,
                reply_delay_ms: 10,
                seed: Some(42),
            },
            256,
        );
        let fabric = Arc::new(fabric);
        fabric.connect_all().await.unwrap();

        let handle = tokio::spawn({
            let classifier = classifier.clone();
            let transport: Arc<dyn StatsTransport> = fabric.clone();
            async move { classifier.run(transport, events).await }
        });

        // at least 40 packets per poll: past the threshold within 8 polls
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.abort();

        assert_eq!(classifier.registry.list(), vec![1, 2]);
        assert!(classifier.latch.is_armed());
        assert!(classifier.store.flow_count() > 0);
        assert!(classifier.store.port_count() > 0);

        let latest = classifier.store.latest_flow().unwrap().unwrap();
        assert_eq!(latest.record.label, "youtube");
        assert!(latest.record.packet_count > 300);

        let port = classifier.store.latest_port().unwrap().unwrap();
        assert!((1..=2).contains(&port.record.port_no));
        assert!(classifier.metrics.snapshot().ticks >= 10);
    }
}
