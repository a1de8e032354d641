//! OpenSASE Flow Classifier - Main Entry Point

use opensase_flowclass::{FlowClassifier, FlowclassConfig, SimulatedFabric, StatsTransport};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("OpenSASE Flow Classifier v{}", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "/etc/opensase/flowclass.json".into());

    let config = FlowclassConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!("Config {} not loaded ({}), using defaults", config_path, e);
        FlowclassConfig::default()
    });

    let (fabric, events) = SimulatedFabric::channel(config.simulation.clone(), 1024);
    let fabric = Arc::new(fabric);

    let classifier = FlowClassifier::new(config)?;
    fabric.connect_all().await?;

    // Run
    let transport: Arc<dyn StatsTransport> = fabric;
    classifier.run(transport, events).await?;

    Ok(())
}
