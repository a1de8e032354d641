//! Flow Classifier Configuration

use crate::classifier::{ScalingBounds, VariantKind};
use crate::transport::SimulationConfig;
use crate::{FlowclassError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Flow classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowclassConfig {
    /// Polling period in seconds
    pub poll_interval_secs: u64,
    /// Request meter features/stats alongside flow and port stats
    pub request_meter_stats: bool,
    /// File naming the active classifier variant, re-read every tick
    pub algorithm_file: PathBuf,
    /// Variant used while `algorithm_file` does not exist
    pub default_algorithm: Option<VariantKind>,
    /// Off = collection mode: sample and persist only
    pub classification_enabled: bool,
    /// Label written into every flow record
    pub collection_label: String,
    /// Record storage
    pub storage: StorageConfig,
    /// Model artifacts
    pub models: ModelsConfig,
    /// Per-feature `[min, max]` scaling bounds
    pub scaling: ScalingBounds,
    /// Local status API
    pub api: ApiConfig,
    /// Simulated switch fabric
    pub simulation: SimulationConfig,
}

impl Default for FlowclassConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            request_meter_stats: true,
            algorithm_file: PathBuf::from("conf.txt"),
            default_algorithm: None,
            classification_enabled: true,
            collection_label: "unlabeled".into(),
            storage: StorageConfig::default(),
            models: ModelsConfig::default(),
            scaling: ScalingBounds::new(),
            api: ApiConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl FlowclassConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| FlowclassError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FlowclassError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(FlowclassError::Config("poll_interval_secs must be positive".into()));
        }
        if let Some((name, _)) = self.scaling.iter().find(|(_, [min, max])| min > max) {
            return Err(FlowclassError::Config(format!(
                "scaling bounds for {} have min > max",
                name
            )));
        }
        Ok(())
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    FlatFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the flat-file streams
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::FlatFile,
            dir: PathBuf::from("/var/lib/opensase/flowclass"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding `<artifact>.json` files
    pub dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/etc/opensase/flowclass/models"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:9090".into(),
        }
    }
}
