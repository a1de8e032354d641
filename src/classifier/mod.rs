//! Traffic Classifier
//!
//! Runs one of four interchangeable pipeline variants over a feature row
//! and reports an (application, QoS tier) pair. Variants differ in the
//! feature subset they read, whether they scale it, and how raw model
//! outputs map to labels.

pub mod models;
pub mod preprocess;
pub mod variants;

pub use models::{FileModelLoader, Model, ModelArtifact, ModelLoader, StaticModelLoader};
pub use preprocess::{InputFeature, MinMaxScaler, ScalingBounds};
pub use variants::{PipelineVariant, APPLICATION_LABELS, QOS_SEVERITY_LABELS};

use crate::features::FeatureRow;
use crate::{FlowclassError, Result};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Pipeline variant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantKind {
    #[serde(rename = "tree")]
    Tree,
    #[serde(rename = "kmeans")]
    KMeans,
    #[serde(rename = "svm")]
    Svm,
    #[serde(rename = "nb")]
    NaiveBayes,
}

impl VariantKind {
    pub const ALL: [VariantKind; 4] = [
        VariantKind::Tree,
        VariantKind::KMeans,
        VariantKind::Svm,
        VariantKind::NaiveBayes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VariantKind::Tree => "tree",
            VariantKind::KMeans => "kmeans",
            VariantKind::Svm => "svm",
            VariantKind::NaiveBayes => "nb",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariantKind {
    type Err = FlowclassError;

    fn from_str(s: &str) -> Result<Self> {
        VariantKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| FlowclassError::Config(format!("unknown classifier variant: {:?}", s)))
    }
}

/// Result of one classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub variant: VariantKind,
    pub application: String,
    pub qos: String,
}

/// A classification pipeline variant
pub trait Variant: Send + Sync {
    fn kind(&self) -> VariantKind;

    /// Names of the model inputs, in order
    fn required_features(&self) -> &[&'static str];

    /// Select, derive and scale the inputs
    fn preprocess(&self, row: &FeatureRow) -> Result<Array1<f64>>;

    /// Predict (application, qos) from preprocessed inputs
    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<(String, String)>;
}

/// Routes a feature row to the selected variant
pub struct ClassifierDispatcher {
    variants: HashMap<VariantKind, Box<dyn Variant>>,
}

impl ClassifierDispatcher {
    /// Dispatcher with no variants
    pub fn empty() -> Self {
        Self {
            variants: HashMap::new(),
        }
    }

    /// Dispatcher with all four variants over one model loader
    pub fn new(loader: Arc<dyn ModelLoader>, scaling: &ScalingBounds) -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(Box::new(PipelineVariant::tree(loader.clone())));
        dispatcher.register(Box::new(PipelineVariant::kmeans(loader.clone(), scaling)));
        dispatcher.register(Box::new(PipelineVariant::svm(loader.clone(), scaling)));
        dispatcher.register(Box::new(PipelineVariant::naive_bayes(loader, scaling)));
        dispatcher
    }

    /// Add or replace a variant
    pub fn register(&mut self, variant: Box<dyn Variant>) {
        self.variants.insert(variant.kind(), variant);
    }

    pub fn variant(&self, kind: VariantKind) -> Option<&dyn Variant> {
        self.variants.get(&kind).map(|v| v.as_ref())
    }

    /// Classify one row with the given variant
    pub fn classify(&self, row: &FeatureRow, kind: VariantKind) -> Result<Classification> {
        let variant = self.variant(kind).ok_or_else(|| {
            FlowclassError::ModelUnavailable(format!("variant {} is not registered", kind))
        })?;

        let x = variant.preprocess(row)?;
        let (application, qos) = variant.predict(x.view())?;

        tracing::debug!("{} classified flow as {} / qos {}", kind, application, qos);

        Ok(Classification {
            variant: kind,
            application,
            qos,
        })
    }
}
