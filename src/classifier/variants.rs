//! The four pipeline variants
//!
//! | variant | inputs                                                              | scaled | app output | qos output |
//! |---------|---------------------------------------------------------------------|--------|------------|------------|
//! | tree    | ingress_port packets bytes duration_seconds port_no rx/tx bytes/pkts | no     | model      | model      |
//! | kmeans  | bytes_per_packet rx_packets tx_packets                              | yes    | app table  | index      |
//! | svm     | bytes rx_packets tx_packets packets bytes_per_packet                | yes    | app table  | severity   |
//! | nb      | bytes rx_packets tx_packets packets bytes_per_packet                | yes    | app table  | severity   |

use super::models::ModelLoader;
use super::preprocess::{extract, InputFeature, MinMaxScaler, ScalingBounds};
use super::{Variant, VariantKind};
use crate::features::{Column, FeatureRow};
use crate::{FlowclassError, Result};
use ndarray::{Array1, ArrayView1};
use std::sync::Arc;

/// Application labels by cluster/class index
pub const APPLICATION_LABELS: [&str; 5] = ["cbc", "hangout", "vimeo", "voip", "youtube"];

/// QoS tier by class index. Index 0 is tier "3" (lowest), index 2 is tier "1" (highest).
pub const QOS_SEVERITY_LABELS: [&str; 3] = ["3", "2", "1"];

/// How a raw model output becomes a reported label
#[derive(Debug, Clone, Copy)]
pub enum OutputMapping {
    /// Report the raw output unchanged
    Direct,
    /// Raw output is an index into the table
    Table(&'static [&'static str]),
}

impl OutputMapping {
    pub fn apply(&self, raw: &str) -> Result<String> {
        match self {
            OutputMapping::Direct => Ok(raw.to_string()),
            OutputMapping::Table(table) => raw
                .parse::<usize>()
                .ok()
                .and_then(|i| table.get(i))
                .map(|label| label.to_string())
                .ok_or_else(|| {
                    FlowclassError::ModelUnavailable(format!("model output {} has no mapping", raw))
                }),
        }
    }
}

/// Artifact name and output mapping for one prediction task
#[derive(Debug, Clone, Copy)]
struct Task {
    artifact: &'static str,
    output: OutputMapping,
}

/// A variant built from a feature subset, an optional scaler and two models
pub struct PipelineVariant {
    kind: VariantKind,
    features: Vec<InputFeature>,
    feature_names: Vec<&'static str>,
    scaler: Option<MinMaxScaler>,
    application: Task,
    qos: Task,
    loader: Arc<dyn ModelLoader>,
}

const TREE_FEATURES: [InputFeature; 9] = [
    InputFeature::Raw(Column::IngressPort),
    InputFeature::Raw(Column::Packets),
    InputFeature::Raw(Column::Bytes),
    InputFeature::Raw(Column::DurationSeconds),
    InputFeature::Raw(Column::PortNo),
    InputFeature::Raw(Column::RxBytes),
    InputFeature::Raw(Column::RxPackets),
    InputFeature::Raw(Column::TxBytes),
    InputFeature::Raw(Column::TxPackets),
];

const KMEANS_FEATURES: [InputFeature; 3] = [
    InputFeature::BytesPerPacket,
    InputFeature::Raw(Column::RxPackets),
    InputFeature::Raw(Column::TxPackets),
];

const SEMI_SUPERVISED_FEATURES: [InputFeature; 5] = [
    InputFeature::Raw(Column::Bytes),
    InputFeature::Raw(Column::RxPackets),
    InputFeature::Raw(Column::TxPackets),
    InputFeature::Raw(Column::Packets),
    InputFeature::BytesPerPacket,
];

impl PipelineVariant {
    fn build(
        kind: VariantKind,
        features: &[InputFeature],
        scaling: Option<&ScalingBounds>,
        application: Task,
        qos: Task,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            kind,
            features: features.to_vec(),
            feature_names: features.iter().map(InputFeature::name).collect(),
            scaler: scaling.map(|bounds| MinMaxScaler::with_bounds(features, bounds)),
            application,
            qos,
            loader,
        }
    }

    /// Unscaled decision trees over the raw columns
    pub fn tree(loader: Arc<dyn ModelLoader>) -> Self {
        Self::build(
            VariantKind::Tree,
            &TREE_FEATURES,
            None,
            Task {
                artifact: "tree_app",
                output: OutputMapping::Direct,
            },
            Task {
                artifact: "tree_qos",
                output: OutputMapping::Direct,
            },
            loader,
        )
    }

    /// Scaled k-means over packet size and port packet counters
    pub fn kmeans(loader: Arc<dyn ModelLoader>, scaling: &ScalingBounds) -> Self {
        Self::build(
            VariantKind::KMeans,
            &KMEANS_FEATURES,
            Some(scaling),
            Task {
                artifact: "kmeans_model_app",
                output: OutputMapping::Table(&APPLICATION_LABELS),
            },
            Task {
                artifact: "kmeans_model_qos",
                output: OutputMapping::Direct,
            },
            loader,
        )
    }

    /// Scaled semi-supervised linear SVMs
    pub fn svm(loader: Arc<dyn ModelLoader>, scaling: &ScalingBounds) -> Self {
        Self::build(
            VariantKind::Svm,
            &SEMI_SUPERVISED_FEATURES,
            Some(scaling),
            Task {
                artifact: "semi_svm_app",
                output: OutputMapping::Table(&APPLICATION_LABELS),
            },
            Task {
                artifact: "semi_svm_qos",
                output: OutputMapping::Table(&QOS_SEVERITY_LABELS),
            },
            loader,
        )
    }

    /// Scaled semi-supervised Gaussian naive Bayes
    pub fn naive_bayes(loader: Arc<dyn ModelLoader>, scaling: &ScalingBounds) -> Self {
        Self::build(
            VariantKind::NaiveBayes,
            &SEMI_SUPERVISED_FEATURES,
            Some(scaling),
            Task {
                artifact: "semi_nb_app",
                output: OutputMapping::Table(&APPLICATION_LABELS),
            },
            Task {
                artifact: "semi_nb_qos",
                output: OutputMapping::Table(&QOS_SEVERITY_LABELS),
            },
            loader,
        )
    }

    /// Artifact names used by this variant (application, qos)
    pub fn artifacts(&self) -> (&'static str, &'static str) {
        (self.application.artifact, self.qos.artifact)
    }

    fn run(&self, task: &Task, features: ArrayView1<'_, f64>) -> Result<String> {
        let model = self.loader.load(task.artifact)?;
        let raw = model.predict(features)?;
        task.output.apply(&raw)
    }
}

impl Variant for PipelineVariant {
    fn kind(&self) -> VariantKind {
        self.kind
    }

    fn required_features(&self) -> &[&'static str] {
        &self.feature_names
    }

    fn preprocess(&self, row: &FeatureRow) -> Result<Array1<f64>> {
        let x = extract(row, &self.features)?;
        Ok(match &self.scaler {
            Some(scaler) => scaler.transform(&x),
            None => x,
        })
    }

    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<(String, String)> {
        let application = self.run(&self.application, features)?;
        let qos = self.run(&self.qos, features)?;
        Ok((application, qos))
    }
}
