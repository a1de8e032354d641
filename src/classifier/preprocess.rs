//! Variant preprocessing: feature selection, derived features, scaling

use crate::features::{Column, FeatureRow};
use crate::{FlowclassError, Result};
use ndarray::Array1;
use std::collections::HashMap;

/// Externally supplied `[min, max]` scaling bounds, keyed by feature name
pub type ScalingBounds = HashMap<String, [f64; 2]>;

/// One model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFeature {
    /// A row column taken as-is
    Raw(Column),
    /// bytes / packets of the flow record
    BytesPerPacket,
}

impl InputFeature {
    pub fn name(&self) -> &'static str {
        match self {
            InputFeature::Raw(column) => column.name(),
            InputFeature::BytesPerPacket => "bytes_per_packet",
        }
    }

    fn extract(&self, row: &FeatureRow) -> Result<f64> {
        match self {
            InputFeature::Raw(column) => row.numeric(*column),
            InputFeature::BytesPerPacket => bytes_per_packet(row),
        }
    }
}

/// Average packet size of the flow
pub fn bytes_per_packet(row: &FeatureRow) -> Result<f64> {
    if row.packets == 0 {
        return Err(FlowclassError::Feature(
            "bytes_per_packet undefined for zero packet count".into(),
        ));
    }
    Ok(row.bytes as f64 / row.packets as f64)
}

/// Build the input vector for a feature subset
pub fn extract(row: &FeatureRow, features: &[InputFeature]) -> Result<Array1<f64>> {
    features
        .iter()
        .map(|f| f.extract(row))
        .collect::<Result<Vec<_>>>()
        .map(Array1::from)
}

/// Min-max scaler to [0, 1].
///
/// Features without external bounds are fitted on the vector being
/// transformed. With a single row that fit is degenerate and every such
/// feature scales to 0.0; this is a known limitation kept for
/// compatibility with the trained artifacts. Values outside external
/// bounds are not clipped.
#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    bounds: Vec<Option<(f64, f64)>>,
}

impl MinMaxScaler {
    /// Fit every feature on the incoming row
    pub fn fit_per_row(n_features: usize) -> Self {
        Self {
            bounds: vec![None; n_features],
        }
    }

    /// Use external bounds where configured, per-row fitting elsewhere
    pub fn with_bounds(features: &[InputFeature], bounds: &ScalingBounds) -> Self {
        Self {
            bounds: features
                .iter()
                .map(|f| bounds.get(f.name()).map(|[min, max]| (*min, *max)))
                .collect(),
        }
    }

    /// Whether every feature has external bounds
    pub fn is_fixed(&self) -> bool {
        self.bounds.iter().all(Option::is_some)
    }

    /// Scale a single row
    pub fn transform(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut out = x.clone();
        for (i, v) in out.iter_mut().enumerate() {
            let (min, max) = self.bounds.get(i).copied().flatten().unwrap_or((*v, *v));
            let range = max - min;
            // zero range keeps a unit scale
            let range = if range == 0.0 { 1.0 } else { range };
            *v = (*v - min) / range;
        }
        out
    }
}
