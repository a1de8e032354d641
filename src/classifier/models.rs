//! Model artifacts and loading
//!
//! Artifacts are JSON documents tagged by `kind`. Tree and k-means models
//! embed the linfa model state directly; the linear SVM and Gaussian naive
//! Bayes artifacts carry their fitted parameters.

use crate::{FlowclassError, Result};
use linfa::traits::Predict;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A fitted model producing one raw label per input vector
pub trait Model: Send + Sync {
    /// Predict the raw label. Numeric models return the class index.
    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<String>;

    /// Expected input width
    fn n_features(&self) -> usize;
}

fn check_width(model: &dyn Model, features: &ArrayView1<'_, f64>) -> Result<()> {
    if features.len() != model.n_features() {
        return Err(FlowclassError::Feature(format!(
            "model expects {} features, got {}",
            model.n_features(),
            features.len()
        )));
    }
    Ok(())
}

fn as_batch(features: ArrayView1<'_, f64>) -> Array2<f64> {
    features.to_owned().insert_axis(Axis(0))
}

fn argmax(scores: impl Iterator<Item = f64>) -> Option<usize> {
    scores
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}

/// Decision tree over `usize` class indices
#[derive(Serialize, Deserialize)]
pub struct TreeModel {
    pub n_features: usize,
    /// Optional index to label table; empty means the index is the label
    #[serde(default)]
    pub classes: Vec<String>,
    pub tree: DecisionTree<f64, usize>,
}

impl Model for TreeModel {
    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<String> {
        check_width(self, &features)?;
        let out: Array1<usize> = self.tree.predict(&as_batch(features));
        let index = out
            .first()
            .copied()
            .ok_or_else(|| FlowclassError::Feature("tree produced no prediction".into()))?;

        if self.classes.is_empty() {
            return Ok(index.to_string());
        }
        self.classes.get(index).cloned().ok_or_else(|| {
            FlowclassError::ModelUnavailable(format!("tree class index {} has no label", index))
        })
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

/// K-means; the label is the nearest centroid index
#[derive(Serialize, Deserialize)]
pub struct KMeansModel {
    pub kmeans: KMeans<f64, L2Dist>,
}

impl Model for KMeansModel {
    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<String> {
        check_width(self, &features)?;
        let out: Array1<usize> = self.kmeans.predict(&as_batch(features));
        out.first()
            .map(|i| i.to_string())
            .ok_or_else(|| FlowclassError::Feature("k-means produced no prediction".into()))
    }

    fn n_features(&self) -> usize {
        self.kmeans.centroids().ncols()
    }
}

/// Linear SVM decision functions, one per class (one-vs-rest).
///
/// A single decision function is a binary model: positive margin is class 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvmModel {
    pub weights: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl LinearSvmModel {
    fn decision(&self, x: &ArrayView1<'_, f64>) -> impl Iterator<Item = f64> + '_ {
        let x: Vec<f64> = x.to_vec();
        self.weights
            .iter()
            .zip(&self.intercepts)
            .map(move |(w, b)| w.iter().zip(&x).map(|(w, x)| w * x).sum::<f64>() + b)
    }

    fn validate(&self) -> Result<()> {
        let width = self.weights.first().map(Vec::len).unwrap_or(0);
        if width == 0 || self.weights.len() != self.intercepts.len() {
            return Err(FlowclassError::ModelUnavailable(
                "svm artifact needs matching non-empty weights and intercepts".into(),
            ));
        }
        if self.weights.iter().any(|w| w.len() != width) {
            return Err(FlowclassError::ModelUnavailable(
                "svm weight rows differ in width".into(),
            ));
        }
        Ok(())
    }
}

impl Model for LinearSvmModel {
    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<String> {
        check_width(self, &features)?;
        let scores: Vec<f64> = self.decision(&features).collect();

        let class = if scores.len() == 1 {
            usize::from(scores[0] > 0.0)
        } else {
            argmax(scores.into_iter())
                .ok_or_else(|| FlowclassError::Feature("svm produced no scores".into()))?
        };
        Ok(class.to_string())
    }

    fn n_features(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }
}

fn default_var_smoothing() -> f64 {
    1e-9
}

/// Gaussian naive Bayes with per-class priors, means and variances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNbModel {
    pub priors: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    pub variances: Vec<Vec<f64>>,
    #[serde(default = "default_var_smoothing")]
    pub var_smoothing: f64,
}

impl GaussianNbModel {
    fn validate(&self) -> Result<()> {
        let classes = self.priors.len();
        let width = self.n_features();
        let shaped = |rows: &Vec<Vec<f64>>| rows.len() == classes && rows.iter().all(|r| r.len() == width);

        if classes == 0 || width == 0 || !shaped(&self.means) || !shaped(&self.variances) {
            return Err(FlowclassError::ModelUnavailable(
                "naive bayes artifact has inconsistent shapes".into(),
            ));
        }
        if self.priors.iter().any(|p| *p <= 0.0) {
            return Err(FlowclassError::ModelUnavailable(
                "naive bayes priors must be positive".into(),
            ));
        }
        Ok(())
    }

    fn joint_log_likelihood(&self, class: usize, x: &ArrayView1<'_, f64>) -> f64 {
        let epsilon = self.var_smoothing
            * self
                .variances
                .iter()
                .flatten()
                .fold(0.0_f64, |m, v| m.max(*v));

        let log_prior = self.priors[class].ln();
        let log_density: f64 = x
            .iter()
            .zip(&self.means[class])
            .zip(&self.variances[class])
            .map(|((x, mean), var)| {
                let var = var + epsilon;
                -0.5 * (2.0 * std::f64::consts::PI * var).ln() - (x - mean).powi(2) / (2.0 * var)
            })
            .sum();
        log_prior + log_density
    }
}

impl Model for GaussianNbModel {
    fn predict(&self, features: ArrayView1<'_, f64>) -> Result<String> {
        check_width(self, &features)?;
        argmax((0..self.priors.len()).map(|c| self.joint_log_likelihood(c, &features)))
            .map(|c| c.to_string())
            .ok_or_else(|| FlowclassError::Feature("naive bayes produced no scores".into()))
    }

    fn n_features(&self) -> usize {
        self.means.first().map(Vec::len).unwrap_or(0)
    }
}

/// Serialized model artifact
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    DecisionTree(TreeModel),
    KMeans(KMeansModel),
    LinearSvm(LinearSvmModel),
    GaussianNb(GaussianNbModel),
}

impl ModelArtifact {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::DecisionTree(_) => "decision_tree",
            ModelArtifact::KMeans(_) => "k_means",
            ModelArtifact::LinearSvm(_) => "linear_svm",
            ModelArtifact::GaussianNb(_) => "gaussian_nb",
        }
    }

    /// Validate and convert into a shared model
    pub fn into_model(self) -> Result<Arc<dyn Model>> {
        Ok(match self {
            ModelArtifact::DecisionTree(m) => {
                if m.n_features == 0 {
                    return Err(FlowclassError::ModelUnavailable(
                        "tree artifact declares zero features".into(),
                    ));
                }
                if let Some(index) = m.tree.features().into_iter().find(|i| *i >= m.n_features) {
                    return Err(FlowclassError::ModelUnavailable(format!(
                        "tree splits on feature {} but declares {} features",
                        index, m.n_features
                    )));
                }
                Arc::new(m)
            }
            ModelArtifact::KMeans(m) => {
                if m.kmeans.centroids().nrows() == 0 {
                    return Err(FlowclassError::ModelUnavailable(
                        "k-means artifact has no centroids".into(),
                    ));
                }
                Arc::new(m)
            }
            ModelArtifact::LinearSvm(m) => {
                m.validate()?;
                Arc::new(m)
            }
            ModelArtifact::GaussianNb(m) => {
                m.validate()?;
                Arc::new(m)
            }
        })
    }

    /// Write to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string(self)
            .map_err(|e| FlowclassError::ModelUnavailable(format!("serialize artifact: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Resolves artifact names to models
pub trait ModelLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Arc<dyn Model>>;
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> FlowclassError {
    FlowclassError::ModelUnavailable(format!("{}: {}", path.display(), e))
}

struct CachedModel {
    modified: SystemTime,
    model: Arc<dyn Model>,
}

/// Loads `<name>.json` artifacts from a directory.
///
/// Loaded models are cached and reloaded when the file's modification
/// time changes.
pub struct FileModelLoader {
    dir: PathBuf,
    cache: Mutex<HashMap<String, CachedModel>>,
}

impl FileModelLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Path of an artifact
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl ModelLoader for FileModelLoader {
    fn load(&self, name: &str) -> Result<Arc<dyn Model>> {
        let path = self.artifact_path(name);
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| unavailable(&path, e))?;

        if let Some(cached) = self.cache.lock().get(name) {
            if cached.modified == modified {
                return Ok(cached.model.clone());
            }
        }

        let content = fs::read_to_string(&path).map_err(|e| unavailable(&path, e))?;
        let artifact: ModelArtifact =
            serde_json::from_str(&content).map_err(|e| unavailable(&path, e))?;
        let kind = artifact.kind();
        let model = artifact.into_model().map_err(|e| unavailable(&path, e))?;

        tracing::info!("Loaded {} artifact {}", kind, path.display());
        self.cache.lock().insert(
            name.to_string(),
            CachedModel {
                modified,
                model: model.clone(),
            },
        );
        Ok(model)
    }
}

/// Fixed in-memory models keyed by artifact name
#[derive(Default)]
pub struct StaticModelLoader {
    models: HashMap<String, Arc<dyn Model>>,
}

impl StaticModelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, model: Arc<dyn Model>) -> Self {
        self.models.insert(name.into(), model);
        self
    }
}

impl ModelLoader for StaticModelLoader {
    fn load(&self, name: &str) -> Result<Arc<dyn Model>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| FlowclassError::ModelUnavailable(format!("no model named {}", name)))
    }
}
