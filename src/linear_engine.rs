use anyhow::{Result, anyhow, bail, ensure};
use async_trait::async_trait;
use candle_core::utils::cuda_is_available;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use hf_hub::{Repo, RepoType, api::tokio::Api};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::engine::{Engine, Label};
use crate::types::FeatureRow;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// `config.json` shipped next to the weights.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub num_features: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub id2label: HashMap<u32, String>,
}

fn default_num_classes() -> usize {
    1
}

fn default_threshold() -> f64 {
    0.5
}

/// A logistic-regression style classifier: one linear layer followed by
/// either a probability threshold (one output) or an argmax (two outputs).
///
/// Weights and inputs stay in f64. Built once at startup and only read
/// afterwards.
pub struct LinearEngine {
    classifier: Linear,
    device: Device,
    num_features: usize,
    num_classes: usize,
    /// `threshold` moved into logit space: `ln(t / (1 - t))`.
    cutoff: f64,
    id2label: HashMap<u32, String>,
}

#[derive(Debug, Clone)]
pub struct LinearConfig {
    pub model_id: Option<String>,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub cpu: bool,
    pub id2label: Option<HashMap<u32, String>>,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            model_path: None,
            revision: "main".to_string(),
            cpu: false,
            id2label: None,
        }
    }
}

impl LinearEngine {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    #[tracing::instrument(skip(config), fields(model_id = ?config.model_id, model_path = ?config.model_path, cpu = config.cpu))]
    pub async fn new(config: LinearConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;

        // Local directory wins over the Hub when both are given.
        let (config_filename, weights_filename) = match &config.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }
                (base_path.join(CONFIG_FILE), base_path.join(WEIGHTS_FILE))
            }
            None => {
                let Some(model_id) = config.model_id.clone() else {
                    bail!("Either model_id or model_path must be specified");
                };

                let repo = Repo::with_revision(model_id, RepoType::Model, config.revision.clone());
                let api = Api::new()?;
                let api = api.repo(repo);
                (api.get(CONFIG_FILE).await?, api.get(WEIGHTS_FILE).await?)
            }
        };

        let model_config = std::fs::read_to_string(&config_filename)
            .map_err(|e| anyhow!("Cannot read {}: {e}", config_filename.display()))?;
        let mut model_config: ClassifierConfig = serde_json::from_str(&model_config)?;

        // Command-line id2label takes precedence over the artifact's.
        if let Some(id2label) = config.id2label {
            model_config.id2label = id2label;
        }

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F64, &device)? };

        Self::from_var_builder(vb, model_config, device)
    }

    /// Build the classifier from weights already resolved by `vb`, which must
    /// hold `classifier.weight` and `classifier.bias`.
    pub fn from_var_builder(vb: VarBuilder, config: ClassifierConfig, device: Device) -> Result<Self> {
        ensure!(config.num_features > 0, "num_features must be positive");
        ensure!(
            matches!(config.num_classes, 1 | 2),
            "num_classes must be 1 or 2 for a binary classifier, got {}",
            config.num_classes
        );
        ensure!(
            (0.0..=1.0).contains(&config.threshold),
            "threshold must lie in [0, 1], got {}",
            config.threshold
        );
        if !config.feature_names.is_empty() && config.feature_names.len() != config.num_features {
            tracing::warn!(
                names = config.feature_names.len(),
                num_features = config.num_features,
                "feature_names does not match num_features"
            );
        }

        let classifier = candle_nn::linear(config.num_features, config.num_classes, vb.pp("classifier"))?;

        tracing::info!(
            num_features = config.num_features,
            num_classes = config.num_classes,
            threshold = config.threshold,
            "Classifier loaded"
        );

        Ok(Self {
            classifier,
            device,
            num_features: config.num_features,
            num_classes: config.num_classes,
            cutoff: (config.threshold / (1.0 - config.threshold)).ln(),
            id2label: config.id2label,
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    fn classify(&self, row: FeatureRow) -> Result<Label> {
        let n = row.len();
        ensure!(
            n == self.num_features,
            "input has {n} features, but classifier expects {} features as input",
            self.num_features
        );

        let xs = Tensor::from_vec(row.into_inner(), (1, n), &self.device)?;
        let logits = self.classifier.forward(&xs)?;

        if self.num_classes == 1 {
            // sigmoid(score) > t  <=>  score > ln(t / (1 - t)), without the
            // rounding sigmoid suffers near the boundary.
            let score = logits
                .flatten_all()?
                .to_vec1::<f64>()?
                .first()
                .copied()
                .ok_or_else(|| anyhow!("classifier produced no output"))?;
            ensure!(score.is_finite(), "classifier produced a non-finite score");
            Ok(Label::from(score > self.cutoff))
        } else {
            let scores = logits.flatten_all()?.to_vec1::<f64>()?;
            ensure!(
                scores.iter().all(|s| s.is_finite()),
                "classifier produced a non-finite score"
            );
            logits
                .argmax(1)?
                .to_vec1::<u32>()?
                .first()
                .copied()
                .ok_or_else(|| anyhow!("classifier produced no output"))
        }
    }
}

#[async_trait]
impl Engine for LinearEngine {
    #[tracing::instrument(skip(self, row), fields(features = row.len()))]
    async fn predict(&self, row: FeatureRow) -> Result<Label> {
        self.classify(row)
    }

    fn label_name(&self, label: Label) -> Option<&str> {
        self.id2label.get(&label).map(String::as_str)
    }
}
