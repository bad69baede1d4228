//! Experiment configuration.
//!
//! One TOML file with `[data]`, `[model]`, `[training]` and `[output]`
//! sections. Every field has a default reproducing the reference leaf
//! disease experiment, so an empty file (or no file) is a valid config.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::PixelScaling;
use crate::model::PlantDiseaseCnnConfig;
use crate::utils::error::{PlantDiseaseError, Result};

/// Full experiment configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

/// Where the images live and how they are batched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root the split directories are resolved against
    pub data_dir: PathBuf,
    pub train_dir: PathBuf,
    pub valid_dir: PathBuf,
    /// Held-out set; the validation tree again unless overridden
    pub test_dir: PathBuf,
    /// Side length images are resized to
    pub image_size: usize,
    /// Batch size for training and validation
    pub batch_size: usize,
    /// Batch size for the held-out evaluation pass
    pub eval_batch_size: usize,
    pub scaling: PixelScaling,
    /// Decode every image up front instead of per batch
    pub cache: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            train_dir: PathBuf::from("train"),
            valid_dir: PathBuf::from("valid"),
            test_dir: PathBuf::from("valid"),
            image_size: crate::IMAGE_SIZE,
            batch_size: 32,
            eval_batch_size: 1,
            scaling: PixelScaling::default(),
            cache: false,
        }
    }
}

impl DataConfig {
    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.data_dir.join(dir)
        }
    }

    pub fn train_path(&self) -> PathBuf {
        self.resolve(&self.train_dir)
    }

    pub fn valid_path(&self) -> PathBuf {
        self.resolve(&self.valid_dir)
    }

    pub fn test_path(&self) -> PathBuf {
        self.resolve(&self.test_dir)
    }
}

/// Network hyperparameters. The class count comes from the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// When set, the number of class directories must equal this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_classes: Option<usize>,
    pub base_filters: usize,
    pub num_stages: usize,
    pub dense_units: usize,
    pub conv_dropout: f64,
    pub dense_dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            expected_classes: None,
            base_filters: 32,
            num_stages: 5,
            dense_units: 1500,
            conv_dropout: 0.25,
            dense_dropout: 0.4,
        }
    }
}

impl ModelConfig {
    /// Network config for a dataset with `num_classes` classes
    pub fn to_cnn_config(&self, num_classes: usize, input_size: usize) -> PlantDiseaseCnnConfig {
        PlantDiseaseCnnConfig::new(num_classes)
            .with_input_size(input_size)
            .with_base_filters(self.base_filters)
            .with_num_stages(self.num_stages)
            .with_dense_units(self.dense_units)
            .with_conv_dropout(self.conv_dropout)
            .with_dense_dropout(self.dense_dropout)
    }
}

/// Optimisation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Adam weight decay penalty, off by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<f32>,
    /// Seeds per-epoch shuffling of the training set; at most `i64::MAX`
    /// so the effective config can be written back as TOML
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 1e-4,
            weight_decay: None,
            seed: 42,
        }
    }
}

/// Where artifacts are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// File stem of the saved model (weights and architecture)
    pub model_name: String,
    /// Skip writing the SVG charts
    pub skip_charts: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            model_name: "trained_plant_disease_model".to_string(),
            skip_charts: false,
        }
    }
}

impl ExperimentConfig {
    /// Load and validate a TOML config file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PlantDiseaseError::InvalidConfig(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Write the effective config next to the run's artifacts
    pub fn save_toml(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PlantDiseaseError::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject values no run could succeed with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PlantDiseaseError::InvalidConfig(msg.to_string()));

        if self.data.image_size == 0 {
            return invalid("data.image_size must be > 0");
        }
        if self.data.batch_size == 0 || self.data.eval_batch_size == 0 {
            return invalid("batch sizes must be > 0");
        }
        if self.training.epochs == 0 {
            return invalid("training.epochs must be > 0");
        }
        if !(self.training.learning_rate.is_finite() && self.training.learning_rate > 0.0) {
            return invalid("training.learning_rate must be a positive number");
        }
        if matches!(self.training.weight_decay, Some(w) if w.is_nan() || w < 0.0) {
            return invalid("training.weight_decay must be >= 0");
        }
        // TOML integers are signed 64-bit
        if i64::try_from(self.training.seed).is_err() {
            return invalid("training.seed must be <= 9223372036854775807");
        }
        if self.model.expected_classes == Some(0) {
            return invalid("model.expected_classes must be > 0");
        }
        if self.output.model_name.trim().is_empty() {
            return invalid("output.model_name must not be empty");
        }

        // Geometry and dropout ranges are checked by the network config
        self.model
            .to_cnn_config(self.model.expected_classes.unwrap_or(1), self.data.image_size)
            .validate()
    }
}
