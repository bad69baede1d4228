//! # Plant Disease CNN
//!
//! Trains a convolutional network to recognise plant diseases from leaf
//! photographs, using the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: `root/<class>/<image>` trees, decoding and batching
//! - `model`: the stacked conv-stage classifier and its layer summary
//! - `training`: the Adam loop and per-epoch history
//! - `evaluation`: loss/accuracy passes, confusion matrix, classification report
//! - `persistence`: model weights, architecture and report files
//! - `pipeline`: the experiment as explicit stage functions
//! - `config`: TOML experiment configuration
//! - `utils`: errors, logging, metrics and SVG charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plant_disease_cnn::backend::{default_device, DefaultBackend};
//! use plant_disease_cnn::{pipeline, ExperimentConfig};
//!
//! let mut config = ExperimentConfig::default();
//! config.data.data_dir = "data/leaves".into();
//! let outcome = pipeline::run::<DefaultBackend>(&config, &default_device())?;
//! println!("{}", outcome.evaluation.held_out.report);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::ExperimentConfig;
pub use dataset::{BatchLoader, ImageFolder, LeafBatch, LeafBatcher, LeafDataset, LeafItem, PixelScaling};
pub use evaluation::{EvaluationReport, EvaluationSummary};
pub use model::{ModelSummary, PlantDiseaseCnn, PlantDiseaseCnnConfig};
pub use pipeline::PipelineOutcome;
pub use training::{TrainedModel, TrainingHistory};
pub use utils::error::{PlantDiseaseError, Result};
pub use utils::metrics::{ClassificationReport, ConfusionMatrix};

/// Side length images are resized to
pub const IMAGE_SIZE: usize = 128;

/// Classes of the reference leaf dataset
pub const DEFAULT_NUM_CLASSES: usize = 3;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
