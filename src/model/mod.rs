//! Model module for the CNN architecture using the Burn framework
//!
//! - [`cnn`]: the stacked conv-stage classifier and its `Config`
//! - [`summary`]: per-layer output shapes and parameter counts

pub mod cnn;
pub mod summary;

pub use cnn::{ConvStage, PlantDiseaseCnn, PlantDiseaseCnnConfig};
pub use summary::{LayerSummary, ModelSummary};
