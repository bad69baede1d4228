//! Training module
//!
//! - [`trainer`]: the supervised Adam loop
//! - [`history`]: per-epoch loss/accuracy record, saved as JSON

pub mod history;
pub mod trainer;

pub use history::TrainingHistory;
pub use trainer::{fit, TrainedModel};
