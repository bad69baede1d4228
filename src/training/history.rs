//! Per-epoch training history.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDiseaseError, Result};

/// Loss and accuracy of every epoch, on training and validation data.
///
/// Serialises as `{"loss": [..], "accuracy": [..], "val_loss": [..],
/// "val_accuracy": [..]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one epoch's metrics
    pub fn push_epoch(&mut self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) {
        self.loss.push(loss);
        self.accuracy.push(accuracy);
        self.val_loss.push(val_loss);
        self.val_accuracy.push(val_accuracy);
    }

    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    fn is_consistent(&self) -> bool {
        let n = self.loss.len();
        self.accuracy.len() == n && self.val_loss.len() == n && self.val_accuracy.len() == n
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a history file; all four series must have the same length
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let history: Self = serde_json::from_str(&content)?;

        if !history.is_consistent() {
            return Err(PlantDiseaseError::Serialization(format!(
                "{}: metric series have different lengths",
                path.display()
            )));
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_uses_metric_names() {
        let mut history = TrainingHistory::new();
        history.push_epoch(1.2, 0.4, 1.1, 0.5);

        let value: serde_json::Value = serde_json::to_value(&history).unwrap();

        assert_eq!(value["loss"][0], 1.2);
        assert_eq!(value["accuracy"][0], 0.4);
        assert_eq!(value["val_loss"][0], 1.1);
        assert_eq!(value["val_accuracy"][0], 0.5);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_hist.json");

        let mut history = TrainingHistory::new();
        history.push_epoch(1.0, 0.3, 0.9, 0.35);
        history.push_epoch(0.8, 0.5, 0.7, 0.55);
        history.save_json(&path).unwrap();

        let loaded = TrainingHistory::load_json(&path).unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.epochs(), 2);
    }

    #[test]
    fn test_ragged_history_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"loss": [1.0, 0.9], "accuracy": [0.1], "val_loss": [1.0], "val_accuracy": [0.2]}"#,
        )
        .unwrap();

        assert!(matches!(
            TrainingHistory::load_json(&path),
            Err(PlantDiseaseError::Serialization(_))
        ));
    }
}
