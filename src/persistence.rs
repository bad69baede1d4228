//! Saving and loading of run artifacts.
//!
//! A trained model is two files sharing a stem: the Burn record written by
//! `CompactRecorder` (`<stem>.mpk`) and a JSON file holding the network
//! config, the class names and the pixel scaling (`<stem>.json`). The
//! config is enough to rebuild an empty network the record can be loaded
//! into, and to preprocess images the way training did.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::CompactRecorder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::PixelScaling;
use crate::evaluation::EvaluationReport;
use crate::model::{PlantDiseaseCnn, PlantDiseaseCnnConfig};
use crate::utils::error::{PlantDiseaseError, Result};

pub const HISTORY_FILE: &str = "training_hist.json";
pub const EVALUATION_REPORT_FILE: &str = "evaluation_report.json";
pub const CONFUSION_CSV_FILE: &str = "confusion_matrix.csv";
pub const ACCURACY_CHART_FILE: &str = "accuracy.svg";
pub const CONFUSION_CHART_FILE: &str = "confusion_matrix.svg";
pub const EXPERIMENT_FILE: &str = "experiment.toml";

/// Extension `CompactRecorder` appends to the record path
const RECORD_EXTENSION: &str = "mpk";

/// Architecture sidecar stored next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModelConfig {
    pub model: PlantDiseaseCnnConfig,
    pub class_names: Vec<String>,
    #[serde(default)]
    pub scaling: PixelScaling,
}

/// Paths of a saved model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub weights_path: PathBuf,
    pub config_path: PathBuf,
}

impl ModelArtifact {
    pub fn new(dir: &Path, model_name: &str) -> Self {
        Self {
            weights_path: dir.join(format!("{}.{}", model_name, RECORD_EXTENSION)),
            config_path: dir.join(format!("{}.json", model_name)),
        }
    }

    pub fn exists(&self) -> bool {
        self.weights_path.exists() && self.config_path.exists()
    }
}

/// Write the model weights and its architecture into `dir`, replacing any
/// earlier artifact with the same name.
pub fn save_model<B: Backend>(
    model: &PlantDiseaseCnn<B>,
    config: &PlantDiseaseCnnConfig,
    class_names: &[String],
    scaling: PixelScaling,
    dir: &Path,
    model_name: &str,
) -> Result<ModelArtifact> {
    if class_names.len() != model.num_classes() {
        return Err(PlantDiseaseError::ClassCountMismatch {
            expected: model.num_classes(),
            found: class_names.len(),
        });
    }

    fs::create_dir_all(dir)?;
    let artifact = ModelArtifact::new(dir, model_name);

    let saved = SavedModelConfig {
        model: config.clone(),
        class_names: class_names.to_vec(),
        scaling,
    };
    fs::write(&artifact.config_path, serde_json::to_string_pretty(&saved)?)?;

    // CompactRecorder adds the .mpk extension itself
    let recorder = CompactRecorder::new();
    model.clone().save_file(dir.join(model_name), &recorder)?;

    info!("Model saved to {:?}", artifact.weights_path);
    Ok(artifact)
}

/// Read the architecture sidecar of a saved model
pub fn load_model_config(dir: &Path, model_name: &str) -> Result<SavedModelConfig> {
    let artifact = ModelArtifact::new(dir, model_name);
    let content = fs::read_to_string(&artifact.config_path)?;
    let saved: SavedModelConfig = serde_json::from_str(&content)?;

    if saved.class_names.len() != saved.model.num_classes {
        return Err(PlantDiseaseError::ClassCountMismatch {
            expected: saved.model.num_classes,
            found: saved.class_names.len(),
        });
    }
    Ok(saved)
}

/// Rebuild a saved model on `device`
pub fn load_model<B: Backend>(
    dir: &Path,
    model_name: &str,
    device: &B::Device,
) -> Result<(PlantDiseaseCnn<B>, SavedModelConfig)> {
    let saved = load_model_config(dir, model_name)?;
    let artifact = ModelArtifact::new(dir, model_name);
    if !artifact.weights_path.exists() {
        return Err(PlantDiseaseError::Record(format!(
            "no weights at {}",
            artifact.weights_path.display()
        )));
    }

    let recorder = CompactRecorder::new();
    let model = PlantDiseaseCnn::new(&saved.model, device)?.load_file(dir.join(model_name), &recorder, device)?;

    info!("Loaded model from {:?}", artifact.weights_path);
    Ok((model, saved))
}

pub fn save_evaluation_report(report: &EvaluationReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config(num_classes: usize) -> PlantDiseaseCnnConfig {
        PlantDiseaseCnnConfig::new(num_classes)
            .with_input_size(16)
            .with_num_stages(2)
            .with_base_filters(2)
            .with_dense_units(8)
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("class_{}", i)).collect()
    }

    #[test]
    fn test_saved_model_reproduces_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = tiny_config(3);
        let model: PlantDiseaseCnn<TestBackend> = PlantDiseaseCnn::new(&config, &device).unwrap();

        let artifact = save_model(&model, &config, &names(3), PixelScaling::ImageNet, dir.path(), "leaf_model").unwrap();
        assert!(artifact.exists());
        assert_eq!(artifact.weights_path, dir.path().join("leaf_model.mpk"));

        let (loaded, saved) = load_model::<TestBackend>(dir.path(), "leaf_model", &device).unwrap();
        assert_eq!(saved.model, config);
        assert_eq!(saved.class_names, names(3));
        assert_eq!(saved.scaling, PixelScaling::ImageNet);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let expected: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        // CompactRecorder stores half precision
        assert_eq!(expected.len(), actual.len());
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-2, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_saving_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();

        let first: PlantDiseaseCnn<TestBackend> = PlantDiseaseCnn::new(&tiny_config(2), &device).unwrap();
        save_model(&first, &tiny_config(2), &names(2), PixelScaling::Unit, dir.path(), "m").unwrap();
        let second: PlantDiseaseCnn<TestBackend> = PlantDiseaseCnn::new(&tiny_config(4), &device).unwrap();
        save_model(&second, &tiny_config(4), &names(4), PixelScaling::Unit, dir.path(), "m").unwrap();

        let (loaded, _) = load_model::<TestBackend>(dir.path(), "m", &device).unwrap();
        assert_eq!(loaded.num_classes(), 4);
    }

    #[test]
    fn test_class_names_must_match_output_width() {
        let dir = tempfile::tempdir().unwrap();
        let model: PlantDiseaseCnn<TestBackend> =
            PlantDiseaseCnn::new(&tiny_config(3), &Default::default()).unwrap();

        let err = save_model(&model, &tiny_config(3), &names(2), PixelScaling::Unit, dir.path(), "m").unwrap_err();

        assert!(matches!(
            err,
            PlantDiseaseError::ClassCountMismatch { expected: 3, found: 2 }
        ));
    }

    #[test]
    fn test_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let saved = SavedModelConfig {
            model: tiny_config(2),
            class_names: names(2),
            scaling: PixelScaling::Unit,
        };
        fs::write(dir.path().join("m.json"), serde_json::to_string(&saved).unwrap()).unwrap();

        let result = load_model::<TestBackend>(dir.path(), "m", &Default::default());

        assert!(matches!(result, Err(PlantDiseaseError::Record(_))));
    }
}
