//! The experiment as a chain of stage functions.
//!
//! load datasets → build model → train → persist → evaluate → report.
//! Each stage takes the values it needs and returns typed results, so every
//! stage can be driven on its own (the CLI's `evaluate` reuses the last
//! three on a saved model).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::backend::Autodiff;
use burn::prelude::*;
use colored::Colorize;
use tracing::info;

use crate::config::{DataConfig, ExperimentConfig, OutputConfig};
use crate::dataset::{vocabulary_diff, BatchLoader, ImageFolder, LeafBatcher, LeafDataset, PixelScaling};
use crate::evaluation::{evaluate, evaluate_held_out, EvaluationReport, EvaluationSummary};
use crate::model::{PlantDiseaseCnn, PlantDiseaseCnnConfig};
use crate::persistence::{self, ModelArtifact};
use crate::training::{fit, TrainedModel, TrainingHistory};
use crate::utils::charts::{write_accuracy_chart, write_confusion_heatmap};
use crate::utils::error::{PlantDiseaseError, Result};

/// The three indexed directory trees of a run
#[derive(Debug, Clone)]
pub struct Datasets {
    pub train: ImageFolder,
    pub valid: ImageFolder,
    pub test: ImageFolder,
}

impl Datasets {
    /// Vocabulary shared by all splits
    pub fn class_names(&self) -> &[String] {
        self.train.class_names()
    }

    pub fn num_classes(&self) -> usize {
        self.train.num_classes()
    }
}

/// Decoded (or lazily decodable) splits plus the batcher they share
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: Arc<LeafDataset>,
    pub valid: Arc<LeafDataset>,
    pub test: Arc<LeafDataset>,
    pub batcher: LeafBatcher,
}

impl PreparedData {
    /// Unshuffled batches of one split
    pub fn loader<B: Backend>(
        &self,
        dataset: &Arc<LeafDataset>,
        batch_size: usize,
        device: &B::Device,
    ) -> BatchLoader<B> {
        BatchLoader::new(dataset.clone(), self.batcher.clone(), batch_size, device.clone())
    }

    /// Training batches of `config.data.batch_size`, reshuffled every epoch
    pub fn train_loader<B: Backend>(
        &self,
        config: &ExperimentConfig,
        device: &B::Device,
    ) -> BatchLoader<B> {
        self.loader(&self.train, config.data.batch_size, device)
            .shuffle(config.training.seed)
    }

    /// Held-out batches of `data.eval_batch_size`
    pub fn held_out_loader<B: Backend>(
        &self,
        data: &DataConfig,
        device: &B::Device,
    ) -> BatchLoader<B> {
        self.loader(&self.test, data.eval_batch_size, device)
    }
}

/// Scores of the fitted model on every split
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub train: EvaluationSummary,
    pub valid: EvaluationSummary,
    pub held_out: EvaluationReport,
}

/// Everything a full run produced
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub class_names: Vec<String>,
    pub artifact: ModelArtifact,
    pub history: TrainingHistory,
    pub evaluation: Evaluation,
    /// Report files written to the output directory
    pub reports: Vec<PathBuf>,
}

/// Index the train, validation and test trees.
///
/// All three must share one vocabulary, and it must have
/// `expected_classes` entries when that is set.
pub fn load_datasets(config: &ExperimentConfig) -> Result<Datasets> {
    let data = &config.data;

    let train = ImageFolder::new(data.train_path())?;
    let valid = ImageFolder::new(data.valid_path())?;
    let test = if data.test_path() == data.valid_path() {
        valid.clone()
    } else {
        ImageFolder::new(data.test_path())?
    };

    train.check_vocabulary(&valid)?;
    train.check_vocabulary(&test)?;

    if let Some(expected) = config.model.expected_classes {
        if expected != train.num_classes() {
            return Err(PlantDiseaseError::ClassCountMismatch {
                expected,
                found: train.num_classes(),
            });
        }
    }

    info!(
        "Found {} classes: {} train, {} valid, {} test images",
        train.num_classes(),
        train.len(),
        valid.len(),
        test.len()
    );

    Ok(Datasets { train, valid, test })
}

fn leaf_dataset(folder: &ImageFolder, data: &DataConfig) -> Result<Arc<LeafDataset>> {
    let dataset = if data.cache {
        LeafDataset::new_cached(folder, data.image_size)?
    } else {
        LeafDataset::new(folder, data.image_size)
    };
    Ok(Arc::new(dataset))
}

/// Wrap the indexed trees in Burn datasets, decoding up front when
/// `data.cache` is set. A test tree identical to the validation tree is
/// shared rather than loaded twice.
pub fn prepare_data(datasets: &Datasets, data: &DataConfig) -> Result<PreparedData> {
    let train = leaf_dataset(&datasets.train, data)?;
    let valid = leaf_dataset(&datasets.valid, data)?;
    let test = if datasets.test.root_dir() == datasets.valid.root_dir() {
        valid.clone()
    } else {
        leaf_dataset(&datasets.test, data)?
    };

    Ok(PreparedData {
        train,
        valid,
        test,
        batcher: LeafBatcher::new(datasets.num_classes(), data.image_size, data.scaling),
    })
}

/// Network config and freshly initialised weights for `num_classes`
pub fn build_model<B: Backend>(
    config: &ExperimentConfig,
    num_classes: usize,
    device: &B::Device,
) -> Result<(PlantDiseaseCnn<B>, PlantDiseaseCnnConfig)> {
    let cnn_config = config.model.to_cnn_config(num_classes, config.data.image_size);
    let model = PlantDiseaseCnn::new(&cnn_config, device)?;
    Ok((model, cnn_config))
}

/// Fit on the training split, validating after every epoch
pub fn train<B: Backend>(
    model: PlantDiseaseCnn<Autodiff<B>>,
    data: &PreparedData,
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<TrainedModel<B>> {
    let train_loader = data.train_loader::<Autodiff<B>>(config, device);
    let valid_loader = data.loader::<B>(&data.valid, config.data.batch_size, device);

    fit(model, &train_loader, &valid_loader, &config.training)
}

/// Save the model and its training history, overwriting earlier runs
pub fn persist<B: Backend>(
    trained: &TrainedModel<B>,
    cnn_config: &PlantDiseaseCnnConfig,
    class_names: &[String],
    scaling: PixelScaling,
    output: &OutputConfig,
) -> Result<ModelArtifact> {
    let artifact = persistence::save_model(
        &trained.model,
        cnn_config,
        class_names,
        scaling,
        &output.output_dir,
        &output.model_name,
    )?;

    let history_path = output.output_dir.join(persistence::HISTORY_FILE);
    trained.history.save_json(&history_path)?;
    info!("Training history saved to {:?}", history_path);

    Ok(artifact)
}

/// Loss and accuracy on the training and validation splits, then the full
/// report on the held-out split, iterated unshuffled
pub fn evaluate_model<B: Backend>(
    model: &PlantDiseaseCnn<B>,
    data: &PreparedData,
    class_names: &[String],
    config: &DataConfig,
    device: &B::Device,
) -> Result<Evaluation> {
    let train = evaluate(model, &data.loader::<B>(&data.train, config.batch_size, device))?;
    println!("  Training accuracy: {:.4}", train.accuracy);
    let valid = evaluate(model, &data.loader::<B>(&data.valid, config.batch_size, device))?;
    println!("  Validation accuracy: {:.4}", valid.accuracy);

    let held_out = evaluate_held_out(model, &data.held_out_loader::<B>(config, device), class_names)?;
    println!(
        "  Test loss: {:.4}, accuracy: {:.4}",
        held_out.summary.loss, held_out.summary.accuracy
    );

    Ok(Evaluation {
        train,
        valid,
        held_out,
    })
}

/// Write the confusion matrix, the report and (unless disabled) the charts.
/// Returns the paths written.
pub fn write_reports(
    history: Option<&TrainingHistory>,
    report: &EvaluationReport,
    output: &OutputConfig,
) -> Result<Vec<PathBuf>> {
    let dir = &output.output_dir;
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let csv_path = dir.join(persistence::CONFUSION_CSV_FILE);
    report.confusion_matrix.save_csv(&csv_path, &report.class_names)?;
    written.push(csv_path);

    let report_path = dir.join(persistence::EVALUATION_REPORT_FILE);
    persistence::save_evaluation_report(report, &report_path)?;
    written.push(report_path);

    if output.skip_charts {
        return Ok(written);
    }

    if let Some(history) = history {
        let chart_path = dir.join(persistence::ACCURACY_CHART_FILE);
        write_accuracy_chart(&history.accuracy, &history.val_accuracy, &chart_path)?;
        written.push(chart_path);
    }

    let heatmap_path = dir.join(persistence::CONFUSION_CHART_FILE);
    write_confusion_heatmap(&report.confusion_matrix, &report.class_names, &heatmap_path)?;
    written.push(heatmap_path);

    Ok(written)
}

fn print_evaluation(report: &EvaluationReport) {
    println!();
    println!("{}", "Confusion Matrix".cyan().bold());
    println!("{}", report.confusion_matrix.display(&report.class_names));
    println!("{}", "Classification Report".cyan().bold());
    println!("{}", report.report);
}

/// Run the whole experiment on `device`
pub fn run<B: Backend>(config: &ExperimentConfig, device: &B::Device) -> Result<PipelineOutcome> {
    config.validate()?;

    println!("{}", "Loading Dataset...".cyan());
    let datasets = load_datasets(config)?;
    datasets.train.get_stats().print();
    let class_names = datasets.class_names().to_vec();
    let data = prepare_data(&datasets, &config.data)?;

    println!("{}", "Building Model...".cyan());
    let (model, cnn_config) = build_model::<Autodiff<B>>(config, class_names.len(), device)?;
    info!("Model has {} parameters", model.num_params());

    println!("{}", "Training...".green().bold());
    let trained = train(model, &data, config, device)?;

    println!("{}", "Saving Model...".cyan());
    let artifact = persist(
        &trained,
        &cnn_config,
        &class_names,
        config.data.scaling,
        &config.output,
    )?;

    println!("{}", "Evaluating...".cyan());
    let evaluation = evaluate_model(&trained.model, &data, &class_names, &config.data, device)?;
    print_evaluation(&evaluation.held_out);

    let mut reports = write_reports(Some(&trained.history), &evaluation.held_out, &config.output)?;
    let experiment_path = config.output.output_dir.join(persistence::EXPERIMENT_FILE);
    config.save_toml(&experiment_path)?;
    reports.push(experiment_path);

    println!(
        "{} Artifacts written to {}",
        "✓".green(),
        config.output.output_dir.display()
    );

    Ok(PipelineOutcome {
        class_names,
        artifact,
        history: trained.history,
        evaluation,
        reports,
    })
}

/// Evaluate a saved model on a held-out tree.
///
/// Image size and pixel scaling come from the saved model; the tree's
/// vocabulary must equal the one the model was trained on.
pub fn evaluate_saved<B: Backend>(
    model_dir: &Path,
    model_name: &str,
    test_dir: &Path,
    output: &OutputConfig,
    eval_batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let (model, saved) = persistence::load_model::<B>(model_dir, model_name, device)?;

    let folder = ImageFolder::new(test_dir)?;
    if let Some(detail) = vocabulary_diff(&saved.class_names, folder.class_names()) {
        return Err(PlantDiseaseError::VocabularyMismatch {
            reference: ModelArtifact::new(model_dir, model_name).config_path,
            other: folder.root_dir().to_path_buf(),
            detail,
        });
    }

    let image_size = saved.model.input_size;
    let loader = BatchLoader::<B>::new(
        Arc::new(LeafDataset::new(&folder, image_size)),
        LeafBatcher::new(saved.class_names.len(), image_size, saved.scaling),
        eval_batch_size,
        device.clone(),
    );
    let report = evaluate_held_out(&model, &loader, &saved.class_names)?;
    print_evaluation(&report);

    let written = write_reports(None, &report, output)?;
    info!("Wrote {} report files to {:?}", written.len(), output.output_dir);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::write_tree;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_experiment(root: &Path) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.data.data_dir = root.to_path_buf();
        config.data.image_size = 16;
        config.data.batch_size = 4;
        config.model.base_filters = 2;
        config.model.num_stages = 2;
        config.model.dense_units = 8;
        config.training.epochs = 1;
        config.output.output_dir = root.join("out");
        config
    }

    #[test]
    fn test_test_tree_defaults_to_validation_tree() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &["a", "b"], 2, 20);
        write_tree(&dir.path().join("valid"), &["a", "b"], 1, 20);
        let config = tiny_experiment(dir.path());

        let datasets = load_datasets(&config).unwrap();
        let data = prepare_data(&datasets, &config.data).unwrap();

        assert_eq!(datasets.test.root_dir(), datasets.valid.root_dir());
        assert!(Arc::ptr_eq(&data.test, &data.valid));
        assert_eq!(datasets.class_names(), ["a", "b"]);
    }

    #[test]
    fn test_default_batch_shapes() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &["a", "b"], 17, 20);
        write_tree(&dir.path().join("valid"), &["a", "b"], 2, 20);
        let mut config = ExperimentConfig::default();
        config.data.data_dir = dir.path().to_path_buf();
        let device = Default::default();

        let datasets = load_datasets(&config).unwrap();
        let data = prepare_data(&datasets, &config.data).unwrap();

        let train_loader = data.train_loader::<TestBackend>(&config, &device);
        assert!(train_loader.is_shuffled());
        let train_shapes: Vec<[usize; 4]> = train_loader
            .iter()
            .map(|batch| batch.unwrap().images.dims())
            .collect();
        assert_eq!(train_shapes, vec![[32, 3, 128, 128], [2, 3, 128, 128]]);

        let batch = train_loader.iter().next().unwrap().unwrap();
        assert_eq!(batch.labels.dims(), [32, 2]);
        let row_sums: Vec<f32> = batch.labels.sum_dim(1).into_data().iter::<f32>().collect();
        assert!(row_sums.iter().all(|&s| s == 1.0));

        let held_out = data.held_out_loader::<TestBackend>(&config.data, &device);
        let held_out_shapes: Vec<[usize; 4]> = held_out
            .iter()
            .map(|batch| batch.unwrap().images.dims())
            .collect();
        assert_eq!(held_out_shapes, vec![[1, 3, 128, 128]; 4]);
    }

    #[test]
    fn test_split_vocabularies_must_agree() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &["a", "b"], 1, 20);
        write_tree(&dir.path().join("valid"), &["a", "c"], 1, 20);

        let err = load_datasets(&tiny_experiment(dir.path())).unwrap_err();

        assert!(matches!(err, PlantDiseaseError::VocabularyMismatch { .. }));
    }

    #[test]
    fn test_expected_classes_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &["a", "b"], 1, 20);
        write_tree(&dir.path().join("valid"), &["a", "b"], 1, 20);
        let mut config = tiny_experiment(dir.path());
        config.model.expected_classes = Some(3);

        let err = load_datasets(&config).unwrap_err();

        assert!(matches!(
            err,
            PlantDiseaseError::ClassCountMismatch { expected: 3, found: 2 }
        ));
    }

    #[test]
    fn test_build_model_uses_vocabulary_size() {
        let config = tiny_experiment(Path::new("."));
        let (model, cnn_config) =
            build_model::<TestBackend>(&config, 5, &Default::default()).unwrap();

        assert_eq!(model.num_classes(), 5);
        assert_eq!(cnn_config.input_size, 16);
    }

    #[test]
    fn test_reports_respect_skip_charts() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &["a", "b"], 1, 20);
        write_tree(&dir.path().join("valid"), &["a", "b"], 1, 20);
        let mut config = tiny_experiment(dir.path());
        config.output.skip_charts = true;

        let datasets = load_datasets(&config).unwrap();
        let data = prepare_data(&datasets, &config.data).unwrap();
        let device = Default::default();
        let (model, _) = build_model::<TestBackend>(&config, 2, &device).unwrap();
        let evaluation = evaluate_model(&model, &data, datasets.class_names(), &config.data, &device).unwrap();

        let written = write_reports(None, &evaluation.held_out, &config.output).unwrap();

        assert_eq!(written.len(), 2);
        assert!(config.output.output_dir.join(persistence::CONFUSION_CSV_FILE).exists());
        assert!(!config.output.output_dir.join(persistence::CONFUSION_CHART_FILE).exists());
        assert_eq!(evaluation.train.num_samples, 2);
        assert_eq!(evaluation.held_out.confusion_matrix.total(), 2);
    }
}
