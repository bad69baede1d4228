//! Supervised training loop.
//!
//! Mini-batch Adam on categorical cross-entropy for a fixed number of
//! epochs. Training metrics are sample-weighted means over the epoch;
//! validation runs on the non-autodiff model, so dropout is off.

use burn::{
    backend::Autodiff,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::ElementConversion,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::history::TrainingHistory;
use crate::config::TrainingConfig;
use crate::dataset::BatchLoader;
use crate::evaluation::{check_class_count, evaluate};
use crate::model::PlantDiseaseCnn;
use crate::utils::error::{PlantDiseaseError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::WeightedMean;

/// Keras' Adam epsilon; Burn defaults to 1e-5
const ADAM_EPSILON: f32 = 1e-7;

/// A fitted model (inference backend) and its history
#[derive(Debug)]
pub struct TrainedModel<B: Backend> {
    pub model: PlantDiseaseCnn<B>,
    pub history: TrainingHistory,
}

/// Fit `model` on `train`, scoring `valid` after every epoch.
///
/// Fails on the first non-finite training loss or unreadable image.
pub fn fit<B: Backend>(
    model: PlantDiseaseCnn<Autodiff<B>>,
    train: &BatchLoader<Autodiff<B>>,
    valid: &BatchLoader<B>,
    config: &TrainingConfig,
) -> Result<TrainedModel<B>> {
    check_class_count(&model, train)?;
    if model.num_classes() != valid.num_classes() {
        return Err(PlantDiseaseError::ClassCountMismatch {
            expected: model.num_classes(),
            found: valid.num_classes(),
        });
    }

    let mut model = model;
    let mut optimizer = AdamConfig::new()
        .with_epsilon(ADAM_EPSILON)
        .with_weight_decay(config.weight_decay.map(WeightDecayConfig::new))
        .init();
    let loss_fn = CrossEntropyLossConfig::new().init(train.device());

    let mut history = TrainingHistory::new();
    let mut logger = TrainingLogger::new(config.epochs);

    info!(
        "Training on {} samples, validating on {} ({} epochs, batch size {}, lr {})",
        train.num_items(),
        valid.num_items(),
        config.epochs,
        train.batch_size(),
        config.learning_rate
    );

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);
        println!("{}", format!("Epoch {}/{}", epoch + 1, config.epochs).yellow().bold());

        let progress = epoch_progress(train.num_batches());
        let mut epoch_loss = WeightedMean::new();
        let mut correct = 0usize;

        for (batch_idx, batch) in train.iter_epoch(epoch).enumerate() {
            let batch = batch?;
            let n = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                progress.abandon();
                return Err(PlantDiseaseError::Training(format!(
                    "non-finite loss {} at epoch {}, batch {}",
                    loss_value,
                    epoch + 1,
                    batch_idx + 1
                )));
            }

            let batch_correct: i64 = logits
                .argmax(1)
                .reshape([n])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();

            epoch_loss.add(loss_value, n);
            correct += batch_correct as usize;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            progress.set_message(format!("loss {:.4}", epoch_loss.mean()));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let loss = epoch_loss.mean();
        let accuracy = if epoch_loss.count() > 0 {
            correct as f64 / epoch_loss.count() as f64
        } else {
            0.0
        };

        let validation = evaluate(&model.valid(), valid)?;
        history.push_epoch(loss, accuracy, validation.loss, validation.accuracy);
        logger.end_epoch(loss, accuracy, validation.loss, validation.accuracy);

        println!(
            "  {} loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
            "→".cyan(),
            loss,
            accuracy,
            validation.loss,
            validation.accuracy
        );
    }

    logger.log_complete(history.val_accuracy.last().copied().unwrap_or(0.0));

    Ok(TrainedModel {
        model: model.valid(),
        history,
    })
}

fn epoch_progress(num_batches: usize) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");

    ProgressBar::new(num_batches as u64).with_style(style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dataset::test_support::write_tree;
    use crate::dataset::{ImageFolder, LeafBatcher, LeafDataset, PixelScaling};
    use crate::model::PlantDiseaseCnnConfig;
    use burn_ndarray::NdArray;

    type Inner = NdArray<f32>;

    fn tiny_model<B: Backend>(num_classes: usize) -> PlantDiseaseCnn<B> {
        let config = PlantDiseaseCnnConfig::new(num_classes)
            .with_input_size(16)
            .with_num_stages(2)
            .with_base_filters(2)
            .with_dense_units(8);
        PlantDiseaseCnn::new(&config, &Default::default()).unwrap()
    }

    fn loaders(
        dir: &std::path::Path,
        scaling: PixelScaling,
    ) -> (BatchLoader<Autodiff<Inner>>, BatchLoader<Inner>) {
        let folder = ImageFolder::new(dir).unwrap();
        let dataset = Arc::new(LeafDataset::new(&folder, 16));
        let batcher = LeafBatcher::new(folder.num_classes(), 16, scaling);
        let train = BatchLoader::new(dataset.clone(), batcher.clone(), 4, Default::default()).shuffle(1);
        let valid = BatchLoader::new(dataset, batcher, 4, Default::default());
        (train, valid)
    }

    #[test]
    fn test_history_has_one_entry_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &["a", "b", "c"], 2, 16);
        let (train, valid) = loaders(dir.path(), PixelScaling::Unit);

        let config = TrainingConfig {
            epochs: 2,
            ..TrainingConfig::default()
        };
        let trained = fit(tiny_model(3), &train, &valid, &config).unwrap();

        let history = &trained.history;
        assert_eq!(history.epochs(), 2);
        assert_eq!(history.val_loss.len(), 2);
        for acc in history.accuracy.iter().chain(&history.val_accuracy) {
            assert!((0.0..=1.0).contains(acc));
        }
        assert!(history.loss.iter().all(|l| l.is_finite()));
        assert_eq!(trained.model.num_classes(), 3);
    }

    #[test]
    fn test_class_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &["a", "b"], 1, 16);
        let (train, valid) = loaders(dir.path(), PixelScaling::Unit);

        let err = fit(tiny_model(3), &train, &valid, &TrainingConfig::default()).unwrap_err();

        assert!(matches!(
            err,
            PlantDiseaseError::ClassCountMismatch { expected: 3, found: 2 }
        ));
    }

    #[test]
    fn test_diverging_run_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &["a", "b"], 2, 16);
        let (train, valid) = loaders(dir.path(), PixelScaling::Raw);

        let config = TrainingConfig {
            epochs: 50,
            learning_rate: 1e30,
            ..TrainingConfig::default()
        };
        let result = fit(tiny_model(2), &train, &valid, &config);

        assert!(matches!(result, Err(PlantDiseaseError::Training(_))));
    }
}
