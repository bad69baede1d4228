//! Model evaluation over a batch loader.
//!
//! A single pass collects the summed cross-entropy, the arg-max of the
//! softmax output and the arg-max of the one-hot labels, in iteration
//! order. Everything else (accuracy, confusion matrix, report) is derived
//! from those vectors.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::ElementConversion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::BatchLoader;
use crate::model::PlantDiseaseCnn;
use crate::utils::error::{PlantDiseaseError, Result};
use crate::utils::metrics::{ClassificationReport, ConfusionMatrix, WeightedMean};

/// Scalar loss and accuracy over a full pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub loss: f64,
    pub accuracy: f64,
    pub num_samples: usize,
}

/// Per-example predicted and true class indices, in iteration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub predicted: Vec<usize>,
    pub actual: Vec<usize>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.predicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicted.is_empty()
    }

    pub fn accuracy(&self) -> f64 {
        if self.predicted.is_empty() {
            return 0.0;
        }
        let correct = self
            .predicted
            .iter()
            .zip(&self.actual)
            .filter(|(p, a)| p == a)
            .count();
        correct as f64 / self.predicted.len() as f64
    }
}

/// Everything the held-out evaluation produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub class_names: Vec<String>,
    pub summary: EvaluationSummary,
    pub predictions: Predictions,
    pub confusion_matrix: ConfusionMatrix,
    pub report: ClassificationReport,
}

/// The model's output width must equal the dataset's vocabulary size
pub fn check_class_count<B: Backend>(model: &PlantDiseaseCnn<B>, loader: &BatchLoader<B>) -> Result<()> {
    if model.num_classes() != loader.num_classes() {
        return Err(PlantDiseaseError::ClassCountMismatch {
            expected: model.num_classes(),
            found: loader.num_classes(),
        });
    }
    Ok(())
}

fn run_pass<B: Backend>(
    model: &PlantDiseaseCnn<B>,
    loader: &BatchLoader<B>,
) -> Result<(EvaluationSummary, Predictions)> {
    check_class_count(model, loader)?;

    let loss_fn = CrossEntropyLossConfig::new().init(loader.device());
    let mut loss_mean = WeightedMean::new();
    let mut predictions = Predictions::default();

    for batch in loader.iter() {
        let batch = batch?;
        let n = batch.targets.dims()[0];

        let logits = model.forward(batch.images);
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets)
            .into_scalar()
            .elem();
        loss_mean.add(loss, n);

        let probabilities = softmax(logits, 1);
        predictions.predicted.extend(argmax_rows(probabilities));
        predictions.actual.extend(argmax_rows(batch.labels));
    }

    if predictions.predicted.len() != predictions.actual.len() {
        return Err(PlantDiseaseError::Evaluation(format!(
            "{} predictions for {} labels",
            predictions.predicted.len(),
            predictions.actual.len()
        )));
    }

    let summary = EvaluationSummary {
        loss: loss_mean.mean(),
        accuracy: predictions.accuracy(),
        num_samples: predictions.len(),
    };
    debug!(
        "Evaluated {} samples: loss {:.4}, accuracy {:.4}",
        summary.num_samples, summary.loss, summary.accuracy
    );

    Ok((summary, predictions))
}

fn argmax_rows<B: Backend>(values: Tensor<B, 2>) -> Vec<usize> {
    values
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|idx| idx as usize)
        .collect()
}

/// Mean loss and accuracy of `model` over every batch of `loader`
pub fn evaluate<B: Backend>(model: &PlantDiseaseCnn<B>, loader: &BatchLoader<B>) -> Result<EvaluationSummary> {
    run_pass(model, loader).map(|(summary, _)| summary)
}

/// Arg-max predictions and true labels of every example
pub fn predict<B: Backend>(model: &PlantDiseaseCnn<B>, loader: &BatchLoader<B>) -> Result<Predictions> {
    run_pass(model, loader).map(|(_, predictions)| predictions)
}

/// Full held-out evaluation: summary, predictions, confusion matrix and
/// classification report against `class_names`.
///
/// The loader should not shuffle, so predictions line up with the sample
/// order on disk.
pub fn evaluate_held_out<B: Backend>(
    model: &PlantDiseaseCnn<B>,
    loader: &BatchLoader<B>,
    class_names: &[String],
) -> Result<EvaluationReport> {
    if class_names.len() != model.num_classes() {
        return Err(PlantDiseaseError::ClassCountMismatch {
            expected: model.num_classes(),
            found: class_names.len(),
        });
    }
    if loader.is_shuffled() {
        tracing::warn!("Held-out loader is shuffled; prediction order will not match disk order");
    }

    let (summary, predictions) = run_pass(model, loader)?;
    let confusion_matrix =
        ConfusionMatrix::from_predictions(&predictions.predicted, &predictions.actual, class_names.len())?;
    let report = ClassificationReport::from_confusion_matrix(&confusion_matrix, class_names)?;

    Ok(EvaluationReport {
        generated_at: Utc::now(),
        class_names: class_names.to_vec(),
        summary,
        predictions,
        confusion_matrix,
        report,
    })
}
