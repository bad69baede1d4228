//! Metrics Module for Model Evaluation
//!
//! Confusion matrix, per-class precision/recall/F1 and the text
//! classification report printed after evaluation.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{PlantDiseaseError, Result};

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted)
    /// Stored as a flat vector in row-major order
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build the matrix from paired predictions and ground truth.
    ///
    /// Both slices must have the same length and every index must be below
    /// `num_classes`.
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(PlantDiseaseError::Evaluation(format!(
                "{} predictions for {} labels",
                predictions.len(),
                ground_truth.len()
            )));
        }

        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            if pred >= num_classes || actual >= num_classes {
                return Err(PlantDiseaseError::ClassCountMismatch {
                    expected: num_classes,
                    found: pred.max(actual) + 1,
                });
            }
            cm.add(actual, pred);
        }

        Ok(cm)
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Number of correct predictions (trace)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// trace / total, 0 for an empty matrix
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Row sums, i.e. the number of examples of each actual class
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Column sums, i.e. how often each class was predicted
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Largest single cell, used to scale heatmap colours
    pub fn max_count(&self) -> usize {
        self.matrix.iter().copied().max().unwrap_or(0)
    }

    /// Pretty print the confusion matrix with abbreviated class names
    pub fn display(&self, class_names: &[String]) -> String {
        let mut output = String::new();
        output.push_str("\nConfusion Matrix (rows=actual, cols=predicted):\n\n");

        let label = |idx: usize, width: usize| -> String {
            class_names
                .get(idx)
                .map(|name| name.chars().take(width).collect())
                .unwrap_or_else(|| idx.to_string())
        };

        output.push_str("          ");
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>8}", label(col, 7)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>9} ", label(row, 9)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("  [{:>4}]", count));
                } else {
                    output.push_str(&format!("   {:>4} ", count));
                }
            }
            output.push('\n');
        }

        output.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));
        output
    }

    /// Save confusion matrix to CSV, headed by class names
    pub fn save_csv(&self, path: &Path, class_names: &[String]) -> std::io::Result<()> {
        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            content.push(',');
            content.push_str(class_names.get(col).map(String::as_str).unwrap_or("?"));
        }
        content.push('\n');

        for row in 0..self.num_classes {
            content.push_str(class_names.get(row).map(String::as_str).unwrap_or("?"));
            for col in 0..self.num_classes {
                content.push_str(&format!(",{}", self.get(row, col)));
            }
            content.push('\n');
        }

        std::fs::write(path, content)
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: String,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP), 0 when nothing was predicted as this class
    pub precision: f64,
    /// TP / (TP + FN), 0 when the class has no examples
    pub recall: f64,
    pub f1: f64,
    /// Number of actual examples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize, class_name: &str) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let support = true_positives + false_negatives;
        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, support);

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: class_name.to_string(),
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Precision/recall/F1 triple for the averaged report rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-class precision/recall/F1/support plus accuracy and averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub total_support: usize,
}

impl ClassificationReport {
    /// Compute the report from a confusion matrix.
    ///
    /// `class_names` must hold one name per matrix row.
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> Result<Self> {
        if class_names.len() != cm.num_classes {
            return Err(PlantDiseaseError::ClassCountMismatch {
                expected: cm.num_classes,
                found: class_names.len(),
            });
        }

        let per_class: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| ClassMetrics::from_confusion_matrix(cm, idx, name))
            .collect();

        let k = per_class.len().max(1) as f64;
        let macro_avg = AveragedMetrics {
            precision: per_class.iter().map(|m| m.precision).sum::<f64>() / k,
            recall: per_class.iter().map(|m| m.recall).sum::<f64>() / k,
            f1: per_class.iter().map(|m| m.f1).sum::<f64>() / k,
        };

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted = |value: fn(&ClassMetrics) -> f64| -> f64 {
            if total_support == 0 {
                return 0.0;
            }
            per_class
                .iter()
                .map(|m| value(m) * m.support as f64)
                .sum::<f64>()
                / total_support as f64
        };
        let weighted_avg = AveragedMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
        };

        Ok(Self {
            accuracy: cm.accuracy(),
            per_class,
            macro_avg,
            weighted_avg,
            total_support,
        })
    }

    /// Render the familiar tabular text report
    pub fn format(&self) -> String {
        let width = self
            .per_class
            .iter()
            .map(|m| m.class_name.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}\n",
            "", "precision", "recall", "f1-score", "support"
        );

        for m in &self.per_class {
            let _ = writeln!(
                out,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.class_name, m.precision, m.recall, m.f1, m.support
            );
        }
        out.push('\n');

        let _ = writeln!(
            out,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total_support
        );
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            let _ = writeln!(
                out,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.total_support
            );
        }

        out
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Sample-weighted running mean of a per-batch quantity
#[derive(Debug, Clone, Default)]
pub struct WeightedMean {
    sum: f64,
    count: usize,
}

impl WeightedMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch mean computed over `samples` examples
    pub fn add(&mut self, batch_mean: f64, samples: usize) {
        self.sum += batch_mean * samples as f64;
        self.count += samples;
    }

    pub fn mean(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(k: usize) -> Vec<String> {
        (0..k).map(|i| format!("class_{}", i)).collect()
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3).unwrap();

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_row_sums_are_class_counts() {
        let ground_truth = vec![0, 0, 1, 2, 2, 2];
        let predictions = vec![1, 0, 1, 0, 2, 2];
        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3).unwrap();

        assert_eq!(cm.row_sums(), vec![2, 1, 3]);
        assert_eq!(cm.col_sums(), vec![2, 2, 2]);
        assert_eq!(cm.max_count(), 2);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = ConfusionMatrix::from_predictions(&[0, 1], &[0], 2).unwrap_err();
        assert!(matches!(err, PlantDiseaseError::Evaluation(_)));
    }

    #[test]
    fn test_out_of_range_label_is_rejected() {
        let err = ConfusionMatrix::from_predictions(&[0, 3], &[0, 1], 3).unwrap_err();
        assert!(matches!(
            err,
            PlantDiseaseError::ClassCountMismatch { expected: 3, found: 4 }
        ));
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2).unwrap();
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0, "healthy");

        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.support, 3);
        assert_eq!(class0.class_name, "healthy");
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_never_predicted_class_scores_zero() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0], &[0, 1], 2).unwrap();
        let class1 = ClassMetrics::from_confusion_matrix(&cm, 1, "rust");

        assert_eq!(class1.precision, 0.0);
        assert_eq!(class1.recall, 0.0);
        assert_eq!(class1.f1, 0.0);
        assert_eq!(class1.support, 1);
    }

    #[test]
    fn test_report_averages() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];
        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2).unwrap();

        let report = ClassificationReport::from_confusion_matrix(&cm, &names(2)).unwrap();

        assert_eq!(report.total_support, 5);
        assert!((report.accuracy - 0.6).abs() < 1e-9);
        // class 0: p=r=2/3, class 1: p=r=1/2
        let expected_macro = (2.0 / 3.0 + 0.5) / 2.0;
        assert!((report.macro_avg.precision - expected_macro).abs() < 1e-9);
        let expected_weighted = (2.0 / 3.0 * 3.0 + 0.5 * 2.0) / 5.0;
        assert!((report.weighted_avg.recall - expected_weighted).abs() < 1e-9);
    }

    #[test]
    fn test_report_requires_one_name_per_class() {
        let cm = ConfusionMatrix::new(3);
        let err = ClassificationReport::from_confusion_matrix(&cm, &names(2)).unwrap_err();
        assert!(matches!(err, PlantDiseaseError::ClassCountMismatch { .. }));
    }

    #[test]
    fn test_report_text_layout() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 2], &[0, 1, 2], 3).unwrap();
        let class_names = vec![
            "Healthy".to_string(),
            "Powdery".to_string(),
            "Rust".to_string(),
        ];
        let text = ClassificationReport::from_confusion_matrix(&cm, &class_names)
            .unwrap()
            .format();

        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("precision"));
        assert!(lines[0].contains("f1-score"));
        assert!(text.contains("Powdery"));
        assert!(text.contains("macro avg"));
        assert!(text.contains("weighted avg"));
        assert!(lines.iter().any(|l| l.trim_start().starts_with("accuracy") && l.contains("1.00")));
    }

    #[test]
    fn test_csv_uses_class_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.csv");
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 0], 2).unwrap();

        cm.save_csv(&path, &names(2)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "actual\\predicted,class_0,class_1\nclass_0,1,1\nclass_1,0,0\n"
        );
    }

    #[test]
    fn test_weighted_mean() {
        let mut mean = WeightedMean::new();
        mean.add(1.0, 3);
        mean.add(2.0, 1);

        assert_eq!(mean.count(), 4);
        assert!((mean.mean() - 1.25).abs() < 1e-9);
        assert_eq!(WeightedMean::new().mean(), 0.0);
    }
}
