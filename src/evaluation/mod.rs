//! Evaluation of trained models
//!
//! Scalar loss/accuracy passes, arg-max predictions and the held-out
//! report (confusion matrix plus per-class precision/recall/F1).

pub mod evaluator;

pub use evaluator::{
    check_class_count, evaluate, evaluate_held_out, predict, EvaluationReport, EvaluationSummary,
    Predictions,
};
