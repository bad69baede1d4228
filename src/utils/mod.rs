//! Utilities module for logging, metrics, charts and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Evaluation metrics (confusion matrix, classification report)
//! - SVG charts for accuracy curves and the confusion heatmap
//! - Error handling types

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{PlantDiseaseError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{ClassificationReport, ConfusionMatrix};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(3_085_283), "3,085,283");
        assert_eq!(format_number(42), "42");
    }
}
