//! SVG Chart Generator
//!
//! Renders the accuracy curves and the confusion-matrix heatmap as
//! standalone SVG files.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::metrics::ConfusionMatrix;

/// Chart styling constants
const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_TRAINING: &str = "red";
pub const COLOR_VALIDATION: &str = "blue";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Heatmap gradient end points (light to dark blue)
const HEAT_LOW: (u8, u8, u8) = (247, 251, 255);
const HEAT_HIGH: (u8, u8, u8) = (8, 48, 107);

const FONT: &str = "Arial, sans-serif";

/// A data point for a line chart
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A named, coloured line
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

impl DataSeries {
    /// One point per epoch, numbered from 1
    pub fn per_epoch(name: &str, values: &[f64], color: &str) -> Self {
        Self {
            name: name.to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, &y)| DataPoint {
                    x: (i + 1) as f64,
                    y,
                })
                .collect(),
            color: color.to_string(),
        }
    }
}

/// Render a line chart with a fixed y range.
pub fn render_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    y_range: (f64, f64),
    series: &[DataSeries],
) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max) = x_range(series);
    let (y_min, y_max) = y_range;
    let x_span = if x_max > x_min { x_max - x_min } else { 1.0 };
    let y_span = if y_max > y_min { y_max - y_min } else { 1.0 };

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / x_span) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / y_span) * plot_height;

    let mut svg = String::new();
    open_svg(&mut svg, CHART_WIDTH, CHART_HEIGHT, title);

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * y_span;
        let y = to_y(value);

        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{:.1}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, FONT, COLOR_TEXT, value
        );
    }

    // Axes
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    );
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    );

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 20.0, FONT, COLOR_TEXT, escape_xml(x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0, FONT, COLOR_TEXT, CHART_HEIGHT / 2.0, escape_xml(y_label)
    );

    for series_data in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = series_data
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {} {}", cmd, to_x(p.x), to_y(p.y))
            })
            .collect();

        let _ = write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            series_data.color
        );

        for point in &series_data.points {
            let _ = write!(
                svg,
                r#"<circle cx="{}" cy="{}" r="5" fill="{}" stroke="white" stroke-width="2"/>"#,
                to_x(point.x), to_y(point.y), series_data.color
            );
        }
    }

    // X-axis ticks come from the first series
    if let Some(first) = series.first() {
        for point in &first.points {
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{:.0}</text>"#,
                to_x(point.x), MARGIN_TOP + plot_height + 20.0, FONT, COLOR_TEXT, point.x
            );
        }
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for series_data in series {
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 170.0, legend_y, series_data.color
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 150.0, legend_y + 12.0, FONT, COLOR_TEXT, escape_xml(&series_data.name)
        );
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

/// Render the training vs. validation accuracy curves
pub fn render_accuracy_chart(accuracy: &[f64], val_accuracy: &[f64]) -> String {
    let series = [
        DataSeries::per_epoch("Training Accuracy", accuracy, COLOR_TRAINING),
        DataSeries::per_epoch("Validation Accuracy", val_accuracy, COLOR_VALIDATION),
    ];

    render_line_chart(
        "Visualization of Accuracy Result",
        "No. of Epochs",
        "Accuracy",
        (0.0, 1.0),
        &series,
    )
}

/// Write the accuracy chart to `output_path`
pub fn write_accuracy_chart(
    accuracy: &[f64],
    val_accuracy: &[f64],
    output_path: &Path,
) -> std::io::Result<()> {
    fs::write(output_path, render_accuracy_chart(accuracy, val_accuracy))
}

/// Render an annotated confusion-matrix heatmap.
///
/// Rows are actual classes, columns predicted classes; both axes carry the
/// class names and every cell shows its count.
pub fn render_confusion_heatmap(cm: &ConfusionMatrix, class_names: &[String]) -> String {
    let k = cm.num_classes.max(1);
    let cell = (480.0 / k as f64).clamp(24.0, 80.0);
    let label_space = 40.0 + 7.0 * class_names.iter().map(|n| n.len()).max().unwrap_or(1) as f64;

    let grid = cell * k as f64;
    let left = MARGIN_LEFT + label_space;
    let top = MARGIN_TOP;
    let width = left + grid + MARGIN_RIGHT;
    let height = top + grid + label_space + MARGIN_BOTTOM / 2.0;

    let max_count = cm.max_count().max(1) as f64;
    let font_size = (cell / 3.0).clamp(8.0, 16.0);

    let mut svg = String::new();
    open_svg(&mut svg, width, height, "Plant Disease Prediction Confusion Matrix");

    for row in 0..cm.num_classes {
        for col in 0..cm.num_classes {
            let count = cm.get(row, col);
            let intensity = count as f64 / max_count;
            let x = left + col as f64 * cell;
            let y = top + row as f64 * cell;

            let _ = write!(
                svg,
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x, y, cell, cell, heat_color(intensity)
            );

            let text_color = if intensity > 0.5 { "white" } else { COLOR_TEXT };
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" dominant-baseline="middle" font-family="{}" font-size="{}" fill="{}">{}</text>"#,
                x + cell / 2.0, y + cell / 2.0, FONT, font_size, text_color, count
            );
        }
    }

    for (idx, name) in class_names.iter().enumerate().take(cm.num_classes) {
        let center = idx as f64 * cell + cell / 2.0;

        // Row labels (actual)
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" dominant-baseline="middle" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            left - 8.0, top + center, FONT, COLOR_TEXT, escape_xml(name)
        );

        // Column labels (predicted), rotated like matplotlib's xticks(rotation=90)
        let lx = left + center;
        let ly = top + grid + 8.0;
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" dominant-baseline="middle" font-family="{}" font-size="12" fill="{}" transform="rotate(-90 {} {})">{}</text>"#,
            lx, ly, FONT, COLOR_TEXT, lx, ly, escape_xml(name)
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">Predicted Class</text>"#,
        left + grid / 2.0, height - 15.0, FONT, COLOR_TEXT
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {})">Actual Class</text>"#,
        top + grid / 2.0, FONT, COLOR_TEXT, top + grid / 2.0
    );

    svg.push_str("</svg>");
    svg
}

/// Write the confusion-matrix heatmap to `output_path`
pub fn write_confusion_heatmap(
    cm: &ConfusionMatrix,
    class_names: &[String],
    output_path: &Path,
) -> std::io::Result<()> {
    fs::write(output_path, render_confusion_heatmap(cm, class_names))
}

fn open_svg(svg: &mut String, width: f64, height: f64, title: &str) {
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        width, height, width, height
    );
    let _ = write!(svg, r#"<rect width="{}" height="{}" fill="white"/>"#, width, height);
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{}" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        width / 2.0, FONT, COLOR_TEXT, escape_xml(title)
    );
}

fn heat_color(intensity: f64) -> String {
    let t = intensity.clamp(0.0, 1.0);
    let mix = |lo: u8, hi: u8| -> u8 { (lo as f64 + (hi as f64 - lo as f64) * t).round() as u8 };
    format!(
        "#{:02x}{:02x}{:02x}",
        mix(HEAT_LOW.0, HEAT_HIGH.0),
        mix(HEAT_LOW.1, HEAT_HIGH.1),
        mix(HEAT_LOW.2, HEAT_HIGH.2)
    )
}

fn x_range(series: &[DataSeries]) -> (f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;

    for p in series.iter().flat_map(|s| s.points.iter()) {
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
    }

    if x_min.is_finite() {
        (x_min, x_max)
    } else {
        (0.0, 1.0)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
