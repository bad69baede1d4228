//! Layer-by-layer model summary (name, output shape, parameter count).

use std::fmt;

use serde::Serialize;

use super::cnn::PlantDiseaseCnnConfig;
use crate::utils::error::Result;
use crate::utils::format_number;

/// One row of the summary table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: &'static str,
    /// Output shape without the batch dimension (channels first)
    pub output_shape: Vec<usize>,
    pub params: usize,
}

/// Summary of every layer of a [`super::PlantDiseaseCnn`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    /// Derive the summary from a config, without allocating any weights
    pub fn from_config(config: &PlantDiseaseCnnConfig) -> Result<Self> {
        config.validate()?;

        let mut layers = Vec::new();
        let mut counters = [0usize; 5];
        let mut push = |kind: &'static str, slot: usize, output_shape: Vec<usize>, params: usize| {
            let name = match counters[slot] {
                0 => kind.to_string(),
                n => format!("{}_{}", kind, n),
            };
            counters[slot] += 1;
            layers.push(LayerSummary {
                name,
                kind,
                output_shape,
                params,
            });
        };

        let conv_params = |c_in: usize, c_out: usize| 3 * 3 * c_in * c_out + c_out;

        let mut size = config.input_size;
        let mut channels = config.in_channels;
        for stage in 0..config.num_stages {
            let filters = config.stage_filters(stage);

            push("conv2d", 0, vec![filters, size, size], conv_params(channels, filters));
            size -= 2;
            push("conv2d", 0, vec![filters, size, size], conv_params(filters, filters));
            size /= 2;
            push("max_pooling2d", 1, vec![filters, size, size], 0);

            channels = filters;
        }

        let flattened = size * size * channels;
        push("dropout", 2, vec![channels, size, size], 0);
        push("flatten", 3, vec![flattened], 0);
        push("dense", 4, vec![config.dense_units], flattened * config.dense_units + config.dense_units);
        push("dropout", 2, vec![config.dense_units], 0);
        push(
            "dense",
            4,
            vec![config.num_classes],
            config.dense_units * config.num_classes + config.num_classes,
        );

        Ok(Self { layers })
    }

    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params).sum()
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "─".repeat(72);
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:<28} {:<26} {:>16}", "Layer (type)", "Output Shape", "Param #")?;
        writeln!(f, "{}", "═".repeat(72))?;

        for layer in &self.layers {
            let shape = layer
                .output_shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                f,
                "{:<28} {:<26} {:>16}",
                format!("{} ({})", layer.name, layer.kind),
                format!("[-, {}]", shape),
                format_number(layer.params)
            )?;
        }

        writeln!(f, "{}", "═".repeat(72))?;
        writeln!(f, "Total params: {}", format_number(self.total_params()))?;
        write!(f, "{}", rule)
    }
}
