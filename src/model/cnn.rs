//! CNN Model Architecture for Plant Disease Classification
//!
//! Stacked convolution stages followed by a dense classifier head:
//!
//! ```text
//! input [N, 3, 128, 128]
//!   5 x { conv3x3 same + ReLU -> conv3x3 valid + ReLU -> maxpool 2x2/2 }
//!       filters 32, 64, 128, 256, 512
//!   dropout 0.25 -> flatten (2048) -> dense 1500 + ReLU -> dropout 0.4
//!   dense num_classes (softmax in `forward_softmax`)
//! ```

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::PlantDiseaseError;

/// Configuration for the [`PlantDiseaseCnn`] model
#[derive(Config, Debug, PartialEq)]
pub struct PlantDiseaseCnnConfig {
    /// Number of output classes, taken from the class vocabulary
    pub num_classes: usize,

    /// Input image size (square images)
    #[config(default = "128")]
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first stage; doubled at every later stage
    #[config(default = "32")]
    pub base_filters: usize,

    /// Number of convolution stages
    #[config(default = "5")]
    pub num_stages: usize,

    /// Width of the hidden dense layer
    #[config(default = "1500")]
    pub dense_units: usize,

    /// Dropout after the last stage
    #[config(default = "0.25")]
    pub conv_dropout: f64,

    /// Dropout after the hidden dense layer
    #[config(default = "0.4")]
    pub dense_dropout: f64,
}

impl PlantDiseaseCnnConfig {
    /// Output channels of stage `stage` (0-based)
    pub fn stage_filters(&self, stage: usize) -> usize {
        self.base_filters << stage
    }

    /// Spatial side length after each stage, or `None` if the feature map
    /// vanishes before the last pool
    pub fn stage_sizes(&self) -> Option<Vec<usize>> {
        let mut size = self.input_size;
        let mut sizes = Vec::with_capacity(self.num_stages);

        for _ in 0..self.num_stages {
            // valid 3x3 conv needs 3 pixels, the pool then needs 2
            if size < 4 {
                return None;
            }
            size = (size - 2) / 2;
            sizes.push(size);
        }

        Some(sizes)
    }

    /// Number of features entering the dense head
    pub fn flattened_features(&self) -> Option<usize> {
        let last = *self.stage_sizes()?.last()?;
        Some(last * last * self.stage_filters(self.num_stages - 1))
    }

    /// Reject configurations the network cannot be built from
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(PlantDiseaseError::InvalidConfig(msg));

        if self.num_classes == 0 {
            return invalid("num_classes must be > 0".into());
        }
        if self.in_channels == 0 || self.base_filters == 0 || self.dense_units == 0 {
            return invalid("channel, filter and dense widths must be > 0".into());
        }
        if self.num_stages == 0 {
            return invalid("num_stages must be > 0".into());
        }
        for (name, p) in [
            ("conv_dropout", self.conv_dropout),
            ("dense_dropout", self.dense_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return invalid(format!("{} must be in [0, 1), got {}", name, p));
            }
        }
        if self.flattened_features().is_none() {
            return invalid(format!(
                "input size {} is too small for {} stages",
                self.input_size, self.num_stages
            ));
        }

        Ok(())
    }
}

/// Two 3x3 convolutions (same, then valid padding) and a 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub conv_same: Conv2d<B>,
    pub conv_valid: Conv2d<B>,
    pub pool: MaxPool2d,
    pub relu: Relu,
}

impl<B: Backend> ConvStage<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv_same = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv_valid = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv_same,
            conv_valid,
            pool,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.conv_same.forward(x));
        let x = self.relu.forward(self.conv_valid.forward(x));
        self.pool.forward(x)
    }
}

/// Plant disease classifier
#[derive(Module, Debug)]
pub struct PlantDiseaseCnn<B: Backend> {
    pub stages: Vec<ConvStage<B>>,
    pub conv_dropout: Dropout,
    pub fc1: Linear<B>,
    pub dense_dropout: Dropout,
    pub fc2: Linear<B>,
    pub relu: Relu,
    num_classes: usize,
}

impl<B: Backend> PlantDiseaseCnn<B> {
    /// Build a freshly initialised network; fails on an invalid config
    pub fn new(config: &PlantDiseaseCnnConfig, device: &B::Device) -> crate::Result<Self> {
        config.validate()?;
        let flattened = config
            .flattened_features()
            .ok_or_else(|| PlantDiseaseError::InvalidConfig("feature map vanished".into()))?;

        let mut stages = Vec::with_capacity(config.num_stages);
        let mut in_channels = config.in_channels;
        for stage in 0..config.num_stages {
            let out_channels = config.stage_filters(stage);
            stages.push(ConvStage::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        Ok(Self {
            stages,
            conv_dropout: DropoutConfig::new(config.conv_dropout).init(),
            fc1: LinearConfig::new(flattened, config.dense_units).init(device),
            dense_dropout: DropoutConfig::new(config.dense_dropout).init(),
            fc2: LinearConfig::new(config.dense_units, config.num_classes).init(device),
            relu: Relu::new(),
            num_classes: config.num_classes,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for stage in &self.stages {
            x = stage.forward(x);
        }

        let x = self.conv_dropout.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);

        let x = self.relu.forward(self.fc1.forward(x));
        let x = self.dense_dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Class probabilities, rows summing to 1
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
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

    #[test]
    fn test_default_geometry() {
        let config = PlantDiseaseCnnConfig::new(3);

        assert_eq!(config.stage_sizes(), Some(vec![63, 30, 14, 6, 2]));
        assert_eq!(config.stage_filters(4), 512);
        assert_eq!(config.flattened_features(), Some(2048));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_smallest_input_for_five_stages() {
        let config = PlantDiseaseCnnConfig::new(3).with_input_size(94);
        assert_eq!(config.stage_sizes().map(|s| s[4]), Some(1));

        let config = PlantDiseaseCnnConfig::new(3).with_input_size(93);
        assert!(config.flattened_features().is_none());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = tiny_config(7).with_conv_dropout(0.1);

        let json = serde_json::to_string(&config).unwrap();
        let restored: PlantDiseaseCnnConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cnn.json");
        config.save(&path).unwrap();
        assert_eq!(PlantDiseaseCnnConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(PlantDiseaseCnnConfig::new(0).validate().is_err());
        assert!(PlantDiseaseCnnConfig::new(3)
            .with_conv_dropout(1.0)
            .validate()
            .is_err());
        assert!(PlantDiseaseCnnConfig::new(3)
            .with_dense_dropout(-0.1)
            .validate()
            .is_err());
        assert!(PlantDiseaseCnnConfig::new(3).with_num_stages(0).validate().is_err());

        let device = Default::default();
        let result = PlantDiseaseCnn::<TestBackend>::new(&PlantDiseaseCnnConfig::new(0), &device);
        assert!(matches!(result, Err(PlantDiseaseError::InvalidConfig(_))));
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = PlantDiseaseCnn::<TestBackend>::new(&tiny_config(3), &device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 3]);
        assert_eq!(model.num_classes(), 3);
        assert_eq!(model.stages.len(), 2);
    }

    #[test]
    fn test_full_resolution_forward() {
        let device = Default::default();
        let config = PlantDiseaseCnnConfig::new(3)
            .with_base_filters(1)
            .with_dense_units(4);
        let model = PlantDiseaseCnn::<TestBackend>::new(&config, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 128, 128], &device);

        assert_eq!(model.forward(input).dims(), [1, 3]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = PlantDiseaseCnn::<TestBackend>::new(&tiny_config(4), &device).unwrap();

        let input = Tensor::<TestBackend, 4>::random(
            [3, 3, 16, 16],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let sums: Vec<f32> = model
            .forward_softmax(input)
            .sum_dim(1)
            .into_data()
            .iter::<f32>()
            .collect();

        assert_eq!(sums.len(), 3);
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }
}
