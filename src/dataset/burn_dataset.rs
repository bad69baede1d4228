//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` trait over an [`ImageFolder`] and a `Batcher`
//! that stacks decoded leaf images into NCHW tensors with one-hot labels.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::loader::{ImageFolder, ImageSample};
use crate::utils::error::{PlantDiseaseError, Result};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How decoded `[0, 1]` pixels are presented to the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelScaling {
    /// Untouched 0-255 intensities
    Raw,
    /// Intensities divided by 255
    #[default]
    Unit,
    /// Unit range, then per-channel ImageNet mean/std
    ImageNet,
}

impl fmt::Display for PixelScaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelScaling::Raw => write!(f, "raw"),
            PixelScaling::Unit => write!(f, "unit"),
            PixelScaling::ImageNet => write!(f, "imagenet"),
        }
    }
}

impl FromStr for PixelScaling {
    type Err = PlantDiseaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(PixelScaling::Raw),
            "unit" => Ok(PixelScaling::Unit),
            "imagenet" => Ok(PixelScaling::ImageNet),
            other => Err(PlantDiseaseError::InvalidConfig(format!(
                "unknown pixel scaling '{}' (expected raw, unit or imagenet)",
                other
            ))),
        }
    }
}

/// A single decoded image ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeafItem {
    /// Flattened CHW floats in `[0, 1]`, length `3 * size * size`
    pub image: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

impl LeafItem {
    /// Decode, convert to RGB and bilinearly resize an image file
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        let img = ImageReader::open(path)
            .map_err(|e| image_error(path, e))?
            .with_guessed_format()
            .map_err(|e| image_error(path, e))?
            .decode()
            .map_err(|e| image_error(path, e))?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
            .to_rgb8();

        let plane = image_size * image_size;
        let mut image = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = y as usize * image_size + x as usize;
            for channel in 0..3 {
                image[channel * plane + offset] = pixel[channel] as f32 / 255.0;
            }
        }

        Ok(Self {
            image,
            label,
            path: path.to_path_buf(),
        })
    }
}

fn image_error(path: &Path, err: impl fmt::Display) -> PlantDiseaseError {
    PlantDiseaseError::Image(path.to_path_buf(), err.to_string())
}

/// Leaf images of one directory tree, decoded lazily or cached up front
#[derive(Debug, Clone)]
pub struct LeafDataset {
    samples: Vec<ImageSample>,
    image_size: usize,
    cached_items: Option<Vec<LeafItem>>,
}

impl LeafDataset {
    /// Decode each image when it is requested
    pub fn new(folder: &ImageFolder, image_size: usize) -> Self {
        Self {
            samples: folder.samples().to_vec(),
            image_size,
            cached_items: None,
        }
    }

    /// Decode every image now, in parallel. Any unreadable image fails the
    /// whole load.
    pub fn new_cached(folder: &ImageFolder, image_size: usize) -> Result<Self> {
        let samples = folder.samples().to_vec();
        info!("Pre-loading {} images into memory", samples.len());

        let pb = ProgressBar::new(samples.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .map_err(|e| PlantDiseaseError::Dataset(e.to_string()))?
                .progress_chars("#>-"),
        );

        let cached_items = samples
            .par_iter()
            .map(|sample| {
                let item = LeafItem::from_path(&sample.path, sample.label, image_size);
                pb.inc(1);
                item
            })
            .collect::<Result<Vec<_>>>();

        pb.finish_and_clear();
        let cached_items = cached_items?;
        info!("Cached {} images", cached_items.len());

        Ok(Self {
            samples,
            image_size,
            cached_items: Some(cached_items),
        })
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn is_cached(&self) -> bool {
        self.cached_items.is_some()
    }

    /// Fetch one item, reporting decode failures instead of hiding them
    pub fn try_get(&self, index: usize) -> Result<LeafItem> {
        if let Some(cached) = &self.cached_items {
            if let Some(item) = cached.get(index) {
                return Ok(item.clone());
            }
        }

        let sample = self.samples.get(index).ok_or_else(|| {
            PlantDiseaseError::Dataset(format!(
                "index {} out of range for {} samples",
                index,
                self.samples.len()
            ))
        })?;

        LeafItem::from_path(&sample.path, sample.label, self.image_size)
    }
}

/// Burn's `Dataset` view. `get` cannot carry an error, so an image that
/// fails to decode is logged and reported as `None`; use
/// [`LeafDataset::try_get`] (as [`BatchLoader`](super::BatchLoader) does)
/// wherever a broken file must fail the run.
impl Dataset<LeafItem> for LeafDataset {
    fn get(&self, index: usize) -> Option<LeafItem> {
        if index >= self.samples.len() {
            return None;
        }

        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of leaf images
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// One-hot `[batch, num_classes]`
    pub labels: Tensor<B, 2>,
    /// Class indices `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`LeafItem`]s into a [`LeafBatch`]
#[derive(Clone, Debug)]
pub struct LeafBatcher {
    num_classes: usize,
    image_size: usize,
    scaling: PixelScaling,
}

impl LeafBatcher {
    pub fn new(num_classes: usize, image_size: usize, scaling: PixelScaling) -> Self {
        Self {
            num_classes,
            image_size,
            scaling,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn scale<B: Backend>(&self, images: Tensor<B, 4>, device: &B::Device) -> Tensor<B, 4> {
        match self.scaling {
            PixelScaling::Raw => images.mul_scalar(255.0),
            PixelScaling::Unit => images,
            PixelScaling::ImageNet => {
                let mean = Tensor::<B, 4>::from_floats(
                    TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
                    device,
                );
                let std = Tensor::<B, 4>::from_floats(
                    TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
                    device,
                );
                (images - mean) / std
            }
        }
    }
}

impl<B: Backend> Batcher<B, LeafItem, LeafBatch<B>> for LeafBatcher {
    fn batch(&self, items: Vec<LeafItem>, device: &B::Device) -> LeafBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let images = self.scale(images, device);

        let mut one_hot = vec![0.0f32; batch_size * self.num_classes];
        for (row, item) in items.iter().enumerate() {
            debug_assert!(
                item.label < self.num_classes,
                "label {} outside {} classes",
                item.label,
                self.num_classes
            );
            if item.label < self.num_classes {
                one_hot[row * self.num_classes + item.label] = 1.0;
            }
        }
        let labels = Tensor::<B, 2>::from_floats(
            TensorData::new(one_hot, [batch_size, self.num_classes]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LeafBatch {
            images,
            labels,
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::{write_image, write_tree};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn item(label: usize, value: f32, size: usize) -> LeafItem {
        LeafItem {
            image: vec![value; 3 * size * size],
            label,
            path: PathBuf::from(format!("leaf_{}.png", label)),
        }
    }

    #[test]
    fn test_item_is_resized_chw_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        write_image(&path, 20, [255, 0, 0]);

        let item = LeafItem::from_path(&path, 2, 8).unwrap();

        assert_eq!(item.image.len(), 3 * 8 * 8);
        assert_eq!(item.label, 2);
        assert!(item.image[..64].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(item.image[64..].iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_undecodable_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = LeafItem::from_path(&path, 0, 8).unwrap_err();
        assert!(matches!(err, PlantDiseaseError::Image(ref p, _) if p == &path));
    }

    #[test]
    fn test_lazy_and_cached_agree() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &["a", "b"], 2, 12);
        let folder = ImageFolder::new(dir.path()).unwrap();

        let lazy = LeafDataset::new(&folder, 8);
        let cached = LeafDataset::new_cached(&folder, 8).unwrap();

        assert_eq!(lazy.len(), 4);
        assert!(cached.is_cached());
        for i in 0..lazy.len() {
            let (l, c) = (lazy.get(i).unwrap(), cached.get(i).unwrap());
            assert_eq!(l.label, c.label);
            assert_eq!(l.image, c.image);
        }
        assert!(lazy.get(4).is_none());
    }

    #[test]
    fn test_get_hides_decode_errors_that_try_get_reports() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &["a", "b"], 1, 8);
        let broken = dir.path().join("b").join("leaf_0.png");
        std::fs::write(&broken, b"corrupt").unwrap();
        let dataset = LeafDataset::new(&ImageFolder::new(dir.path()).unwrap(), 4);

        assert!(dataset.get(0).is_some());
        assert!(dataset.get(1).is_none());
        assert!(matches!(dataset.try_get(1), Err(PlantDiseaseError::Image(ref p, _)) if p == &broken));
        assert!(matches!(dataset.try_get(2), Err(PlantDiseaseError::Dataset(_))));
    }

    #[test]
    fn test_cache_fails_on_broken_image() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &["a"], 1, 8);
        std::fs::write(dir.path().join("a").join("zz_broken.png"), b"nope").unwrap();
        let folder = ImageFolder::new(dir.path()).unwrap();

        assert!(matches!(
            LeafDataset::new_cached(&folder, 8),
            Err(PlantDiseaseError::Image(..))
        ));
    }

    #[test]
    fn test_batch_shapes_and_one_hot() {
        let device = <TestBackend as Backend>::Device::default();
        let batcher = LeafBatcher::new(3, 4, PixelScaling::Unit);
        let items = vec![item(0, 0.5, 4), item(2, 0.5, 4)];

        let batch: LeafBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.labels.dims(), [2, 3]);
        assert_eq!(batch.targets.dims(), [2]);

        let row_sums: Vec<f32> = batch.labels.clone().sum_dim(1).into_data().iter::<f32>().collect();
        assert_eq!(row_sums, vec![1.0, 1.0]);

        let labels: Vec<f32> = batch.labels.into_data().iter::<f32>().collect();
        assert_eq!(labels, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);

        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![0, 2]);
    }

    #[test]
    fn test_pixel_scaling() {
        let device = <TestBackend as Backend>::Device::default();
        let mean_of = |scaling: PixelScaling| -> f32 {
            let batch: LeafBatch<TestBackend> =
                LeafBatcher::new(1, 2, scaling).batch(vec![item(0, 0.5, 2)], &device);
            batch.images.mean().into_scalar()
        };

        assert!((mean_of(PixelScaling::Unit) - 0.5).abs() < 1e-5);
        assert!((mean_of(PixelScaling::Raw) - 127.5).abs() < 1e-3);

        let expected: f32 = (0..3)
            .map(|c| (0.5 - IMAGENET_MEAN[c]) / IMAGENET_STD[c])
            .sum::<f32>()
            / 3.0;
        assert!((mean_of(PixelScaling::ImageNet) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_pixel_scaling_parse() {
        assert_eq!("ImageNet".parse::<PixelScaling>().unwrap(), PixelScaling::ImageNet);
        assert_eq!(PixelScaling::Raw.to_string(), "raw");
        assert!("zscore".parse::<PixelScaling>().is_err());
    }
}
