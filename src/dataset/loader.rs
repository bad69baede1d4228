//! Image folder indexing
//!
//! Walks a `root/<class>/<images>` tree and records every image path with
//! the index of its class. Pixels are not touched here; decoding happens
//! in [`super::burn_dataset`].

use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{PlantDiseaseError, Result, ResultExt};
use crate::utils::format_number;

/// File extensions treated as images (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["bmp", "gif", "jpeg", "jpg", "png"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    /// Index into the folder's class vocabulary
    pub label: usize,
}

/// An indexed directory tree of labeled images
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root_dir: PathBuf,
    class_names: Vec<String>,
    samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Index an image folder.
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── Healthy/
    /// │   ├── image1.jpg
    /// │   └── image2.jpg
    /// ├── Powdery/
    /// │   └── ...
    /// └── Rust/
    ///     └── ...
    /// ```
    /// Class names are the sorted subdirectory names. Images are collected
    /// recursively per class, in path order.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Indexing image folder: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(PlantDiseaseError::Dataset(format!(
                "Dataset directory does not exist: {}",
                root_dir.display()
            )));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                class_names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(PlantDiseaseError::Dataset(format!(
                "No class directories under {}",
                root_dir.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            let before = samples.len();

            for entry in WalkDir::new(&class_dir)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry.with_context(|| format!("Failed to walk {}", class_dir.display()))?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    samples.push(ImageSample {
                        path: entry.into_path(),
                        label,
                    });
                }
            }

            debug!(
                "Class '{}' (label {}): {} images",
                class_name,
                label,
                samples.len() - before
            );
        }

        if samples.is_empty() {
            return Err(PlantDiseaseError::EmptyDataset(root_dir));
        }

        info!(
            "Found {} images in {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            class_names,
            samples,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Sorted class vocabulary; position is the class index
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fail unless `other` has exactly the same class vocabulary
    pub fn check_vocabulary(&self, other: &ImageFolder) -> Result<()> {
        match vocabulary_diff(&self.class_names, &other.class_names) {
            None => Ok(()),
            Some(detail) => Err(PlantDiseaseError::VocabularyMismatch {
                reference: self.root_dir.clone(),
                other: other.root_dir.clone(),
                detail,
            }),
        }
    }

    /// Per-class image counts
    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            root_dir: self.root_dir.clone(),
            total_samples: self.samples.len(),
            class_names: self.class_names.clone(),
            class_counts,
        }
    }
}

/// Describe how `other` differs from `reference`, or `None` if identical
pub fn vocabulary_diff(reference: &[String], other: &[String]) -> Option<String> {
    if reference == other {
        return None;
    }

    let missing: Vec<&str> = reference
        .iter()
        .filter(|name| !other.contains(name))
        .map(String::as_str)
        .collect();
    let extra: Vec<&str> = other
        .iter()
        .filter(|name| !reference.contains(name))
        .map(String::as_str)
        .collect();

    if missing.is_empty() && extra.is_empty() {
        Some("same names in a different order".to_string())
    } else {
        Some(format!("missing {:?}, unexpected {:?}", missing, extra))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Statistics about an image folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub root_dir: PathBuf,
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n{} {}", "Dataset:".cyan().bold(), self.root_dir.display());
        println!("  Total images:      {}", format_number(self.total_samples));
        println!("  Number of classes: {}", self.class_names.len());
        println!("\n  Images per class:");

        let max = self.class_counts.iter().copied().max().unwrap_or(0).max(1);
        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let bar = "█".repeat(count * 40 / max);
            println!("    {:3}. {:40} {:>7} {}", idx, name, format_number(*count), bar.green());
        }
    }
}
