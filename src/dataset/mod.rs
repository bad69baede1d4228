//! Dataset module for leaf image folders
//!
//! - [`loader`]: indexes a `root/<class>/<image>` tree into a class
//!   vocabulary and labeled sample list
//! - [`burn_dataset`]: decodes samples into Burn items and batches them
//! - [`dataloader`]: lazy, optionally shuffled batch iteration

pub mod burn_dataset;
pub mod dataloader;
pub mod loader;

pub use burn_dataset::{LeafBatch, LeafBatcher, LeafDataset, LeafItem, PixelScaling};
pub use dataloader::{BatchIter, BatchLoader};
pub use loader::{vocabulary_diff, DatasetStats, ImageFolder, ImageSample};
