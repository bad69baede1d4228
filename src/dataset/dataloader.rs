//! Lazy, restartable batch iteration.
//!
//! Every call to [`BatchLoader::iter_epoch`] walks the dataset once,
//! decoding only the items of the batch being built. Shuffled loaders draw
//! a fresh permutation per epoch from `seed + epoch`.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::burn_dataset::{LeafBatch, LeafBatcher, LeafDataset, LeafItem};
use crate::utils::error::{PlantDiseaseError, Result};

/// Batches of a [`LeafDataset`] on one device
#[derive(Debug, Clone)]
pub struct BatchLoader<B: Backend> {
    dataset: Arc<LeafDataset>,
    batcher: LeafBatcher,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    device: B::Device,
}

impl<B: Backend> BatchLoader<B> {
    /// Unshuffled loader; call [`BatchLoader::shuffle`] to randomise order
    pub fn new(
        dataset: Arc<LeafDataset>,
        batcher: LeafBatcher,
        batch_size: usize,
        device: B::Device,
    ) -> Self {
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            shuffle_seed: None,
            device,
        }
    }

    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle_seed.is_some()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_items(&self) -> usize {
        self.dataset.len()
    }

    pub fn num_batches(&self) -> usize {
        self.num_items().div_ceil(self.batch_size)
    }

    pub fn num_classes(&self) -> usize {
        self.batcher.num_classes()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Iterate the first epoch's order
    pub fn iter(&self) -> BatchIter<'_, B> {
        self.iter_epoch(0)
    }

    /// Iterate the order of a given epoch
    pub fn iter_epoch(&self, epoch: usize) -> BatchIter<'_, B> {
        let mut order: Vec<usize> = (0..self.num_items()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }

        BatchIter {
            loader: self,
            order,
            position: 0,
        }
    }
}

/// One pass over a [`BatchLoader`]. Yields an error, then stops, if an image
/// in the next batch cannot be decoded or carries a label the batcher has no
/// class for.
pub struct BatchIter<'a, B: Backend> {
    loader: &'a BatchLoader<B>,
    order: Vec<usize>,
    position: usize,
}

impl<B: Backend> Iterator for BatchIter<'_, B> {
    type Item = Result<LeafBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }

        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let num_classes = self.loader.num_classes();
        let items: Result<Vec<LeafItem>> = self.order[self.position..end]
            .iter()
            .map(|&index| {
                let item = self.loader.dataset.try_get(index)?;
                if item.label >= num_classes {
                    return Err(PlantDiseaseError::Dataset(format!(
                        "label {} of item {} is outside the {} batcher classes",
                        item.label, index, num_classes
                    )));
                }
                Ok(item)
            })
            .collect();

        match items {
            Ok(items) => {
                self.position = end;
                Some(Ok(<LeafBatcher as Batcher<B, LeafItem, LeafBatch<B>>>::batch(
                    &self.loader.batcher,
                    items,
                    &self.loader.device,
                )))
            }
            Err(e) => {
                self.position = self.order.len();
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .order
            .len()
            .saturating_sub(self.position)
            .div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}
