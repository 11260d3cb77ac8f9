//! Data loader

use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

use crate::tensor::PackedTensor;

/// Errors for the dataloader
#[derive(Debug, Error, PartialEq)]
pub enum DataLoaderError {
    #[error("Targets must have the same shape as the inputs: {inputs:?} vs {targets:?}")]
    TargetShapeMismatch {
        inputs: (usize, usize, usize),
        targets: (usize, usize, usize),
    },
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,
}

/// Data loader over packed sequences, returns batches of inputs and targets optionally
/// shuffled. The final batch holds whatever samples remain.
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
pub struct DataLoader<'a> {
    inputs: &'a PackedTensor,
    targets: &'a PackedTensor,
    batch_size: usize,
    shuffle: bool,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        inputs: &'a PackedTensor,
        targets: &'a PackedTensor,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self, DataLoaderError> {
        if inputs.shape() != targets.shape() {
            return Err(DataLoaderError::TargetShapeMismatch {
                inputs: inputs.shape(),
                targets: targets.shape(),
            });
        }
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        Ok(Self {
            inputs,
            targets,
            batch_size,
            shuffle,
        })
    }

    pub fn iter<R: Rng + ?Sized>(&self, rng: &mut R) -> DataLoaderIterator<'a> {
        let mut indices = (0..self.inputs.n_sequences()).collect::<Vec<_>>();
        if self.shuffle {
            indices.shuffle(rng);
        }
        DataLoaderIterator {
            inputs: self.inputs,
            targets: self.targets,
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of inputs and targets until the end of the dataset
pub struct DataLoaderIterator<'a> {
    inputs: &'a PackedTensor,
    targets: &'a PackedTensor,
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl<'a> Iterator for DataLoaderIterator<'a> {
    type Item = (Vec<&'a [f32]>, Vec<&'a [f32]>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_iter >= self.indices.len() {
            return None;
        }
        let end = (self.curr_iter + self.batch_size).min(self.indices.len());
        let batch = &self.indices[self.curr_iter..end];
        let batch_inputs = batch.iter().map(|&i| self.inputs.sample(i)).collect();
        let batch_targets = batch.iter().map(|&i| self.targets.sample(i)).collect();
        self.curr_iter = end;
        Some((batch_inputs, batch_targets))
    }
}
