//! Rank-3 packing of sequence datasets
//!
//! A [`PackedTensor`] lays out `N` sequences of `L` timesteps with `F` features each as a
//! flat buffer in sequence-major, timestep-minor order. Every dataset the pipeline packs has
//! `F = 1`.

use std::collections::BTreeSet;

use thiserror::Error;

/// An ordered list of numeric samples
pub type Sequence = Vec<f32>;

/// Errors for malformed datasets and tensors
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("Dataset contains no values")]
    EmptyDataset,
    #[error("All sequences must have the same length. Received different lengths: {lengths:?}")]
    RaggedSequences { lengths: BTreeSet<usize> },
    #[error("Dataset contains a non-finite value at sequence {sequence}, timestep {timestep}")]
    NonFinite { sequence: usize, timestep: usize },
    #[error("Buffer of {len} values does not fit shape {shape:?}")]
    ShapeMismatch { shape: (usize, usize, usize), len: usize },
}

/// Dense `(sequences, timesteps, features)` array
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTensor {
    shape: (usize, usize, usize),
    data: Vec<f32>,
}

impl PackedTensor {
    /// Packs equal-length sequences into shape `(N, L, 1)`.
    ///
    /// Ragged input is rejected rather than truncated or padded.
    pub fn pack(sequences: &[Sequence]) -> Result<Self, DataError> {
        let lengths = sequences.iter().map(|s| s.len()).collect::<BTreeSet<_>>();
        if lengths.len() > 1 {
            return Err(DataError::RaggedSequences { lengths });
        }
        let timesteps = match lengths.first() {
            Some(&len) if len > 0 => len,
            _ => return Err(DataError::EmptyDataset),
        };
        let data = sequences.iter().flatten().copied().collect();
        Ok(Self {
            shape: (sequences.len(), timesteps, 1),
            data,
        })
    }

    /// Wraps a flat buffer, which must hold exactly `N * L * F` values. Every dimension must
    /// be non-zero.
    pub fn from_flat(data: Vec<f32>, shape: (usize, usize, usize)) -> Result<Self, DataError> {
        let (n, l, f) = shape;
        if n == 0 || l == 0 || f == 0 {
            return Err(DataError::EmptyDataset);
        }
        let expected = n.checked_mul(l).and_then(|x| x.checked_mul(f));
        if expected != Some(data.len()) {
            return Err(DataError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn n_sequences(&self) -> usize {
        self.shape.0
    }

    pub fn timesteps(&self) -> usize {
        self.shape.1
    }

    pub fn features(&self) -> usize {
        self.shape.2
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// All timesteps of one sequence, `L * F` values
    pub fn sample(&self, index: usize) -> &[f32] {
        let stride = self.shape.1 * self.shape.2;
        &self.data[index * stride..(index + 1) * stride]
    }

    pub fn get(&self, sequence: usize, timestep: usize, feature: usize) -> f32 {
        let (_, l, f) = self.shape;
        self.data[(sequence * l + timestep) * f + feature]
    }

    /// Nested `[N][L][F]` view of the buffer
    pub fn to_nested(&self) -> Vec<Vec<Vec<f32>>> {
        let (_, l, f) = self.shape;
        (0..self.n_sequences())
            .map(|n| {
                self.sample(n)
                    .chunks(f.max(1))
                    .take(l)
                    .map(|step| step.to_vec())
                    .collect()
            })
            .collect()
    }

    /// Inverse of [`PackedTensor::pack`]; only defined for single-feature tensors
    pub fn unpack(&self) -> Result<Vec<Sequence>, DataError> {
        if self.features() != 1 {
            return Err(DataError::ShapeMismatch {
                shape: self.shape,
                len: self.data.len(),
            });
        }
        Ok((0..self.n_sequences())
            .map(|n| self.sample(n).to_vec())
            .collect())
    }

    /// Feature 0 of the final timestep of every sequence
    pub fn last_timestep(&self) -> Vec<f32> {
        let last = self.timesteps().saturating_sub(1);
        (0..self.n_sequences())
            .map(|n| self.get(n, last, 0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramps(count: usize, len: usize) -> Vec<Sequence> {
        (0..count)
            .map(|i| (0..len).map(|t| (i + t) as f32 / 10.0).collect())
            .collect()
    }

    #[test]
    fn test_pack_shape() {
        let tensor = PackedTensor::pack(&ramps(7, 7)).unwrap();
        assert_eq!(tensor.shape(), (7, 7, 1));
        assert_eq!(tensor.as_slice().len(), 49);

        let tensor = PackedTensor::pack(&ramps(3, 5)).unwrap();
        assert_eq!(tensor.shape(), (3, 5, 1));
    }

    #[test]
    fn test_pack_order_is_sequence_major() {
        let tensor = PackedTensor::pack(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(tensor.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(tensor.get(1, 0, 0), 4.0);
        assert_eq!(tensor.sample(0), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_pack_rejects_ragged() {
        let err = PackedTensor::pack(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0]]).unwrap_err();
        assert_eq!(
            err,
            DataError::RaggedSequences {
                lengths: BTreeSet::from([2, 3])
            }
        );
    }

    #[test]
    fn test_pack_rejects_empty() {
        assert_eq!(PackedTensor::pack(&[]), Err(DataError::EmptyDataset));
        assert_eq!(
            PackedTensor::pack(&[vec![], vec![]]),
            Err(DataError::EmptyDataset)
        );
    }

    #[test]
    fn test_unpack_round_trip() {
        for (count, len) in [(1, 1), (7, 7), (3, 12)] {
            let sequences = ramps(count, len);
            let tensor = PackedTensor::pack(&sequences).unwrap();
            assert_eq!(tensor.unpack().unwrap(), sequences);
        }
    }

    #[test]
    fn test_to_nested() {
        let tensor = PackedTensor::pack(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(
            tensor.to_nested(),
            vec![vec![vec![1.0], vec![2.0]], vec![vec![3.0], vec![4.0]]]
        );
    }

    #[test]
    fn test_from_flat() {
        let tensor = PackedTensor::from_flat(vec![0.0; 6], (2, 3, 1)).unwrap();
        assert_eq!(tensor.shape(), (2, 3, 1));

        let err = PackedTensor::from_flat(vec![0.0; 5], (2, 3, 1)).unwrap_err();
        assert_eq!(
            err,
            DataError::ShapeMismatch {
                shape: (2, 3, 1),
                len: 5
            }
        );
    }

    #[test]
    fn test_from_flat_rejects_zero_sized_shapes() {
        for shape in [(0, 3, 1), (2, 0, 1), (2, 3, 0)] {
            assert_eq!(
                PackedTensor::from_flat(vec![], shape).unwrap_err(),
                DataError::EmptyDataset
            );
        }
    }

    #[test]
    fn test_from_flat_rejects_overflowing_shapes() {
        let shape = (usize::MAX, 2, 1);
        assert_eq!(
            PackedTensor::from_flat(vec![0.0; 4], shape).unwrap_err(),
            DataError::ShapeMismatch { shape, len: 4 }
        );
    }

    #[test]
    fn test_unpack_requires_single_feature() {
        let tensor = PackedTensor::from_flat(vec![0.0; 8], (2, 2, 2)).unwrap();
        assert!(tensor.unpack().is_err());
    }

    #[test]
    fn test_last_timestep() {
        let tensor = PackedTensor::pack(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(tensor.last_timestep(), vec![3.0, 6.0]);
    }
}
