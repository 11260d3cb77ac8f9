//! Min-max scaling of sequence datasets into `[0, 1]`

use std::fmt::{self, Display};

use clap::ValueEnum;

use crate::tensor::{DataError, PackedTensor, Sequence};

/// Global min/max over every value of a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxScaler {
    min: f32,
    max: f32,
}

impl MinMaxScaler {
    /// Computes min and max across all values in all sequences
    pub fn fit(data: &[Sequence]) -> Result<Self, DataError> {
        let mut bounds: Option<(f32, f32)> = None;
        for (sequence, values) in data.iter().enumerate() {
            for (timestep, &v) in values.iter().enumerate() {
                if !v.is_finite() {
                    return Err(DataError::NonFinite { sequence, timestep });
                }
                bounds = Some(match bounds {
                    None => (v, v),
                    Some((min, max)) => (min.min(v), max.max(v)),
                });
            }
        }
        let (min, max) = bounds.ok_or(DataError::EmptyDataset)?;
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// `true` when every fitted value was identical
    pub fn is_degenerate(&self) -> bool {
        self.max == self.min
    }

    /// Maps `v` to `(v - min) / (max - min)`, or to `0.0` for a degenerate scaler
    pub fn scale(&self, v: f32) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        (v - self.min) / (self.max - self.min)
    }

    /// Maps a scaled value back into the fitted range
    pub fn inverse(&self, scaled: f32) -> f32 {
        self.min + scaled * (self.max - self.min)
    }

    pub fn transform(&self, data: &[Sequence]) -> NormalizedDataset {
        let sequences = data
            .iter()
            .map(|s| s.iter().map(|&v| self.scale(v)).collect())
            .collect();
        NormalizedDataset {
            sequences,
            scaler: *self,
        }
    }
}

/// Sequences rescaled by a [`MinMaxScaler`], together with that scaler
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDataset {
    sequences: Vec<Sequence>,
    scaler: MinMaxScaler,
}

impl NormalizedDataset {
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    pub fn pack(&self) -> Result<PackedTensor, DataError> {
        PackedTensor::pack(&self.sequences)
    }
}

/// Rescales a dataset with its own global min and max
pub fn normalize(data: &[Sequence]) -> Result<NormalizedDataset, DataError> {
    Ok(MinMaxScaler::fit(data)?.transform(data))
}

/// How the validation set is scaled relative to the training set
#[derive(Debug, ValueEnum, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScalingMode {
    /// Each dataset uses its own min and max
    #[default]
    Independent,
    /// The validation set reuses the scaler fitted on the training set
    Training,
}

impl Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingMode::Independent => write!(f, "independent"),
            ScalingMode::Training => write!(f, "training"),
        }
    }
}

impl ScalingMode {
    /// Normalizes a training and a validation set according to the mode
    pub fn normalize_pair(
        &self,
        training: &[Sequence],
        validation: &[Sequence],
    ) -> Result<(NormalizedDataset, NormalizedDataset), DataError> {
        let training_scaler = MinMaxScaler::fit(training)?;
        let validation_scaler = match self {
            ScalingMode::Independent => MinMaxScaler::fit(validation)?,
            ScalingMode::Training => {
                // still validates the validation set
                MinMaxScaler::fit(validation)?;
                training_scaler
            }
        };
        Ok((
            training_scaler.transform(training),
            validation_scaler.transform(validation),
        ))
    }
}
