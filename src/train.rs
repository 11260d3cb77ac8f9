//! Fitting, evaluation and prediction for sequence models

use std::fmt::{self, Display};

use rand::Rng;
use thiserror::Error;

use crate::{
    dataloader::{DataLoader, DataLoaderError},
    loss::MSELoss,
    nn::{Module, NNError, to_values},
    optim::Optim,
    tensor::{DataError, PackedTensor},
    values::Value,
};

/// Errors raised while training a model
#[derive(Debug, Error, PartialEq)]
pub enum TrainError {
    #[error("{what} shape {got:?} does not match {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    #[error("Training diverged at epoch {epoch}: loss is {loss}")]
    Diverged { epoch: usize, loss: f32 },
    #[error(transparent)]
    Model(#[from] NNError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    DataLoader(#[from] DataLoaderError),
    #[error("Training thread panicked: {0}")]
    Panicked(String),
    #[error("Failed to start training thread: {0}")]
    Spawn(String),
}

/// Stops training once the monitored validation loss has not improved by more than
/// `min_delta` for `patience` consecutive epochs
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best: Option<f32>,
    best_epoch: usize,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta: min_delta.abs(),
            best: None,
            best_epoch: 0,
            wait: 0,
        }
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// Records the loss of `epoch`, returns `true` when training should stop
    pub fn update(&mut self, epoch: usize, val_loss: f32) -> bool {
        let improved = match self.best {
            None => true,
            Some(best) => val_loss < best - self.min_delta,
        };
        if improved {
            log::debug!(
                "early stopping: val_loss improved from {:?} to {} at epoch {}",
                self.best,
                val_loss,
                epoch
            );
            self.best = Some(val_loss);
            self.best_epoch = epoch;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        log::debug!(
            "early stopping: no improvement for {} epochs (patience: {})",
            self.wait,
            self.patience
        );
        self.wait >= self.patience
    }
}

/// Options for [`fit`]
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Template for the early stopping state; every call to [`fit`] starts from a fresh copy
    pub early_stopping: Option<EarlyStopping>,
    /// Log an info line every `log_every` epochs
    pub log_every: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 150,
            batch_size: 32,
            shuffle: true,
            early_stopping: Some(EarlyStopping::new(10, 0.0)),
            log_every: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub loss: f32,
    pub val_loss: Option<f32>,
}

/// Per-epoch record of a training run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
    /// Epoch at which early stopping fired, if it did
    pub stopped_epoch: Option<usize>,
}

impl History {
    pub fn losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn val_losses(&self) -> Vec<f32> {
        self.epochs.iter().filter_map(|e| e.val_loss).collect()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

impl Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} epochs", self.epochs.len())?;
        if let Some(epoch) = self.stopped_epoch {
            write!(f, " (stopped early at epoch {})", epoch)?;
        }
        if let Some(last) = self.last() {
            write!(f, ", final loss {:.6}", last.loss)?;
            if let Some(val_loss) = last.val_loss {
                write!(f, ", final val_loss {:.6}", val_loss)?;
            }
        }
        Ok(())
    }
}

fn check_features<M: Module>(model: &M, x: &PackedTensor) -> Result<(), TrainError> {
    // the first LSTM validates the feature count, probe it with a single timestep
    let probe = to_values(&vec![0.0; x.features()], x.features());
    if probe.is_empty() {
        return Err(DataError::EmptyDataset.into());
    }
    model.forward(&probe)?;
    Ok(())
}

fn forward_sample<M: Module>(
    model: &M,
    sample: &[f32],
    features: usize,
) -> Result<Vec<Value>, TrainError> {
    let outputs = model.forward(&to_values(sample, features))?;
    Ok(outputs.into_iter().flatten().collect())
}

/// One pass over `loader`, returning the sum of batch losses weighted by batch size
fn train_epoch<M: Module, R: Rng + ?Sized>(
    model: &M,
    optim: &mut dyn Optim,
    loader: &DataLoader<'_>,
    features: usize,
    epoch: usize,
    rng: &mut R,
) -> Result<f32, TrainError> {
    let mut weighted_loss = 0.0;
    for (batch_inputs, batch_targets) in loader.iter(rng) {
        let mut predictions = Vec::new();
        let mut targets = Vec::new();
        for (input, target) in batch_inputs.iter().zip(batch_targets.iter()) {
            predictions.extend(forward_sample(model, input, features)?);
            targets.extend(target.iter().copied().map(Value::new));
        }
        let loss = MSELoss::call(&predictions, &targets);
        if !loss.data().is_finite() {
            return Err(TrainError::Diverged {
                epoch,
                loss: loss.data(),
            });
        }
        loss.backward();
        optim.step();
        optim.zero_grad();
        weighted_loss += loss.data() * batch_inputs.len() as f32;
    }
    Ok(weighted_loss)
}

/// Trains `model` on `x -> y`, evaluating on `validation` after every epoch.
///
/// The loss of an epoch is the sample-weighted mean of its batch losses, where the loss of
/// a batch is the mean squared error over every element of the batch.
pub fn fit<M: Module, R: Rng + ?Sized>(
    model: &M,
    optim: &mut dyn Optim,
    x: &PackedTensor,
    y: &PackedTensor,
    validation: Option<(&PackedTensor, &PackedTensor)>,
    options: &FitOptions,
    rng: &mut R,
) -> Result<History, TrainError> {
    if x.as_slice().is_empty() {
        return Err(DataError::EmptyDataset.into());
    }
    if x.shape() != y.shape() {
        return Err(TrainError::ShapeMismatch {
            what: "targets",
            expected: x.shape(),
            got: y.shape(),
        });
    }
    if let Some((x_val, y_val)) = validation {
        if x_val.as_slice().is_empty() {
            return Err(DataError::EmptyDataset.into());
        }
        let expected = (x_val.n_sequences(), x.timesteps(), x.features());
        for (what, tensor) in [("validation inputs", x_val), ("validation targets", y_val)] {
            if tensor.shape() != expected {
                return Err(TrainError::ShapeMismatch {
                    what,
                    expected,
                    got: tensor.shape(),
                });
            }
        }
    }
    check_features(model, x)?;

    let features = x.features();
    let loader = DataLoader::new(x, y, options.batch_size, options.shuffle)?;
    let mut early_stopping = options.early_stopping.clone();
    let mut history = History::default();

    for epoch in 1..=options.epochs {
        model.set_training(true);
        let weighted_loss = train_epoch(model, optim, &loader, features, epoch, rng);
        // leave inference mode on however the epoch ended
        model.set_training(false);
        let epoch_loss = weighted_loss? / x.n_sequences() as f32;

        let val_loss = match validation {
            Some((x_val, y_val)) => Some(evaluate(model, x_val, y_val)?),
            None => None,
        };
        if let Some(val_loss) = val_loss.filter(|l| !l.is_finite()) {
            return Err(TrainError::Diverged {
                epoch,
                loss: val_loss,
            });
        }
        history.epochs.push(EpochMetrics {
            epoch,
            loss: epoch_loss,
            val_loss,
        });
        log::debug!("epoch: {}, loss: {}, val_loss: {:?}", epoch, epoch_loss, val_loss);
        if options.log_every > 0 && (epoch % options.log_every == 0 || epoch == options.epochs) {
            log::info!("epoch: {}, loss: {:.6}, val_loss: {:?}", epoch, epoch_loss, val_loss);
        }

        let should_stop = match (early_stopping.as_mut(), val_loss) {
            (Some(stopper), Some(val_loss)) => stopper.update(epoch, val_loss),
            _ => false,
        };
        if should_stop {
            if let Some(stopper) = &early_stopping {
                log::info!(
                    "stopping early at epoch {} (no improvement since epoch {})",
                    epoch,
                    stopper.best_epoch()
                );
            }
            history.stopped_epoch = Some(epoch);
            break;
        }
    }
    Ok(history)
}

/// Mean squared error of the model's predictions for `x` against `y`, in inference mode
pub fn evaluate<M: Module>(model: &M, x: &PackedTensor, y: &PackedTensor) -> Result<f32, TrainError> {
    if x.shape() != y.shape() {
        return Err(TrainError::ShapeMismatch {
            what: "targets",
            expected: x.shape(),
            got: y.shape(),
        });
    }
    let predictions = predict(model, x)?;
    Ok(MSELoss::eval(predictions.as_slice(), y.as_slice()))
}

/// Runs the model over every sequence of `x` in inference mode, returning a tensor of
/// shape `(N, L, 1)`
pub fn predict<M: Module>(model: &M, x: &PackedTensor) -> Result<PackedTensor, TrainError> {
    model.set_training(false);
    let mut data = Vec::with_capacity(x.n_sequences() * x.timesteps());
    for n in 0..x.n_sequences() {
        let outputs = forward_sample(model, x.sample(n), x.features())?;
        data.extend(outputs.iter().map(|v| v.data()));
    }
    Ok(PackedTensor::from_flat(
        data,
        (x.n_sequences(), x.timesteps(), 1),
    )?)
}
