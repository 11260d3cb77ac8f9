//! Concurrent training of several model variants
//!
//! Each variant gets its own scoped thread. The model graph is `Rc`-based, so a model is
//! built, trained and queried entirely on its thread; only plain tensors and histories cross
//! thread boundaries.

use std::{any::Any, thread};

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use crate::{
    model::{ModelConfig, build_model},
    nn::Module,
    tensor::PackedTensor,
    train::{FitOptions, History, TrainError, fit, predict},
};

// deep recurrent graphs are dropped recursively
const TRAINING_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Packed training and validation inputs; models are trained to reproduce their input
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData {
    pub train: PackedTensor,
    pub validation: PackedTensor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedVariant {
    pub history: History,
    /// Predictions for the validation inputs
    pub predictions: PackedTensor,
}

/// Result of training one variant, kept apart from every other variant's result
#[derive(Debug)]
pub struct VariantOutcome {
    pub name: String,
    pub result: Result<TrainedVariant, TrainError>,
}

/// Builds, fits and queries a single variant on the current thread
pub fn train_variant(
    config: &ModelConfig,
    data: TrainingData,
    options: &FitOptions,
) -> Result<TrainedVariant, TrainError> {
    let model = build_model(config, data.train.features())?;
    let mut optim = config.optimizer(model.parameters());
    let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
    log::info!(
        "training {} ({} optimizer, lr {})",
        config.name,
        config.optimizer,
        config.learning_rate
    );
    let history = fit(
        &model,
        optim.as_mut(),
        &data.train,
        &data.train,
        Some((&data.validation, &data.validation)),
        options,
        &mut rng,
    )?;
    let predictions = predict(&model, &data.validation)?;
    Ok(TrainedVariant {
        history,
        predictions,
    })
}

/// Trains every variant concurrently and waits for all of them.
///
/// Outcomes are returned in the order of `variants`. A failing or panicking variant only
/// affects its own outcome.
pub fn train_variants(
    variants: &[ModelConfig],
    data: &TrainingData,
    options: &FitOptions,
) -> Vec<VariantOutcome> {
    train_concurrently(variants, data, options, train_variant)
}

fn train_concurrently<F>(
    variants: &[ModelConfig],
    data: &TrainingData,
    options: &FitOptions,
    train: F,
) -> Vec<VariantOutcome>
where
    F: Fn(&ModelConfig, TrainingData, &FitOptions) -> Result<TrainedVariant, TrainError> + Sync,
{
    let train = &train;
    thread::scope(|scope| {
        let handles = variants
            .iter()
            .map(|config| {
                let data = data.clone();
                let spawned = thread::Builder::new()
                    .name(format!("train-{}", config.name))
                    .stack_size(TRAINING_STACK_SIZE)
                    .spawn_scoped(scope, move || train(config, data, options));
                (config, spawned)
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|(config, spawned)| {
                let result = match spawned {
                    Ok(handle) => handle.join().unwrap_or_else(|payload| {
                        Err(TrainError::Panicked(panic_message(payload.as_ref())))
                    }),
                    Err(e) => Err(TrainError::Spawn(e.to_string())),
                };
                match &result {
                    Ok(trained) => log::info!("{} finished: {}", config.name, trained.history),
                    Err(e) => log::error!("training {} failed: {}", config.name, e),
                }
                VariantOutcome {
                    name: config.name.clone(),
                    result,
                }
            })
            .collect()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
