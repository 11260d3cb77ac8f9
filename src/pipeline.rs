//! End-to-end run: normalize, train every variant, chart the validation predictions

use thiserror::Error;

use crate::{
    datasets::{training_sequences, validation_sequences},
    driver::{TrainingData, train_variants},
    model::ModelConfig,
    plot::{ChartSink, PlotError, build_chart},
    preprocess::ScalingMode,
    tensor::{DataError, Sequence},
    train::{FitOptions, History, TrainError},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("{} variant(s) failed to train: {}", failures.len(), describe(failures))]
    Training { failures: Vec<(String, TrainError)> },
}

fn describe(failures: &[(String, TrainError)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything a run needs
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub training: Vec<Sequence>,
    pub validation: Vec<Sequence>,
    pub variants: Vec<ModelConfig>,
    pub fit: FitOptions,
    pub scaling: ScalingMode,
    /// Charts are named `<plot_prefix>-<variant name>`
    pub plot_prefix: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            training: training_sequences(),
            validation: validation_sequences(),
            variants: vec![ModelConfig::wide(), ModelConfig::compact()],
            fit: FitOptions::default(),
            scaling: ScalingMode::default(),
            plot_prefix: "lstm-plot".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct VariantReport {
    pub name: String,
    pub history: History,
    /// Chart reference, or why publishing failed
    pub chart: Result<String, PlotError>,
}

#[derive(Debug)]
pub struct RunReport {
    pub variants: Vec<VariantReport>,
}

/// Runs the whole comparison and publishes one chart per variant to `sink`.
///
/// Data errors abort before any training starts. If any variant fails to train, every
/// failure is returned and nothing is published. Publishing errors do not fail the run.
pub fn run(config: &RunConfig, sink: &dyn ChartSink) -> Result<RunReport, PipelineError> {
    let (training, validation) = config
        .scaling
        .normalize_pair(&config.training, &config.validation)?;
    log::info!(
        "normalized {} training and {} validation sequences ({} scaling)",
        training.sequences().len(),
        validation.sequences().len(),
        config.scaling
    );
    let data = TrainingData {
        train: training.pack()?,
        validation: validation.pack()?,
    };

    let outcomes = train_variants(&config.variants, &data, &config.fit);

    let mut trained = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(variant) => trained.push((outcome.name, variant)),
            Err(e) => failures.push((outcome.name, e)),
        }
    }
    if !failures.is_empty() {
        return Err(PipelineError::Training { failures });
    }

    let variants = trained
        .into_iter()
        .map(|(name, variant)| {
            log::info!("{} history: {:?}", name, variant.history.losses());
            let filename = format!("{}-{}", config.plot_prefix, name);
            let chart = build_chart(&validation, &variant.predictions, &filename)
                .and_then(|chart| sink.publish(&chart));
            match &chart {
                Ok(location) => log::info!("{} chart: {}", name, location),
                Err(e) => log::warn!("failed to publish chart for {}: {}", name, e),
            }
            VariantReport {
                name,
                history: variant.history,
                chart,
            }
        })
        .collect();
    Ok(RunReport { variants })
}
