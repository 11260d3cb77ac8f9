//! Stacked LSTM regression models
//!
//! A [`SequenceModel`] is a stack of LSTM layers returning full sequences, followed by a
//! time-distributed dense head with one output per timestep and a dropout layer which is
//! only active while training.

use std::fmt::{self, Display};

use clap::ValueEnum;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use crate::{
    init::Initializer,
    nn::{Dropout, Layer, Lstm, Module, NNError, TimeDistributed},
    optim::{Optim, OptimizerKind},
    values::Value,
};

/// Declarative description of a model variant
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    /// Units of each LSTM layer, input side first
    pub lstm_units: Vec<usize>,
    pub recurrent_initializer: Initializer,
    pub dropout: f32,
    pub optimizer: OptimizerKind,
    pub learning_rate: f32,
    pub seed: u64,
}

impl ModelConfig {
    /// `model1`: LSTM(100) -> LSTM(50), trained with RMSprop
    pub fn wide() -> Self {
        Self {
            name: "model1".to_string(),
            lstm_units: vec![100, 50],
            recurrent_initializer: Initializer::Orthogonal,
            dropout: 0.2,
            optimizer: OptimizerKind::Rmsprop,
            learning_rate: 0.001,
            seed: 1,
        }
    }

    /// `model2`: LSTM(64) -> LSTM(32), trained with Adam
    pub fn compact() -> Self {
        Self {
            name: "model2".to_string(),
            lstm_units: vec![64, 32],
            recurrent_initializer: Initializer::Orthogonal,
            dropout: 0.2,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.001,
            seed: 2,
        }
    }

    pub fn validate(&self) -> Result<(), NNError> {
        if self.lstm_units.is_empty() {
            return Err(NNError::InvalidConfig(format!(
                "{}: at least one LSTM layer is required",
                self.name
            )));
        }
        if self.lstm_units.contains(&0) {
            return Err(NNError::InvalidConfig(format!(
                "{}: LSTM layers need at least one unit",
                self.name
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(NNError::InvalidConfig(format!(
                "{}: dropout rate {} is outside [0, 1)",
                self.name, self.dropout
            )));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(NNError::InvalidConfig(format!(
                "{}: learning rate must be positive, got {}",
                self.name, self.learning_rate
            )));
        }
        Ok(())
    }

    /// Creates the optimizer declared by this config for `params`
    pub fn optimizer(&self, params: Vec<Value>) -> Box<dyn Optim> {
        self.optimizer.build(params, self.learning_rate)
    }
}

/// Named presets selectable from the command line
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Wide,
    Compact,
}

impl Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Wide => write!(f, "wide"),
            Preset::Compact => write!(f, "compact"),
        }
    }
}

impl From<Preset> for ModelConfig {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::Wide => ModelConfig::wide(),
            Preset::Compact => ModelConfig::compact(),
        }
    }
}

pub struct SequenceModel {
    lstms: Vec<Lstm>,
    head: TimeDistributed,
    dropout: Dropout,
}

impl Module for SequenceModel {
    fn parameters(&self) -> Vec<Value> {
        self.lstms
            .iter()
            .flat_map(|l| l.parameters())
            .chain(self.head.parameters())
            .collect()
    }

    fn forward(&self, inputs: &[Vec<Value>]) -> Result<Vec<Vec<Value>>, NNError> {
        let mut hidden = inputs.to_vec();
        for lstm in &self.lstms {
            hidden = lstm.forward(&hidden)?;
        }
        let out = self.head.forward(&hidden)?;
        self.dropout.forward(&out)
    }

    fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }
}

/// Builds the model described by `config` for inputs with `input_size` features per timestep
pub fn build_model(config: &ModelConfig, input_size: usize) -> Result<SequenceModel, NNError> {
    config.validate()?;
    if input_size == 0 {
        return Err(NNError::InvalidConfig(format!(
            "{}: inputs need at least one feature",
            config.name
        )));
    }
    let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
    let mut lstms = Vec::with_capacity(config.lstm_units.len());
    let mut layer_input = input_size;
    for &units in &config.lstm_units {
        let lstm = Lstm::new(layer_input, units, config.recurrent_initializer, &mut rng);
        layer_input = lstm.units();
        lstms.push(lstm);
    }
    let head = TimeDistributed::new(Layer::new(layer_input, 1, &mut rng));
    // derive the dropout stream from the same seed without reusing the weight stream
    let dropout = Dropout::new(config.dropout, config.seed.wrapping_add(0x9e37_79b9));
    log::debug!(
        "built {} with LSTM units {:?}, {} parameters",
        config.name,
        config.lstm_units,
        lstms.iter().map(|l| l.parameters().len()).sum::<usize>() + layer_input + 1
    );
    Ok(SequenceModel {
        lstms,
        head,
        dropout,
    })
}
