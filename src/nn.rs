//! Components to build a recurrent neural network
//!
//! Sequence modules take and return one sequence at a time, laid out as
//! `timesteps x features`.

use std::cell::{Cell, RefCell};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use thiserror::Error;

use crate::{init::Initializer, values::Value};

/// Errors for the neural network
#[derive(Debug, Error, PartialEq)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected}, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("Input sequence has no timesteps")]
    EmptySequence,
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn parameters(&self) -> Vec<Value>;
    fn forward(&self, inputs: &[Vec<Value>]) -> Result<Vec<Vec<Value>>, NNError>;

    /// Switches between training and inference behaviour (e.g. dropout)
    fn set_training(&self, _training: bool) {}
}

/// A single neuron in a layer of a NN
pub struct Neuron {
    /// weights of the neuron
    pub weights: Vec<Value>,
    /// bias of the neuron
    pub bias: Value,
}

impl Neuron {
    fn from_parts(weights: Vec<f32>, bias: f32) -> Self {
        Self {
            weights: weights.into_iter().map(Value::new).collect(),
            bias: Value::new(bias),
        }
    }

    // Testing utility for a deterministic and simple neuron
    #[cfg(test)]
    fn new_ones(n_inputs: usize) -> Self {
        Self::from_parts(vec![1.0; n_inputs], 1.0)
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.weights
            .iter()
            .chain(std::iter::once(&self.bias))
            .cloned()
            .collect()
    }

    pub fn forward(&self, inputs: &[Value]) -> Result<Value, NNError> {
        if inputs.len() != self.weights.len() {
            return Err(NNError::InputSizeMismatch {
                expected: self.weights.len(),
                got: inputs.len(),
            });
        }
        let output = self
            .weights
            .iter()
            .zip(inputs.iter())
            .map(|(w, i)| w * i)
            .chain(std::iter::once(self.bias.clone()))
            .sum::<Value>();
        Ok(output)
    }
}

/// A fully connected layer of a neural network
pub struct Layer {
    neurons: Vec<Neuron>,
}

impl Layer {
    /// Creates a new layer with Glorot-uniform weights and zero biases
    pub fn new<R: Rng + ?Sized>(n_inputs: usize, n_outputs: usize, rng: &mut R) -> Self {
        let neurons = Initializer::GlorotUniform
            .matrix(n_outputs, n_inputs, rng)
            .into_iter()
            .map(|weights| Neuron::from_parts(weights, 0.0))
            .collect();
        Self { neurons }
    }

    #[cfg(test)]
    fn new_ones(n_inputs: usize, n_outputs: usize) -> Self {
        let neurons = (0..n_outputs).map(|_| Neuron::new_ones(n_inputs)).collect();
        Self { neurons }
    }

    /// Returns all the parameters in the layer
    pub fn parameters(&self) -> Vec<Value> {
        self.neurons.iter().flat_map(|n| n.parameters()).collect()
    }

    /// Computes forward pass for a layer
    pub fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let outputs = self
            .neurons
            .iter()
            .map(|n| n.forward(inputs))
            .collect::<Result<Vec<_>, _>>()?;
        let n_output_nans = outputs.iter().filter(|v| v.data().is_nan()).count();
        if n_output_nans > 0 {
            log::trace!("n_output_nans: {}", n_output_nans);
        }
        Ok(outputs)
    }
}

/// Applies a dense layer independently at every timestep
pub struct TimeDistributed {
    layer: Layer,
}

impl TimeDistributed {
    pub fn new(layer: Layer) -> Self {
        Self { layer }
    }
}

impl Module for TimeDistributed {
    fn parameters(&self) -> Vec<Value> {
        self.layer.parameters()
    }

    fn forward(&self, inputs: &[Vec<Value>]) -> Result<Vec<Vec<Value>>, NNError> {
        inputs.iter().map(|step| self.layer.forward(step)).collect()
    }
}

/// Long short-term memory layer returning the hidden state at every timestep
///
/// Gate rows are ordered input, forget, cell, output; each gate holds `units` rows.
pub struct Lstm {
    input_size: usize,
    units: usize,
    /// `4 * units` rows of `input_size` weights
    kernel: Vec<Vec<Value>>,
    /// `4 * units` rows of `units` weights
    recurrent_kernel: Vec<Vec<Value>>,
    bias: Vec<Value>,
}

impl Lstm {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        units: usize,
        recurrent_initializer: Initializer,
        rng: &mut R,
    ) -> Self {
        let kernel = value_matrix(Initializer::GlorotUniform.matrix(4 * units, input_size, rng));
        let recurrent_kernel = value_matrix(recurrent_initializer.matrix(4 * units, units, rng));
        // forget gate starts open
        let bias = (0..4 * units)
            .map(|row| Value::new(if row / units == 1 { 1.0 } else { 0.0 }))
            .collect();
        Self {
            input_size,
            units,
            kernel,
            recurrent_kernel,
            bias,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    fn gate(&self, row: usize, x: &[Value], h: &[Value]) -> Value {
        let input = self.kernel[row].iter().zip(x).map(|(w, v)| w * v);
        let recurrent = self.recurrent_kernel[row].iter().zip(h).map(|(u, v)| u * v);
        input
            .chain(recurrent)
            .chain(std::iter::once(self.bias[row].clone()))
            .sum()
    }
}

impl Module for Lstm {
    fn parameters(&self) -> Vec<Value> {
        self.kernel
            .iter()
            .chain(self.recurrent_kernel.iter())
            .flatten()
            .chain(self.bias.iter())
            .cloned()
            .collect()
    }

    fn forward(&self, inputs: &[Vec<Value>]) -> Result<Vec<Vec<Value>>, NNError> {
        if inputs.is_empty() {
            return Err(NNError::EmptySequence);
        }
        let units = self.units;
        let mut h: Vec<Value> = (0..units).map(|_| Value::new(0.0)).collect();
        let mut c: Vec<Value> = (0..units).map(|_| Value::new(0.0)).collect();
        let mut outputs = Vec::with_capacity(inputs.len());
        for x in inputs {
            if x.len() != self.input_size {
                return Err(NNError::InputSizeMismatch {
                    expected: self.input_size,
                    got: x.len(),
                });
            }
            let mut next_h = Vec::with_capacity(units);
            let mut next_c = Vec::with_capacity(units);
            for k in 0..units {
                let i = self.gate(k, x, &h).sigmoid();
                let f = self.gate(units + k, x, &h).sigmoid();
                let g = self.gate(2 * units + k, x, &h).tanh();
                let o = self.gate(3 * units + k, x, &h).sigmoid();
                let cell = &(&f * &c[k]) + &(&i * &g);
                next_h.push(&o * &cell.tanh());
                next_c.push(cell);
            }
            h = next_h;
            c = next_c;
            outputs.push(h.clone());
        }
        Ok(outputs)
    }
}

/// Randomly zeroes values while training, scaling the survivors by `1 / (1 - rate)`
pub struct Dropout {
    rate: f32,
    training: Cell<bool>,
    rng: RefCell<Pcg64Mcg>,
}

impl Dropout {
    pub fn new(rate: f32, seed: u64) -> Self {
        Self {
            rate,
            training: Cell::new(false),
            rng: RefCell::new(Pcg64Mcg::seed_from_u64(seed)),
        }
    }
}

impl Module for Dropout {
    fn parameters(&self) -> Vec<Value> {
        vec![]
    }

    fn forward(&self, inputs: &[Vec<Value>]) -> Result<Vec<Vec<Value>>, NNError> {
        if !self.training.get() || self.rate == 0.0 {
            return Ok(inputs.to_vec());
        }
        let keep_scale = 1.0 / (1.0 - self.rate);
        let mut rng = self.rng.borrow_mut();
        Ok(inputs
            .iter()
            .map(|step| {
                step.iter()
                    .map(|v| {
                        let keep = rng.random::<f32>() >= self.rate;
                        v.scale(if keep { keep_scale } else { 0.0 })
                    })
                    .collect()
            })
            .collect())
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
    }
}

fn value_matrix(m: Vec<Vec<f32>>) -> Vec<Vec<Value>> {
    m.into_iter()
        .map(|row| row.into_iter().map(Value::new).collect())
        .collect()
}

/// Wraps raw feature rows as leaf values
pub fn to_values(sequence: &[f32], features: usize) -> Vec<Vec<Value>> {
    sequence
        .chunks(features.max(1))
        .map(|step| step.iter().copied().map(Value::new).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;

    use super::*;

    #[test]
    fn test_layer_forward() {
        let layer = Layer::new_ones(2, 3);
        let inputs = vec![Value::new(1.0), Value::new(2.0)];
        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].data(), 4.0);
        assert_eq!(outputs[1].data(), 4.0);
        assert_eq!(outputs[2].data(), 4.0);
    }

    #[test]
    fn test_dim_mismatch() {
        let layer = Layer::new_ones(2, 3);
        let inputs = vec![Value::new(1.0)];
        let outputs = layer.forward(&inputs).unwrap_err();
        assert!(matches!(
            outputs,
            NNError::InputSizeMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_time_distributed() {
        let td = TimeDistributed::new(Layer::new_ones(1, 1));
        let outputs = td.forward(&to_values(&[1.0, 2.0, 3.0], 1)).unwrap();
        let data = outputs.iter().map(|s| s[0].data()).collect::<Vec<_>>();
        assert_eq!(data, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_lstm_shapes() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let lstm = Lstm::new(1, 5, Initializer::Orthogonal, &mut rng);
        // 4 gates x (1 input weight + 5 recurrent weights + 1 bias)
        assert_eq!(lstm.parameters().len(), 4 * 5 * 7);

        let outputs = lstm.forward(&to_values(&[0.1, 0.2, 0.3], 1)).unwrap();
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|step| step.len() == 5));
        // h = o * tanh(c) stays in (-1, 1)
        assert!(outputs.iter().flatten().all(|v| v.data().abs() < 1.0));
    }

    #[test]
    fn test_lstm_single_step_by_hand() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let mut lstm = Lstm::new(1, 1, Initializer::GlorotUniform, &mut rng);
        // every weight 0.5, biases as initialized (forget gate 1.0)
        for row in lstm.kernel.iter_mut().chain(lstm.recurrent_kernel.iter_mut()) {
            for w in row.iter_mut() {
                w.set_data(0.5);
            }
        }
        let outputs = lstm.forward(&to_values(&[1.0], 1)).unwrap();

        let sigmoid = |x: f32| 1.0 / (1.0 + (-x).exp());
        let i = sigmoid(0.5);
        let g = 0.5f32.tanh();
        let o = sigmoid(0.5);
        // c starts at zero so the forget gate does not contribute
        let expected = o * (i * g).tanh();
        assert_eq_float!(outputs[0][0].data(), expected);
    }

    #[test]
    fn test_lstm_gradients_reach_parameters() {
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let lstm = Lstm::new(1, 2, Initializer::Orthogonal, &mut rng);
        let outputs = lstm.forward(&to_values(&[0.5, -0.5], 1)).unwrap();
        outputs[1].iter().cloned().sum::<Value>().backward();
        assert!(lstm.kernel.iter().flatten().any(|w| w.grad() != 0.0));
        assert!(lstm.recurrent_kernel.iter().flatten().any(|w| w.grad() != 0.0));
    }

    #[test]
    fn test_lstm_rejects_bad_input() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let lstm = Lstm::new(2, 3, Initializer::Orthogonal, &mut rng);
        assert_eq!(lstm.forward(&[]).unwrap_err(), NNError::EmptySequence);
        assert_eq!(
            lstm.forward(&to_values(&[1.0], 1)).unwrap_err(),
            NNError::InputSizeMismatch {
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_dropout_modes() {
        let dropout = Dropout::new(0.5, 11);
        let inputs = to_values(&[1.0; 64], 1);

        // inference is the identity
        let outputs = dropout.forward(&inputs).unwrap();
        assert!(outputs.iter().flatten().all(|v| v.data() == 1.0));

        dropout.set_training(true);
        let outputs = dropout.forward(&inputs).unwrap();
        let values = outputs.iter().flatten().map(|v| v.data()).collect::<Vec<_>>();
        assert!(values.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(values.contains(&0.0));
        assert!(values.contains(&2.0));
    }
}
