//! Optimizer(s)

use std::fmt::{self, Display};

use clap::ValueEnum;

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
}

/// Selects an optimizer by name, using the defaults of each algorithm
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    Rmsprop,
    Adam,
}

impl Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Sgd => write!(f, "sgd"),
            OptimizerKind::Rmsprop => write!(f, "rmsprop"),
            OptimizerKind::Adam => write!(f, "adam"),
        }
    }
}

impl OptimizerKind {
    pub fn build(&self, params: Vec<Value>, lr: f32) -> Box<dyn Optim> {
        match self {
            OptimizerKind::Sgd => Box::new(SGD::new(params, lr, 0.0)),
            OptimizerKind::Rmsprop => Box::new(RMSprop::new(params, lr)),
            OptimizerKind::Adam => Box::new(Adam::new(params, lr)),
        }
    }
}

fn zero_grads(params: &mut [Value]) {
    for param in params.iter_mut() {
        param.zero_grad();
    }
}

/// SGD with momentum
pub struct SGD {
    params: Vec<Value>,
    // currently does not change the learning rate based on the iteration
    lr: f32,
    momentum: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    pub fn new(params: Vec<Value>, lr: f32, momentum: f32) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            let velocity = self.momentum * self.velocity[idx] - self.lr * param.grad();
            let new_val = param.data() + velocity;
            self.velocity[idx] = velocity;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_grads(&mut self.params);
    }
}

/// RMSprop, scaling each step by a moving average of squared gradients
///
/// ```text
/// mean_square = decay * mean_square + (1 - decay) * grad^2
/// mom = momentum * mom + lr * grad / sqrt(mean_square + epsilon)
/// param = param - mom
/// ```
pub struct RMSprop {
    params: Vec<Value>,
    lr: f32,
    decay: f32,
    momentum: f32,
    epsilon: f32,
    mean_square: Vec<f32>,
    mom: Vec<f32>,
}

impl RMSprop {
    pub fn new(params: Vec<Value>, lr: f32) -> Self {
        Self::with_params(params, lr, 0.9, 0.0, 1e-7)
    }

    pub fn with_params(
        params: Vec<Value>,
        lr: f32,
        decay: f32,
        momentum: f32,
        epsilon: f32,
    ) -> Self {
        let n = params.len();
        Self {
            params,
            lr,
            decay,
            momentum,
            epsilon,
            mean_square: vec![0.0; n],
            mom: vec![0.0; n],
        }
    }
}

impl Optim for RMSprop {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            let grad = param.grad();
            self.mean_square[idx] =
                self.decay * self.mean_square[idx] + (1.0 - self.decay) * grad * grad;
            self.mom[idx] = self.momentum * self.mom[idx]
                + self.lr * grad / (self.mean_square[idx] + self.epsilon).sqrt();
            let new_val = param.data() - self.mom[idx];
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_grads(&mut self.params);
    }
}

/// Adam with bias-corrected first and second moment estimates
pub struct Adam {
    params: Vec<Value>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: i32,
}

impl Adam {
    pub fn new(params: Vec<Value>, lr: f32) -> Self {
        Self::with_params(params, lr, 0.9, 0.999, 1e-7)
    }

    pub fn with_params(params: Vec<Value>, lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        let n = params.len();
        Self {
            params,
            lr,
            beta1,
            beta2,
            epsilon,
            m: vec![0.0; n],
            v: vec![0.0; n],
            t: 0,
        }
    }
}

impl Optim for Adam {
    fn step(&mut self) {
        self.t += 1;
        let m_correction = 1.0 - self.beta1.powi(self.t);
        let v_correction = 1.0 - self.beta2.powi(self.t);
        for (idx, param) in self.params.iter_mut().enumerate() {
            let grad = param.grad();
            self.m[idx] = self.beta1 * self.m[idx] + (1.0 - self.beta1) * grad;
            self.v[idx] = self.beta2 * self.v[idx] + (1.0 - self.beta2) * grad * grad;
            let m_hat = self.m[idx] / m_correction;
            let v_hat = self.v[idx] / v_correction;
            let new_val = param.data() - self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        zero_grads(&mut self.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    /// `x * w` with `x = 2`, so `d/dw = 2`
    fn param_with_grad(w: f32) -> Value {
        let param = Value::new(w);
        let out = &param * &Value::new(2.0);
        out.backward();
        param
    }

    #[test]
    fn test_sgd_no_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.0);
        optim.step();
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.9);
        optim.step();
        assert_eq!(a.data(), 0.9);
        assert_eq!(optim.velocities(), &[-0.1, -0.1, -0.1]);
        optim.step();
        assert_eq!(a.data(), 0.71);
        assert_eq!(b.data(), 1.71);
        assert_eq!(c.data(), 2.71);
        assert_eq!(optim.velocities(), &[-0.19, -0.19, -0.19]);
    }

    #[test]
    fn test_rmsprop_first_step() {
        let w = param_with_grad(1.0);
        let mut optim = RMSprop::new(vec![w.clone()], 0.01);
        optim.step();
        // mean_square = 0.1 * 4, step = lr * 2 / sqrt(0.4)
        let expected = 1.0 - 0.01 * 2.0 / (0.4f32 + 1e-7).sqrt();
        assert_eq_float!(w.data(), expected);
    }

    #[test]
    fn test_adam_first_step_is_lr() {
        // bias correction makes the first step exactly lr * sign(grad)
        let w = param_with_grad(1.0);
        let mut optim = Adam::new(vec![w.clone()], 0.01);
        optim.step();
        assert_eq_float!(w.data(), 0.99, 1e-5);
    }

    #[test]
    fn test_zero_grad() {
        let w = param_with_grad(1.0);
        let mut optim = OptimizerKind::Adam.build(vec![w.clone()], 0.01);
        assert_eq!(w.grad(), 2.0);
        optim.zero_grad();
        assert_eq!(w.grad(), 0.0);
    }
}
