//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Corresponds to
//! a node in the computation graph.

use crate::values::Value;

/// Represents the function in the computation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Div,
    Sigmoid,
    Tanh,
    /// n-ary sum, used for dot products so the graph stays shallow
    Sum,
}

impl BackpropFunc {
    /// Number of operands the function takes, `None` for variadic functions
    pub fn n_operands(&self) -> Option<usize> {
        match self {
            BackpropFunc::Add => Some(2),
            BackpropFunc::Sub => Some(2),
            BackpropFunc::Mul => Some(2),
            BackpropFunc::Div => Some(2),
            BackpropFunc::Sigmoid => Some(1),
            BackpropFunc::Tanh => Some(1),
            BackpropFunc::Sum => None,
        }
    }
}

/// Takes two values and updates their gradients
/// Represents backprop for the operation `in1 + in2 = out`
pub fn add(in1: &Value, in2: &Value, out: &Value) {
    in1.0.borrow_mut().grad += out.0.borrow().grad;
    in2.0.borrow_mut().grad += out.0.borrow().grad;
}

/// Represents backprop for the operation `in1 - in2 = out`
pub fn sub(in1: &Value, in2: &Value, out: &Value) {
    in1.0.borrow_mut().grad += out.0.borrow().grad;
    in2.0.borrow_mut().grad += -out.0.borrow().grad;
}

/// Represents backprop for the operation `in1 * in2 = out`
pub fn mul(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.0.borrow().grad;
    let in1_data = in1.0.borrow().data;
    let in2_data = in2.0.borrow().data;
    // in1 and in2 may be the same node (x * x), so never hold two borrows at once
    in1.0.borrow_mut().grad += in2_data * grad;
    in2.0.borrow_mut().grad += in1_data * grad;
}

/// Represents backprop for the operation `in1 / in2 = out`
pub fn div(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.0.borrow().grad;
    let in1_data = in1.0.borrow().data;
    let in2_data = in2.0.borrow().data;
    in1.0.borrow_mut().grad += grad / in2_data;
    in2.0.borrow_mut().grad += -in1_data * grad / (in2_data.powf(2.0));
}

/// Represents backprop for the operation `sigmoid(in) = out`
pub fn sigmoid(in1: &Value, out: &Value) {
    let grad = out.0.borrow().grad;
    let out_data = out.0.borrow().data;
    in1.0.borrow_mut().grad += out_data * (1.0 - out_data) * grad;
}

/// Represents backprop for the operation `tanh(in) = out`
pub fn tanh(in1: &Value, out: &Value) {
    let grad = out.0.borrow().grad;
    let out_data = out.0.borrow().data;
    in1.0.borrow_mut().grad += (1.0 - out_data * out_data) * grad;
}

/// Represents backprop for the operation `in_1 + in_2 + ... + in_n = out`
pub fn sum(inputs: &[Value], out: &Value) {
    let grad = out.0.borrow().grad;
    for input in inputs {
        input.0.borrow_mut().grad += grad;
    }
}

/// Applies a backprop function for operators with two operands
pub fn update_gradients_two_operands(in1: &Value, in2: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Add) => add(in1, in2, out),
        Some(BackpropFunc::Sub) => sub(in1, in2, out),
        Some(BackpropFunc::Mul) => mul(in1, in2, out),
        Some(BackpropFunc::Div) => div(in1, in2, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}

/// Applies a backprop function for operators with one operand
pub fn update_gradients_one_operand(in1: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Sigmoid) => sigmoid(in1, out),
        Some(BackpropFunc::Tanh) => tanh(in1, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}
