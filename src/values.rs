//! Scalar values which form a computation graph
use std::{
    cell::RefCell,
    collections::HashSet,
    iter::Sum,
    ops::{Add, Div, Mul, Sub},
    rc::Rc,
};

use crate::backprop_fns::{
    self, BackpropFunc, update_gradients_one_operand, update_gradients_two_operands,
};

type SharedValue = Rc<RefCell<InnerValue>>;

/// Newtype representing a shared value in a computation graph
///
/// Values are reference counted and not `Send`: a graph and every model built from it
/// stays on the thread which created it.
#[derive(Debug, Clone)]
pub struct Value(pub(crate) SharedValue);

impl Value {
    /// Create a new value, not derived from any other values
    pub fn new(data: f32) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(data, None, vec![]))))
    }

    /// Create a new value derived from an operation on other values (i.e. not a leaf node)
    fn new_derived(data: f32, backprop_fn: BackpropFunc, children: Vec<SharedValue>) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(
            data,
            Some(backprop_fn),
            children,
        ))))
    }

    /// Identity of the node, stable for as long as the node is alive
    fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn data(&self) -> f32 {
        self.0.borrow().data
    }

    pub fn grad(&self) -> f32 {
        self.0.borrow().grad
    }

    // Strictly, &mut isn't needed since the value is behind a shared mutable type,
    // but it indicates that the value should be excusively mutable
    pub fn set_data(&mut self, data: f32) {
        self.0.borrow_mut().data = data;
    }

    /// Zeros out all gradients in the computation graph which are children of this node,
    /// including this node
    pub fn zero_grad(&mut self) {
        for value in self.topological_order() {
            value.0.borrow_mut().grad = 0.0;
        }
    }

    pub fn backward(&self) {
        // d out / d out = 1
        self.0.borrow_mut().grad = 1.0;

        // apply backprop, reversed to start from root first
        for value in self.topological_order().into_iter().rev() {
            let backprop_fn = value.0.borrow().backprop_fn;
            let Some(f) = backprop_fn else {
                continue;
            };
            let children = value
                .0
                .borrow()
                .children
                .iter()
                .cloned()
                .map(Value)
                .collect::<Vec<_>>();
            debug_assert!(f.n_operands().is_none_or(|n| n == children.len()));
            match (f, children.as_slice()) {
                (BackpropFunc::Sum, _) => backprop_fns::sum(&children, &value),
                (_, [in1]) => update_gradients_one_operand(in1, &value),
                (_, [in1, in2]) => update_gradients_two_operands(in1, in2, &value),
                _ => {
                    panic!("Unsupported number of operands: {}", children.len());
                }
            }
        }
    }

    /// Nodes reachable from this one in post order (children before parents).
    ///
    /// Iterative so that long recurrences do not exhaust the stack.
    fn topological_order(&self) -> Vec<Value> {
        let mut order = vec![];
        let mut visited: HashSet<usize> = HashSet::new();
        // the flag marks a node whose children have already been pushed
        let mut stack = vec![(self.clone(), false)];
        while let Some((value, expanded)) = stack.pop() {
            if expanded {
                order.push(value);
                continue;
            }
            if !visited.insert(value.id()) {
                continue;
            }
            let children = value.0.borrow().children.clone();
            stack.push((value, true));
            for child in children {
                let child = Value(child);
                if !visited.contains(&child.id()) {
                    stack.push((child, false));
                }
            }
        }
        order
    }
}

// Various operations on values
impl Value {
    pub fn sigmoid(&self) -> Value {
        let data = 1.0 / (1.0 + (-self.data()).exp());
        Value::new_derived(data, BackpropFunc::Sigmoid, vec![self.0.clone()])
    }

    pub fn tanh(&self) -> Value {
        Value::new_derived(self.data().tanh(), BackpropFunc::Tanh, vec![self.0.clone()])
    }

    /// Multiplies by a constant which does not take part in training
    pub fn scale(&self, factor: f32) -> Value {
        self * &Value::new(factor)
    }
}

/// Convenience macro to implement binary operations on `&Value`
macro_rules! impl_binary_op(
    ($trait:ident, $trait_method:ident, $operator:tt, $backprop_fn:ident) => {
        impl $trait for &Value {
            type Output = Value;

            fn $trait_method(self, other: &Value) -> Value {
                Value::new_derived(
                    self.data() $operator other.data(),
                    BackpropFunc::$backprop_fn,
                    vec![self.0.clone(), other.0.clone()],
                )
            }
        }
    }
);
impl_binary_op!(Add, add, +, Add);
impl_binary_op!(Sub, sub, -, Sub);
impl_binary_op!(Mul, mul, *, Mul);
impl_binary_op!(Div, div, /, Div);

/// Sums into a single n-ary node rather than a chain of additions
impl Sum for Value {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        let children = iter.map(|v| v.0).collect::<Vec<_>>();
        if children.is_empty() {
            return Value::new(0.0);
        }
        let data = children.iter().map(|c| c.borrow().data).sum();
        Value::new_derived(data, BackpropFunc::Sum, children)
    }
}

/// Convenience macro to implement operations on `[Value]` when ownership can be transferred
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt, $struct:ident) => {
        impl $trait for $struct {
            type Output = Self;

            fn $trait_method(self, other: Self) -> Self {
                &self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +, Value);
impl_arithmetic!(Sub, sub, -, Value);
impl_arithmetic!(Mul, mul, *, Value);
impl_arithmetic!(Div, div, /, Value);

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0.borrow().data == other.0.borrow().data
    }
}

// unfortunate that there isn't a blanket impl for AsRef<T> for T
// <https://doc.rust-lang.org/std/convert/trait.AsRef.html#reflexivity>
impl AsRef<Value> for Value {
    fn as_ref(&self) -> &Value {
        self
    }
}

#[derive(Debug)]
pub(crate) struct InnerValue {
    // the network uses 32 bit precision floats (roughly 7 decimal digits of precision)
    pub(crate) data: f32,
    /// gradient of the value with respect to the output
    pub(crate) grad: f32,
    /// List of the node inputs in the forward pass
    /// These nodes are "children" in the backwards pass
    children: Vec<SharedValue>,
    /// The function which created this value from its children
    /// `None` when the value is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

impl InnerValue {
    fn new(data: f32, backprop_fn: Option<BackpropFunc>, children: Vec<SharedValue>) -> Self {
        Self {
            data,
            grad: 0.0,
            children,
            backprop_fn,
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[macro_export]
    macro_rules! assert_eq_float {
        ($a:expr, $b:expr) => {
            assert!((($a) - ($b)).abs() < 1e-6, "{} != {}", $a, $b);
        };
        ($a:expr, $b:expr, $tol:expr) => {
            assert!((($a) - ($b)).abs() < $tol, "{} != {}", $a, $b);
        };
    }

    #[test]
    fn test_add() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a + &b;
        assert_eq!(c.data(), 5.0);
        c.backward();

        // dc/da = 1
        // dc/db = 1
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_mul() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a * &b;
        assert_eq!(c.data(), 6.0);

        c.backward();

        // dc/da = b
        // dc/db = a
        assert_eq!(a.grad(), 3.0);
        assert_eq!(b.grad(), 2.0);
    }

    #[test]
    fn test_square_via_mul() {
        let a = Value::new(3.0);
        let c = &a * &a;
        c.backward();
        assert_eq!(a.grad(), 6.0);
    }

    #[test]
    fn test_sub() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a - &b;
        assert_eq!(c.data(), -1.0);

        c.backward();

        // dc/da = 1
        // dc/db = -1
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), -1.0);
    }

    #[test]
    fn test_div() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a / &b;
        assert_eq_float!(c.data(), 2.0 / 3.0);

        c.backward();

        // dc/da = 1/b
        // dc/db = -a/b^2
        assert_eq_float!(a.grad(), 1.0 / 3.0);
        assert_eq_float!(b.grad(), -2.0 / 9.0);
    }

    #[test]
    fn test_sigmoid() {
        let a = Value::new(0.0);
        let s = a.sigmoid();
        assert_eq_float!(s.data(), 0.5);

        s.backward();

        // ds/da = s * (1 - s)
        assert_eq_float!(a.grad(), 0.25);
    }

    #[test]
    fn test_tanh() {
        let a = Value::new(0.5);
        let t = a.tanh();
        assert_eq_float!(t.data(), 0.5f32.tanh());

        t.backward();

        // dt/da = 1 - t^2
        assert_eq_float!(a.grad(), 1.0 - 0.5f32.tanh().powi(2));
    }

    #[test]
    fn test_sum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = Value::new(3.0);
        let s = [&a * &b, c.clone(), a.clone()].into_iter().sum::<Value>();
        assert_eq!(s.data(), 6.0);

        s.backward();

        // ds/da = b + 1
        assert_eq!(a.grad(), 3.0);
        assert_eq!(b.grad(), 1.0);
        assert_eq!(c.grad(), 1.0);
    }

    #[test]
    fn test_empty_sum_is_zero() {
        let s = std::iter::empty::<Value>().sum::<Value>();
        assert_eq!(s.data(), 0.0);
    }

    #[test]
    fn test_diamond_accumulates() {
        // z = (a * 2) + (a * 3), both paths must be fully accumulated before reaching `a`
        let a = Value::new(1.5);
        let left = a.scale(2.0);
        let right = a.scale(3.0);
        let z = (&left + &right).tanh();
        z.backward();
        let expected = (1.0 - z.data() * z.data()) * 5.0;
        assert_eq_float!(a.grad(), expected);
    }

    #[test]
    fn test_zero_grad() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);
        let mut c = &a * &b;
        c.backward();
        assert_eq!(a.grad(), 3.0);

        c.zero_grad();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
        assert_eq!(c.grad(), 0.0);
    }
}
