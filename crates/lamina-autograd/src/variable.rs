//! Variable - Tensor with Gradient Tracking
//!
//! `Variable` wraps a [`Tensor`] and records the operations applied to it so
//! gradients can be computed by backpropagation. Operations return `Result`
//! because shape errors surface from the tensor layer.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::sync::Arc;

use parking_lot::RwLock;

use lamina_core::error::{Error, Result};
use lamina_tensor::shape::normalize_axes;
use lamina_tensor::{EinsumPlan, GatherPlan, Tensor};

use crate::functions::{
    AddBackward, DivBackward, EinsumBackward, GatherBackward, MulBackward, PermuteBackward,
    PowBackward, ReluBackward, ReshapeBackward, ScaleBackward, SelectBackward, SqrtBackward,
    StackBackward, SubBackward, SumAxesBackward, TanhBackward,
};
use crate::grad_fn::{AccumulateGrad, GradAccumulator, GradFn};
use crate::no_grad::is_grad_enabled;

// =============================================================================
// Variable Struct
// =============================================================================

/// A tensor with automatic differentiation support.
#[derive(Clone)]
pub struct Variable {
    /// The underlying tensor (shared between clones).
    data: Arc<RwLock<Tensor>>,
    /// Gradient storage, shared with the leaf's `AccumulateGrad`.
    grad: GradAccumulator,
    requires_grad: bool,
    is_leaf: bool,
    grad_fn: Option<GradFn>,
}

impl Variable {
    /// Creates a leaf variable.
    #[must_use]
    pub fn new(data: Tensor, requires_grad: bool) -> Self {
        let grad: GradAccumulator = Arc::new(RwLock::new(None));
        let grad_fn = requires_grad.then(|| GradFn::new(AccumulateGrad::new(Arc::clone(&grad))));
        Self {
            data: Arc::new(RwLock::new(data)),
            grad,
            requires_grad,
            is_leaf: true,
            grad_fn,
        }
    }

    /// Creates a variable that does not require gradients.
    #[must_use]
    pub fn from_tensor(data: Tensor) -> Self {
        Self::new(data, false)
    }

    fn from_operation(data: Tensor, grad_fn: GradFn) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            grad: Arc::new(RwLock::new(None)),
            requires_grad: true,
            is_leaf: false,
            grad_fn: Some(grad_fn),
        }
    }

    /// Wraps `result`, recording `make_grad_fn` when any input is tracked.
    fn record<F>(result: Tensor, inputs: &[&Variable], make_grad_fn: F) -> Self
    where
        F: FnOnce() -> GradFn,
    {
        if is_grad_enabled() && inputs.iter().any(|v| v.requires_grad) {
            Self::from_operation(result, make_grad_fn())
        } else {
            Self::from_tensor(result)
        }
    }

    /// Returns the underlying tensor (cheap clone).
    #[must_use]
    pub fn data(&self) -> Tensor {
        self.data.read().clone()
    }

    /// Replaces the data in place (shared by all clones of a leaf).
    pub fn set_data(&self, data: Tensor) {
        *self.data.write() = data;
    }

    /// Returns the shape.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.data.read().shape().to_vec()
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.data.read().ndim()
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.read().numel()
    }

    /// Returns whether gradients flow into this variable.
    #[must_use]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Returns whether this variable was created by the user.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Returns the accumulated gradient, if any.
    #[must_use]
    pub fn grad(&self) -> Option<Tensor> {
        self.grad.read().clone()
    }

    /// Returns the backward node.
    #[must_use]
    pub fn grad_fn(&self) -> Option<&GradFn> {
        self.grad_fn.as_ref()
    }

    /// Adds to the stored gradient.
    pub fn accumulate_grad(&self, grad: &Tensor) -> Result<()> {
        let mut guard = self.grad.write();
        let next = match guard.as_ref() {
            Some(existing) => existing.add(grad)?,
            None => grad.clone(),
        };
        *guard = Some(next);
        Ok(())
    }

    /// Clears the gradient.
    pub fn zero_grad(&self) {
        *self.grad.write() = None;
    }

    /// Returns a copy cut off from the graph (stop-gradient).
    #[must_use]
    pub fn detach(&self) -> Self {
        Self::from_tensor(self.data())
    }

    /// Returns a leaf copy with `requires_grad` set.
    #[must_use]
    pub fn requires_grad_(self, requires_grad: bool) -> Self {
        if requires_grad == self.requires_grad && self.is_leaf {
            return self;
        }
        Self::new(self.data(), requires_grad)
    }

    /// Backpropagates from this single-element variable.
    pub fn backward(&self) -> Result<()> {
        if !self.requires_grad {
            return Err(Error::GradientError {
                message: "backward called on a variable that does not require grad".into(),
            });
        }
        if self.numel() != 1 {
            return Err(Error::GradientError {
                message: format!(
                    "backward needs a single-element output, got shape {:?}",
                    self.shape()
                ),
            });
        }
        let seed = Tensor::ones(&self.shape());
        crate::backward::backward(self, &seed)
    }

    // =========================================================================
    // Arithmetic Operations
    // =========================================================================

    /// Elementwise addition with broadcasting.
    pub fn add(&self, other: &Variable) -> Result<Variable> {
        let result = self.data().add(&other.data())?;
        Ok(Self::record(result, &[self, other], || {
            GradFn::new(AddBackward::new(
                self.grad_fn.clone(),
                other.grad_fn.clone(),
                self.shape(),
                other.shape(),
            ))
        }))
    }

    /// Elementwise subtraction with broadcasting.
    pub fn sub(&self, other: &Variable) -> Result<Variable> {
        let result = self.data().sub(&other.data())?;
        Ok(Self::record(result, &[self, other], || {
            GradFn::new(SubBackward::new(
                self.grad_fn.clone(),
                other.grad_fn.clone(),
                self.shape(),
                other.shape(),
            ))
        }))
    }

    /// Elementwise multiplication with broadcasting.
    pub fn mul(&self, other: &Variable) -> Result<Variable> {
        let (lhs, rhs) = (self.data(), other.data());
        let result = lhs.mul(&rhs)?;
        Ok(Self::record(result, &[self, other], || {
            GradFn::new(MulBackward::new(
                self.grad_fn.clone(),
                other.grad_fn.clone(),
                lhs,
                rhs,
            ))
        }))
    }

    /// Elementwise division with broadcasting.
    pub fn div(&self, other: &Variable) -> Result<Variable> {
        let (lhs, rhs) = (self.data(), other.data());
        let result = lhs.div(&rhs)?;
        Ok(Self::record(result, &[self, other], || {
            GradFn::new(DivBackward::new(
                self.grad_fn.clone(),
                other.grad_fn.clone(),
                lhs,
                rhs,
            ))
        }))
    }

    /// Negation.
    #[must_use]
    pub fn neg(&self) -> Variable {
        self.mul_scalar(-1.0)
    }

    /// Adds a constant.
    #[must_use]
    pub fn add_scalar(&self, value: f32) -> Variable {
        let result = self.data().add_scalar(value);
        Self::record(result, &[self], || {
            GradFn::new(ScaleBackward::new(self.grad_fn.clone(), 1.0))
        })
    }

    /// Multiplies by a constant.
    #[must_use]
    pub fn mul_scalar(&self, value: f32) -> Variable {
        let result = self.data().mul_scalar(value);
        Self::record(result, &[self], || {
            GradFn::new(ScaleBackward::new(self.grad_fn.clone(), value))
        })
    }

    /// Raises every element to `exponent`.
    #[must_use]
    pub fn pow(&self, exponent: f32) -> Variable {
        let input = self.data();
        let result = input.powf(exponent);
        Self::record(result, &[self], || {
            GradFn::new(PowBackward::new(self.grad_fn.clone(), input, exponent))
        })
    }

    /// Elementwise square root.
    #[must_use]
    pub fn sqrt(&self) -> Variable {
        let result = self.data().sqrt();
        let saved = result.clone();
        Self::record(result, &[self], || {
            GradFn::new(SqrtBackward::new(self.grad_fn.clone(), saved))
        })
    }

    // =========================================================================
    // Activations
    // =========================================================================

    /// Rectified linear unit.
    #[must_use]
    pub fn relu(&self) -> Variable {
        let input = self.data();
        let result = input.relu();
        Self::record(result, &[self], || {
            GradFn::new(ReluBackward::new(self.grad_fn.clone(), input))
        })
    }

    /// Hyperbolic tangent.
    #[must_use]
    pub fn tanh(&self) -> Variable {
        let result = self.data().tanh();
        let saved = result.clone();
        Self::record(result, &[self], || {
            GradFn::new(TanhBackward::new(self.grad_fn.clone(), saved))
        })
    }

    // =========================================================================
    // Reductions
    // =========================================================================

    /// Sums over `axes` (negative axes count from the end).
    pub fn sum_axes(&self, axes: &[i64], keepdims: bool) -> Result<Variable> {
        self.reduce(axes, keepdims, false)
    }

    /// Averages over `axes` (negative axes count from the end).
    pub fn mean_axes(&self, axes: &[i64], keepdims: bool) -> Result<Variable> {
        self.reduce(axes, keepdims, true)
    }

    fn reduce(&self, axes: &[i64], keepdims: bool, mean: bool) -> Result<Variable> {
        let input = self.data();
        let axes = normalize_axes(axes, input.ndim())?;
        let count: usize = axes.iter().map(|&a| input.shape()[a]).product();
        if mean && count == 0 {
            return Err(Error::EmptyTensor);
        }
        let scale = if mean { 1.0 / count as f32 } else { 1.0 };
        let result = input.sum_axes(&axes, keepdims)?.mul_scalar(scale);
        Ok(Self::record(result, &[self], || {
            GradFn::new(SumAxesBackward::new(
                self.grad_fn.clone(),
                input.shape().to_vec(),
                axes,
                scale,
            ))
        }))
    }

    /// Sum of all elements, as a 0-d variable.
    pub fn sum(&self) -> Result<Variable> {
        let all: Vec<i64> = (0..self.ndim() as i64).collect();
        self.sum_axes(&all, false)
    }

    /// Mean of all elements, as a 0-d variable.
    pub fn mean(&self) -> Result<Variable> {
        let all: Vec<i64> = (0..self.ndim() as i64).collect();
        self.mean_axes(&all, false)
    }

    // =========================================================================
    // Shape Operations
    // =========================================================================

    /// Reshapes; one dimension may be `-1`.
    pub fn reshape(&self, shape: &[isize]) -> Result<Variable> {
        let input_shape = self.shape();
        let result = self.data().reshape(shape)?;
        Ok(Self::record(result, &[self], || {
            GradFn::new(ReshapeBackward::new(self.grad_fn.clone(), input_shape))
        }))
    }

    /// Reshapes to a fully specified shape.
    pub fn reshape_to(&self, shape: &[usize]) -> Result<Variable> {
        let input_shape = self.shape();
        let result = self.data().reshape_to(shape)?;
        Ok(Self::record(result, &[self], || {
            GradFn::new(ReshapeBackward::new(self.grad_fn.clone(), input_shape))
        }))
    }

    /// Reorders dimensions.
    pub fn permute(&self, dims: &[usize]) -> Result<Variable> {
        let result = self.data().permute(dims)?;
        Ok(Self::record(result, &[self], || {
            GradFn::new(PermuteBackward::new(self.grad_fn.clone(), dims))
        }))
    }

    // =========================================================================
    // Contraction and Indexing
    // =========================================================================

    /// Differentiable einsum over `operands`.
    pub fn einsum(spec: &str, operands: &[&Variable]) -> Result<Variable> {
        let tensors: Vec<Tensor> = operands.iter().map(|v| v.data()).collect();
        let shapes: Vec<&[usize]> = tensors.iter().map(Tensor::shape).collect();
        let plan = EinsumPlan::new(spec, &shapes)?;
        let refs: Vec<&Tensor> = tensors.iter().collect();
        let result = plan.forward(&refs)?;
        Ok(Self::record(result, operands, || {
            let next_fns = operands.iter().map(|v| v.grad_fn.clone()).collect();
            GradFn::new(EinsumBackward::new(next_fns, plan, tensors))
        }))
    }

    /// Applies a [`GatherPlan`] (crop, pad, resample).
    pub fn gather(&self, plan: &GatherPlan) -> Result<Variable> {
        let result = plan.forward(&self.data())?;
        Ok(Self::record(result, &[self], || {
            GradFn::new(GatherBackward::new(self.grad_fn.clone(), plan.clone()))
        }))
    }

    /// Selects `index` along `axis`, dropping the axis.
    pub fn select(&self, axis: usize, index: usize) -> Result<Variable> {
        let input_shape = self.shape();
        let result = self.data().select(axis, index)?;
        Ok(Self::record(result, &[self], || {
            GradFn::new(SelectBackward::new(
                self.grad_fn.clone(),
                input_shape,
                axis,
                index,
            ))
        }))
    }

    /// Stacks equally shaped variables along a new `axis`.
    pub fn stack(variables: &[Variable], axis: usize) -> Result<Variable> {
        let tensors: Vec<Tensor> = variables.iter().map(Variable::data).collect();
        let result = Tensor::stack(&tensors, axis)?;
        let inputs: Vec<&Variable> = variables.iter().collect();
        Ok(Self::record(result, &inputs, || {
            let next_fns = variables.iter().map(|v| v.grad_fn.clone()).collect();
            GradFn::new(StackBackward::new(next_fns, axis))
        }))
    }
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad)
            .field("is_leaf", &self.is_leaf)
            .field("grad_fn", &self.grad_fn.as_ref().map(GradFn::name))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::no_grad::no_grad;

    fn var(data: Vec<f32>, shape: &[usize]) -> Variable {
        Variable::new(Tensor::from_vec(data, shape).unwrap(), true)
    }

    #[test]
    fn test_leaf_properties() {
        let v = var(vec![1.0, 2.0], &[2]);
        assert!(v.is_leaf());
        assert!(v.requires_grad());
        assert_eq!(v.grad_fn().unwrap().name(), "AccumulateGrad");
        assert!(!v.detach().requires_grad());
    }

    #[test]
    fn test_op_records_graph() {
        let a = var(vec![1.0, 2.0], &[2]);
        let b = Variable::from_tensor(Tensor::ones(&[2]));
        let c = a.add(&b).unwrap();
        assert!(!c.is_leaf());
        assert_eq!(c.grad_fn().unwrap().name(), "AddBackward");

        let d = b.mul(&b).unwrap();
        assert!(!d.requires_grad());
    }

    #[test]
    fn test_no_grad_skips_recording() {
        let a = var(vec![1.0], &[1]);
        let b = no_grad(|| a.mul_scalar(2.0));
        assert!(!b.requires_grad());
        assert!(b.backward().is_err());
    }

    #[test]
    fn test_mean_axes_value() {
        let a = var(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let m = a.mean_axes(&[-1], true).unwrap();
        assert_eq!(m.shape(), vec![2, 1]);
        assert_eq!(m.data().to_vec(), vec![1.5, 3.5]);
    }

    #[test]
    fn test_backward_requires_scalar() {
        let a = var(vec![1.0, 2.0], &[2]);
        assert!(a.mul_scalar(3.0).backward().is_err());
    }

    #[test]
    fn test_set_data_shared() {
        let a = var(vec![1.0], &[1]);
        let b = a.clone();
        a.set_data(Tensor::from_vec(vec![5.0], &[1]).unwrap());
        assert_eq!(b.data().to_vec(), vec![5.0]);
    }
}
