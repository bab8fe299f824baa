//! Shape Gradient Functions - Reshape and Permute
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::Result;
use lamina_tensor::Tensor;

use super::basic::next_functions_impl;
use crate::grad_fn::{GradFn, GradientFunction};

/// Reshapes the gradient back to the input shape.
#[derive(Debug)]
pub struct ReshapeBackward {
    next_fns: Vec<Option<GradFn>>,
    input_shape: Vec<usize>,
}

impl ReshapeBackward {
    /// Creates a new `ReshapeBackward`.
    pub fn new(grad_fn: Option<GradFn>, input_shape: Vec<usize>) -> Self {
        Self {
            next_fns: vec![grad_fn],
            input_shape,
        }
    }
}

impl GradientFunction for ReshapeBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad_output.reshape_to(&self.input_shape)?)])
    }

    next_functions_impl!("ReshapeBackward");
}

/// Applies the inverse permutation to the gradient.
#[derive(Debug)]
pub struct PermuteBackward {
    next_fns: Vec<Option<GradFn>>,
    inverse: Vec<usize>,
}

impl PermuteBackward {
    /// Creates a new `PermuteBackward` for the forward permutation `dims`.
    pub fn new(grad_fn: Option<GradFn>, dims: &[usize]) -> Self {
        let mut inverse = vec![0; dims.len()];
        for (i, &d) in dims.iter().enumerate() {
            inverse[d] = i;
        }
        Self {
            next_fns: vec![grad_fn],
            inverse,
        }
    }
}

impl GradientFunction for PermuteBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad_output.permute(&self.inverse)?)])
    }

    next_functions_impl!("PermuteBackward");
}
