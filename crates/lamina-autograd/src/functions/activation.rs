//! Activation Gradient Functions
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::Result;
use lamina_tensor::Tensor;

use super::basic::next_functions_impl;
use crate::grad_fn::{GradFn, GradientFunction};

/// d/dx relu(x) = 1 if x > 0 else 0
#[derive(Debug)]
pub struct ReluBackward {
    next_fns: Vec<Option<GradFn>>,
    saved_input: Tensor,
}

impl ReluBackward {
    /// Creates a new `ReluBackward`.
    pub fn new(grad_fn: Option<GradFn>, input: Tensor) -> Self {
        Self {
            next_fns: vec![grad_fn],
            saved_input: input,
        }
    }
}

impl GradientFunction for ReluBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let mask = self.saved_input.map(|x| if x > 0.0 { 1.0 } else { 0.0 });
        Ok(vec![Some(grad_output.mul(&mask)?)])
    }

    next_functions_impl!("ReluBackward");
}

/// d/dx tanh(x) = 1 - tanh²(x)
#[derive(Debug)]
pub struct TanhBackward {
    next_fns: Vec<Option<GradFn>>,
    saved_output: Tensor,
}

impl TanhBackward {
    /// Creates a new `TanhBackward` from the forward result.
    pub fn new(grad_fn: Option<GradFn>, output: Tensor) -> Self {
        Self {
            next_fns: vec![grad_fn],
            saved_output: output,
        }
    }
}

impl GradientFunction for TanhBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let local = self.saved_output.map(|y| 1.0 - y * y);
        Ok(vec![Some(grad_output.mul(&local)?)])
    }

    next_functions_impl!("TanhBackward");
}
