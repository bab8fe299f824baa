//! Linear Algebra Gradient Functions - Einsum
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::Result;
use lamina_tensor::{EinsumPlan, Tensor};

use super::basic::next_functions_impl;
use crate::grad_fn::{GradFn, GradientFunction};

/// Backward of an einsum contraction over any number of operands.
#[derive(Debug)]
pub struct EinsumBackward {
    next_fns: Vec<Option<GradFn>>,
    plan: EinsumPlan,
    saved_operands: Vec<Tensor>,
}

impl EinsumBackward {
    /// Creates a new `EinsumBackward`.
    pub fn new(next_fns: Vec<Option<GradFn>>, plan: EinsumPlan, operands: Vec<Tensor>) -> Self {
        Self {
            next_fns,
            plan,
            saved_operands: operands,
        }
    }
}

impl GradientFunction for EinsumBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let operands: Vec<&Tensor> = self.saved_operands.iter().collect();
        self.next_fns
            .iter()
            .enumerate()
            .map(|(k, next)| {
                next.as_ref()
                    .map(|_| self.plan.operand_grad(&operands, grad_output, k))
                    .transpose()
            })
            .collect()
    }

    next_functions_impl!("EinsumBackward");
}
