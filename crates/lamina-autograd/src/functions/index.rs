//! Indexing Gradient Functions - Gather, Select and Stack
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::Result;
use lamina_tensor::{GatherPlan, Tensor};

use super::basic::next_functions_impl;
use crate::grad_fn::{GradFn, GradientFunction};

/// Backward of a [`GatherPlan`]: its adjoint map.
#[derive(Debug)]
pub struct GatherBackward {
    next_fns: Vec<Option<GradFn>>,
    plan: GatherPlan,
}

impl GatherBackward {
    /// Creates a new `GatherBackward`.
    pub fn new(grad_fn: Option<GradFn>, plan: GatherPlan) -> Self {
        Self {
            next_fns: vec![grad_fn],
            plan,
        }
    }
}

impl GradientFunction for GatherBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(self.plan.transpose_apply(grad_output)?)])
    }

    next_functions_impl!("GatherBackward");
}

/// Scatters the gradient of one selected slice back into zeros.
#[derive(Debug)]
pub struct SelectBackward {
    next_fns: Vec<Option<GradFn>>,
    input_shape: Vec<usize>,
    axis: usize,
    index: usize,
}

impl SelectBackward {
    /// Creates a new `SelectBackward`.
    pub fn new(grad_fn: Option<GradFn>, input_shape: Vec<usize>, axis: usize, index: usize) -> Self {
        Self {
            next_fns: vec![grad_fn],
            input_shape,
            axis,
            index,
        }
    }
}

impl GradientFunction for SelectBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let size = self.input_shape[self.axis];
        let outer: usize = self.input_shape[..self.axis].iter().product();
        let inner: usize = self.input_shape[self.axis + 1..].iter().product();
        let g = grad_output.as_slice();

        let mut out = vec![0.0f32; outer * size * inner];
        for o in 0..outer {
            let dst = (o * size + self.index) * inner;
            out[dst..dst + inner].copy_from_slice(&g[o * inner..(o + 1) * inner]);
        }
        Ok(vec![Some(Tensor::from_vec(out, &self.input_shape)?)])
    }

    next_functions_impl!("SelectBackward");
}

/// Splits the gradient of a stack back into its pieces.
#[derive(Debug)]
pub struct StackBackward {
    next_fns: Vec<Option<GradFn>>,
    axis: usize,
}

impl StackBackward {
    /// Creates a new `StackBackward`, one next function per stacked input.
    pub fn new(next_fns: Vec<Option<GradFn>>, axis: usize) -> Self {
        Self { next_fns, axis }
    }
}

impl GradientFunction for StackBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        self.next_fns
            .iter()
            .enumerate()
            .map(|(i, next)| {
                next.as_ref()
                    .map(|_| grad_output.select(self.axis, i))
                    .transpose()
            })
            .collect()
    }

    next_functions_impl!("StackBackward");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backward_scatters() {
        let f = SelectBackward::new(None, vec![2, 3], 1, 2);
        let g = Tensor::from_vec(vec![5.0, 7.0], &[2]).unwrap();
        let grads = f.apply(&g).unwrap();
        assert_eq!(
            grads[0].as_ref().unwrap().to_vec(),
            vec![0.0, 0.0, 5.0, 0.0, 0.0, 7.0]
        );
    }
}
