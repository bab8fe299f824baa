//! Reduction Gradient Functions
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::Result;
use lamina_tensor::Tensor;

use super::basic::next_functions_impl;
use crate::grad_fn::{GradFn, GradientFunction};

/// Backward of a sum (or, with `scale = 1/n`, a mean) over `axes`.
///
/// The output gradient is broadcast back over the reduced axes.
#[derive(Debug)]
pub struct SumAxesBackward {
    next_fns: Vec<Option<GradFn>>,
    input_shape: Vec<usize>,
    axes: Vec<usize>,
    scale: f32,
}

impl SumAxesBackward {
    /// Creates a new `SumAxesBackward`.
    pub fn new(grad_fn: Option<GradFn>, input_shape: Vec<usize>, axes: Vec<usize>, scale: f32) -> Self {
        Self {
            next_fns: vec![grad_fn],
            input_shape,
            axes,
            scale,
        }
    }
}

impl GradientFunction for SumAxesBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let kept: Vec<usize> = self
            .input_shape
            .iter()
            .enumerate()
            .map(|(i, &d)| if self.axes.contains(&i) { 1 } else { d })
            .collect();
        let grad = grad_output
            .reshape_to(&kept)?
            .broadcast_to(&self.input_shape)?
            .mul_scalar(self.scale);
        Ok(vec![Some(grad)])
    }

    next_functions_impl!("SumAxesBackward");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_backward_spreads_gradient() {
        let f = SumAxesBackward::new(None, vec![2, 2], vec![1], 0.5);
        let g = Tensor::from_vec(vec![2.0, 4.0], &[2]).unwrap();
        let grads = f.apply(&g).unwrap();
        assert_eq!(grads[0].as_ref().unwrap().to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
    }
}
