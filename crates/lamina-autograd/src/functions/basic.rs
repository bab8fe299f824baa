//! Basic Gradient Functions - Arithmetic Operations
//!
//! Backward rules for add, sub, mul, div, scaling, pow and sqrt. Binary
//! rules reduce their gradients back over broadcast dimensions.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::Result;
use lamina_tensor::Tensor;

use crate::grad_fn::{GradFn, GradientFunction};

macro_rules! next_functions_impl {
    ($name:literal) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn next_functions(&self) -> &[Option<GradFn>] {
            &self.next_fns
        }
    };
}
pub(crate) use next_functions_impl;

// =============================================================================
// Add / Sub
// =============================================================================

/// d/dx(x + y) = 1, d/dy(x + y) = 1
#[derive(Debug)]
pub struct AddBackward {
    next_fns: Vec<Option<GradFn>>,
    lhs_shape: Vec<usize>,
    rhs_shape: Vec<usize>,
}

impl AddBackward {
    /// Creates a new `AddBackward`.
    pub fn new(
        lhs_grad_fn: Option<GradFn>,
        rhs_grad_fn: Option<GradFn>,
        lhs_shape: Vec<usize>,
        rhs_shape: Vec<usize>,
    ) -> Self {
        Self {
            next_fns: vec![lhs_grad_fn, rhs_grad_fn],
            lhs_shape,
            rhs_shape,
        }
    }
}

impl GradientFunction for AddBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![
            Some(grad_output.sum_to_shape(&self.lhs_shape)?),
            Some(grad_output.sum_to_shape(&self.rhs_shape)?),
        ])
    }

    next_functions_impl!("AddBackward");
}

/// d/dx(x - y) = 1, d/dy(x - y) = -1
#[derive(Debug)]
pub struct SubBackward {
    next_fns: Vec<Option<GradFn>>,
    lhs_shape: Vec<usize>,
    rhs_shape: Vec<usize>,
}

impl SubBackward {
    /// Creates a new `SubBackward`.
    pub fn new(
        lhs_grad_fn: Option<GradFn>,
        rhs_grad_fn: Option<GradFn>,
        lhs_shape: Vec<usize>,
        rhs_shape: Vec<usize>,
    ) -> Self {
        Self {
            next_fns: vec![lhs_grad_fn, rhs_grad_fn],
            lhs_shape,
            rhs_shape,
        }
    }
}

impl GradientFunction for SubBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![
            Some(grad_output.sum_to_shape(&self.lhs_shape)?),
            Some(grad_output.neg().sum_to_shape(&self.rhs_shape)?),
        ])
    }

    next_functions_impl!("SubBackward");
}

// =============================================================================
// Mul / Div
// =============================================================================

/// d/dx(x * y) = y, d/dy(x * y) = x
#[derive(Debug)]
pub struct MulBackward {
    next_fns: Vec<Option<GradFn>>,
    saved_lhs: Tensor,
    saved_rhs: Tensor,
}

impl MulBackward {
    /// Creates a new `MulBackward`.
    pub fn new(
        lhs_grad_fn: Option<GradFn>,
        rhs_grad_fn: Option<GradFn>,
        lhs: Tensor,
        rhs: Tensor,
    ) -> Self {
        Self {
            next_fns: vec![lhs_grad_fn, rhs_grad_fn],
            saved_lhs: lhs,
            saved_rhs: rhs,
        }
    }
}

impl GradientFunction for MulBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let grad_lhs = grad_output
            .mul(&self.saved_rhs)?
            .sum_to_shape(self.saved_lhs.shape())?;
        let grad_rhs = grad_output
            .mul(&self.saved_lhs)?
            .sum_to_shape(self.saved_rhs.shape())?;
        Ok(vec![Some(grad_lhs), Some(grad_rhs)])
    }

    next_functions_impl!("MulBackward");
}

/// d/dx(x / y) = 1/y, d/dy(x / y) = -x/y²
#[derive(Debug)]
pub struct DivBackward {
    next_fns: Vec<Option<GradFn>>,
    saved_lhs: Tensor,
    saved_rhs: Tensor,
}

impl DivBackward {
    /// Creates a new `DivBackward`.
    pub fn new(
        lhs_grad_fn: Option<GradFn>,
        rhs_grad_fn: Option<GradFn>,
        lhs: Tensor,
        rhs: Tensor,
    ) -> Self {
        Self {
            next_fns: vec![lhs_grad_fn, rhs_grad_fn],
            saved_lhs: lhs,
            saved_rhs: rhs,
        }
    }
}

impl GradientFunction for DivBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let grad_lhs = grad_output
            .div(&self.saved_rhs)?
            .sum_to_shape(self.saved_lhs.shape())?;
        let rhs_sq = self.saved_rhs.mul(&self.saved_rhs)?;
        let grad_rhs = grad_output
            .mul(&self.saved_lhs)?
            .div(&rhs_sq)?
            .neg()
            .sum_to_shape(self.saved_rhs.shape())?;
        Ok(vec![Some(grad_lhs), Some(grad_rhs)])
    }

    next_functions_impl!("DivBackward");
}

// =============================================================================
// Unary
// =============================================================================

/// d/dx(c * x + b) = c. Covers negation, scalar add and scalar multiply.
#[derive(Debug)]
pub struct ScaleBackward {
    next_fns: Vec<Option<GradFn>>,
    factor: f32,
}

impl ScaleBackward {
    /// Creates a new `ScaleBackward`.
    pub fn new(grad_fn: Option<GradFn>, factor: f32) -> Self {
        Self {
            next_fns: vec![grad_fn],
            factor,
        }
    }
}

impl GradientFunction for ScaleBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let grad = if self.factor == 1.0 {
            grad_output.clone()
        } else {
            grad_output.mul_scalar(self.factor)
        };
        Ok(vec![Some(grad)])
    }

    next_functions_impl!("ScaleBackward");
}

/// d/dx(x^n) = n * x^(n-1)
#[derive(Debug)]
pub struct PowBackward {
    next_fns: Vec<Option<GradFn>>,
    saved_input: Tensor,
    exponent: f32,
}

impl PowBackward {
    /// Creates a new `PowBackward`.
    pub fn new(grad_fn: Option<GradFn>, input: Tensor, exponent: f32) -> Self {
        Self {
            next_fns: vec![grad_fn],
            saved_input: input,
            exponent,
        }
    }
}

impl GradientFunction for PowBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let n = self.exponent;
        let local = self.saved_input.map(|x| n * x.powf(n - 1.0));
        Ok(vec![Some(grad_output.mul(&local)?)])
    }

    next_functions_impl!("PowBackward");
}

/// d/dx sqrt(x) = 1 / (2 sqrt(x))
#[derive(Debug)]
pub struct SqrtBackward {
    next_fns: Vec<Option<GradFn>>,
    saved_output: Tensor,
}

impl SqrtBackward {
    /// Creates a new `SqrtBackward` from the forward result.
    pub fn new(grad_fn: Option<GradFn>, output: Tensor) -> Self {
        Self {
            next_fns: vec![grad_fn],
            saved_output: output,
        }
    }
}

impl GradientFunction for SqrtBackward {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let local = self.saved_output.map(|y| 0.5 / y);
        Ok(vec![Some(grad_output.mul(&local)?)])
    }

    next_functions_impl!("SqrtBackward");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_backward_reduces_broadcast() {
        let f = AddBackward::new(None, None, vec![2, 3], vec![3]);
        let grads = f.apply(&Tensor::ones(&[2, 3])).unwrap();
        assert_eq!(grads[0].as_ref().unwrap().shape(), &[2, 3]);
        assert_eq!(grads[1].as_ref().unwrap().to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_div_backward() {
        let x = Tensor::from_vec(vec![6.0], &[1]).unwrap();
        let y = Tensor::from_vec(vec![2.0], &[1]).unwrap();
        let f = DivBackward::new(None, None, x, y);
        let grads = f.apply(&Tensor::ones(&[1])).unwrap();
        assert_eq!(grads[0].as_ref().unwrap().to_vec(), vec![0.5]);
        assert_eq!(grads[1].as_ref().unwrap().to_vec(), vec![-1.5]);
    }
}
