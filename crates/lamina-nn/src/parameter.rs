//! Parameter - Learnable Parameter Wrapper
//!
//! A `Parameter` is a named, shared [`Variable`] that requires gradients.
//! Layers hand out clones of their parameters; all clones see the same
//! data and gradient.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::sync::Arc;

use lamina_autograd::Variable;
use lamina_tensor::Tensor;
use parking_lot::RwLock;

// =============================================================================
// Parameter
// =============================================================================

/// A learnable array of a layer.
#[derive(Clone)]
pub struct Parameter {
    data: Arc<RwLock<Variable>>,
    name: String,
}

impl Parameter {
    /// Creates an unnamed parameter.
    pub fn new(data: Tensor, requires_grad: bool) -> Self {
        Self::named("", data, requires_grad)
    }

    /// Creates a parameter with a name.
    pub fn named(name: impl Into<String>, data: Tensor, requires_grad: bool) -> Self {
        Self {
            data: Arc::new(RwLock::new(Variable::new(data, requires_grad))),
            name: name.into(),
        }
    }

    /// Returns the parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the variable used in forward passes.
    pub fn variable(&self) -> Variable {
        self.data.read().clone()
    }

    /// Returns the tensor data.
    pub fn data(&self) -> Tensor {
        self.data.read().data()
    }

    /// Returns the shape.
    pub fn shape(&self) -> Vec<usize> {
        self.data.read().shape()
    }

    /// Returns the number of elements.
    pub fn numel(&self) -> usize {
        self.data.read().numel()
    }

    /// Returns whether gradients are tracked.
    pub fn requires_grad(&self) -> bool {
        self.data.read().requires_grad()
    }

    /// Returns the accumulated gradient.
    pub fn grad(&self) -> Option<Tensor> {
        self.data.read().grad()
    }

    /// Clears the gradient.
    pub fn zero_grad(&self) {
        self.data.read().zero_grad();
    }

    /// Replaces the data with a fresh leaf, dropping any gradient.
    pub fn update_data(&self, new_data: Tensor) {
        let mut guard = self.data.write();
        let requires_grad = guard.requires_grad();
        *guard = Variable::new(new_data, requires_grad);
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_gradient() {
        let p = Parameter::named("weight", Tensor::ones(&[2]), true);
        let q = p.clone();
        p.variable().mul_scalar(3.0).sum().unwrap().backward().unwrap();
        assert_eq!(q.grad().unwrap().to_vec(), vec![3.0, 3.0]);
        q.zero_grad();
        assert!(p.grad().is_none());
    }

    #[test]
    fn test_update_data() {
        let p = Parameter::new(Tensor::zeros(&[3]), true);
        p.update_data(Tensor::ones(&[3]));
        assert_eq!(p.data().to_vec(), vec![1.0; 3]);
        assert!(p.requires_grad());
        assert_eq!(p.name(), "");
    }
}
