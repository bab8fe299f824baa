//! Gradient Function Traits - Differentiable Operation Interface
//!
//! Every recorded operation stores a [`GradFn`] that maps the gradient of
//! its output to gradients of its inputs. Leaf variables own an
//! [`AccumulateGrad`] that sums incoming gradients into shared storage.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::fmt::Debug;
use std::sync::Arc;

use lamina_core::Result;
use lamina_tensor::Tensor;
use parking_lot::RwLock;

// =============================================================================
// Gradient Function Trait
// =============================================================================

/// Backward rule of one differentiable operation.
pub trait GradientFunction: Debug + Send + Sync {
    /// Gradients with respect to each input, given the output gradient.
    ///
    /// Entries line up with [`next_functions`](Self::next_functions);
    /// `None` means the input receives no gradient.
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>>;

    /// Name for debugging.
    fn name(&self) -> &'static str;

    /// Backward nodes of the inputs.
    fn next_functions(&self) -> &[Option<GradFn>];
}

// =============================================================================
// GradFn - Arc Wrapper
// =============================================================================

/// Stable node identifier (the address of the shared function).
pub type GradFnId = usize;

/// Reference-counted gradient function.
#[derive(Clone)]
pub struct GradFn {
    inner: Arc<dyn GradientFunction>,
}

impl GradFn {
    /// Wraps a gradient function.
    pub fn new<F: GradientFunction + 'static>(func: F) -> Self {
        Self {
            inner: Arc::new(func),
        }
    }

    /// Runs the backward rule.
    pub fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        self.inner.apply(grad_output)
    }

    /// Name of the wrapped function.
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Backward nodes of the inputs.
    pub fn next_functions(&self) -> &[Option<GradFn>] {
        self.inner.next_functions()
    }

    /// Identifier that survives cloning.
    pub fn id(&self) -> GradFnId {
        Arc::as_ptr(&self.inner).cast::<()>() as GradFnId
    }
}

impl Debug for GradFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GradFn({})", self.name())
    }
}

// =============================================================================
// AccumulateGrad - Leaf Node
// =============================================================================

/// Gradient storage shared between a leaf variable and its `AccumulateGrad`.
pub type GradAccumulator = Arc<RwLock<Option<Tensor>>>;

/// Backward node of a leaf variable.
pub struct AccumulateGrad {
    grad_accumulator: GradAccumulator,
}

impl AccumulateGrad {
    /// Creates an accumulator node over shared storage.
    pub fn new(grad_accumulator: GradAccumulator) -> Self {
        Self { grad_accumulator }
    }

    /// Adds `grad` to the stored gradient.
    pub fn accumulate(&self, grad: &Tensor) -> Result<()> {
        let mut guard = self.grad_accumulator.write();
        let next = match guard.as_ref() {
            Some(existing) => existing.add(grad)?,
            None => grad.clone(),
        };
        *guard = Some(next);
        Ok(())
    }
}

impl Debug for AccumulateGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulateGrad").finish()
    }
}

impl GradientFunction for AccumulateGrad {
    fn apply(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        self.accumulate(grad_output)?;
        Ok(vec![])
    }

    fn name(&self) -> &'static str {
        "AccumulateGrad"
    }

    fn next_functions(&self) -> &[Option<GradFn>] {
        &[]
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_grad() {
        let storage: GradAccumulator = Arc::new(RwLock::new(None));
        let acc = AccumulateGrad::new(Arc::clone(&storage));
        assert!(acc.next_functions().is_empty());

        let grad = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        acc.accumulate(&grad).unwrap();
        acc.accumulate(&grad).unwrap();
        assert_eq!(storage.read().as_ref().unwrap().to_vec(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_id_survives_clone() {
        let storage: GradAccumulator = Arc::new(RwLock::new(None));
        let f = GradFn::new(AccumulateGrad::new(storage));
        let g = f.clone();
        assert_eq!(f.id(), g.id());
        assert_eq!(g.name(), "AccumulateGrad");
    }
}
