//! Lamina Autograd - Reverse-Mode Automatic Differentiation
//!
//! Records operations on [`Variable`]s into a dynamic graph and
//! backpropagates gradients into leaf variables. Every operation the layer
//! library needs is differentiable here, including einsum contractions and
//! [`GatherPlan`](lamina_tensor::GatherPlan) index maps.
//!
//! # Example
//! ```rust
//! use lamina_autograd::Variable;
//! use lamina_tensor::Tensor;
//!
//! let x = Variable::new(Tensor::from_vec(vec![3.0], &[1]).unwrap(), true);
//! x.pow(2.0).backward().unwrap();
//! assert_eq!(x.grad().unwrap().to_vec(), vec![6.0]);
//! ```
//!
//! @version 0.1.0
//! @author Lamina Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::float_cmp)]

// =============================================================================
// Modules
// =============================================================================

pub mod backward;
pub mod functions;
pub mod grad_fn;
pub mod no_grad;
pub mod variable;

// =============================================================================
// Re-exports
// =============================================================================

pub use backward::{gradcheck, numerical_gradient};
pub use grad_fn::{GradFn, GradientFunction};
pub use no_grad::{is_grad_enabled, no_grad, NoGradGuard};
pub use variable::Variable;

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::no_grad::{no_grad, NoGradGuard};
    pub use crate::variable::Variable;
}
