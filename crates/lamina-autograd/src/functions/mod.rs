//! Differentiable Functions - Backward Rules
//!
//! One struct per recorded operation, each implementing
//! [`GradientFunction`](crate::grad_fn::GradientFunction).
//!
//! @version 0.1.0
//! @author Lamina Development Team

mod activation;
mod basic;
mod index;
mod linalg;
mod reduce;
mod shape;

pub use activation::*;
pub use basic::*;
pub use index::*;
pub use linalg::*;
pub use reduce::*;
pub use shape::*;
