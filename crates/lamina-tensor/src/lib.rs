//! Lamina Tensor - Dense Arrays for the Lamina Layer Library
//!
//! Provides the immutable `f32` [`Tensor`] the layers compute with, plus the
//! handful of structured operations the layers are built from: broadcasting
//! arithmetic and reductions, a general [`einsum`](ops::einsum::einsum),
//! [`GatherPlan`] index maps for crop / pad / resample, and the resize
//! kernels.
//!
//! # Example
//! ```rust
//! use lamina_tensor::{arange, einsum, Tensor};
//!
//! let x = arange(0.0, 6.0).reshape(&[2, 3]).unwrap();
//! let w = Tensor::ones(&[3, 4]);
//! let y = einsum("...a,ab->...b", &[&x, &w]).unwrap();
//! assert_eq!(y.shape(), &[2, 4]);
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
#![allow(clippy::similar_names)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::float_cmp)]

// =============================================================================
// Modules
// =============================================================================

pub mod creation;
pub mod ops;
pub mod shape;
pub mod tensor;

// =============================================================================
// Re-exports
// =============================================================================

pub use creation::{arange, eye, full, linspace, ones, rand_uniform, randn, truncated_normal, zeros};
pub use ops::einsum::{einsum, EinsumPlan};
pub use ops::gather::GatherPlan;
pub use ops::resize::{resize, resize_plans, ResizeMethod};
pub use shape::Shape;
pub use tensor::Tensor;

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::creation::{arange, ones, zeros};
    pub use crate::ops::einsum::einsum;
    pub use crate::ops::gather::GatherPlan;
    pub use crate::ops::resize::ResizeMethod;
    pub use crate::tensor::Tensor;
}
