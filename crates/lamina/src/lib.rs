//! # Lamina - Composable Neural Network Layers
//!
//! Lamina bundles the layer library with the tensor and autograd crates it
//! is built on:
//!
//! - **Tensors**: dense `f32` arrays with einsum, gather plans and resizing
//! - **Autograd**: reverse-mode differentiation over [`Variable`]s
//! - **Layers**: linear variants, normalization, reshape and dropout
//! - **Random keys**: every random layer draws from an explicit [`PrngKey`]
//! - **State trees**: [`tree_state`] and [`tree_eval`] for running
//!   statistics and inference-time models
//!
//! # Quick Start
//!
//! ```rust
//! use lamina::prelude::*;
//!
//! let key = PrngKey::new(42);
//! let model = Sequential::new()
//!     .add(Linear::new(3, 16, &key).unwrap())
//!     .add(LayerNorm::new(&[16], &key).unwrap())
//!     .add(Linear::new(16, 1, &key.fold_in(1)).unwrap());
//!
//! let x = Variable::new(Tensor::ones(&[5, 3]), true);
//! let y = model.forward(&x).unwrap();
//! y.sum().unwrap().backward().unwrap();
//! assert!(x.grad().is_some());
//! ```
//!
//! @version 0.1.0
//! @author Lamina Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub use lamina_autograd as autograd;
pub use lamina_nn as nn;
pub use lamina_tensor as tensor;

pub use lamina_autograd::Variable;
pub use lamina_core::{Error, PrngKey, Result};
pub use lamina_nn::{tree_eval, tree_state, Module, State};
pub use lamina_tensor::Tensor;

// =============================================================================
// Prelude
// =============================================================================

/// Everything needed to build, train and evaluate a model.
pub mod prelude {
    pub use lamina_autograd::{no_grad, Variable};
    pub use lamina_core::{Error, PrngKey, Result};
    pub use lamina_nn::functional;
    pub use lamina_nn::layers::*;
    pub use lamina_nn::{
        tree_eval, tree_state, Batched, Init, Module, Parameter, Sequential, State,
    };
    pub use lamina_tensor::{ResizeMethod, Tensor};
}
