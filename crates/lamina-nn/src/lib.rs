//! Lamina NN - Neural Network Layer Library
//!
//! Layers built on [`lamina_autograd`] variables. Weights are created
//! eagerly from a [`PrngKey`](lamina_core::PrngKey) or lazily on the first
//! sample input, and training-only behaviour is switched off by converting a
//! whole module tree with [`tree_eval`].
//!
//! # Key Components
//!
//! - **Module trait**: forward with an optional key and state
//! - **Linear layers**: Linear, Bilinear, Multilinear, GeneralLinear, Mlp
//! - **Normalization**: LayerNorm, GroupNorm, InstanceNorm, BatchNorm
//! - **Reshape**: Resize, Upsample, Crop, Pad, RandomZoom, Flatten
//! - **Dropout**: Dropout, channel dropout and RandomApply
//! - **State**: [`tree_state`] builds the running statistics a model needs
//!
//! # Example
//!
//! ```rust
//! use lamina_nn::prelude::*;
//! use lamina_tensor::Tensor;
//!
//! let key = PrngKey::new(0);
//! let model = Sequential::new()
//!     .add(Linear::new(4, 8, &key).unwrap())
//!     .add(BatchNorm::new(8, &key).unwrap())
//!     .add(Dropout::new(0.5).unwrap());
//!
//! let x = Variable::from_tensor(Tensor::ones(&[2, 4]));
//! let state = tree_state(&model, None).unwrap();
//! let (y, _state) = model
//!     .forward_with_key_and_state(&x, &key, &state)
//!     .unwrap();
//! assert_eq!(y.shape(), vec![2, 8]);
//!
//! let eval = tree_eval(Box::new(model));
//! assert_eq!(eval.forward(&x).unwrap().shape(), vec![2, 8]);
//! ```
//!
//! @version 0.1.0
//! @author Lamina Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// ML/tensor-specific allowances
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
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::float_cmp)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::new_ret_no_self)]

// =============================================================================
// Module Declarations
// =============================================================================

pub mod functional;
pub mod init;
pub mod layers;
pub mod module;
pub mod parameter;
pub mod sequential;

// =============================================================================
// Re-exports
// =============================================================================

pub use init::Init;
pub use module::{tree_eval, tree_state, IntoDynModule, Module, State};
pub use parameter::Parameter;
pub use sequential::{Batched, Sequential};

// Layer re-exports
pub use layers::{
    Activation, BatchNorm, BatchNormOptions, BatchNormState, Bilinear, CenterCrop1D, CenterCrop2D,
    CenterCrop3D, Crop1D, Crop2D, Crop3D, Dropout, Dropout1D, Dropout2D, Dropout3D, EvalNorm,
    Flatten, GeneralLinear, GroupNorm, Identity, InstanceNorm, LayerNorm, Linear, LinearOptions,
    Mlp, Multilinear, NormOptions, Pad1D, Pad2D, Pad3D, Padding, RandomApply, RandomCrop1D,
    RandomCrop2D, RandomCrop3D, RandomZoom1D, RandomZoom2D, RandomZoom3D, Resize1D, Resize2D,
    Resize3D, Unflatten, Upsample1D, Upsample2D, Upsample3D,
};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for building models.
pub mod prelude {
    pub use crate::{
        functional, tree_eval, tree_state, BatchNorm, Dropout, GroupNorm, Identity, Init,
        LayerNorm, Linear, Mlp, Module, Parameter, Sequential, State,
    };
    pub use lamina_autograd::Variable;
    pub use lamina_core::{Error, PrngKey, Result};
}
