//! Lamina Core - Foundation Layer for the Lamina Layer Library
//!
//! Holds the pieces every other Lamina crate leans on: the unified error
//! type and the deterministic, splittable random keys that drive weight
//! initialization and the stochastic layers (dropout, random crop, zoom).
//!
//! # Example
//! ```rust
//! use lamina_core::PrngKey;
//!
//! let key = PrngKey::new(0);
//! let [k1, k2]: [PrngKey; 2] = key.split(2).try_into().unwrap();
//! assert_ne!(k1, k2);
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

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod random;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{Error, Result};
pub use random::PrngKey;

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::random::PrngKey;
}
