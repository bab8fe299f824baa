//! Error Types - Lamina Error Handling
//!
//! One error enum shared by the tensor, autograd and layer crates, so a
//! layer's `forward` can surface a shape problem from three levels down
//! without conversion boilerplate.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for Lamina operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Shape mismatch between tensors.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Invalid dimension index.
    #[error("Invalid dimension: index {index} for tensor with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid dimension index.
        index: i64,
        /// Number of dimensions in the tensor.
        ndim: usize,
    },

    /// Index out of bounds.
    #[error("Index out of bounds: index {index} for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index.
        index: usize,
        /// The size of the dimension.
        size: usize,
    },

    /// Broadcasting failed between shapes.
    #[error("Cannot broadcast shapes {shape1:?} and {shape2:?}")]
    BroadcastError {
        /// The first shape.
        shape1: Vec<usize>,
        /// The second shape.
        shape2: Vec<usize>,
    },

    /// Operation not supported on an empty tensor.
    #[error("Operation not supported on empty tensor")]
    EmptyTensor,

    /// Malformed einsum subscripts.
    #[error("Invalid einsum spec '{spec}': {message}")]
    Einsum {
        /// The offending subscript string.
        spec: String,
        /// What is wrong with it.
        message: String,
    },

    /// Invalid operation for the given tensor.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A layer hyperparameter or call argument failed validation.
    #[error("Invalid argument `{name}`: {message}")]
    InvalidArgument {
        /// Name of the argument.
        name: String,
        /// Description of the violated constraint.
        message: String,
    },

    /// A lazily initialized layer was called before its shapes were known.
    #[error("{layer} is not initialized; call `materialize` with a sample input first")]
    Uninitialized {
        /// Name of the layer.
        layer: &'static str,
    },

    /// Gradient computation error.
    #[error("Gradient error: {message}")]
    GradientError {
        /// Description of the gradient error.
        message: String,
    },
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for Lamina operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a new shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates a new invalid operation error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a new invalid argument error.
    #[must_use]
    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a new einsum error.
    #[must_use]
    pub fn einsum(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Einsum {
            spec: spec.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::shape_mismatch(&[2, 3], &[2, 4]);
        assert!(err.to_string().contains("Shape mismatch"));
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::invalid_argument("groups", "10 must be divisible by 3");
        assert_eq!(
            err.to_string(),
            "Invalid argument `groups`: 10 must be divisible by 3"
        );
    }

    #[test]
    fn test_uninitialized_display() {
        let err = Error::Uninitialized { layer: "Linear" };
        assert!(err.to_string().starts_with("Linear is not initialized"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::EmptyTensor, Error::EmptyTensor);
    }
}
