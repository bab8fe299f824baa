//! Tensor - Core N-Dimensional Array Type
//!
//! `Tensor` is an immutable, contiguous, reference-counted array of `f32`.
//! Cloning is cheap (the buffer is shared); every operation returns a new
//! tensor. Layers never mutate arrays in place, which keeps a layer a plain
//! record of weights plus hyperparameters.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::fmt;
use std::sync::Arc;

use lamina_core::error::{Error, Result};

use crate::shape::{self, numel, ravel_index, unravel_index, Shape};

// =============================================================================
// Tensor Struct
// =============================================================================

/// An N-dimensional array of `f32` values.
#[derive(Clone)]
pub struct Tensor {
    /// Row-major element buffer (shared between clones).
    pub(crate) data: Arc<Vec<f32>>,
    /// Dimensions.
    pub(crate) shape: Shape,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a tensor from a vector with the given shape.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        if data.len() != numel(shape) {
            return Err(Error::shape_mismatch(&[data.len()], shape));
        }
        Ok(Self {
            data: Arc::new(data),
            shape: Shape::from_slice(shape),
        })
    }

    /// Creates a tensor from a slice with the given shape.
    pub fn from_slice(data: &[f32], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Creates a 0-dimensional tensor.
    pub fn scalar(value: f32) -> Self {
        Self {
            data: Arc::new(vec![value]),
            shape: Shape::new(),
        }
    }

    /// Builds a tensor from a buffer whose length is known to match `shape`.
    pub(crate) fn from_parts(data: Vec<f32>, shape: &[usize]) -> Self {
        debug_assert_eq!(data.len(), numel(shape));
        Self {
            data: Arc::new(data),
            shape: Shape::from_slice(shape),
        }
    }

    /// Creates a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        crate::creation::zeros(shape)
    }

    /// Creates a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        crate::creation::ones(shape)
    }

    /// Creates a tensor filled with a constant value.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        crate::creation::full(shape, value)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the tensor has zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the size of one dimension (negative indexing allowed).
    pub fn size(&self, axis: i64) -> Result<usize> {
        let idx = shape::normalize_axis(axis, self.ndim())?;
        Ok(self.shape[idx])
    }

    // =========================================================================
    // Data Access
    // =========================================================================

    /// Returns the elements as a row-major slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns a copy of the elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.as_ref().clone()
    }

    /// Returns the element at the given indices.
    pub fn get(&self, indices: &[usize]) -> Result<f32> {
        if indices.len() != self.ndim() {
            return Err(Error::invalid_operation(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        for (&idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return Err(Error::IndexOutOfBounds {
                    index: idx,
                    size: dim,
                });
            }
        }
        Ok(self.data[ravel_index(indices, &self.shape)])
    }

    /// Returns the value of a single-element tensor.
    pub fn item(&self) -> Result<f32> {
        if self.numel() != 1 {
            return Err(Error::invalid_operation(
                "item() only works on single-element tensors",
            ));
        }
        Ok(self.data[0])
    }

    // =========================================================================
    // Shape Operations
    // =========================================================================

    /// Returns a tensor with the same data and a new shape.
    ///
    /// One dimension may be `-1` and is inferred.
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Self> {
        let shape = shape::reshape(&self.shape, new_shape)?;
        Ok(Self {
            data: Arc::clone(&self.data),
            shape,
        })
    }

    /// Reshapes to a fully specified shape.
    pub fn reshape_to(&self, new_shape: &[usize]) -> Result<Self> {
        if numel(new_shape) != self.numel() {
            return Err(Error::shape_mismatch(&self.shape, new_shape));
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            shape: Shape::from_slice(new_shape),
        })
    }

    /// Returns a tensor flattened to one dimension.
    #[must_use]
    pub fn flatten(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            shape: Shape::from_slice(&[self.numel()]),
        }
    }

    /// Inserts a dimension of size 1 at `axis` (`0..=ndim`).
    pub fn unsqueeze(&self, axis: usize) -> Result<Self> {
        if axis > self.ndim() {
            return Err(Error::InvalidDimension {
                index: axis as i64,
                ndim: self.ndim() + 1,
            });
        }
        let mut shape = self.shape.clone();
        shape.insert(axis, 1);
        Ok(Self {
            data: Arc::clone(&self.data),
            shape,
        })
    }

    /// Removes the given size-1 axes.
    pub fn squeeze_axes(&self, axes: &[usize]) -> Result<Self> {
        for &a in axes {
            if a >= self.ndim() || self.shape[a] != 1 {
                return Err(Error::invalid_operation(format!(
                    "cannot squeeze axis {a} of shape {:?}",
                    self.shape()
                )));
            }
        }
        let shape: Shape = self
            .shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect();
        Ok(Self {
            data: Arc::clone(&self.data),
            shape,
        })
    }

    /// Reorders dimensions; `dims[i]` is the source axis of output axis `i`.
    pub fn permute(&self, dims: &[usize]) -> Result<Self> {
        let ndim = self.ndim();
        if dims.len() != ndim {
            return Err(Error::invalid_operation(format!(
                "Expected {} dimensions, got {}",
                ndim,
                dims.len()
            )));
        }
        let mut seen = vec![false; ndim];
        for &d in dims {
            if d >= ndim {
                return Err(Error::InvalidDimension {
                    index: d as i64,
                    ndim,
                });
            }
            if seen[d] {
                return Err(Error::invalid_operation("Duplicate dimension in permute"));
            }
            seen[d] = true;
        }

        let new_shape: Vec<usize> = dims.iter().map(|&d| self.shape[d]).collect();
        let src_strides = shape::contiguous_strides(&self.shape);
        let mut out = Vec::with_capacity(self.numel());
        for linear in 0..self.numel() {
            let idx = unravel_index(linear, &new_shape);
            let src: usize = idx
                .iter()
                .zip(dims.iter())
                .map(|(&i, &d)| i * src_strides[d])
                .sum();
            out.push(self.data[src]);
        }
        Ok(Self::from_parts(out, &new_shape))
    }

    /// Swaps two dimensions.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        let mut dims: Vec<usize> = (0..self.ndim()).collect();
        if dim0 >= dims.len() || dim1 >= dims.len() {
            return Err(Error::InvalidDimension {
                index: dim0.max(dim1) as i64,
                ndim: self.ndim(),
            });
        }
        dims.swap(dim0, dim1);
        self.permute(&dims)
    }

    /// Materializes this tensor broadcast to `target`.
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Self> {
        let joined = shape::broadcast_shape(&self.shape, target)?;
        if joined.as_slice() != target {
            return Err(Error::BroadcastError {
                shape1: self.shape.to_vec(),
                shape2: target.to_vec(),
            });
        }
        if self.shape.as_slice() == target {
            return Ok(self.clone());
        }
        let total = numel(target);
        let out = (0..total)
            .map(|i| {
                let idx = unravel_index(i, target);
                self.data[shape::broadcast_source_index(&idx, &self.shape)]
            })
            .collect();
        Ok(Self::from_parts(out, target))
    }

    /// Returns true when shapes match and all elements are within `atol`.
    #[must_use]
    pub fn allclose(&self, other: &Tensor, atol: f32) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= atol)
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.numel() <= 16 {
            f.debug_struct("Tensor")
                .field("shape", &self.shape.as_slice())
                .field("data", &self.data.as_slice())
                .finish()
        } else {
            f.debug_struct("Tensor")
                .field("shape", &self.shape.as_slice())
                .finish_non_exhaustive()
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
    fn test_from_vec() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.numel(), 6);
        assert!(Tensor::from_vec(vec![1.0; 5], &[2, 3]).is_err());
    }

    #[test]
    fn test_get_and_item() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.get(&[1, 0]).unwrap(), 3.0);
        assert!(t.get(&[2, 0]).is_err());
        assert_eq!(Tensor::scalar(5.0).item().unwrap(), 5.0);
        assert!(t.item().is_err());
    }

    #[test]
    fn test_reshape_shares_data() {
        let t = Tensor::from_vec((0..6).map(|v| v as f32).collect(), &[2, 3]).unwrap();
        let r = t.reshape(&[3, -1]).unwrap();
        assert_eq!(r.shape(), &[3, 2]);
        assert_eq!(r.to_vec(), t.to_vec());
    }

    #[test]
    fn test_permute() {
        let t = Tensor::from_vec((0..6).map(|v| v as f32).collect(), &[2, 3]).unwrap();
        let p = t.permute(&[1, 0]).unwrap();
        assert_eq!(p.shape(), &[3, 2]);
        assert_eq!(p.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(t.permute(&[0, 0]).is_err());
    }

    #[test]
    fn test_squeeze_unsqueeze() {
        let t = Tensor::zeros(&[2, 3]);
        let u = t.unsqueeze(1).unwrap();
        assert_eq!(u.shape(), &[2, 1, 3]);
        assert_eq!(u.squeeze_axes(&[1]).unwrap().shape(), &[2, 3]);
        assert!(u.squeeze_axes(&[0]).is_err());
    }

    #[test]
    fn test_broadcast_to() {
        let t = Tensor::from_vec(vec![1.0, 2.0], &[2, 1]).unwrap();
        let b = t.broadcast_to(&[2, 3]).unwrap();
        assert_eq!(b.to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert!(t.broadcast_to(&[3, 3]).is_err());
    }
}
