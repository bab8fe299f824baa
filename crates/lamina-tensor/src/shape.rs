//! Shape Utilities - Tensor Dimension Management
//!
//! Shapes, row-major strides, broadcasting and axis normalization. Tensors
//! in Lamina are always contiguous, so strides only ever exist transiently
//! while indexing.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use smallvec::SmallVec;

use lamina_core::error::{Error, Result};

// =============================================================================
// Type Aliases
// =============================================================================

/// Shape type - dimensions of a tensor.
/// Uses `SmallVec` for stack allocation of small shapes (up to 6 dimensions).
pub type Shape = SmallVec<[usize; 6]>;

// =============================================================================
// Shape Utilities
// =============================================================================

/// Computes the total number of elements from a shape.
#[must_use]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Computes row-major (C-order) strides for a shape.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Converts a linear index to multi-dimensional indices.
#[must_use]
pub fn unravel_index(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];
    for i in (0..shape.len()).rev() {
        let dim = shape[i].max(1);
        indices[i] = linear % dim;
        linear /= dim;
    }
    indices
}

/// Converts multi-dimensional indices to a linear row-major index.
#[must_use]
pub fn ravel_index(indices: &[usize], shape: &[usize]) -> usize {
    debug_assert_eq!(indices.len(), shape.len());
    indices
        .iter()
        .zip(shape.iter())
        .fold(0, |acc, (&idx, &dim)| acc * dim + idx)
}

/// Normalizes a possibly negative axis into `0..ndim`.
pub fn normalize_axis(axis: i64, ndim: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + ndim as i64 } else { axis };
    if resolved < 0 || resolved >= ndim as i64 {
        return Err(Error::InvalidDimension { index: axis, ndim });
    }
    Ok(resolved as usize)
}

/// Normalizes a list of axes, rejecting duplicates. The result is sorted.
pub fn normalize_axes(axes: &[i64], ndim: usize) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let a = normalize_axis(axis, ndim)?;
        if out.contains(&a) {
            return Err(Error::invalid_operation(format!(
                "axis {axis} repeated in {axes:?}"
            )));
        }
        out.push(a);
    }
    out.sort_unstable();
    Ok(out)
}

// =============================================================================
// Broadcasting
// =============================================================================

/// Computes the broadcast shape of two shapes following `NumPy` rules.
pub fn broadcast_shape(shape1: &[usize], shape2: &[usize]) -> Result<Shape> {
    let ndim = shape1.len().max(shape2.len());
    let mut result = Shape::from_elem(0, ndim);

    for i in 0..ndim {
        let d1 = if i < ndim - shape1.len() { 1 } else { shape1[i - (ndim - shape1.len())] };
        let d2 = if i < ndim - shape2.len() { 1 } else { shape2[i - (ndim - shape2.len())] };

        result[i] = if d1 == d2 || d2 == 1 {
            d1
        } else if d1 == 1 {
            d2
        } else {
            return Err(Error::BroadcastError {
                shape1: shape1.to_vec(),
                shape2: shape2.to_vec(),
            });
        };
    }

    Ok(result)
}

/// Maps an index in a broadcast result back to the linear index of a source
/// tensor whose shape broadcasts to `target`.
#[must_use]
pub fn broadcast_source_index(target_indices: &[usize], source_shape: &[usize]) -> usize {
    let offset = target_indices.len() - source_shape.len();
    let mut linear = 0;
    for (i, &dim) in source_shape.iter().enumerate() {
        let idx = if dim == 1 { 0 } else { target_indices[offset + i] };
        linear = linear * dim + idx;
    }
    linear
}

// =============================================================================
// Reshape
// =============================================================================

/// Resolves a target shape that may contain a single `-1`.
pub fn reshape(old_shape: &[usize], new_shape: &[isize]) -> Result<Shape> {
    let old_numel = numel(old_shape);
    let mut inferred = None;
    let mut known = 1usize;

    for (i, &dim) in new_shape.iter().enumerate() {
        if dim == -1 {
            if inferred.is_some() {
                return Err(Error::invalid_operation("Only one -1 allowed in reshape"));
            }
            inferred = Some(i);
        } else if dim < 0 {
            return Err(Error::invalid_operation(format!(
                "Invalid dimension {dim} in reshape"
            )));
        } else {
            known *= dim as usize;
        }
    }

    let mut result: Shape = new_shape.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = inferred {
        if known == 0 || old_numel % known != 0 {
            return Err(Error::invalid_operation(format!(
                "Cannot reshape {old_shape:?} into {new_shape:?}"
            )));
        }
        result[i] = old_numel / known;
    }

    if numel(&result) != old_numel {
        return Err(Error::shape_mismatch(old_shape, &result));
    }
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn test_ravel_unravel() {
        let shape = [2, 3, 4];
        for i in 0..24 {
            assert_eq!(ravel_index(&unravel_index(i, &shape), &shape), i);
        }
    }

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape(&[2, 1, 4], &[3, 1]).unwrap().as_slice(), &[2, 3, 4]);
        assert!(broadcast_shape(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(0, 3).unwrap(), 0);
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
    }

    #[test]
    fn test_normalize_axes_rejects_duplicates() {
        assert_eq!(normalize_axes(&[-1, 0], 3).unwrap(), vec![0, 2]);
        assert!(normalize_axes(&[2, -1], 3).is_err());
    }

    #[test]
    fn test_reshape_infer() {
        assert_eq!(reshape(&[2, 6], &[3, -1]).unwrap().as_slice(), &[3, 4]);
        assert!(reshape(&[2, 6], &[5, -1]).is_err());
        assert!(reshape(&[2, 6], &[-1, -1]).is_err());
    }
}
