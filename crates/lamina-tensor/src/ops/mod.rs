//! Tensor Operations - Arithmetic, Reductions and Linear Algebra
//!
//! Elementwise arithmetic follows `NumPy` broadcasting. Reductions take
//! already-normalized axes; callers resolve negative axes first with
//! [`crate::shape::normalize_axes`].
//!
//! @version 0.1.0
//! @author Lamina Development Team

pub mod einsum;
pub mod gather;
pub mod resize;

use lamina_core::error::{Error, Result};

use crate::shape::{broadcast_shape, broadcast_source_index, numel, unravel_index};
use crate::tensor::Tensor;

// =============================================================================
// Elementwise Operations
// =============================================================================

impl Tensor {
    /// Applies `f` to every element.
    #[must_use]
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Tensor {
        let data = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_parts(data, &self.shape)
    }

    /// Combines two tensors elementwise after broadcasting.
    pub fn zip_with<F: Fn(f32, f32) -> f32>(&self, other: &Tensor, f: F) -> Result<Tensor> {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Ok(Tensor::from_parts(data, &self.shape));
        }

        let out_shape = broadcast_shape(&self.shape, &other.shape)?;
        let data = (0..numel(&out_shape))
            .map(|i| {
                let idx = unravel_index(i, &out_shape);
                let a = self.data[broadcast_source_index(&idx, &self.shape)];
                let b = other.data[broadcast_source_index(&idx, &other.shape)];
                f(a, b)
            })
            .collect();
        Ok(Tensor::from_parts(data, &out_shape))
    }

    /// Elementwise addition.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise subtraction.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Elementwise multiplication.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Elementwise division.
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |a, b| a / b)
    }

    /// Negation.
    #[must_use]
    pub fn neg(&self) -> Tensor {
        self.map(|x| -x)
    }

    /// Adds a scalar.
    #[must_use]
    pub fn add_scalar(&self, value: f32) -> Tensor {
        self.map(|x| x + value)
    }

    /// Multiplies by a scalar.
    #[must_use]
    pub fn mul_scalar(&self, value: f32) -> Tensor {
        self.map(|x| x * value)
    }

    /// Raises every element to `exponent`.
    #[must_use]
    pub fn powf(&self, exponent: f32) -> Tensor {
        self.map(|x| x.powf(exponent))
    }

    /// Square root.
    #[must_use]
    pub fn sqrt(&self) -> Tensor {
        self.map(f32::sqrt)
    }

    /// Reciprocal square root.
    #[must_use]
    pub fn rsqrt(&self) -> Tensor {
        self.map(|x| 1.0 / x.sqrt())
    }

    /// Maximum with zero.
    #[must_use]
    pub fn relu(&self) -> Tensor {
        self.map(|x| x.max(0.0))
    }

    /// Hyperbolic tangent.
    #[must_use]
    pub fn tanh(&self) -> Tensor {
        self.map(f32::tanh)
    }
}

// =============================================================================
// Reductions
// =============================================================================

impl Tensor {
    /// Sum of all elements.
    #[must_use]
    pub fn sum_all(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Mean of all elements.
    pub fn mean_all(&self) -> Result<f32> {
        if self.is_empty() {
            return Err(Error::EmptyTensor);
        }
        Ok(self.sum_all() / self.numel() as f32)
    }

    /// Sums over `axes` (sorted, non-negative).
    pub fn sum_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tensor> {
        for &a in axes {
            if a >= self.ndim() {
                return Err(Error::InvalidDimension {
                    index: a as i64,
                    ndim: self.ndim(),
                });
            }
        }

        let kept_shape: Vec<usize> = self
            .shape
            .iter()
            .enumerate()
            .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
            .collect();
        let mut out = vec![0.0f32; numel(&kept_shape)];

        for (linear, &value) in self.data.iter().enumerate() {
            let idx = unravel_index(linear, &self.shape);
            let target = broadcast_source_index(&idx, &kept_shape);
            out[target] += value;
        }

        if keepdims {
            Ok(Tensor::from_parts(out, &kept_shape))
        } else {
            let squeezed: Vec<usize> = self
                .shape
                .iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, &d)| d)
                .collect();
            Ok(Tensor::from_parts(out, &squeezed))
        }
    }

    /// Mean over `axes` (sorted, non-negative).
    pub fn mean_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tensor> {
        let count: usize = axes.iter().map(|&a| self.shape.get(a).copied().unwrap_or(1)).product();
        if count == 0 {
            return Err(Error::EmptyTensor);
        }
        Ok(self.sum_axes(axes, keepdims)?.mul_scalar(1.0 / count as f32))
    }

    /// Reduces a broadcast result back to `target` by summing the broadcast
    /// dimensions.
    pub fn sum_to_shape(&self, target: &[usize]) -> Result<Tensor> {
        if self.shape.as_slice() == target {
            return Ok(self.clone());
        }
        if target.len() > self.ndim() {
            return Err(Error::BroadcastError {
                shape1: self.shape.to_vec(),
                shape2: target.to_vec(),
            });
        }

        let lead = self.ndim() - target.len();
        let mut axes: Vec<usize> = (0..lead).collect();
        for (i, &dim) in target.iter().enumerate() {
            let own = self.shape[lead + i];
            if dim == 1 && own != 1 {
                axes.push(lead + i);
            } else if dim != own {
                return Err(Error::BroadcastError {
                    shape1: self.shape.to_vec(),
                    shape2: target.to_vec(),
                });
            }
        }
        self.sum_axes(&axes, true)?.reshape_to(target)
    }
}

// =============================================================================
// Linear Algebra and Stacking
// =============================================================================

impl Tensor {
    /// 2-D matrix multiplication.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(Error::invalid_operation("matmul expects 2-D tensors"));
        }
        let (m, k) = (self.shape[0], self.shape[1]);
        let (k2, n) = (other.shape[0], other.shape[1]);
        if k != k2 {
            return Err(Error::shape_mismatch(&[k, n], &[k2, n]));
        }

        let mut out = vec![0.0f32; m * n];
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out[i * n + j] += a * other.data[p * n + j];
                }
            }
        }
        Ok(Tensor::from_parts(out, &[m, n]))
    }

    /// Selects one index along `axis`, removing that axis.
    pub fn select(&self, axis: usize, index: usize) -> Result<Tensor> {
        if axis >= self.ndim() {
            return Err(Error::InvalidDimension {
                index: axis as i64,
                ndim: self.ndim(),
            });
        }
        let size = self.shape[axis];
        if index >= size {
            return Err(Error::IndexOutOfBounds { index, size });
        }
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();

        let mut out = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * size + index) * inner;
            out.extend_from_slice(&self.data[start..start + inner]);
        }
        let mut shape = self.shape.to_vec();
        shape.remove(axis);
        Ok(Tensor::from_parts(out, &shape))
    }

    /// Stacks equally shaped tensors along a new leading-`axis` dimension.
    pub fn stack(tensors: &[Tensor], axis: usize) -> Result<Tensor> {
        let first = tensors.first().ok_or(Error::EmptyTensor)?;
        if axis > first.ndim() {
            return Err(Error::InvalidDimension {
                index: axis as i64,
                ndim: first.ndim() + 1,
            });
        }
        for t in tensors {
            if t.shape != first.shape {
                return Err(Error::shape_mismatch(first.shape(), t.shape()));
            }
        }

        let outer: usize = first.shape[..axis].iter().product();
        let inner: usize = first.shape[axis..].iter().product();
        let mut out = Vec::with_capacity(first.numel() * tensors.len());
        for o in 0..outer {
            for t in tensors {
                out.extend_from_slice(&t.data[o * inner..(o + 1) * inner]);
            }
        }
        let mut shape = first.shape.to_vec();
        shape.insert(axis, tensors.len());
        Ok(Tensor::from_parts(out, &shape))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(data: Vec<f32>, shape: &[usize]) -> Tensor {
        Tensor::from_vec(data, shape).unwrap()
    }

    #[test]
    fn test_broadcast_add() {
        let a = t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = t(vec![10.0, 20.0, 30.0], &[3]);
        assert_eq!(a.add(&b).unwrap().to_vec(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
        assert!(a.add(&t(vec![1.0, 2.0], &[2])).is_err());
    }

    #[test]
    fn test_sum_axes() {
        let a = t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(a.sum_axes(&[0], false).unwrap().to_vec(), vec![5.0, 7.0, 9.0]);
        let s = a.sum_axes(&[1], true).unwrap();
        assert_eq!(s.shape(), &[2, 1]);
        assert_eq!(s.to_vec(), vec![6.0, 15.0]);
        assert_eq!(a.sum_axes(&[0, 1], false).unwrap().shape(), &[] as &[usize]);
    }

    #[test]
    fn test_mean_axes() {
        let a = t(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_eq!(a.mean_axes(&[1], false).unwrap().to_vec(), vec![1.5, 3.5]);
        assert_eq!(a.mean_all().unwrap(), 2.5);
    }

    #[test]
    fn test_sum_to_shape() {
        let g = Tensor::ones(&[4, 2, 3]);
        assert_eq!(g.sum_to_shape(&[3]).unwrap().to_vec(), vec![8.0, 8.0, 8.0]);
        assert_eq!(g.sum_to_shape(&[2, 1]).unwrap().to_vec(), vec![12.0, 12.0]);
    }

    #[test]
    fn test_matmul() {
        let a = t(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = t(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]);
        assert_eq!(a.matmul(&b).unwrap().to_vec(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_select_and_stack() {
        let a = t((0..6).map(|v| v as f32).collect(), &[2, 3]);
        assert_eq!(a.select(1, 2).unwrap().to_vec(), vec![2.0, 5.0]);
        let rows = [a.select(0, 0).unwrap(), a.select(0, 1).unwrap()];
        assert_eq!(Tensor::stack(&rows, 0).unwrap(), a);
        let cols = Tensor::stack(&rows, 1).unwrap();
        assert_eq!(cols.shape(), &[3, 2]);
        assert_eq!(cols.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }
}
