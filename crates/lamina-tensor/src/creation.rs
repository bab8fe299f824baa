//! Tensor Creation - Constructors for Common Tensors
//!
//! Constant fills, ranges and key-driven random tensors.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::PrngKey;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::shape::numel;
use crate::tensor::Tensor;

// =============================================================================
// Constant Tensors
// =============================================================================

/// Creates a tensor filled with zeros.
#[must_use]
pub fn zeros(shape: &[usize]) -> Tensor {
    full(shape, 0.0)
}

/// Creates a tensor filled with ones.
#[must_use]
pub fn ones(shape: &[usize]) -> Tensor {
    full(shape, 1.0)
}

/// Creates a tensor filled with a constant value.
#[must_use]
pub fn full(shape: &[usize], value: f32) -> Tensor {
    Tensor::from_parts(vec![value; numel(shape)], shape)
}

/// Creates a 2-D identity matrix.
#[must_use]
pub fn eye(n: usize) -> Tensor {
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        data[i * n + i] = 1.0;
    }
    Tensor::from_parts(data, &[n, n])
}

// =============================================================================
// Ranges
// =============================================================================

/// Creates `[start, start + 1, ..., end)` as a 1-D tensor.
#[must_use]
pub fn arange(start: f32, end: f32) -> Tensor {
    let n = (end - start).ceil().max(0.0) as usize;
    let data: Vec<f32> = (0..n).map(|i| start + i as f32).collect();
    Tensor::from_parts(data, &[n])
}

/// Creates `n` evenly spaced values over `[start, end]`.
#[must_use]
pub fn linspace(start: f32, end: f32, n: usize) -> Tensor {
    let data: Vec<f32> = match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n).map(|i| start + step * i as f32).collect()
        }
    };
    Tensor::from_parts(data, &[n])
}

// =============================================================================
// Random Tensors
// =============================================================================

/// Samples uniformly from `[low, high)`.
#[must_use]
pub fn rand_uniform(key: &PrngKey, shape: &[usize], low: f32, high: f32) -> Tensor {
    let mut rng = key.rng();
    let data: Vec<f32> = if high > low {
        (0..numel(shape)).map(|_| rng.gen_range(low..high)).collect()
    } else {
        vec![low; numel(shape)]
    };
    Tensor::from_parts(data, shape)
}

/// Samples from the standard normal distribution.
#[must_use]
pub fn randn(key: &PrngKey, shape: &[usize]) -> Tensor {
    let mut rng = key.rng();
    let data: Vec<f32> = (0..numel(shape))
        .map(|_| -> f32 { StandardNormal.sample(&mut rng) })
        .collect();
    Tensor::from_parts(data, shape)
}

/// Samples from a standard normal truncated to `[lower, upper]`.
#[must_use]
pub fn truncated_normal(key: &PrngKey, shape: &[usize], lower: f32, upper: f32) -> Tensor {
    let mut rng = key.rng();
    let data: Vec<f32> = (0..numel(shape))
        .map(|_| loop {
            let v: f32 = StandardNormal.sample(&mut rng);
            if (lower..=upper).contains(&v) {
                break v;
            }
        })
        .collect();
    Tensor::from_parts(data, shape)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert!(zeros(&[2, 3]).as_slice().iter().all(|&x| x == 0.0));
        assert!(ones(&[4]).as_slice().iter().all(|&x| x == 1.0));
        assert_eq!(full(&[2], 3.5).to_vec(), vec![3.5, 3.5]);
    }

    #[test]
    fn test_eye() {
        assert_eq!(eye(2).to_vec(), vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_arange_linspace() {
        assert_eq!(arange(1.0, 5.0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(linspace(0.0, 1.0, 3).to_vec(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_random_is_deterministic() {
        let key = PrngKey::new(9);
        assert_eq!(randn(&key, &[8]), randn(&key, &[8]));
        let u = rand_uniform(&key, &[100], -1.0, 1.0);
        assert!(u.as_slice().iter().all(|&x| (-1.0..1.0).contains(&x)));
    }

    #[test]
    fn test_truncated_normal_bounds() {
        let t = truncated_normal(&PrngKey::new(1), &[500], -2.0, 2.0);
        assert!(t.as_slice().iter().all(|&x| (-2.0..=2.0).contains(&x)));
    }
}
