//! Gather Plans - Precomputed Linear Index Maps
//!
//! A [`GatherPlan`] describes a linear map from an input tensor of one shape
//! to an output tensor of another:
//!
//! ```text
//! out[i] = fill[i] + sum_j w_ij * x[src_ij]
//! ```
//!
//! Cropping, padding and resampling are all instances of this map, so they
//! share one forward implementation and one adjoint (`transpose_apply`) for
//! the backward pass.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_core::error::{Error, Result};

use crate::shape::{contiguous_strides, numel, unravel_index};
use crate::tensor::Tensor;

// =============================================================================
// GatherPlan
// =============================================================================

/// A sparse linear map between two tensor shapes.
#[derive(Debug, Clone)]
pub struct GatherPlan {
    in_shape: Vec<usize>,
    out_shape: Vec<usize>,
    /// `offsets[i]..offsets[i + 1]` indexes the entries of output `i`.
    offsets: Vec<usize>,
    sources: Vec<usize>,
    weights: Vec<f32>,
    /// Constant added to each output; empty means all zero.
    fill: Vec<f32>,
}

impl GatherPlan {
    /// Builds a plan where each output reads at most one input with weight 1.
    ///
    /// `source` maps an output multi-index to an input multi-index, or
    /// `None` for outputs that only receive `fill_value`.
    fn from_fn<F>(in_shape: &[usize], out_shape: &[usize], fill_value: f32, source: F) -> Self
    where
        F: Fn(&[usize]) -> Option<Vec<usize>>,
    {
        let total = numel(out_shape);
        let strides = contiguous_strides(in_shape);
        let mut offsets = Vec::with_capacity(total + 1);
        let mut sources = Vec::with_capacity(total);
        let mut fill = Vec::new();
        offsets.push(0);

        for i in 0..total {
            let idx = unravel_index(i, out_shape);
            match source(&idx) {
                Some(src) => {
                    sources.push(src.iter().zip(&strides).map(|(a, s)| a * s).sum());
                    if fill_value != 0.0 {
                        fill.push(0.0);
                    }
                }
                None => {
                    if fill_value != 0.0 {
                        fill.push(fill_value);
                    }
                }
            }
            offsets.push(sources.len());
        }

        let weights = vec![1.0; sources.len()];
        Self {
            in_shape: in_shape.to_vec(),
            out_shape: out_shape.to_vec(),
            offsets,
            sources,
            weights,
            fill,
        }
    }

    /// Static slice of `sizes` elements starting at `starts` on every axis.
    ///
    /// Starts are clamped so the slice always fits inside the input, which
    /// mirrors dynamic-slice semantics. A size larger than its axis is an
    /// error.
    pub fn slice(in_shape: &[usize], starts: &[usize], sizes: &[usize]) -> Result<Self> {
        if starts.len() != in_shape.len() || sizes.len() != in_shape.len() {
            return Err(Error::invalid_argument(
                "starts",
                format!(
                    "expected {} starts and sizes, got {} and {}",
                    in_shape.len(),
                    starts.len(),
                    sizes.len()
                ),
            ));
        }
        if let Some((&size, &dim)) = sizes.iter().zip(in_shape).find(|(s, d)| s > d) {
            return Err(Error::invalid_argument(
                "sizes",
                format!("slice size {size} exceeds dimension {dim}"),
            ));
        }
        let starts: Vec<usize> = starts
            .iter()
            .zip(sizes)
            .zip(in_shape)
            .map(|((&start, &size), &dim)| start.min(dim - size))
            .collect();

        Ok(Self::from_fn(in_shape, sizes, 0.0, |idx| {
            Some(idx.iter().zip(&starts).map(|(i, s)| i + s).collect())
        }))
    }

    /// Constant padding with `(before, after)` amounts per axis.
    pub fn pad(in_shape: &[usize], padding: &[(usize, usize)], value: f32) -> Result<Self> {
        if padding.len() != in_shape.len() {
            return Err(Error::invalid_argument(
                "padding",
                format!("expected {} pairs, got {}", in_shape.len(), padding.len()),
            ));
        }
        let out_shape: Vec<usize> = in_shape
            .iter()
            .zip(padding)
            .map(|(d, (b, a))| d + b + a)
            .collect();

        Ok(Self::from_fn(in_shape, &out_shape, value, |idx| {
            idx.iter()
                .zip(padding)
                .zip(in_shape)
                .map(|((&i, &(before, _)), &dim)| {
                    i.checked_sub(before).filter(|&j| j < dim)
                })
                .collect()
        }))
    }

    /// Picks `indices` along `axis`; the axis takes the length of `indices`.
    pub fn take_along_axis(in_shape: &[usize], axis: usize, indices: &[usize]) -> Result<Self> {
        let rows = indices.iter().map(|&i| vec![(i, 1.0)]).collect::<Vec<_>>();
        Self::weights_along_axis(in_shape, axis, &rows)
    }

    /// Weighted combination along `axis`.
    ///
    /// `rows[o]` lists `(input index, weight)` pairs for output position `o`.
    pub fn weights_along_axis(
        in_shape: &[usize],
        axis: usize,
        rows: &[Vec<(usize, f32)>],
    ) -> Result<Self> {
        if axis >= in_shape.len() {
            return Err(Error::InvalidDimension {
                index: axis as i64,
                ndim: in_shape.len(),
            });
        }
        let dim = in_shape[axis];
        for row in rows {
            if let Some(&(index, _)) = row.iter().find(|(i, _)| *i >= dim) {
                return Err(Error::IndexOutOfBounds { index, size: dim });
            }
        }

        let mut out_shape = in_shape.to_vec();
        out_shape[axis] = rows.len();
        let strides = contiguous_strides(in_shape);
        let total = numel(&out_shape);

        let mut offsets = Vec::with_capacity(total + 1);
        let mut sources = Vec::new();
        let mut weights = Vec::new();
        offsets.push(0);
        for i in 0..total {
            let idx = unravel_index(i, &out_shape);
            let base: usize = idx
                .iter()
                .zip(&strides)
                .enumerate()
                .filter(|(d, _)| *d != axis)
                .map(|(_, (a, s))| a * s)
                .sum();
            for &(src, w) in &rows[idx[axis]] {
                if w != 0.0 {
                    sources.push(base + src * strides[axis]);
                    weights.push(w);
                }
            }
            offsets.push(sources.len());
        }

        Ok(Self {
            in_shape: in_shape.to_vec(),
            out_shape,
            offsets,
            sources,
            weights,
            fill: Vec::new(),
        })
    }

    /// Input shape the plan expects.
    pub fn in_shape(&self) -> &[usize] {
        &self.in_shape
    }

    /// Output shape the plan produces.
    pub fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    /// Applies the map.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        if x.shape() != self.in_shape.as_slice() {
            return Err(Error::shape_mismatch(&self.in_shape, x.shape()));
        }
        let data = x.as_slice();
        let out = (0..numel(&self.out_shape))
            .map(|i| {
                let base = self.fill.get(i).copied().unwrap_or(0.0);
                (self.offsets[i]..self.offsets[i + 1])
                    .fold(base, |acc, e| acc + self.weights[e] * data[self.sources[e]])
            })
            .collect();
        Ok(Tensor::from_parts(out, &self.out_shape))
    }

    /// Applies the adjoint map (the fill term is constant and drops out).
    pub fn transpose_apply(&self, grad: &Tensor) -> Result<Tensor> {
        if grad.shape() != self.out_shape.as_slice() {
            return Err(Error::shape_mismatch(&self.out_shape, grad.shape()));
        }
        let g = grad.as_slice();
        let mut out = vec![0.0f32; numel(&self.in_shape)];
        for (i, &gi) in g.iter().enumerate() {
            for e in self.offsets[i]..self.offsets[i + 1] {
                out[self.sources[e]] += self.weights[e] * gi;
            }
        }
        Ok(Tensor::from_parts(out, &self.in_shape))
    }
}

// =============================================================================
// Tests
// =============================================================================
