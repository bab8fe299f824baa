//! Resize - Scale-and-Translate Resampling Kernels
//!
//! Builds one [`GatherPlan`] per resized axis. Output sample `i` sits at
//! input coordinate `(i + 0.5) * in / out - 0.5`; kernel weights are
//! normalized to sum to one and zeroed when the sample falls outside
//! `[-0.5, in - 0.5]`. With antialiasing, downsampling widens the kernel by
//! `in / out`.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use lamina_core::error::{Error, Result};

use super::gather::GatherPlan;
use crate::tensor::Tensor;

// =============================================================================
// ResizeMethod
// =============================================================================

/// Interpolation method used by resize layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMethod {
    /// Nearest neighbour.
    Nearest,
    /// Triangle kernel (bilinear / trilinear).
    #[default]
    #[serde(alias = "bilinear", alias = "trilinear", alias = "triangle")]
    Linear,
    /// Keys cubic kernel with `a = -0.5`.
    #[serde(alias = "bicubic", alias = "tricubic")]
    Cubic,
    /// Lanczos kernel of radius 3.
    Lanczos3,
    /// Lanczos kernel of radius 5.
    Lanczos5,
}

impl ResizeMethod {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
            Self::Cubic => "cubic",
            Self::Lanczos3 => "lanczos3",
            Self::Lanczos5 => "lanczos5",
        }
    }

    fn kernel(&self, x: f32) -> f32 {
        match self {
            Self::Nearest => box_kernel(x),
            Self::Linear => triangle_kernel(x),
            Self::Cubic => keys_cubic_kernel(x),
            Self::Lanczos3 => lanczos_kernel(3.0, x),
            Self::Lanczos5 => lanczos_kernel(5.0, x),
        }
    }
}

impl FromStr for ResizeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" | "bilinear" | "trilinear" | "triangle" => Ok(Self::Linear),
            "cubic" | "bicubic" | "tricubic" => Ok(Self::Cubic),
            "lanczos3" => Ok(Self::Lanczos3),
            "lanczos5" => Ok(Self::Lanczos5),
            other => Err(Error::invalid_argument(
                "method",
                format!("unknown resize method '{other}'"),
            )),
        }
    }
}

impl fmt::Display for ResizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Kernels
// =============================================================================

/// `1` on `[-0.5, 0.5)`, `0` elsewhere.
pub fn box_kernel(x: f32) -> f32 {
    if (-0.5..0.5).contains(&x) {
        1.0
    } else {
        0.0
    }
}

/// `max(0, 1 - |x|)`.
pub fn triangle_kernel(x: f32) -> f32 {
    (1.0 - x.abs()).max(0.0)
}

/// Keys cubic convolution kernel with `a = -0.5`.
pub fn keys_cubic_kernel(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 {
        ((1.5 * x - 2.5) * x) * x + 1.0
    } else if x < 2.0 {
        ((-0.5 * x + 2.5) * x - 4.0) * x + 2.0
    } else {
        0.0
    }
}

/// Lanczos windowed sinc of the given radius.
pub fn lanczos_kernel(radius: f32, x: f32) -> f32 {
    let x = x.abs();
    if x > radius {
        0.0
    } else if x <= 1e-3 {
        1.0
    } else {
        radius * (PI * x).sin() * (PI * x / radius).sin() / (PI * PI * x * x)
    }
}

// =============================================================================
// Weight Rows
// =============================================================================

/// Per-output `(input index, weight)` rows for resizing one axis.
pub fn axis_weights(
    in_size: usize,
    out_size: usize,
    method: ResizeMethod,
    antialias: bool,
) -> Vec<Vec<(usize, f32)>> {
    if in_size == 0 {
        return vec![Vec::new(); out_size];
    }
    let inv_scale = in_size as f32 / out_size as f32;

    if method == ResizeMethod::Nearest {
        return (0..out_size)
            .map(|i| {
                let src = (((i as f32 + 0.5) * inv_scale).floor() as usize).min(in_size - 1);
                vec![(src, 1.0)]
            })
            .collect();
    }

    let kernel_scale = if antialias { inv_scale.max(1.0) } else { 1.0 };
    let upper = in_size as f32 - 0.5;

    (0..out_size)
        .map(|i| {
            let sample = (i as f32 + 0.5) * inv_scale - 0.5;
            if sample < -0.5 || sample > upper {
                return Vec::new();
            }
            let row: Vec<(usize, f32)> = (0..in_size)
                .map(|j| (j, method.kernel((sample - j as f32).abs() / kernel_scale)))
                .filter(|(_, w)| *w != 0.0)
                .collect();
            let total: f32 = row.iter().map(|(_, w)| w).sum();
            if total.abs() <= 1000.0 * f32::EPSILON {
                return Vec::new();
            }
            row.into_iter().map(|(j, w)| (j, w / total)).collect()
        })
        .collect()
}

/// One plan per axis whose size changes, applied in order.
pub fn resize_plans(
    in_shape: &[usize],
    out_shape: &[usize],
    method: ResizeMethod,
    antialias: bool,
) -> Result<Vec<GatherPlan>> {
    if in_shape.len() != out_shape.len() {
        return Err(Error::invalid_argument(
            "shape",
            format!(
                "resize target {out_shape:?} has a different rank than input {in_shape:?}"
            ),
        ));
    }
    let mut current = in_shape.to_vec();
    let mut plans = Vec::new();
    for axis in 0..in_shape.len() {
        if current[axis] == out_shape[axis] {
            continue;
        }
        let rows = axis_weights(current[axis], out_shape[axis], method, antialias);
        let plan = GatherPlan::weights_along_axis(&current, axis, &rows)?;
        current = plan.out_shape().to_vec();
        plans.push(plan);
    }
    Ok(plans)
}

/// Resizes `x` to `out_shape`.
pub fn resize(x: &Tensor, out_shape: &[usize], method: ResizeMethod, antialias: bool) -> Result<Tensor> {
    resize_plans(x.shape(), out_shape, method, antialias)?
        .iter()
        .try_fold(x.clone(), |acc, plan| plan.forward(&acc))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("bilinear".parse::<ResizeMethod>().unwrap(), ResizeMethod::Linear);
        assert_eq!("tricubic".parse::<ResizeMethod>().unwrap(), ResizeMethod::Cubic);
        assert_eq!("LANCZOS5".parse::<ResizeMethod>().unwrap(), ResizeMethod::Lanczos5);
        assert!("area".parse::<ResizeMethod>().is_err());

        let m: ResizeMethod = serde_json::from_str("\"trilinear\"").unwrap();
        assert_eq!(m, ResizeMethod::Linear);
        assert_eq!(serde_json::to_string(&ResizeMethod::Nearest).unwrap(), "\"nearest\"");
    }

    #[test]
    fn test_kernels() {
        assert_eq!(triangle_kernel(0.25), 0.75);
        assert_eq!(keys_cubic_kernel(0.0), 1.0);
        assert_eq!(keys_cubic_kernel(2.5), 0.0);
        assert_eq!(lanczos_kernel(3.0, 0.0), 1.0);
        assert!(lanczos_kernel(3.0, 1.0).abs() < 1e-6);
        assert_eq!(lanczos_kernel(3.0, 3.5), 0.0);
    }

    #[test]
    fn test_rows_sum_to_one() {
        for method in [ResizeMethod::Linear, ResizeMethod::Cubic, ResizeMethod::Lanczos3] {
            for row in axis_weights(5, 8, method, true) {
                let total: f32 = row.iter().map(|(_, w)| w).sum();
                assert!((total - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_upsample_linear() {
        let x = Tensor::from_vec(vec![0.0, 1.0], &[2]).unwrap();
        let y = resize(&x, &[4], ResizeMethod::Linear, true).unwrap();
        // Samples at -0.25, 0.25, 0.75, 1.25.
        let expected = [0.0, 0.25, 0.75, 1.0];
        for (a, b) in y.to_vec().iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_downsample_antialias_averages() {
        let x = Tensor::from_vec(vec![1.0, 3.0, 5.0, 7.0], &[4]).unwrap();
        let y = resize(&x, &[2], ResizeMethod::Linear, true).unwrap();
        assert_eq!(y.shape(), &[2]);
        assert!(y.to_vec()[0] > 1.0 && y.to_vec()[0] < 3.0);
        let mean = y.mean_all().unwrap();
        assert!((mean - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_nearest() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[1, 3]).unwrap();
        let y = resize(&x, &[1, 6], ResizeMethod::Nearest, false).unwrap();
        assert_eq!(y.to_vec(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_rank_mismatch() {
        let x = Tensor::ones(&[2, 2]);
        assert!(resize(&x, &[4], ResizeMethod::Linear, true).is_err());
    }
}
