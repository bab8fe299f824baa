//! Weight Initialization - Named Initializer Strategies
//!
//! [`Init`] selects how a parameter array is filled. Initializers are chosen
//! by name (`"he_normal"`, `"ones"`, ...) so layer options can be read from
//! JSON, and `Option<Init>` with `None` switches a parameter off entirely.
//!
//! Variance-scaling initializers compute fans from the last two axes:
//! `fan_in = shape[-2] * receptive`, `fan_out = shape[-1] * receptive`, where
//! `receptive` is the product of the remaining axes. Normal variants draw
//! from a normal truncated to two standard deviations.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use lamina_core::error::{Error, Result};
use lamina_core::PrngKey;
use lamina_tensor::{full, ones, rand_uniform, randn, truncated_normal, zeros, Tensor};

/// Standard deviation of a unit normal truncated to `[-2, 2]`.
const TRUNCATED_STDDEV: f32 = 0.879_625_661_034_239_8;

// =============================================================================
// Init
// =============================================================================

/// A parameter initializer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Init {
    /// All zeros.
    Zeros,
    /// All ones.
    Ones,
    /// Every element set to the value.
    Constant(f32),
    /// Uniform on `[0, 0.01)`.
    Uniform,
    /// Normal with standard deviation `0.01`.
    Normal,
    /// Variance scaling, scale 2, fan in, truncated normal.
    HeNormal,
    /// Variance scaling, scale 2, fan in, uniform.
    HeUniform,
    /// Variance scaling, scale 1, fan average, truncated normal.
    GlorotNormal,
    /// Variance scaling, scale 1, fan average, uniform.
    GlorotUniform,
    /// Variance scaling, scale 1, fan in, truncated normal.
    LecunNormal,
    /// Variance scaling, scale 1, fan in, uniform.
    LecunUniform,
    /// Orthogonal matrix over the last axis.
    Orthogonal,
}

#[derive(Clone, Copy)]
enum FanMode {
    In,
    Avg,
}

#[derive(Clone, Copy)]
enum Distribution {
    TruncatedNormal,
    Uniform,
}

impl Init {
    /// Creates an array of `shape` filled by this initializer.
    pub fn resolve(&self, key: &PrngKey, shape: &[usize]) -> Result<Tensor> {
        use Distribution::{TruncatedNormal, Uniform};
        use FanMode::{Avg, In};

        match *self {
            Self::Zeros => Ok(zeros(shape)),
            Self::Ones => Ok(ones(shape)),
            Self::Constant(value) => Ok(full(shape, value)),
            Self::Uniform => Ok(rand_uniform(key, shape, 0.0, 0.01)),
            Self::Normal => Ok(randn(key, shape).mul_scalar(0.01)),
            Self::HeNormal => Ok(variance_scaling(key, shape, 2.0, In, TruncatedNormal)),
            Self::HeUniform => Ok(variance_scaling(key, shape, 2.0, In, Uniform)),
            Self::GlorotNormal => Ok(variance_scaling(key, shape, 1.0, Avg, TruncatedNormal)),
            Self::GlorotUniform => Ok(variance_scaling(key, shape, 1.0, Avg, Uniform)),
            Self::LecunNormal => Ok(variance_scaling(key, shape, 1.0, In, TruncatedNormal)),
            Self::LecunUniform => Ok(variance_scaling(key, shape, 1.0, In, Uniform)),
            Self::Orthogonal => orthogonal(key, shape),
        }
    }

    /// Canonical name (without the value of `Constant`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Zeros => "zeros",
            Self::Ones => "ones",
            Self::Constant(_) => "constant",
            Self::Uniform => "uniform",
            Self::Normal => "normal",
            Self::HeNormal => "he_normal",
            Self::HeUniform => "he_uniform",
            Self::GlorotNormal => "glorot_normal",
            Self::GlorotUniform => "glorot_uniform",
            Self::LecunNormal => "lecun_normal",
            Self::LecunUniform => "lecun_uniform",
            Self::Orthogonal => "orthogonal",
        }
    }
}

/// Resolves an optional initializer; `None` yields no parameter.
pub fn resolve_optional(init: Option<Init>, key: &PrngKey, shape: &[usize]) -> Result<Option<Tensor>> {
    init.map(|i| i.resolve(key, shape)).transpose()
}

impl FromStr for Init {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("constant(").and_then(|r| r.strip_suffix(')')) {
            let value = inner.trim().parse::<f32>().map_err(|e| {
                Error::invalid_argument("init", format!("bad constant '{inner}': {e}"))
            })?;
            return Ok(Self::Constant(value));
        }
        Ok(match s {
            "zeros" => Self::Zeros,
            "ones" => Self::Ones,
            "uniform" => Self::Uniform,
            "normal" => Self::Normal,
            "he_normal" => Self::HeNormal,
            "he_uniform" => Self::HeUniform,
            "glorot_normal" | "xavier_normal" => Self::GlorotNormal,
            "glorot_uniform" | "xavier_uniform" => Self::GlorotUniform,
            "lecun_normal" => Self::LecunNormal,
            "lecun_uniform" => Self::LecunUniform,
            "orthogonal" => Self::Orthogonal,
            other => {
                return Err(Error::invalid_argument(
                    "init",
                    format!("unknown initializer '{other}'"),
                ))
            }
        })
    }
}

impl fmt::Display for Init {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "constant({v})"),
            other => f.write_str(other.name()),
        }
    }
}

impl TryFrom<String> for Init {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Init> for String {
    fn from(init: Init) -> Self {
        init.to_string()
    }
}

// =============================================================================
// Variance Scaling
// =============================================================================

/// `(fan_in, fan_out)` of a weight shape.
pub fn compute_fans(shape: &[usize]) -> (f32, f32) {
    match shape.len() {
        0 => (1.0, 1.0),
        1 => (shape[0] as f32, shape[0] as f32),
        n => {
            let receptive: usize = shape[..n - 2].iter().product();
            (
                (shape[n - 2] * receptive) as f32,
                (shape[n - 1] * receptive) as f32,
            )
        }
    }
}

fn variance_scaling(
    key: &PrngKey,
    shape: &[usize],
    scale: f32,
    mode: FanMode,
    distribution: Distribution,
) -> Tensor {
    let (fan_in, fan_out) = compute_fans(shape);
    let denominator = match mode {
        FanMode::In => fan_in,
        FanMode::Avg => (fan_in + fan_out) / 2.0,
    };
    let variance = scale / denominator.max(1.0);

    match distribution {
        Distribution::TruncatedNormal => {
            let stddev = variance.sqrt() / TRUNCATED_STDDEV;
            truncated_normal(key, shape, -2.0, 2.0).mul_scalar(stddev)
        }
        Distribution::Uniform => {
            let limit = (3.0 * variance).sqrt();
            rand_uniform(key, shape, -limit, limit)
        }
    }
}

// =============================================================================
// Orthogonal
// =============================================================================

/// Orthogonal initializer: columns are the last axis, rows everything else.
fn orthogonal(key: &PrngKey, shape: &[usize]) -> Result<Tensor> {
    if shape.len() < 2 {
        return Err(Error::invalid_argument(
            "init",
            format!("orthogonal needs at least 2 dimensions, got shape {shape:?}"),
        ));
    }
    let cols = shape[shape.len() - 1];
    let rows: usize = shape[..shape.len() - 1].iter().product();
    let (tall, short) = (rows.max(cols), rows.min(cols));

    // Gram-Schmidt over the `short` columns of a tall x short normal matrix.
    let a = randn(key, &[tall, short]);
    let a = a.as_slice();
    let mut q: Vec<Vec<f64>> = Vec::with_capacity(short);
    for j in 0..short {
        let mut v: Vec<f64> = (0..tall).map(|i| f64::from(a[i * short + j])).collect();
        for u in &q {
            let dot: f64 = u.iter().zip(&v).map(|(x, y)| x * y).sum();
            for (vi, ui) in v.iter_mut().zip(u) {
                *vi -= dot * ui;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-12 {
            return Err(Error::invalid_operation("orthogonal init hit a degenerate sample"));
        }
        v.iter_mut().for_each(|x| *x /= norm);
        q.push(v);
    }

    // q[j][i] is element (i, j) of the tall matrix; transpose when wide.
    let data: Vec<f32> = (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .map(|(r, c)| (if rows >= cols { q[c][r] } else { q[r][c] }) as f32)
        .collect();
    Tensor::from_vec(data, shape)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("he_normal".parse::<Init>().unwrap(), Init::HeNormal);
        assert_eq!("constant(0.5)".parse::<Init>().unwrap(), Init::Constant(0.5));
        assert!("bogus".parse::<Init>().is_err());

        let json = serde_json::to_string(&Init::GlorotUniform).unwrap();
        assert_eq!(json, "\"glorot_uniform\"");
        let back: Init = serde_json::from_str("\"ones\"").unwrap();
        assert_eq!(back, Init::Ones);
        let none: Option<Init> = serde_json::from_str("null").unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_fans() {
        assert_eq!(compute_fans(&[3, 4]), (3.0, 4.0));
        assert_eq!(compute_fans(&[2, 3, 4]), (6.0, 8.0));
        assert_eq!(compute_fans(&[5]), (5.0, 5.0));
    }

    #[test]
    fn test_he_normal_is_truncated_and_deterministic() {
        let key = PrngKey::new(0);
        let a = Init::HeNormal.resolve(&key, &[50, 20]).unwrap();
        let b = Init::HeNormal.resolve(&key, &[50, 20]).unwrap();
        assert_eq!(a, b);
        let bound = 2.0 * (2.0f32 / 50.0).sqrt() / TRUNCATED_STDDEV;
        assert!(a.as_slice().iter().all(|x| x.abs() <= bound + 1e-6));
    }

    #[test]
    fn test_constants() {
        let key = PrngKey::new(1);
        assert!(Init::Ones.resolve(&key, &[3]).unwrap().as_slice().iter().all(|&x| x == 1.0));
        assert_eq!(Init::Constant(2.5).resolve(&key, &[2]).unwrap().to_vec(), vec![2.5, 2.5]);
        let u = Init::Uniform.resolve(&key, &[100]).unwrap();
        assert!(u.as_slice().iter().all(|&x| (0.0..0.01).contains(&x)));
    }

    #[test]
    fn test_orthogonal() {
        let key = PrngKey::new(3);
        let w = Init::Orthogonal.resolve(&key, &[4, 3]).unwrap();
        // Columns are orthonormal: W^T W = I.
        let wtw = w.transpose(0, 1).unwrap().matmul(&w).unwrap();
        assert!(wtw.allclose(&lamina_tensor::eye(3), 1e-5));

        let wide = Init::Orthogonal.resolve(&key, &[2, 5]).unwrap();
        let wwt = wide.matmul(&wide.transpose(0, 1).unwrap()).unwrap();
        assert!(wwt.allclose(&lamina_tensor::eye(2), 1e-5));
        assert!(Init::Orthogonal.resolve(&key, &[4]).is_err());
    }
}
