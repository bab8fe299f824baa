//! Functional API - Stateless Layer Operations
//!
//! The arithmetic behind the layers, written against [`Variable`] so every
//! function is differentiable. Layers hold parameters and hyperparameters
//! and call into this module.
//!
//! Spatial functions take unbatched, channel-first inputs `(C, *spatial)`
//! and never touch the channel axis.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_autograd::Variable;
use lamina_core::{Error, PrngKey, Result};
use lamina_tensor::shape::normalize_axis;
use lamina_tensor::{resize_plans, GatherPlan, ResizeMethod, Tensor};

// =============================================================================
// Validation
// =============================================================================

/// Checks that `x` has one channel axis plus `spatial_ndim` spatial axes.
pub fn validate_spatial_ndim(x: &Variable, spatial_ndim: usize, layer: &str) -> Result<()> {
    if x.ndim() != spatial_ndim + 1 {
        return Err(Error::invalid_argument(
            "input",
            format!(
                "{layer} expects a {}-D input (channels + {spatial_ndim} spatial), got shape {:?}",
                spatial_ndim + 1,
                x.shape()
            ),
        ));
    }
    Ok(())
}

/// Broadcasts one value to `n` entries, or checks that there are exactly `n`.
pub fn canonicalize<T: Clone>(values: &[T], n: usize, name: &str) -> Result<Vec<T>> {
    match values.len() {
        1 => Ok(vec![values[0].clone(); n]),
        len if len == n => Ok(values.to_vec()),
        len => Err(Error::invalid_argument(
            name,
            format!("expected 1 or {n} values, got {len}"),
        )),
    }
}

/// Checks a drop or apply probability.
pub fn validate_probability(p: f32, name: &str) -> Result<f32> {
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(Error::invalid_argument(name, format!("must be in [0, 1], got {p}")))
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Shape that lines a per-channel vector up with `axis` of an `ndim` input.
fn channel_shape(len: usize, axis: usize, ndim: usize) -> Vec<usize> {
    let mut shape = vec![1; ndim];
    shape[axis] = len;
    shape
}

/// Applies `x * weight + bias` with the parameters broadcast along `axis`.
pub fn channel_affine(
    x: &Variable,
    weight: Option<&Variable>,
    bias: Option<&Variable>,
    axis: usize,
) -> Result<Variable> {
    let ndim = x.ndim();
    let mut out = x.clone();
    if let Some(w) = weight {
        out = out.mul(&w.reshape_to(&channel_shape(w.numel(), axis, ndim))?)?;
    }
    if let Some(b) = bias {
        out = out.add(&b.reshape_to(&channel_shape(b.numel(), axis, ndim))?)?;
    }
    Ok(out)
}

/// `(x - mean) * rsqrt(var + eps)` over `axes`, with biased variance.
fn standardize(x: &Variable, axes: &[i64], eps: f32) -> Result<Variable> {
    let mean = x.mean_axes(axes, true)?;
    let centered = x.sub(&mean)?;
    let var = centered.mul(&centered)?.mean_axes(axes, true)?;
    centered.mul(&var.add_scalar(eps).pow(-0.5))
}

/// Layer normalization over the trailing `normalized_shape.len()` axes.
///
/// `gamma` and `beta` have shape `normalized_shape` when present.
pub fn layer_norm(
    x: &Variable,
    gamma: Option<&Variable>,
    beta: Option<&Variable>,
    eps: f32,
    normalized_shape: &[usize],
) -> Result<Variable> {
    let shape = x.shape();
    let k = normalized_shape.len();
    if k == 0 || k > shape.len() || shape[shape.len() - k..] != *normalized_shape {
        return Err(Error::invalid_argument(
            "normalized_shape",
            format!("{normalized_shape:?} does not match the trailing axes of {shape:?}"),
        ));
    }
    let axes: Vec<i64> = (1..=k as i64).map(|i| -i).collect();
    let mut out = standardize(x, &axes, eps)?;
    if let Some(g) = gamma {
        out = out.mul(g)?;
    }
    if let Some(b) = beta {
        out = out.add(b)?;
    }
    Ok(out)
}

/// Group normalization of a `(C, ...)` input.
///
/// Channels are split into `groups` contiguous groups, each normalized over
/// its channels and all remaining axes; the affine is per channel.
pub fn group_norm(
    x: &Variable,
    gamma: Option<&Variable>,
    beta: Option<&Variable>,
    eps: f32,
    groups: usize,
) -> Result<Variable> {
    let shape = x.shape();
    let channels = shape.first().copied().unwrap_or(0);
    if groups == 0 || channels % groups != 0 {
        return Err(Error::invalid_argument(
            "groups",
            format!("{channels} channels cannot be split into {groups} groups"),
        ));
    }
    let grouped = x.reshape(&[groups as isize, -1])?;
    let normed = standardize(&grouped, &[-1], eps)?.reshape_to(&shape)?;
    channel_affine(&normed, gamma, beta, 0)
}

/// Batch statistics for batch normalization.
///
/// Returns the normalized input, plus the per-channel batch mean and
/// variance (`E[x²] - E[x]²`) as plain tensors of length `C`.
pub fn batch_norm_train(x: &Variable, axis: usize, eps: f32) -> Result<(Variable, Tensor, Tensor)> {
    let ndim = x.ndim();
    if axis >= ndim {
        return Err(Error::InvalidDimension {
            index: axis as i64,
            ndim,
        });
    }
    let axes: Vec<i64> = (0..ndim as i64).filter(|&a| a != axis as i64).collect();
    let mean = x.mean_axes(&axes, true)?;
    let var = x.mul(x)?.mean_axes(&axes, true)?.sub(&mean.mul(&mean)?)?;
    let out = x.sub(&mean)?.div(&var.add_scalar(eps).sqrt())?;

    let channels = x.shape()[axis];
    let batch_mean = mean.data().reshape_to(&[channels])?;
    let batch_var = var.data().reshape_to(&[channels])?;
    Ok((out, batch_mean, batch_var))
}

/// Normalizes with fixed statistics: `(x - mean) * rsqrt(var + eps)`.
pub fn batch_norm_eval(
    x: &Variable,
    running_mean: &Tensor,
    running_var: &Tensor,
    axis: usize,
    eps: f32,
) -> Result<Variable> {
    let shape = channel_shape(running_mean.numel(), axis, x.ndim());
    let mean = Variable::from_tensor(running_mean.reshape_to(&shape)?);
    let scale = Variable::from_tensor(running_var.add_scalar(eps).rsqrt().reshape_to(&shape)?);
    x.sub(&mean)?.mul(&scale)
}

// =============================================================================
// Reshaping
// =============================================================================

/// Merges axes `start_dim..=end_dim` into one; negative dims count from the end.
pub fn flatten(x: &Variable, start_dim: i64, end_dim: i64) -> Result<Variable> {
    let shape = x.shape();
    let start = normalize_axis(start_dim, shape.len())?;
    let end = normalize_axis(end_dim, shape.len())?;
    if start > end {
        return Err(Error::invalid_argument(
            "start_dim",
            format!("start_dim {start_dim} comes after end_dim {end_dim}"),
        ));
    }
    let merged: usize = shape[start..=end].iter().product();
    let new_shape: Vec<usize> = shape[..start]
        .iter()
        .copied()
        .chain(std::iter::once(merged))
        .chain(shape[end + 1..].iter().copied())
        .collect();
    x.reshape_to(&new_shape)
}

/// Splits axis `dim` into `sizes`.
pub fn unflatten(x: &Variable, dim: i64, sizes: &[usize]) -> Result<Variable> {
    let shape = x.shape();
    let axis = normalize_axis(dim, shape.len())?;
    let product: usize = sizes.iter().product();
    if product != shape[axis] {
        return Err(Error::invalid_argument(
            "shape",
            format!("{sizes:?} does not multiply to the size {} of axis {dim}", shape[axis]),
        ));
    }
    let new_shape: Vec<usize> = shape[..axis]
        .iter()
        .chain(sizes)
        .chain(&shape[axis + 1..])
        .copied()
        .collect();
    x.reshape_to(&new_shape)
}

// =============================================================================
// Cropping and Padding
// =============================================================================

/// Slices `sizes` elements from `starts` on every spatial axis.
///
/// Starts are clamped so the window stays inside the input.
pub fn crop(x: &Variable, starts: &[usize], sizes: &[usize]) -> Result<Variable> {
    validate_spatial_ndim(x, sizes.len(), "crop")?;
    let shape = x.shape();
    let channels = shape[0];
    let full_starts: Vec<usize> = std::iter::once(0).chain(starts.iter().copied()).collect();
    let full_sizes: Vec<usize> = std::iter::once(channels).chain(sizes.iter().copied()).collect();
    x.gather(&GatherPlan::slice(&shape, &full_starts, &full_sizes)?)
}

/// Crops the middle of every spatial axis: start `max(in/2 - size/2, 0)`.
pub fn center_crop(x: &Variable, sizes: &[usize]) -> Result<Variable> {
    validate_spatial_ndim(x, sizes.len(), "center_crop")?;
    let shape = x.shape();
    let starts: Vec<usize> = shape[1..]
        .iter()
        .zip(sizes)
        .map(|(&n, &s)| (n / 2).saturating_sub(s / 2))
        .collect();
    crop(x, &starts, sizes)
}

/// Crops a window at a random position drawn from `key`.
///
/// Each spatial start is uniform on `[0, in - size)`, and 0 when that range
/// is empty.
pub fn random_crop(x: &Variable, sizes: &[usize], key: &PrngKey) -> Result<Variable> {
    validate_spatial_ndim(x, sizes.len(), "random_crop")?;
    let shape = x.shape();
    let starts: Vec<usize> = shape[1..]
        .iter()
        .zip(sizes)
        .enumerate()
        .map(|(i, (&n, &s))| key.fold_in(i as u64).randint(0, n as i64 - s as i64) as usize)
        .collect();
    crop(x, &starts, sizes)
}

/// Pads every spatial axis with `(before, after)` copies of `value`.
///
/// The fill value is a constant of the plan and carries no gradient.
pub fn pad(x: &Variable, padding: &[(usize, usize)], value: f32) -> Result<Variable> {
    validate_spatial_ndim(x, padding.len(), "pad")?;
    let shape = x.shape();
    let full: Vec<(usize, usize)> = std::iter::once((0, 0)).chain(padding.iter().copied()).collect();
    x.gather(&GatherPlan::pad(&shape, &full, value)?)
}

// =============================================================================
// Resampling
// =============================================================================

/// Resizes the spatial axes to `sizes`, one channel at a time.
pub fn resize(x: &Variable, sizes: &[usize], method: ResizeMethod, antialias: bool) -> Result<Variable> {
    validate_spatial_ndim(x, sizes.len(), "resize")?;
    let shape = x.shape();
    let out_shape: Vec<usize> = std::iter::once(shape[0]).chain(sizes.iter().copied()).collect();
    resize_plans(&shape, &out_shape, method, antialias)?
        .iter()
        .try_fold(x.clone(), |acc, plan| acc.gather(plan))
}

/// Zooms one axis by a random factor, keeping its length.
///
/// The factor is uniform on `factor_range` (from `factor_key`). A factor of
/// zero leaves `x` unchanged. A positive factor resizes the axis to
/// `n * (1 + f)` with linear interpolation and crops a random window of
/// length `n` (from `crop_key`); a negative factor shrinks the axis and pads
/// it back to `n` with zeros on both sides.
pub fn random_zoom_along_axis(
    x: &Variable,
    axis: usize,
    factor_range: (f32, f32),
    factor_key: &PrngKey,
    crop_key: &PrngKey,
) -> Result<Variable> {
    let factor = factor_key.uniform(factor_range.0, factor_range.1);
    if factor == 0.0 {
        return Ok(x.clone());
    }
    let shape = x.shape();
    if axis >= shape.len() {
        return Err(Error::InvalidDimension {
            index: axis as i64,
            ndim: shape.len(),
        });
    }
    let n = shape[axis];
    let resized_len = ((n as f32) * (1.0 + factor)).max(0.0) as usize;
    let mut resized_shape = shape.clone();
    resized_shape[axis] = resized_len;
    let resized = resize_plans(&shape, &resized_shape, ResizeMethod::Linear, true)?
        .iter()
        .try_fold(x.clone(), |acc, plan| acc.gather(plan))?;

    if factor > 0.0 {
        let mut starts = vec![0; shape.len()];
        starts[axis] = crop_key.randint(0, resized_len as i64 - n as i64) as usize;
        resized.gather(&GatherPlan::slice(&resized_shape, &starts, &shape)?)
    } else {
        let mut padding = vec![(0, 0); shape.len()];
        let left = (n - resized_len) / 2;
        padding[axis] = (left, n - resized_len - left);
        resized.gather(&GatherPlan::pad(&resized_shape, &padding, 0.0)?)
    }
}

// =============================================================================
// Dropout
// =============================================================================

/// Zeroes elements with probability `p` and scales survivors by `1/(1-p)`.
///
/// The mask has `mask_shape` and is broadcast against `x`.
pub fn dropout_with_mask_shape(
    x: &Variable,
    p: f32,
    key: &PrngKey,
    mask_shape: &[usize],
) -> Result<Variable> {
    if p == 0.0 {
        return Ok(x.clone());
    }
    let keep = 1.0 - p;
    let scale = 1.0 / keep;
    let count: usize = mask_shape.iter().product();
    let mask: Vec<f32> = key
        .bernoulli(f64::from(keep), count)
        .into_iter()
        .map(|kept| if kept { scale } else { 0.0 })
        .collect();
    x.mul(&Variable::from_tensor(Tensor::from_vec(mask, mask_shape)?))
}

/// Elementwise dropout.
pub fn dropout(x: &Variable, p: f32, key: &PrngKey) -> Result<Variable> {
    let shape = x.shape();
    dropout_with_mask_shape(x, p, key, &shape)
}

/// Channel dropout: drops whole slices along axis 0.
pub fn dropout_channels(x: &Variable, p: f32, key: &PrngKey) -> Result<Variable> {
    let mut mask_shape = vec![1; x.ndim()];
    if let Some(first) = mask_shape.first_mut() {
        *first = x.shape()[0];
    }
    dropout_with_mask_shape(x, p, key, &mask_shape)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_autograd::{gradcheck, numerical_gradient};
    use lamina_tensor::arange;

    fn var(data: Vec<f32>, shape: &[usize]) -> Variable {
        Variable::from_tensor(Tensor::from_vec(data, shape).unwrap())
    }

    fn mean_and_var(values: &[f32]) -> (f32, f32) {
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        (mean, var)
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize(&[3], 2, "size").unwrap(), vec![3, 3]);
        assert_eq!(canonicalize(&[1, 2, 3], 3, "size").unwrap(), vec![1, 2, 3]);
        assert!(canonicalize(&[1, 2], 3, "size").is_err());
    }

    #[test]
    fn test_layer_norm_statistics() {
        let x = var((0..12).map(|i| (i * i) as f32).collect(), &[3, 4]);
        let y = layer_norm(&x, None, None, 1e-5, &[4]).unwrap();
        for row in y.data().to_vec().chunks(4) {
            let (m, v) = mean_and_var(row);
            assert!(m.abs() < 1e-4);
            assert!((v - 1.0).abs() < 1e-3);
        }
        assert!(layer_norm(&x, None, None, 1e-5, &[3]).is_err());
    }

    #[test]
    fn test_group_norm_statistics() {
        let x = var((0..24).map(|i| (i as f32).sin() * 3.0).collect(), &[4, 6]);
        let y = group_norm(&x, None, None, 1e-5, 2).unwrap();
        assert_eq!(y.shape(), vec![4, 6]);
        for group in y.data().to_vec().chunks(12) {
            let (m, v) = mean_and_var(group);
            assert!(m.abs() < 1e-4);
            assert!((v - 1.0).abs() < 1e-3);
        }
        assert!(group_norm(&x, None, None, 1e-5, 3).is_err());
    }

    #[test]
    fn test_group_norm_affine_is_per_channel() {
        let x = var(vec![1.0, 3.0, 5.0, 7.0], &[2, 2]);
        let gamma = var(vec![1.0, 2.0], &[2]);
        let beta = var(vec![0.0, 10.0], &[2]);
        let y = group_norm(&x, Some(&gamma), Some(&beta), 0.0, 2).unwrap().data().to_vec();
        assert!((y[0] + 1.0).abs() < 1e-5);
        assert!((y[1] - 1.0).abs() < 1e-5);
        assert!((y[2] - 8.0).abs() < 1e-5);
        assert!((y[3] - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_batch_norm_train_statistics() {
        // (batch 2, channels 2): channel 0 sees {1, 3}, channel 1 sees {2, 6}.
        let x = var(vec![1.0, 2.0, 3.0, 6.0], &[2, 2]);
        let (y, mean, var_) = batch_norm_train(&x, 1, 0.0).unwrap();
        assert_eq!(mean.to_vec(), vec![2.0, 4.0]);
        assert_eq!(var_.to_vec(), vec![1.0, 4.0]);
        assert_eq!(y.data().to_vec(), vec![-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_batch_norm_eval() {
        let x = var(vec![1.0, 2.0, 3.0, 6.0], &[2, 2]);
        let mean = Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        let var_ = Tensor::from_vec(vec![4.0, 16.0], &[2]).unwrap();
        let y = batch_norm_eval(&x, &mean, &var_, 1, 0.0).unwrap();
        assert_eq!(y.data().to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_flatten_unflatten() {
        let x = Variable::from_tensor(Tensor::zeros(&[1, 2, 3, 4]));
        assert_eq!(flatten(&x, 0, -1).unwrap().shape(), vec![24]);
        assert_eq!(flatten(&x, 1, 2).unwrap().shape(), vec![1, 6, 4]);
        assert_eq!(flatten(&x, -2, -1).unwrap().shape(), vec![1, 2, 12]);
        assert!(flatten(&x, 2, 1).is_err());

        let y = Variable::from_tensor(Tensor::zeros(&[6, 4]));
        assert_eq!(unflatten(&y, 0, &[2, 3]).unwrap().shape(), vec![2, 3, 4]);
        assert_eq!(unflatten(&y, -1, &[2, 2]).unwrap().shape(), vec![6, 2, 2]);
        assert!(unflatten(&y, 0, &[4, 2]).is_err());
    }

    #[test]
    fn test_crop_and_center_crop() {
        let x = Variable::from_tensor(arange(1.0, 26.0).reshape_to(&[1, 5, 5]).unwrap());
        let y = crop(&x, &[2, 0], &[3, 3]).unwrap();
        assert_eq!(
            y.data().to_vec(),
            vec![11.0, 12.0, 13.0, 16.0, 17.0, 18.0, 21.0, 22.0, 23.0]
        );

        let line = Variable::from_tensor(arange(1.0, 13.0).reshape_to(&[1, 12]).unwrap());
        let c = center_crop(&line, &[4]).unwrap();
        assert_eq!(c.data().to_vec(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_spatial_kernels_reject_wrong_rank() {
        let scalar = Variable::from_tensor(Tensor::scalar(1.0));
        let key = PrngKey::new(0);
        assert!(crop(&scalar, &[0], &[1]).is_err());
        assert!(crop(&scalar, &[], &[]).is_err());
        assert!(center_crop(&scalar, &[1]).is_err());
        assert!(random_crop(&scalar, &[1], &key).is_err());
        assert!(pad(&scalar, &[(1, 1)], 0.0).is_err());
        assert!(resize(&scalar, &[2], ResizeMethod::Linear, true).is_err());

        let line = Variable::from_tensor(Tensor::ones(&[4]));
        assert!(center_crop(&line, &[2]).is_err());
        assert!(crop(&line, &[0, 0], &[1, 1]).is_err());
    }

    #[test]
    fn test_random_crop_stays_inside() {
        let x = Variable::from_tensor(arange(0.0, 20.0).reshape_to(&[2, 10]).unwrap());
        for seed in 0..20 {
            let y = random_crop(&x, &[4], &PrngKey::new(seed)).unwrap();
            let v = y.data().to_vec();
            assert_eq!(y.shape(), vec![2, 4]);
            // Contiguous window, same offset in both channels.
            assert_eq!(v[1] - v[0], 1.0);
            assert_eq!(v[4] - v[0], 10.0);
            assert!(v[3] <= 9.0);
        }
    }

    #[test]
    fn test_pad_values() {
        let x = var(vec![1.0, 2.0], &[1, 2]);
        let y = pad(&x, &[(1, 2)], -1.0).unwrap();
        assert_eq!(y.data().to_vec(), vec![-1.0, 1.0, 2.0, -1.0, -1.0]);
    }

    #[test]
    fn test_resize_keeps_channels() {
        let x = Variable::from_tensor(Tensor::ones(&[3, 4, 4]));
        let y = resize(&x, &[8, 2], ResizeMethod::Linear, true).unwrap();
        assert_eq!(y.shape(), vec![3, 8, 2]);
        assert!(y.data().to_vec().iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_random_zoom_along_axis() {
        let x = Variable::from_tensor(arange(0.0, 8.0).reshape_to(&[1, 8]).unwrap());
        let key = PrngKey::new(0);

        let same = random_zoom_along_axis(&x, 1, (0.0, 0.0), &key, &key).unwrap();
        assert_eq!(same.data().to_vec(), x.data().to_vec());

        let zoomed_in = random_zoom_along_axis(&x, 1, (0.5, 0.5), &key, &key).unwrap();
        assert_eq!(zoomed_in.shape(), vec![1, 8]);

        let zoomed_out = random_zoom_along_axis(&x, 1, (-0.5, -0.5), &key, &key).unwrap();
        let v = zoomed_out.data().to_vec();
        assert_eq!(v.len(), 8);
        // Shrunk to 4 samples, centred with two zeros each side.
        assert_eq!(&v[..2], &[0.0, 0.0]);
        assert_eq!(&v[6..], &[0.0, 0.0]);
        assert!(v[2..6].iter().all(|&s| s > 0.0));
    }

    #[test]
    fn test_dropout_mask() {
        let x = Variable::from_tensor(Tensor::ones(&[1000]));
        let key = PrngKey::new(7);
        let y = dropout(&x, 0.25, &key).unwrap().data().to_vec();
        assert!(y.iter().all(|&v| v == 0.0 || (v - 1.0 / 0.75).abs() < 1e-6));
        let kept = y.iter().filter(|&&v| v != 0.0).count();
        assert!((650..850).contains(&kept));

        assert_eq!(dropout(&x, 0.0, &key).unwrap().data().to_vec(), vec![1.0; 1000]);
        assert!(dropout(&x, 1.0, &key).unwrap().data().to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_channel_dropout_drops_whole_channels() {
        let x = Variable::from_tensor(Tensor::ones(&[16, 3, 3]));
        let y = dropout_channels(&x, 0.5, &PrngKey::new(2)).unwrap().data().to_vec();
        for channel in y.chunks(9) {
            assert!(channel.iter().all(|&v| v == channel[0]));
        }
    }

    #[test]
    fn test_norm_gradients() {
        let f = |v: &Variable| -> Result<Variable> {
            let w = Variable::from_tensor(Tensor::from_vec(
                vec![1.0, -2.0, 0.5, 3.0, 1.5, -1.0],
                &[2, 3],
            )?);
            layer_norm(v, None, None, 1e-5, &[3])?.mul(&w)?.sum()
        };
        let x = Variable::new(
            Tensor::from_vec(vec![0.3, -1.2, 2.0, 0.7, 1.1, -0.4], &[2, 3]).unwrap(),
            true,
        );
        f(&x).unwrap().backward().unwrap();
        let numerical = numerical_gradient(f, &x, 1e-3).unwrap();
        assert!(gradcheck(&x.grad().unwrap(), &numerical, 1e-2, 1e-2));
    }
}
