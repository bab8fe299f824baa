//! Reshape Layers - Resize, Crop, Pad, Zoom and Flatten
//!
//! Spatial layers are generic over the number of spatial dimensions `N`
//! and take unbatched, channel-first inputs `(C, *spatial)`; the `1D`, `2D`
//! and `3D` aliases fix `N`. Per-dimension sizes may be given as a single
//! value, which is used for every spatial dimension.
//!
//! Random crop and random zoom are augmentations: their eval form is
//! [`Identity`].
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_autograd::Variable;
use lamina_core::{Error, PrngKey, Result};
use lamina_tensor::ResizeMethod;
use serde::{Deserialize, Serialize};

use crate::functional::{
    canonicalize, center_crop, crop, flatten, pad, random_crop, random_zoom_along_axis, resize,
    unflatten, validate_spatial_ndim,
};
use crate::layers::linear::Identity;
use crate::module::Module;

fn nd_name<const N: usize>(names: [&'static str; 3]) -> &'static str {
    names[N.clamp(1, 3) - 1]
}

// =============================================================================
// Resize and Upsample
// =============================================================================

/// Resizes the spatial dimensions to a fixed size.
#[derive(Debug, Clone)]
pub struct ResizeNd<const N: usize> {
    size: Vec<usize>,
    method: ResizeMethod,
    antialias: bool,
}

/// Resize for `(C, L)` inputs.
pub type Resize1D = ResizeNd<1>;
/// Resize for `(C, H, W)` inputs.
pub type Resize2D = ResizeNd<2>;
/// Resize for `(C, H, W, D)` inputs.
pub type Resize3D = ResizeNd<3>;

impl<const N: usize> ResizeNd<N> {
    /// Nearest-neighbour resize with antialiasing.
    pub fn new(size: &[usize]) -> Result<Self> {
        Self::with_method(size, ResizeMethod::Nearest, true)
    }

    /// Resize with an explicit interpolation method.
    pub fn with_method(size: &[usize], method: ResizeMethod, antialias: bool) -> Result<Self> {
        Ok(Self {
            size: canonicalize(size, N, "size")?,
            method,
            antialias,
        })
    }

    /// Target spatial size.
    pub fn size(&self) -> &[usize] {
        &self.size
    }
}

impl<const N: usize> Module for ResizeNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        resize(input, &self.size, self.method, self.antialias)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["Resize1D", "Resize2D", "Resize3D"])
    }
}

/// Scales the spatial dimensions by integer factors.
#[derive(Debug, Clone)]
pub struct UpsampleNd<const N: usize> {
    scale: Vec<usize>,
    method: ResizeMethod,
}

/// Upsample for `(C, L)` inputs.
pub type Upsample1D = UpsampleNd<1>;
/// Upsample for `(C, H, W)` inputs.
pub type Upsample2D = UpsampleNd<2>;
/// Upsample for `(C, H, W, D)` inputs.
pub type Upsample3D = UpsampleNd<3>;

impl<const N: usize> UpsampleNd<N> {
    /// Nearest-neighbour upsampling.
    pub fn new(scale: &[usize]) -> Result<Self> {
        Self::with_method(scale, ResizeMethod::Nearest)
    }

    /// Upsampling with an explicit interpolation method.
    pub fn with_method(scale: &[usize], method: ResizeMethod) -> Result<Self> {
        let scale = canonicalize(scale, N, "scale")?;
        if scale.contains(&0) {
            return Err(Error::invalid_argument("scale", "must be positive"));
        }
        Ok(Self { scale, method })
    }
}

impl<const N: usize> Module for UpsampleNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        let size: Vec<usize> = input.shape()[1..]
            .iter()
            .zip(&self.scale)
            .map(|(n, s)| n * s)
            .collect();
        resize(input, &size, self.method, true)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["Upsample1D", "Upsample2D", "Upsample3D"])
    }
}

// =============================================================================
// Crops
// =============================================================================

/// Crops a window of `size` starting at `start` on each spatial dimension.
///
/// Starts are clamped so the window fits, and the channel axis is kept
/// whole.
///
/// # Example
/// ```ignore
/// // 1..=25 as (1, 5, 5)
/// let y = Crop2D::new(&[3], &[2, 0])?.forward(&x)?;
/// // [[11, 12, 13], [16, 17, 18], [21, 22, 23]]
/// ```
#[derive(Debug, Clone)]
pub struct CropNd<const N: usize> {
    size: Vec<usize>,
    start: Vec<usize>,
}

/// Crop for `(C, L)` inputs.
pub type Crop1D = CropNd<1>;
/// Crop for `(C, H, W)` inputs.
pub type Crop2D = CropNd<2>;
/// Crop for `(C, H, W, D)` inputs.
pub type Crop3D = CropNd<3>;

impl<const N: usize> CropNd<N> {
    /// Creates a crop of `size` at `start`.
    pub fn new(size: &[usize], start: &[usize]) -> Result<Self> {
        Ok(Self {
            size: canonicalize(size, N, "size")?,
            start: canonicalize(start, N, "start")?,
        })
    }
}

impl<const N: usize> Module for CropNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        crop(input, &self.start, &self.size)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["Crop1D", "Crop2D", "Crop3D"])
    }
}

/// Crops the centre of each spatial dimension.
#[derive(Debug, Clone)]
pub struct CenterCropNd<const N: usize> {
    size: Vec<usize>,
}

/// Center crop for `(C, L)` inputs.
pub type CenterCrop1D = CenterCropNd<1>;
/// Center crop for `(C, H, W)` inputs.
pub type CenterCrop2D = CenterCropNd<2>;
/// Center crop for `(C, H, W, D)` inputs.
pub type CenterCrop3D = CenterCropNd<3>;

impl<const N: usize> CenterCropNd<N> {
    /// Creates a centre crop of `size`.
    pub fn new(size: &[usize]) -> Result<Self> {
        Ok(Self {
            size: canonicalize(size, N, "size")?,
        })
    }
}

impl<const N: usize> Module for CenterCropNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        center_crop(input, &self.size)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["CenterCrop1D", "CenterCrop2D", "CenterCrop3D"])
    }
}

/// Crops a window of `size` at a random position.
#[derive(Debug, Clone)]
pub struct RandomCropNd<const N: usize> {
    size: Vec<usize>,
}

/// Random crop for `(C, L)` inputs.
pub type RandomCrop1D = RandomCropNd<1>;
/// Random crop for `(C, H, W)` inputs.
pub type RandomCrop2D = RandomCropNd<2>;
/// Random crop for `(C, H, W, D)` inputs.
pub type RandomCrop3D = RandomCropNd<3>;

impl<const N: usize> RandomCropNd<N> {
    /// Creates a random crop of `size`.
    pub fn new(size: &[usize]) -> Result<Self> {
        Ok(Self {
            size: canonicalize(size, N, "size")?,
        })
    }
}

impl<const N: usize> Module for RandomCropNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        random_crop(input, &self.size, key)
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        Box::new(Identity)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["RandomCrop1D", "RandomCrop2D", "RandomCrop3D"])
    }
}

// =============================================================================
// Padding
// =============================================================================

/// Padding amounts for each spatial dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Padding {
    /// The same amount on both sides of every dimension.
    Same(usize),
    /// One amount per dimension, used on both sides.
    PerDim(Vec<usize>),
    /// `(before, after)` per dimension.
    Pairs(Vec<(usize, usize)>),
}

impl Padding {
    /// Resolves to one `(before, after)` pair per spatial dimension.
    pub fn resolve(&self, n: usize) -> Result<Vec<(usize, usize)>> {
        match self {
            Self::Same(p) => Ok(vec![(*p, *p); n]),
            Self::PerDim(ps) => {
                let pairs: Vec<(usize, usize)> = ps.iter().map(|&p| (p, p)).collect();
                canonicalize(&pairs, n, "padding")
            }
            Self::Pairs(pairs) => canonicalize(pairs, n, "padding"),
        }
    }
}

impl From<usize> for Padding {
    fn from(p: usize) -> Self {
        Self::Same(p)
    }
}

impl From<&[usize]> for Padding {
    fn from(ps: &[usize]) -> Self {
        Self::PerDim(ps.to_vec())
    }
}

impl From<&[(usize, usize)]> for Padding {
    fn from(pairs: &[(usize, usize)]) -> Self {
        Self::Pairs(pairs.to_vec())
    }
}

impl<const K: usize> From<[usize; K]> for Padding {
    fn from(ps: [usize; K]) -> Self {
        Self::PerDim(ps.to_vec())
    }
}

impl<const K: usize> From<[(usize, usize); K]> for Padding {
    fn from(pairs: [(usize, usize); K]) -> Self {
        Self::Pairs(pairs.to_vec())
    }
}

/// Pads the spatial dimensions with a constant.
#[derive(Debug, Clone)]
pub struct PadNd<const N: usize> {
    padding: Vec<(usize, usize)>,
    value: f32,
}

/// Padding for `(C, L)` inputs.
pub type Pad1D = PadNd<1>;
/// Padding for `(C, H, W)` inputs.
pub type Pad2D = PadNd<2>;
/// Padding for `(C, H, W, D)` inputs.
pub type Pad3D = PadNd<3>;

impl<const N: usize> PadNd<N> {
    /// Zero padding.
    pub fn new(padding: impl Into<Padding>) -> Result<Self> {
        Self::with_value(padding, 0.0)
    }

    /// Padding with a constant `value`.
    pub fn with_value(padding: impl Into<Padding>, value: f32) -> Result<Self> {
        Ok(Self {
            padding: padding.into().resolve(N)?,
            value,
        })
    }

    /// `(before, after)` per spatial dimension.
    pub fn padding(&self) -> &[(usize, usize)] {
        &self.padding
    }
}

impl<const N: usize> Module for PadNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        pad(input, &self.padding, self.value)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["Pad1D", "Pad2D", "Pad3D"])
    }
}

// =============================================================================
// Random Zoom
// =============================================================================

/// Zooms each spatial dimension by a random factor, keeping the shape.
///
/// Each factor range is `(min, max)`; a factor `f > 0` zooms in and `f < 0`
/// zooms out (zero padded). The 2-D variant returns a detached output.
#[derive(Debug, Clone)]
pub struct RandomZoomNd<const N: usize> {
    factors: [(f32, f32); N],
}

/// Random zoom over the length of `(C, L)` inputs.
pub type RandomZoom1D = RandomZoomNd<1>;
/// Random zoom over height and width of `(C, H, W)` inputs.
pub type RandomZoom2D = RandomZoomNd<2>;
/// Random zoom over height, width and depth of `(C, H, W, D)` inputs.
pub type RandomZoom3D = RandomZoomNd<3>;

impl<const N: usize> RandomZoomNd<N> {
    /// Creates a zoom with one factor range per spatial dimension.
    pub fn new(factors: [(f32, f32); N]) -> Result<Self> {
        for &(lo, hi) in &factors {
            if lo > hi || lo < -1.0 {
                return Err(Error::invalid_argument(
                    "factor",
                    format!("expected -1 <= min <= max, got ({lo}, {hi})"),
                ));
            }
        }
        Ok(Self { factors })
    }
}

impl<const N: usize> Default for RandomZoomNd<N> {
    fn default() -> Self {
        Self {
            factors: [(0.0, 1.0); N],
        }
    }
}

impl<const N: usize> Module for RandomZoomNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        let keys = key.split(2 * N);
        let (factor_keys, crop_keys) = keys.split_at(N);
        let zoomed = self
            .factors
            .iter()
            .zip(factor_keys.iter().zip(crop_keys))
            .enumerate()
            .try_fold(input.clone(), |x, (i, (&range, (fk, ck)))| {
                random_zoom_along_axis(&x, i + 1, range, fk, ck)
            })?;
        Ok(if N == 2 { zoomed.detach() } else { zoomed })
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        Box::new(Identity)
    }

    fn name(&self) -> &'static str {
        nd_name::<N>(["RandomZoom1D", "RandomZoom2D", "RandomZoom3D"])
    }
}

// =============================================================================
// Flatten and Unflatten
// =============================================================================

/// Merges dimensions `start_dim..=end_dim` into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flatten {
    /// First merged dimension; negative counts from the end.
    pub start_dim: i64,
    /// Last merged dimension (inclusive); negative counts from the end.
    pub end_dim: i64,
}

impl Flatten {
    /// Flattens `start_dim..=end_dim`.
    pub fn new(start_dim: i64, end_dim: i64) -> Self {
        Self { start_dim, end_dim }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new(0, -1)
    }
}

impl Module for Flatten {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        flatten(input, self.start_dim, self.end_dim)
    }

    fn name(&self) -> &'static str {
        "Flatten"
    }
}

/// Splits dimension `dim` into `shape`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unflatten {
    /// Dimension to split; negative counts from the end.
    pub dim: i64,
    /// Sizes replacing `dim`.
    pub shape: Vec<usize>,
}

impl Unflatten {
    /// Splits `dim` into `shape`.
    pub fn new(dim: i64, shape: &[usize]) -> Self {
        Self {
            dim,
            shape: shape.to_vec(),
        }
    }
}

impl Module for Unflatten {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        unflatten(input, self.dim, &self.shape)
    }

    fn name(&self) -> &'static str {
        "Unflatten"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::tree_eval;
    use lamina_tensor::{arange, Tensor};

    fn arange_var(n: usize, shape: &[usize]) -> Variable {
        Variable::from_tensor(arange(1.0, n as f32 + 1.0).reshape_to(shape).unwrap())
    }

    #[test]
    fn test_crop2d() {
        let x = arange_var(25, &[1, 5, 5]);
        let y = Crop2D::new(&[3], &[2, 0]).unwrap().forward(&x).unwrap();
        assert_eq!(y.shape(), vec![1, 3, 3]);
        assert_eq!(
            y.data().to_vec(),
            vec![11.0, 12.0, 13.0, 16.0, 17.0, 18.0, 21.0, 22.0, 23.0]
        );
        assert!(Crop2D::new(&[3, 3, 3], &[0]).is_err());
        assert!(Crop2D::new(&[3], &[0]).unwrap().forward(&arange_var(5, &[5])).is_err());
    }

    #[test]
    fn test_crop_start_is_clamped() {
        let x = arange_var(6, &[1, 6]);
        let y = Crop1D::new(&[3], &[5]).unwrap().forward(&x).unwrap();
        assert_eq!(y.data().to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_center_crop() {
        let x = arange_var(12, &[1, 12]);
        let y = CenterCrop1D::new(&[4]).unwrap().forward(&x).unwrap();
        assert_eq!(y.data().to_vec(), vec![5.0, 6.0, 7.0, 8.0]);

        let x = arange_var(144, &[1, 12, 12]);
        let y = CenterCrop2D::new(&[4]).unwrap().forward(&x).unwrap();
        assert_eq!(y.shape(), vec![1, 4, 4]);
        let v = y.data().to_vec();
        assert_eq!(&v[..4], &[53.0, 54.0, 55.0, 56.0]);
        assert_eq!(&v[12..], &[89.0, 90.0, 91.0, 92.0]);
    }

    #[test]
    fn test_random_crop() {
        let layer = RandomCrop2D::new(&[2, 3]).unwrap();
        let x = arange_var(2 * 4 * 5, &[2, 4, 5]);
        let y = layer.forward_with_key(&x, &PrngKey::new(9)).unwrap();
        assert_eq!(y.shape(), vec![2, 2, 3]);
        assert_eq!(tree_eval(Box::new(layer)).name(), "Identity");
    }

    #[test]
    fn test_pad() {
        let x = arange_var(4, &[1, 2, 2]);
        let y = Pad2D::new(1usize).unwrap().forward(&x).unwrap();
        assert_eq!(y.shape(), vec![1, 4, 4]);

        let y = Pad2D::with_value([(0, 1), (2, 0)], 9.0).unwrap().forward(&x).unwrap();
        assert_eq!(y.shape(), vec![1, 3, 4]);
        assert_eq!(
            y.data().to_vec(),
            vec![9.0, 9.0, 1.0, 2.0, 9.0, 9.0, 3.0, 4.0, 9.0, 9.0, 9.0, 9.0]
        );

        assert_eq!(Pad3D::new([1, 2, 3]).unwrap().padding(), &[(1, 1), (2, 2), (3, 3)]);
        assert!(Pad2D::new([1, 2, 3]).is_err());

        let p: Padding = serde_json::from_str("[[1, 2], [0, 0]]").unwrap();
        assert_eq!(p, Padding::Pairs(vec![(1, 2), (0, 0)]));
    }

    #[test]
    fn test_pad_gradient_ignores_fill() {
        let x = Variable::new(Tensor::ones(&[1, 2]), true);
        let y = Pad1D::with_value(2usize, 5.0).unwrap().forward(&x).unwrap();
        y.sum().unwrap().backward().unwrap();
        assert_eq!(x.grad().unwrap().to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_resize_and_upsample() {
        let x = Variable::from_tensor(Tensor::ones(&[3, 4, 4]));
        let y = Resize2D::new(&[8]).unwrap().forward(&x).unwrap();
        assert_eq!(y.shape(), vec![3, 8, 8]);
        let y = Resize2D::with_method(&[2, 6], ResizeMethod::Cubic, true)
            .unwrap()
            .forward(&x)
            .unwrap();
        assert_eq!(y.shape(), vec![3, 2, 6]);
        assert!(Resize1D::new(&[8]).unwrap().forward(&x).is_err());

        let line = Variable::from_tensor(Tensor::from_vec(vec![1.0, 2.0], &[1, 2]).unwrap());
        let y = Upsample1D::new(&[2]).unwrap().forward(&line).unwrap();
        assert_eq!(y.data().to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
        assert!(Upsample2D::new(&[0]).is_err());
    }

    #[test]
    fn test_random_zoom() {
        let x = Variable::from_tensor(Tensor::ones(&[2, 6, 6]));
        let layer = RandomZoom2D::new([(0.2, 0.5), (-0.5, -0.2)]).unwrap();
        let y = layer.forward_with_key(&x, &PrngKey::new(1)).unwrap();
        assert_eq!(y.shape(), vec![2, 6, 6]);
        assert!(!y.requires_grad());

        let identity = RandomZoom1D::new([(0.0, 0.0)]).unwrap();
        let line = arange_var(5, &[1, 5]);
        assert_eq!(identity.forward(&line).unwrap().data().to_vec(), line.data().to_vec());

        assert!(RandomZoom1D::new([(0.5, 0.1)]).is_err());
        assert_eq!(tree_eval(Box::new(RandomZoom3D::default())).name(), "Identity");
    }

    #[test]
    fn test_flatten_layers() {
        let x = Variable::from_tensor(Tensor::zeros(&[1, 2, 3, 4]));
        assert_eq!(Flatten::default().forward(&x).unwrap().shape(), vec![24]);
        assert_eq!(Flatten::new(1, 2).forward(&x).unwrap().shape(), vec![1, 6, 4]);
        let y = Unflatten::new(1, &[1, 2]).forward(&x).unwrap();
        assert_eq!(y.shape(), vec![1, 1, 2, 3, 4]);
    }
}
