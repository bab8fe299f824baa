//! Linear Layers - Multilinear, Linear, Bilinear and General Linear
//!
//! All linear layers are einsum contractions against a weight of shape
//! `(*in_features, out_features)`, followed by an optional bias of shape
//! `(out_features,)`.
//!
//! - [`Multilinear`] contracts the last axis of each of its `n` inputs:
//!   `"...a,...b,abc->...c"` for `n = 2`.
//! - [`Linear`] and [`Bilinear`] are multilinear maps of degree 1 and 2.
//! - [`GeneralLinear`] contracts arbitrary axes of a single input.
//!
//! Every layer can also be created lazily, with its input sizes read from
//! the first sample passed to `materialize`.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_autograd::Variable;
use lamina_core::{Error, PrngKey, Result};
use lamina_tensor::Tensor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::init::{resolve_optional, Init};
use crate::module::Module;
use crate::parameter::Parameter;

/// Subscript letters available to einsum strings.
const ALPHA: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// =============================================================================
// Options
// =============================================================================

/// Initializers for a linear layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOptions {
    /// Weight initializer.
    pub weight_init: Init,
    /// Bias initializer; `None` disables the bias.
    pub bias_init: Option<Init>,
}

impl Default for LinearOptions {
    fn default() -> Self {
        Self {
            weight_init: Init::HeNormal,
            bias_init: Some(Init::Ones),
        }
    }
}

// =============================================================================
// Einsum Strings
// =============================================================================

fn letter(i: usize) -> char {
    char::from(ALPHA[i])
}

/// Einsum string of a multilinear map of `degree` inputs.
///
/// ```
/// use lamina_nn::layers::linear::multilinear_einsum_string;
/// assert_eq!(multilinear_einsum_string(1).unwrap(), "...a,ab->...b");
/// assert_eq!(multilinear_einsum_string(2).unwrap(), "...a,...b,abc->...c");
/// ```
pub fn multilinear_einsum_string(degree: usize) -> Result<String> {
    if !(1..ALPHA.len()).contains(&degree) {
        return Err(Error::invalid_argument(
            "degree",
            format!("must be between 1 and {}, got {degree}", ALPHA.len() - 1),
        ));
    }
    let inputs: Vec<String> = (0..degree).map(|i| format!("...{}", letter(i))).collect();
    let weight: String = (0..=degree).map(letter).collect();
    Ok(format!("{},{weight}->...{}", inputs.join(","), letter(degree)))
}

/// Einsum string of a linear map over the (negative) `axes` of one input.
///
/// The input gets one letter per trailing axis. The weight takes the letters
/// at the sorted `axes`, then the output letter; the result keeps the
/// untouched letters and appends the output letter.
///
/// ```
/// use lamina_nn::layers::linear::general_linear_einsum_string;
/// assert_eq!(general_linear_einsum_string(&[-2]).unwrap(), "...ab,ac->...bc");
/// assert_eq!(general_linear_einsum_string(&[-1, -2]).unwrap(), "...ab,abc->...c");
/// assert_eq!(general_linear_einsum_string(&[-1, -3]).unwrap(), "...abc,acd->...bd");
/// ```
pub fn general_linear_einsum_string(axes: &[i64]) -> Result<String> {
    if axes.is_empty() || axes.iter().any(|&a| a >= 0) {
        return Err(Error::invalid_argument(
            "in_axes",
            format!("axes must be negative and non-empty, got {axes:?}"),
        ));
    }
    let total = axes.iter().map(|a| a.unsigned_abs() as usize).max().unwrap_or(0);
    if total >= ALPHA.len() {
        return Err(Error::invalid_argument(
            "in_axes",
            format!("axis {} is beyond the {} supported letters", -(total as i64), ALPHA.len() - 1),
        ));
    }
    let input: String = (0..total).map(letter).collect();
    let mut picked: Vec<usize> = axes.iter().map(|&a| total - a.unsigned_abs() as usize).collect();
    picked.sort_unstable();
    let weight: String = picked.iter().map(|&i| letter(i)).chain(std::iter::once(letter(total))).collect();
    let result: String = (0..total)
        .filter(|i| !picked.contains(i))
        .map(letter)
        .chain(std::iter::once(letter(total)))
        .collect();
    Ok(format!("...{input},{weight}->...{result}"))
}

// =============================================================================
// Weights
// =============================================================================

/// Parameters of a layer, or the key to create them from once sizes are known.
#[derive(Debug, Clone)]
enum Weights {
    Lazy(PrngKey),
    Ready {
        weight: Parameter,
        bias: Option<Parameter>,
    },
}

impl Weights {
    fn create(in_features: &[usize], out_features: usize, options: &LinearOptions, key: &PrngKey) -> Result<Self> {
        let keys = key.split(2);
        let mut shape = in_features.to_vec();
        shape.push(out_features);
        let weight = options.weight_init.resolve(&keys[0], &shape)?;
        let bias = resolve_optional(options.bias_init, &keys[1], &[out_features])?;
        Ok(Self::Ready {
            weight: Parameter::named("weight", weight, true),
            bias: bias.map(|b| Parameter::named("bias", b, true)),
        })
    }

    fn ready(&self, layer: &'static str) -> Result<(&Parameter, Option<&Parameter>)> {
        match self {
            Self::Lazy(_) => Err(Error::Uninitialized { layer }),
            Self::Ready { weight, bias } => Ok((weight, bias.as_ref())),
        }
    }

    fn weight(&self) -> Option<Parameter> {
        match self {
            Self::Lazy(_) => None,
            Self::Ready { weight, .. } => Some(weight.clone()),
        }
    }

    fn bias(&self) -> Option<Parameter> {
        match self {
            Self::Lazy(_) => None,
            Self::Ready { bias, .. } => bias.clone(),
        }
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.weight().into_iter().chain(self.bias()).collect()
    }
}

fn add_bias(x: Variable, bias: Option<&Parameter>) -> Result<Variable> {
    match bias {
        Some(b) => x.add(&b.variable()),
        None => Ok(x),
    }
}

// =============================================================================
// Multilinear
// =============================================================================

/// Linear map of several inputs, each contracted on its last axis.
///
/// # Shape
/// - Inputs: `(*, in_features[i])`, with broadcastable leading axes
/// - Output: `(*, out_features)`
///
/// # Example
/// ```ignore
/// let layer = Multilinear::new(&[5, 6], 7, &key)?;
/// let y = layer.forward_many(&[&x1, &x2])?; // (batch, 7)
/// ```
#[derive(Debug, Clone)]
pub struct Multilinear {
    in_features: Option<Vec<usize>>,
    degree: usize,
    out_features: usize,
    options: LinearOptions,
    weights: Weights,
}

impl Multilinear {
    /// Creates a layer with default initializers.
    pub fn new(in_features: &[usize], out_features: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, out_features, LinearOptions::default(), key)
    }

    /// Creates a layer with explicit initializers.
    pub fn with_options(
        in_features: &[usize],
        out_features: usize,
        options: LinearOptions,
        key: &PrngKey,
    ) -> Result<Self> {
        multilinear_einsum_string(in_features.len())?;
        Ok(Self {
            in_features: Some(in_features.to_vec()),
            degree: in_features.len(),
            out_features,
            weights: Weights::create(in_features, out_features, &options, key)?,
            options,
        })
    }

    /// Creates a layer whose input sizes are inferred by [`materialize`](Self::materialize).
    pub fn lazy(degree: usize, out_features: usize, key: &PrngKey) -> Result<Self> {
        Self::lazy_with_options(degree, out_features, LinearOptions::default(), key)
    }

    /// Lazy variant of [`with_options`](Self::with_options).
    pub fn lazy_with_options(
        degree: usize,
        out_features: usize,
        options: LinearOptions,
        key: &PrngKey,
    ) -> Result<Self> {
        multilinear_einsum_string(degree)?;
        Ok(Self {
            in_features: None,
            degree,
            out_features,
            options,
            weights: Weights::Lazy(*key),
        })
    }

    /// Returns a ready layer sized from the last axis of each sample input.
    ///
    /// An already initialized layer is returned as is.
    pub fn materialize(&self, inputs: &[&Tensor]) -> Result<Self> {
        let Weights::Lazy(key) = &self.weights else {
            return Ok(self.clone());
        };
        if inputs.len() != self.degree {
            return Err(Error::invalid_argument(
                "inputs",
                format!("expected {} inputs, got {}", self.degree, inputs.len()),
            ));
        }
        let in_features = inputs
            .iter()
            .map(|x| x.shape().last().copied().ok_or(Error::EmptyTensor))
            .collect::<Result<Vec<_>>>()?;
        debug!(layer = "Multilinear", ?in_features, out_features = self.out_features, "materialized lazy layer");
        Self::with_options(&in_features, self.out_features, self.options, key)
    }

    /// Input sizes, once known.
    pub fn in_features(&self) -> Option<&[usize]> {
        self.in_features.as_deref()
    }

    /// Number of inputs.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Output size.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Weight of shape `(*in_features, out_features)`.
    pub fn weight(&self) -> Option<Parameter> {
        self.weights.weight()
    }

    /// Bias of shape `(out_features,)`.
    pub fn bias(&self) -> Option<Parameter> {
        self.weights.bias()
    }

    /// Applies the layer to one input per in-feature.
    pub fn forward_many(&self, inputs: &[&Variable]) -> Result<Variable> {
        let (weight, bias) = self.weights.ready("Multilinear")?;
        if inputs.len() != self.degree {
            return Err(Error::invalid_argument(
                "inputs",
                format!("expected {} inputs, got {}", self.degree, inputs.len()),
            ));
        }
        let spec = multilinear_einsum_string(self.degree)?;
        let weight = weight.variable();
        let mut operands: Vec<&Variable> = inputs.to_vec();
        operands.push(&weight);
        add_bias(Variable::einsum(&spec, &operands)?, bias)
    }
}

impl Module for Multilinear {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        if self.degree != 1 {
            return Err(Error::invalid_operation(format!(
                "Multilinear of degree {} needs forward_many",
                self.degree
            )));
        }
        self.forward_many(&[input])
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.weights.parameters()
    }

    fn name(&self) -> &'static str {
        "Multilinear"
    }
}

// =============================================================================
// Linear
// =============================================================================

/// Applies `y = x·W + b` on the last axis.
///
/// # Shape
/// - Input: `(*, in_features)`
/// - Output: `(*, out_features)`
///
/// # Example
/// ```ignore
/// let linear = Linear::new(20, 30, &key)?;
/// let output = linear.forward(&input)?;  // (128, 20) -> (128, 30)
/// ```
#[derive(Debug, Clone)]
pub struct Linear {
    inner: Multilinear,
}

impl Linear {
    /// Creates a layer with `he_normal` weights and a bias of ones.
    pub fn new(in_features: usize, out_features: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, out_features, LinearOptions::default(), key)
    }

    /// Creates a layer with explicit initializers.
    pub fn with_options(
        in_features: usize,
        out_features: usize,
        options: LinearOptions,
        key: &PrngKey,
    ) -> Result<Self> {
        Multilinear::with_options(&[in_features], out_features, options, key).map(|inner| Self { inner })
    }

    /// Creates a layer that reads `in_features` from its first sample.
    pub fn lazy(out_features: usize, key: &PrngKey) -> Result<Self> {
        Self::lazy_with_options(out_features, LinearOptions::default(), key)
    }

    /// Lazy variant of [`with_options`](Self::with_options).
    pub fn lazy_with_options(out_features: usize, options: LinearOptions, key: &PrngKey) -> Result<Self> {
        Multilinear::lazy_with_options(1, out_features, options, key).map(|inner| Self { inner })
    }

    /// Returns a ready layer sized from `input`'s last axis.
    pub fn materialize(&self, input: &Tensor) -> Result<Self> {
        self.inner.materialize(&[input]).map(|inner| Self { inner })
    }

    /// Input size, once known.
    pub fn in_features(&self) -> Option<usize> {
        self.inner.in_features().map(|f| f[0])
    }

    /// Output size.
    pub fn out_features(&self) -> usize {
        self.inner.out_features()
    }

    /// Weight of shape `(in_features, out_features)`.
    pub fn weight(&self) -> Option<Parameter> {
        self.inner.weight()
    }

    /// Bias of shape `(out_features,)`.
    pub fn bias(&self) -> Option<Parameter> {
        self.inner.bias()
    }
}

impl Module for Linear {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        let (weight, bias) = self.inner.weights.ready("Linear")?;
        let weight = weight.variable();
        add_bias(Variable::einsum("...a,ab->...b", &[input, &weight])?, bias)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.inner.parameters()
    }

    fn name(&self) -> &'static str {
        "Linear"
    }
}

// =============================================================================
// Bilinear
// =============================================================================

/// Linear map of two inputs: `y = einsum("...a,...b,abc->...c", x1, x2, W) + b`.
#[derive(Debug, Clone)]
pub struct Bilinear {
    inner: Multilinear,
}

impl Bilinear {
    /// Creates a layer with default initializers.
    pub fn new(in1_features: usize, in2_features: usize, out_features: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in1_features, in2_features, out_features, LinearOptions::default(), key)
    }

    /// Creates a layer with explicit initializers.
    pub fn with_options(
        in1_features: usize,
        in2_features: usize,
        out_features: usize,
        options: LinearOptions,
        key: &PrngKey,
    ) -> Result<Self> {
        Multilinear::with_options(&[in1_features, in2_features], out_features, options, key)
            .map(|inner| Self { inner })
    }

    /// Creates a layer that reads its input sizes from the first samples.
    pub fn lazy(out_features: usize, key: &PrngKey) -> Result<Self> {
        Multilinear::lazy(2, out_features, key).map(|inner| Self { inner })
    }

    /// Returns a ready layer sized from the two sample inputs.
    pub fn materialize(&self, x1: &Tensor, x2: &Tensor) -> Result<Self> {
        self.inner.materialize(&[x1, x2]).map(|inner| Self { inner })
    }

    /// Applies the layer to a pair of inputs.
    pub fn forward_pair(&self, x1: &Variable, x2: &Variable) -> Result<Variable> {
        self.inner.forward_many(&[x1, x2])
    }

    /// Weight of shape `(in1, in2, out)`.
    pub fn weight(&self) -> Option<Parameter> {
        self.inner.weight()
    }

    /// Returns the weight and bias.
    pub fn parameters(&self) -> Vec<Parameter> {
        self.inner.parameters()
    }
}

// =============================================================================
// General Linear
// =============================================================================

/// Linear map over arbitrary axes of one input.
///
/// The contracted axes are removed and the output features are appended as
/// the last axis.
///
/// # Example
/// ```ignore
/// // x: (1, 2, 3, 4), contract axes 0 and 1
/// let layer = GeneralLinear::new(&[1, 2], 5, &[0, 1], &key)?;
/// assert_eq!(layer.forward(&x)?.shape(), vec![3, 4, 5]);
/// ```
#[derive(Debug, Clone)]
pub struct GeneralLinear {
    in_features: Option<Vec<usize>>,
    out_features: usize,
    in_axes: Vec<i64>,
    options: LinearOptions,
    weights: Weights,
}

impl GeneralLinear {
    /// Creates a layer with default initializers.
    pub fn new(in_features: &[usize], out_features: usize, in_axes: &[i64], key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, out_features, in_axes, LinearOptions::default(), key)
    }

    /// Creates a layer with explicit initializers.
    ///
    /// `in_features[i]` is the size of axis `in_axes[i]`.
    pub fn with_options(
        in_features: &[usize],
        out_features: usize,
        in_axes: &[i64],
        options: LinearOptions,
        key: &PrngKey,
    ) -> Result<Self> {
        if in_axes.len() != in_features.len() {
            return Err(Error::invalid_argument(
                "in_axes",
                format!(
                    "expected in_axes and in_features to have the same length, got {} and {}",
                    in_axes.len(),
                    in_features.len()
                ),
            ));
        }
        Self::check_axes(in_axes)?;
        Ok(Self {
            in_features: Some(in_features.to_vec()),
            out_features,
            in_axes: in_axes.to_vec(),
            weights: Weights::create(in_features, out_features, &options, key)?,
            options,
        })
    }

    /// Creates a layer that reads the sizes of `in_axes` from its first sample.
    pub fn lazy(out_features: usize, in_axes: &[i64], key: &PrngKey) -> Result<Self> {
        Self::check_axes(in_axes)?;
        Ok(Self {
            in_features: None,
            out_features,
            in_axes: in_axes.to_vec(),
            options: LinearOptions::default(),
            weights: Weights::Lazy(*key),
        })
    }

    fn check_axes(in_axes: &[i64]) -> Result<()> {
        let mut seen = in_axes.to_vec();
        seen.sort_unstable();
        seen.dedup();
        if in_axes.is_empty() || seen.len() != in_axes.len() {
            return Err(Error::invalid_argument(
                "in_axes",
                format!("expected distinct axes, got {in_axes:?}"),
            ));
        }
        Ok(())
    }

    /// Input axes resolved to negative indices for an `ndim` input.
    fn negative_axes(&self, ndim: usize) -> Result<Vec<i64>> {
        let ndim = ndim as i64;
        self.in_axes
            .iter()
            .map(|&a| {
                let neg = if a < 0 { a } else { a - ndim };
                if neg < -ndim || neg >= 0 {
                    Err(Error::InvalidDimension { index: a, ndim: ndim as usize })
                } else {
                    Ok(neg)
                }
            })
            .collect()
    }

    /// Returns a ready layer sized from `input` at `in_axes`.
    pub fn materialize(&self, input: &Tensor) -> Result<Self> {
        let Weights::Lazy(key) = &self.weights else {
            return Ok(self.clone());
        };
        let shape = input.shape();
        let in_features: Vec<usize> = self
            .negative_axes(shape.len())?
            .iter()
            .map(|&a| shape[(shape.len() as i64 + a) as usize])
            .collect();
        debug!(layer = "GeneralLinear", ?in_features, in_axes = ?self.in_axes, "materialized lazy layer");
        Self::with_options(&in_features, self.out_features, &self.in_axes, self.options, key)
    }

    /// Input sizes, once known.
    pub fn in_features(&self) -> Option<&[usize]> {
        self.in_features.as_deref()
    }

    /// Axes the layer contracts.
    pub fn in_axes(&self) -> &[i64] {
        &self.in_axes
    }

    /// Weight of shape `(*in_features, out_features)`.
    pub fn weight(&self) -> Option<Parameter> {
        self.weights.weight()
    }
}

impl Module for GeneralLinear {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        let (weight, bias) = self.weights.ready("GeneralLinear")?;
        let axes = self.negative_axes(input.ndim())?;
        let spec = general_linear_einsum_string(&axes)?;

        // The weight is stored in `in_axes` order; the einsum wants it in
        // axis order.
        let mut order: Vec<usize> = (0..axes.len()).collect();
        order.sort_by_key(|&i| axes[i]);
        let mut weight = weight.variable();
        if order.iter().enumerate().any(|(i, &o)| i != o) {
            order.push(axes.len());
            weight = weight.permute(&order)?;
        }
        add_bias(Variable::einsum(&spec, &[input, &weight])?, bias)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.weights.parameters()
    }

    fn name(&self) -> &'static str {
        "GeneralLinear"
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Module for Identity {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        Ok(input.clone())
    }

    fn name(&self) -> &'static str {
        "Identity"
    }
}

// =============================================================================
// MLP
// =============================================================================

/// Activation applied between the layers of an [`Mlp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `max(x, 0)`.
    #[default]
    Relu,
    /// Hyperbolic tangent.
    Tanh,
    /// No activation.
    Identity,
}

impl Activation {
    fn apply(self, x: &Variable) -> Variable {
        match self {
            Self::Relu => x.relu(),
            Self::Tanh => x.tanh(),
            Self::Identity => x.clone(),
        }
    }
}

/// Multi-layer perceptron.
///
/// `layers = [4, 8, 8, 2]` builds three linear layers; the activation runs
/// between consecutive layers but not after the last one.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
}

impl Mlp {
    /// Creates an MLP with ReLU activations.
    pub fn new(layers: &[usize], key: &PrngKey) -> Result<Self> {
        Self::with_activation(layers, Activation::Relu, LinearOptions::default(), key)
    }

    /// Creates an MLP with a chosen activation and initializers.
    pub fn with_activation(
        layers: &[usize],
        activation: Activation,
        options: LinearOptions,
        key: &PrngKey,
    ) -> Result<Self> {
        if layers.len() < 2 {
            return Err(Error::invalid_argument(
                "layers",
                format!("need at least an input and an output size, got {layers:?}"),
            ));
        }
        let keys = key.split(layers.len() - 1);
        let layers = layers
            .windows(2)
            .zip(&keys)
            .map(|(pair, k)| Linear::with_options(pair[0], pair[1], options, k))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers, activation })
    }

    /// The linear layers in order.
    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }
}

impl Module for Mlp {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        let last = self.layers.len() - 1;
        self.layers.iter().enumerate().try_fold(input.clone(), |x, (i, layer)| {
            let y = layer.forward(&x)?;
            Ok(if i < last { self.activation.apply(&y) } else { y })
        })
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.layers.iter().flat_map(Module::parameters).collect()
    }

    fn named_parameters(&self) -> std::collections::HashMap<String, Parameter> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("layers.{i}.{name}"), p))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "Mlp"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_autograd::{gradcheck, numerical_gradient};
    use lamina_tensor::arange;

    fn key() -> PrngKey {
        PrngKey::new(0)
    }

    fn ones(shape: &[usize]) -> Variable {
        Variable::from_tensor(Tensor::ones(shape))
    }

    #[test]
    fn test_einsum_strings() {
        assert_eq!(multilinear_einsum_string(1).unwrap(), "...a,ab->...b");
        assert_eq!(multilinear_einsum_string(2).unwrap(), "...a,...b,abc->...c");
        assert!(multilinear_einsum_string(51).is_ok());
        assert!(multilinear_einsum_string(52).is_err());
        assert!(multilinear_einsum_string(0).is_err());

        assert_eq!(general_linear_einsum_string(&[-1]).unwrap(), "...a,ab->...b");
        assert_eq!(general_linear_einsum_string(&[-2, -1]).unwrap(), "...ab,abc->...c");
        assert_eq!(general_linear_einsum_string(&[-2]).unwrap(), "...ab,ac->...bc");
        assert_eq!(general_linear_einsum_string(&[-3, -1]).unwrap(), "...abc,acd->...bd");
        assert_eq!(general_linear_einsum_string(&[-1, -2]).unwrap(), "...ab,abc->...c");
        assert_eq!(general_linear_einsum_string(&[-1, -3]).unwrap(), "...abc,acd->...bd");
        assert!(general_linear_einsum_string(&[0]).is_err());
    }

    #[test]
    fn test_linear_shapes_and_defaults() {
        let layer = Linear::new(5, 6, &key()).unwrap();
        assert_eq!(layer.weight().unwrap().shape(), vec![5, 6]);
        assert_eq!(layer.bias().unwrap().data().to_vec(), vec![1.0; 6]);
        assert_eq!(layer.forward(&ones(&[1, 5])).unwrap().shape(), vec![1, 6]);
        assert_eq!(layer.forward(&ones(&[2, 3, 5])).unwrap().shape(), vec![2, 3, 6]);
        assert_eq!(layer.num_parameters(), 36);
    }

    #[test]
    fn test_linear_without_bias() {
        let options = LinearOptions {
            weight_init: Init::Ones,
            bias_init: None,
        };
        let layer = Linear::with_options(3, 2, options, &key()).unwrap();
        assert!(layer.bias().is_none());
        let x = Variable::from_tensor(Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap());
        assert_eq!(layer.forward(&x).unwrap().data().to_vec(), vec![6.0, 6.0]);
    }

    #[test]
    fn test_options_from_json() {
        let options: LinearOptions =
            serde_json::from_str(r#"{"weight_init": "glorot_uniform", "bias_init": null}"#).unwrap();
        assert_eq!(options.weight_init, Init::GlorotUniform);
        assert_eq!(options.bias_init, None);

        let defaults: LinearOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, LinearOptions::default());
    }

    #[test]
    fn test_multilinear() {
        let layer = Multilinear::new(&[5, 6, 7], 8, &key()).unwrap();
        assert_eq!(layer.weight().unwrap().shape(), vec![5, 6, 7, 8]);
        let y = layer
            .forward_many(&[&ones(&[1, 5]), &ones(&[1, 6]), &ones(&[1, 7])])
            .unwrap();
        assert_eq!(y.shape(), vec![1, 8]);
        assert!(layer.forward(&ones(&[1, 5])).is_err());
        assert!(layer.forward_many(&[&ones(&[1, 5])]).is_err());
    }

    #[test]
    fn test_bilinear_matches_manual_contraction() {
        let options = LinearOptions {
            weight_init: Init::Ones,
            bias_init: Some(Init::Zeros),
        };
        let layer = Bilinear::with_options(2, 3, 1, options, &key()).unwrap();
        let x1 = Variable::from_tensor(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
        let x2 = Variable::from_tensor(Tensor::from_vec(vec![1.0, 1.0, 2.0], &[3]).unwrap());
        // sum_ab x1[a] x2[b] = 3 * 4
        assert_eq!(layer.forward_pair(&x1, &x2).unwrap().data().to_vec(), vec![12.0]);
    }

    #[test]
    fn test_general_linear() {
        let x = ones(&[1, 2, 3, 4]);
        let layer = GeneralLinear::new(&[1, 2], 5, &[0, 1], &key()).unwrap();
        assert_eq!(layer.forward(&x).unwrap().shape(), vec![3, 4, 5]);

        let layer = GeneralLinear::new(&[2, 4], 5, &[1, -1], &key()).unwrap();
        assert_eq!(layer.forward(&x).unwrap().shape(), vec![1, 3, 5]);

        assert!(GeneralLinear::new(&[1, 2], 5, &[0], &key()).is_err());
    }

    #[test]
    fn test_general_linear_unsorted_axes() {
        // Weight (2, 3, 1) over axes (-1, -2): w[j, i] multiplies x[i, j].
        let x = Variable::from_tensor(arange(1.0, 7.0).reshape_to(&[3, 2]).unwrap());
        let options = LinearOptions {
            weight_init: Init::Zeros,
            bias_init: None,
        };
        let layer = GeneralLinear::with_options(&[2, 3], 1, &[-1, -2], options, &key()).unwrap();
        let weight = Tensor::from_vec(vec![1.0, 0.0, 0.0, 0.0, 0.0, 10.0], &[2, 3, 1]).unwrap();
        layer.weight().unwrap().update_data(weight);

        // x[0, 0] * 1 + x[2, 1] * 10
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), vec![1]);
        assert_eq!(y.data().to_vec(), vec![61.0]);

        let x = Variable::new(arange(1.0, 7.0).reshape_to(&[3, 2]).unwrap(), true);
        layer.forward(&x).unwrap().sum().unwrap().backward().unwrap();
        assert_eq!(x.grad().unwrap().to_vec(), vec![1.0, 0.0, 0.0, 0.0, 0.0, 10.0]);
    }

    #[test]
    fn test_general_linear_adds_bias() {
        let options = LinearOptions {
            weight_init: Init::Zeros,
            bias_init: Some(Init::Constant(2.5)),
        };
        let layer = GeneralLinear::with_options(&[3], 2, &[-2], options, &key()).unwrap();
        let y = layer.forward(&ones(&[3, 4])).unwrap();
        assert_eq!(y.shape(), vec![4, 2]);
        assert_eq!(y.data().to_vec(), vec![2.5; 8]);
    }

    #[test]
    fn test_lazy_initialization() {
        let lazy = Linear::lazy(10, &key()).unwrap();
        let x = Tensor::ones(&[100, 1]);
        assert!(matches!(
            lazy.forward(&Variable::from_tensor(x.clone())),
            Err(Error::Uninitialized { layer: "Linear" })
        ));
        let ready = lazy.materialize(&x).unwrap();
        assert_eq!(ready.in_features(), Some(1));
        assert_eq!(ready.forward(&Variable::from_tensor(x)).unwrap().shape(), vec![100, 10]);

        let lazy = Multilinear::lazy(3, 10, &key()).unwrap();
        let x = Tensor::ones(&[100, 1]);
        let ready = lazy.materialize(&[&x, &x, &x]).unwrap();
        assert_eq!(ready.weight().unwrap().shape(), vec![1, 1, 1, 10]);

        let lazy = GeneralLinear::lazy(5, &[0, 1], &key()).unwrap();
        let ready = lazy.materialize(&Tensor::ones(&[1, 2, 3, 4])).unwrap();
        assert_eq!(ready.in_features(), Some(&[1, 2][..]));
    }

    #[test]
    fn test_mlp() {
        let mlp = Mlp::new(&[4, 8, 8, 2], &key()).unwrap();
        assert_eq!(mlp.layers().len(), 3);
        assert_eq!(mlp.forward(&ones(&[3, 4])).unwrap().shape(), vec![3, 2]);
        assert!(mlp.named_parameters().contains_key("layers.2.bias"));

        // No activation after the last layer: negative outputs survive.
        let options = LinearOptions {
            weight_init: Init::Constant(-1.0),
            bias_init: None,
        };
        let mlp = Mlp::with_activation(&[2, 2], Activation::Relu, options, &key()).unwrap();
        assert_eq!(mlp.forward(&ones(&[2])).unwrap().data().to_vec(), vec![-2.0, -2.0]);
    }

    #[test]
    fn test_linear_gradient() {
        let layer = Linear::new(3, 2, &key()).unwrap();
        let f = |v: &Variable| -> Result<Variable> { layer.forward(v)?.tanh().sum() };
        let x = Variable::new(Tensor::from_vec(vec![0.1, -0.2, 0.3], &[3]).unwrap(), true);
        f(&x).unwrap().backward().unwrap();
        let numerical = numerical_gradient(f, &x, 1e-3).unwrap();
        assert!(gradcheck(&x.grad().unwrap(), &numerical, 1e-2, 1e-3));
    }
}
