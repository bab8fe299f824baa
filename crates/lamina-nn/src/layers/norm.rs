//! Normalization Layers - Layer, Group, Instance, Batch and Eval Norm
//!
//! Layer, group and instance norm are stateless. Batch norm keeps running
//! statistics outside the layer, in a [`BatchNormState`] threaded through
//! `forward_with_state`; [`EvalNorm`] is its evaluation form and only reads
//! that state.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_autograd::Variable;
use lamina_core::{Error, PrngKey, Result};
use lamina_tensor::Tensor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::functional::{batch_norm_eval, batch_norm_train, channel_affine, group_norm, layer_norm};
use crate::init::{resolve_optional, Init};
use crate::module::{Module, State};
use crate::parameter::Parameter;

// =============================================================================
// Options
// =============================================================================

/// Affine initializers and epsilon shared by layer, group and instance norm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormOptions {
    /// Scale initializer; `None` disables the scale.
    pub weight_init: Option<Init>,
    /// Shift initializer; `None` disables the shift.
    pub bias_init: Option<Init>,
    /// Added to the variance.
    pub eps: f32,
}

impl Default for NormOptions {
    fn default() -> Self {
        Self {
            weight_init: Some(Init::Ones),
            bias_init: Some(Init::Zeros),
            eps: 1e-5,
        }
    }
}

/// Hyperparameters of batch norm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchNormOptions {
    /// Weight of the previous running statistics, in `[0, 1]`.
    pub momentum: f32,
    /// Added to the variance.
    pub eps: f32,
    /// Channel axis of the batched input.
    pub axis: usize,
    /// Scale initializer; `None` disables the scale.
    pub weight_init: Option<Init>,
    /// Shift initializer; `None` disables the shift.
    pub bias_init: Option<Init>,
}

impl Default for BatchNormOptions {
    fn default() -> Self {
        Self {
            momentum: 0.99,
            eps: 1e-5,
            axis: 1,
            weight_init: Some(Init::Ones),
            bias_init: Some(Init::Zeros),
        }
    }
}

// =============================================================================
// Affine Parameters
// =============================================================================

#[derive(Debug, Clone)]
enum Affine {
    Lazy(PrngKey),
    Ready {
        weight: Option<Parameter>,
        bias: Option<Parameter>,
    },
}

impl Affine {
    fn create(shape: &[usize], weight_init: Option<Init>, bias_init: Option<Init>, key: &PrngKey) -> Result<Self> {
        let keys = key.split(2);
        Ok(Self::Ready {
            weight: resolve_optional(weight_init, &keys[0], shape)?.map(|t| Parameter::named("weight", t, true)),
            bias: resolve_optional(bias_init, &keys[1], shape)?.map(|t| Parameter::named("bias", t, true)),
        })
    }

    fn variables(&self, layer: &'static str) -> Result<(Option<Variable>, Option<Variable>)> {
        match self {
            Self::Lazy(_) => Err(Error::Uninitialized { layer }),
            Self::Ready { weight, bias } => Ok((
                weight.as_ref().map(Parameter::variable),
                bias.as_ref().map(Parameter::variable),
            )),
        }
    }

    fn parameters(&self) -> Vec<Parameter> {
        match self {
            Self::Lazy(_) => Vec::new(),
            Self::Ready { weight, bias } => weight.iter().chain(bias).cloned().collect(),
        }
    }
}

// =============================================================================
// LayerNorm
// =============================================================================

/// Normalizes over the trailing `normalized_shape` axes.
///
/// y = (x - E[x]) / sqrt(Var[x] + eps) * gamma + beta
///
/// # Shape
/// - Input: `(*, *normalized_shape)`
/// - Output: same as input
#[derive(Debug, Clone)]
pub struct LayerNorm {
    normalized_shape: Option<Vec<usize>>,
    options: NormOptions,
    affine: Affine,
}

impl LayerNorm {
    /// Creates a layer with a unit scale and zero shift.
    pub fn new(normalized_shape: &[usize], key: &PrngKey) -> Result<Self> {
        Self::with_options(normalized_shape, NormOptions::default(), key)
    }

    /// Creates a layer with explicit options.
    pub fn with_options(normalized_shape: &[usize], options: NormOptions, key: &PrngKey) -> Result<Self> {
        Self::check_eps(options.eps)?;
        if normalized_shape.is_empty() {
            return Err(Error::invalid_argument("normalized_shape", "must not be empty"));
        }
        Ok(Self {
            normalized_shape: Some(normalized_shape.to_vec()),
            affine: Affine::create(normalized_shape, options.weight_init, options.bias_init, key)?,
            options,
        })
    }

    /// Creates a layer that normalizes over the whole shape of its first sample.
    pub fn lazy(options: NormOptions, key: &PrngKey) -> Result<Self> {
        Self::check_eps(options.eps)?;
        Ok(Self {
            normalized_shape: None,
            options,
            affine: Affine::Lazy(*key),
        })
    }

    fn check_eps(eps: f32) -> Result<()> {
        if eps > 0.0 {
            Ok(())
        } else {
            Err(Error::invalid_argument("eps", format!("must be positive, got {eps}")))
        }
    }

    /// Returns a ready layer with `normalized_shape = input.shape()`.
    pub fn materialize(&self, input: &Tensor) -> Result<Self> {
        let Affine::Lazy(key) = &self.affine else {
            return Ok(self.clone());
        };
        debug!(layer = "LayerNorm", normalized_shape = ?input.shape(), "materialized lazy layer");
        Self::with_options(input.shape(), self.options, key)
    }

    /// Trailing shape normalized over, once known.
    pub fn normalized_shape(&self) -> Option<&[usize]> {
        self.normalized_shape.as_deref()
    }
}

impl Module for LayerNorm {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        let (weight, bias) = self.affine.variables("LayerNorm")?;
        let shape = self.normalized_shape.as_deref().unwrap_or_default();
        layer_norm(input, weight.as_ref(), bias.as_ref(), self.options.eps, shape)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.affine.parameters()
    }

    fn name(&self) -> &'static str {
        "LayerNorm"
    }
}

// =============================================================================
// GroupNorm
// =============================================================================

/// Normalizes `groups` channel groups of a `(C, ...)` input.
#[derive(Debug, Clone)]
pub struct GroupNorm {
    in_features: Option<usize>,
    groups: usize,
    options: NormOptions,
    affine: Affine,
}

impl GroupNorm {
    /// Creates a layer with a unit scale and zero shift.
    pub fn new(in_features: usize, groups: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, groups, NormOptions::default(), key)
    }

    /// Creates a layer with explicit options.
    pub fn with_options(in_features: usize, groups: usize, options: NormOptions, key: &PrngKey) -> Result<Self> {
        Self::check(Some(in_features), groups, options.eps)?;
        Ok(Self {
            in_features: Some(in_features),
            groups,
            affine: Affine::create(&[in_features], options.weight_init, options.bias_init, key)?,
            options,
        })
    }

    /// Creates a layer whose channel count is read from its first sample.
    pub fn lazy(groups: usize, options: NormOptions, key: &PrngKey) -> Result<Self> {
        Self::check(None, groups, options.eps)?;
        Ok(Self {
            in_features: None,
            groups,
            options,
            affine: Affine::Lazy(*key),
        })
    }

    fn check(in_features: Option<usize>, groups: usize, eps: f32) -> Result<()> {
        if groups == 0 {
            return Err(Error::invalid_argument("groups", "must be positive"));
        }
        if eps < 0.0 {
            return Err(Error::invalid_argument("eps", format!("must be non-negative, got {eps}")));
        }
        match in_features {
            Some(0) => Err(Error::invalid_argument("in_features", "must be positive")),
            Some(c) if c % groups != 0 => Err(Error::invalid_argument(
                "in_features",
                format!("{c} must be divisible by groups={groups}"),
            )),
            _ => Ok(()),
        }
    }

    /// Returns a ready layer with `in_features = input.shape()[0]`.
    pub fn materialize(&self, input: &Tensor) -> Result<Self> {
        let Affine::Lazy(key) = &self.affine else {
            return Ok(self.clone());
        };
        let in_features = input.shape().first().copied().ok_or(Error::EmptyTensor)?;
        debug!(layer = "GroupNorm", in_features, groups = self.groups, "materialized lazy layer");
        Self::with_options(in_features, self.groups, self.options, key)
    }

    /// Channel count, once known.
    pub fn in_features(&self) -> Option<usize> {
        self.in_features
    }

    /// Number of channel groups.
    pub fn groups(&self) -> usize {
        self.groups
    }
}

impl Module for GroupNorm {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        let (weight, bias) = self.affine.variables("GroupNorm")?;
        let channels = input.shape().first().copied().unwrap_or(0);
        if Some(channels) != self.in_features {
            return Err(Error::invalid_argument(
                "input",
                format!("expected {:?} channels on axis 0, got {channels}", self.in_features),
            ));
        }
        group_norm(input, weight.as_ref(), bias.as_ref(), self.options.eps, self.groups)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.affine.parameters()
    }

    fn name(&self) -> &'static str {
        "GroupNorm"
    }
}

// =============================================================================
// InstanceNorm
// =============================================================================

/// Group norm with one group per channel.
#[derive(Debug, Clone)]
pub struct InstanceNorm {
    inner: GroupNorm,
}

impl InstanceNorm {
    /// Creates a layer with a unit scale and zero shift.
    pub fn new(in_features: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, NormOptions::default(), key)
    }

    /// Creates a layer with explicit options.
    pub fn with_options(in_features: usize, options: NormOptions, key: &PrngKey) -> Result<Self> {
        GroupNorm::with_options(in_features, in_features, options, key).map(|inner| Self { inner })
    }

    /// Creates a layer whose channel count is read from its first sample.
    pub fn lazy(options: NormOptions, key: &PrngKey) -> Result<Self> {
        GroupNorm::lazy(1, options, key).map(|inner| Self { inner })
    }

    /// Returns a ready layer with one group per channel of `input`.
    pub fn materialize(&self, input: &Tensor) -> Result<Self> {
        let Affine::Lazy(key) = &self.inner.affine else {
            return Ok(self.clone());
        };
        let in_features = input.shape().first().copied().ok_or(Error::EmptyTensor)?;
        Self::with_options(in_features, self.inner.options, key)
    }

    /// Channel count, once known.
    pub fn in_features(&self) -> Option<usize> {
        self.inner.in_features
    }
}

impl Module for InstanceNorm {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.inner.forward(input)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.inner.parameters()
    }

    fn name(&self) -> &'static str {
        "InstanceNorm"
    }
}

// =============================================================================
// Batch Norm State
// =============================================================================

/// Running statistics of a batch-norm layer, one entry per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormState {
    /// Running mean, initially zeros.
    pub running_mean: Tensor,
    /// Running variance, initially ones.
    pub running_var: Tensor,
}

impl BatchNormState {
    /// Fresh statistics for `in_features` channels.
    pub fn new(in_features: usize) -> Self {
        Self {
            running_mean: Tensor::zeros(&[in_features]),
            running_var: Tensor::ones(&[in_features]),
        }
    }
}

/// Shared fields of [`BatchNorm`] and [`EvalNorm`].
#[derive(Debug, Clone)]
struct BatchNormCore {
    in_features: Option<usize>,
    options: BatchNormOptions,
    affine: Affine,
}

impl BatchNormCore {
    fn new(in_features: Option<usize>, options: BatchNormOptions, key: &PrngKey) -> Result<Self> {
        if !(0.0..=1.0).contains(&options.momentum) {
            return Err(Error::invalid_argument(
                "momentum",
                format!("must be in [0, 1], got {}", options.momentum),
            ));
        }
        if options.eps < 0.0 {
            return Err(Error::invalid_argument("eps", format!("must be non-negative, got {}", options.eps)));
        }
        let affine = match in_features {
            Some(0) => return Err(Error::invalid_argument("in_features", "must be positive")),
            Some(c) => Affine::create(&[c], options.weight_init, options.bias_init, key)?,
            None => Affine::Lazy(*key),
        };
        Ok(Self {
            in_features,
            options,
            affine,
        })
    }

    fn materialize(&self, input: &Tensor, layer: &'static str) -> Result<Self> {
        let Affine::Lazy(key) = &self.affine else {
            return Ok(self.clone());
        };
        let axis = self.options.axis;
        let in_features = *input.shape().get(axis).ok_or(Error::InvalidDimension {
            index: axis as i64,
            ndim: input.ndim(),
        })?;
        debug!(layer, in_features, axis, "materialized lazy layer");
        Self::new(Some(in_features), self.options, key)
    }

    fn init_state(&self, input: Option<&Tensor>, layer: &'static str) -> Result<State> {
        let in_features = match (self.in_features, input) {
            (Some(c), _) => c,
            (None, Some(x)) => *x.shape().get(self.options.axis).ok_or(Error::InvalidDimension {
                index: self.options.axis as i64,
                ndim: x.ndim(),
            })?,
            (None, None) => return Err(Error::Uninitialized { layer }),
        };
        Ok(State::BatchNorm(BatchNormState::new(in_features)))
    }

    /// The batch-norm state to use for this call.
    fn resolve_state(&self, input: &Variable, state: &State, layer: &'static str) -> Result<BatchNormState> {
        let axis = self.options.axis;
        let channels = *input.shape().get(axis).ok_or(Error::InvalidDimension {
            index: axis as i64,
            ndim: input.ndim(),
        })?;
        if self.in_features.is_some_and(|c| c != channels) {
            return Err(Error::invalid_argument(
                "input",
                format!("expected {:?} channels on axis {axis}, got {channels}", self.in_features),
            ));
        }
        let bn = match state {
            State::BatchNorm(bn) => bn.clone(),
            State::Empty => BatchNormState::new(channels),
            State::Tree(_) => {
                return Err(Error::invalid_argument("state", format!("{layer} expects a batch-norm state")))
            }
        };
        if bn.running_mean.numel() != channels || bn.running_var.numel() != channels {
            return Err(Error::shape_mismatch(&[channels], bn.running_mean.shape()));
        }
        Ok(bn)
    }
}

// =============================================================================
// BatchNorm
// =============================================================================

/// Batch normalization over every axis except `axis`.
///
/// Training-mode layer: normalizes with batch statistics and returns updated
/// running statistics,
/// `running = momentum * running + (1 - momentum) * batch`.
///
/// # Shape
/// - Input: `(N, C, *)` with the channel axis at `axis`
/// - Output: same as input
#[derive(Debug, Clone)]
pub struct BatchNorm {
    core: BatchNormCore,
}

impl BatchNorm {
    /// Creates a layer with momentum 0.99, eps 1e-5 and channel axis 1.
    pub fn new(in_features: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, BatchNormOptions::default(), key)
    }

    /// Creates a layer with explicit options.
    pub fn with_options(in_features: usize, options: BatchNormOptions, key: &PrngKey) -> Result<Self> {
        BatchNormCore::new(Some(in_features), options, key).map(|core| Self { core })
    }

    /// Creates a layer whose channel count is read from `x.shape()[axis]`.
    pub fn lazy(options: BatchNormOptions, key: &PrngKey) -> Result<Self> {
        BatchNormCore::new(None, options, key).map(|core| Self { core })
    }

    /// Returns a ready layer sized from `input`.
    pub fn materialize(&self, input: &Tensor) -> Result<Self> {
        self.core.materialize(input, "BatchNorm").map(|core| Self { core })
    }

    /// Channel count, once known.
    pub fn in_features(&self) -> Option<usize> {
        self.core.in_features
    }

    /// Hyperparameters.
    pub fn options(&self) -> &BatchNormOptions {
        &self.core.options
    }
}

impl Module for BatchNorm {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_state(input, &State::Empty).map(|(y, _)| y)
    }

    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        let (weight, bias) = self.core.affine.variables("BatchNorm")?;
        let bn = self.core.resolve_state(input, state, "BatchNorm")?;
        let BatchNormOptions { momentum, eps, axis, .. } = self.core.options;

        let (normed, batch_mean, batch_var) = batch_norm_train(input, axis, eps)?;
        let output = channel_affine(&normed, weight.as_ref(), bias.as_ref(), axis)?;

        let blend = |running: &Tensor, batch: &Tensor| -> Result<Tensor> {
            running.mul_scalar(momentum).add(&batch.mul_scalar(1.0 - momentum))
        };
        let next = BatchNormState {
            running_mean: blend(&bn.running_mean, &batch_mean)?,
            running_var: blend(&bn.running_var, &batch_var)?,
        };
        debug!(momentum, channels = next.running_mean.numel(), "updated batch-norm running statistics");
        Ok((output, State::BatchNorm(next)))
    }

    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        _key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        self.forward_with_state(input, state)
    }

    fn init_state(&self, input: Option<&Tensor>) -> Result<State> {
        self.core.init_state(input, "BatchNorm")
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        Box::new(EvalNorm { core: self.core })
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.core.affine.parameters()
    }

    fn name(&self) -> &'static str {
        "BatchNorm"
    }
}

// =============================================================================
// EvalNorm
// =============================================================================

/// Evaluation form of [`BatchNorm`]: normalizes with the running statistics.
///
/// `y = (x - running_mean) * rsqrt(running_var + eps) * gamma + beta`. The
/// output carries no gradient and the state is returned unchanged. Without
/// a state, the initial statistics (zero mean, unit variance) are used.
#[derive(Debug, Clone)]
pub struct EvalNorm {
    core: BatchNormCore,
}

impl EvalNorm {
    /// Creates a layer with momentum 0.99, eps 1e-5 and channel axis 1.
    pub fn new(in_features: usize, key: &PrngKey) -> Result<Self> {
        Self::with_options(in_features, BatchNormOptions::default(), key)
    }

    /// Creates a layer with explicit options.
    pub fn with_options(in_features: usize, options: BatchNormOptions, key: &PrngKey) -> Result<Self> {
        BatchNormCore::new(Some(in_features), options, key).map(|core| Self { core })
    }

    /// Channel count, once known.
    pub fn in_features(&self) -> Option<usize> {
        self.core.in_features
    }
}

impl Module for EvalNorm {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_state(input, &State::Empty).map(|(y, _)| y)
    }

    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        let (weight, bias) = self.core.affine.variables("EvalNorm")?;
        let bn = self.core.resolve_state(input, state, "EvalNorm")?;
        let BatchNormOptions { eps, axis, .. } = self.core.options;

        let normed = batch_norm_eval(input, &bn.running_mean, &bn.running_var, axis, eps)?;
        let output = channel_affine(&normed, weight.as_ref(), bias.as_ref(), axis)?;
        Ok((output.detach(), state.clone()))
    }

    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        _key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        self.forward_with_state(input, state)
    }

    fn init_state(&self, input: Option<&Tensor>) -> Result<State> {
        self.core.init_state(input, "EvalNorm")
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.core.affine.parameters()
    }

    fn name(&self) -> &'static str {
        "EvalNorm"
    }
}

// =============================================================================
// Tests
// =============================================================================
