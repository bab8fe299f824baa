//! Module Trait - Layer Interface and Tree Transforms
//!
//! Every layer implements [`Module`]: "array in, array out", with optional
//! random-key and state arguments. Two whole-model transforms walk the
//! module tree:
//!
//! - [`tree_state`] builds the [`State`] tree a model needs (batch-norm
//!   running statistics, nothing for stateless layers).
//! - [`tree_eval`] swaps training-only layers for their evaluation form
//!   (dropout and random augmentation become identity, batch norm becomes
//!   eval norm).
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::collections::HashMap;

use lamina_autograd::Variable;
use lamina_core::{PrngKey, Result};
use lamina_tensor::Tensor;
use tracing::debug;

use crate::layers::norm::BatchNormState;
use crate::parameter::Parameter;

// =============================================================================
// State
// =============================================================================

/// Per-layer state threaded through stateful forward calls.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum State {
    /// The layer keeps no state.
    #[default]
    Empty,
    /// Running statistics of a batch-norm layer.
    BatchNorm(BatchNormState),
    /// One entry per child of a container, in order.
    Tree(Vec<State>),
}

impl State {
    /// Returns the child states of a container state.
    pub fn children(&self) -> Option<&[State]> {
        match self {
            Self::Tree(children) => Some(children),
            _ => None,
        }
    }
}

// =============================================================================
// Module Trait
// =============================================================================

/// Converts a boxed concrete module into a trait object.
///
/// Implemented for every module; lets [`Module::into_eval`] return `self`
/// by default.
pub trait IntoDynModule {
    /// Erases the concrete type.
    fn into_dyn(self: Box<Self>) -> Box<dyn Module>;
}

impl<M: Module + 'static> IntoDynModule for M {
    fn into_dyn(self: Box<Self>) -> Box<dyn Module> {
        self
    }
}

/// Core trait for all layers.
pub trait Module: IntoDynModule + Send + Sync {
    /// Applies the layer.
    fn forward(&self, input: &Variable) -> Result<Variable>;

    /// Applies the layer with an explicit random key.
    ///
    /// Deterministic layers ignore the key. Random layers called through
    /// [`forward`](Self::forward) use `PrngKey::new(0)`.
    fn forward_with_key(&self, input: &Variable, _key: &PrngKey) -> Result<Variable> {
        self.forward(input)
    }

    /// Applies the layer, consuming and returning its state.
    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        Ok((self.forward(input)?, state.clone()))
    }

    /// Applies the layer with both a key and a state.
    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        Ok((self.forward_with_key(input, key)?, state.clone()))
    }

    /// Initial state of this layer; `input` is a sample used by layers that
    /// infer their sizes.
    fn init_state(&self, _input: Option<&Tensor>) -> Result<State> {
        Ok(State::Empty)
    }

    /// Evaluation form of this layer.
    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        self.into_dyn()
    }

    /// Returns all parameters, including those of children.
    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    /// Returns parameters keyed by name.
    fn named_parameters(&self) -> HashMap<String, Parameter> {
        self.parameters()
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect()
    }

    /// Number of trainable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters()
            .iter()
            .filter(|p| p.requires_grad())
            .map(Parameter::numel)
            .sum()
    }

    /// Clears every parameter gradient.
    fn zero_grad(&self) {
        for param in self.parameters() {
            param.zero_grad();
        }
    }

    /// Layer name for debugging.
    fn name(&self) -> &'static str {
        "Module"
    }
}

// =============================================================================
// Tree Transforms
// =============================================================================

/// Builds the state tree of `module`.
///
/// `input` is forwarded to every layer's state rule so lazily initialized
/// layers can size their state.
pub fn tree_state(module: &dyn Module, input: Option<&Tensor>) -> Result<State> {
    let state = module.init_state(input)?;
    debug!(layer = module.name(), "built state tree");
    Ok(state)
}

/// Converts `module` to its evaluation form.
pub fn tree_eval(module: Box<dyn Module>) -> Box<dyn Module> {
    let from = module.name();
    let eval = module.into_eval();
    debug!(from, to = eval.name(), "converted to eval form");
    eval
}

// =============================================================================
// Tests
// =============================================================================
