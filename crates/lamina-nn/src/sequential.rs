//! Sequential - Containers for Modules
//!
//! [`Sequential`] runs modules in order, passing the output of each to the
//! next. Keys are split once per child and states are threaded child by
//! child, so a container behaves like any other stateful, random layer.
//!
//! [`Batched`] maps a module over the leading axis of its input.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::collections::HashMap;

use lamina_autograd::Variable;
use lamina_core::{Error, PrngKey, Result};
use lamina_tensor::Tensor;

use crate::module::{Module, State};
use crate::parameter::Parameter;

// =============================================================================
// Sequential
// =============================================================================

/// A container that chains modules together.
///
/// # Example
/// ```ignore
/// let model = Sequential::new()
///     .add(Linear::new(784, 256, &k1)?)
///     .add(Dropout::new(0.1)?)
///     .add(Linear::new(256, 10, &k2)?);
///
/// let output = model.forward_with_key(&input, &key)?;
/// ```
pub struct Sequential {
    modules: Vec<(String, Box<dyn Module>)>,
}

impl Sequential {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Adds a module with an auto-generated name.
    #[must_use]
    pub fn add<M: Module + 'static>(mut self, module: M) -> Self {
        self.push(module);
        self
    }

    /// Adds a module with a specific name.
    #[must_use]
    pub fn add_named<M: Module + 'static>(mut self, name: impl Into<String>, module: M) -> Self {
        self.modules.push((name.into(), Box::new(module)));
        self
    }

    /// Pushes a module (non-builder form).
    pub fn push<M: Module + 'static>(&mut self, module: M) {
        self.push_boxed(Box::new(module));
    }

    /// Pushes an already boxed module.
    pub fn push_boxed(&mut self, module: Box<dyn Module>) {
        let name = self.modules.len().to_string();
        self.modules.push((name, module));
    }

    /// Returns the number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Returns an iterator over named modules.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Module)> {
        self.modules.iter().map(|(n, m)| (n.as_str(), m.as_ref()))
    }

    fn child_states(&self, state: &State) -> Result<Vec<State>> {
        match state {
            State::Empty => Ok(vec![State::Empty; self.modules.len()]),
            State::Tree(children) if children.len() == self.modules.len() => Ok(children.clone()),
            State::Tree(children) => Err(Error::invalid_argument(
                "state",
                format!(
                    "expected {} child states, got {}",
                    self.modules.len(),
                    children.len()
                ),
            )),
            State::BatchNorm(_) => Err(Error::invalid_argument(
                "state",
                "a container needs a state tree, got a batch-norm state",
            )),
        }
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        let keys = key.split(self.modules.len());
        self.modules
            .iter()
            .zip(&keys)
            .try_fold(input.clone(), |x, ((_, module), k)| module.forward_with_key(&x, k))
    }

    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        self.forward_with_key_and_state(input, &PrngKey::default(), state)
    }

    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        let keys = key.split(self.modules.len());
        let states = self.child_states(state)?;

        let mut x = input.clone();
        let mut new_states = Vec::with_capacity(states.len());
        for (((_, module), k), s) in self.modules.iter().zip(&keys).zip(&states) {
            let (y, next) = module.forward_with_key_and_state(&x, k, s)?;
            x = y;
            new_states.push(next);
        }
        Ok((x, State::Tree(new_states)))
    }

    fn init_state(&self, input: Option<&Tensor>) -> Result<State> {
        self.modules
            .iter()
            .map(|(_, m)| m.init_state(input))
            .collect::<Result<Vec<_>>>()
            .map(State::Tree)
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        let modules = self
            .modules
            .into_iter()
            .map(|(name, m)| (name, m.into_eval()))
            .collect();
        Box::new(Sequential { modules })
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.modules
            .iter()
            .flat_map(|(_, m)| m.parameters())
            .collect()
    }

    fn named_parameters(&self) -> HashMap<String, Parameter> {
        let mut params = HashMap::new();
        for (module_name, module) in &self.modules {
            for (param_name, param) in module.named_parameters() {
                params.insert(format!("{module_name}.{param_name}"), param);
            }
        }
        params
    }

    fn name(&self) -> &'static str {
        "Sequential"
    }
}

// =============================================================================
// Boxed Modules
// =============================================================================

impl Module for Box<dyn Module> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        (**self).forward(input)
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        (**self).forward_with_key(input, key)
    }

    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        (**self).forward_with_state(input, state)
    }

    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        (**self).forward_with_key_and_state(input, key, state)
    }

    fn init_state(&self, input: Option<&Tensor>) -> Result<State> {
        (**self).init_state(input)
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        <dyn Module as Module>::into_eval(*self)
    }

    fn parameters(&self) -> Vec<Parameter> {
        (**self).parameters()
    }

    fn named_parameters(&self) -> HashMap<String, Parameter> {
        (**self).named_parameters()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

// =============================================================================
// Batched
// =============================================================================

/// Maps a module over axis 0 of its input and stacks the results.
///
/// Each row gets its own key, split from the key passed in. A stateful
/// inner module sees the rows one after another, each row receiving the
/// state left by the previous one.
pub struct Batched<M> {
    inner: M,
}

impl<M: Module> Batched<M> {
    /// Wraps `inner`.
    pub fn new(inner: M) -> Self {
        Self { inner }
    }

    /// Returns the wrapped module.
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

fn batch_size(input: &Variable) -> Result<usize> {
    match input.shape().first() {
        None => Err(Error::invalid_operation("Batched needs an input with a leading axis")),
        Some(0) => Err(Error::EmptyTensor),
        Some(&batch) => Ok(batch),
    }
}

impl<M: Module + 'static> Module for Batched<M> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        let batch = batch_size(input)?;
        let outputs = key
            .split(batch)
            .iter()
            .enumerate()
            .map(|(i, k)| self.inner.forward_with_key(&input.select(0, i)?, k))
            .collect::<Result<Vec<_>>>()?;
        Variable::stack(&outputs, 0)
    }

    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        self.forward_with_key_and_state(input, &PrngKey::default(), state)
    }

    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        let batch = batch_size(input)?;
        let mut state = state.clone();
        let mut outputs = Vec::with_capacity(batch);
        for (i, k) in key.split(batch).iter().enumerate() {
            let (y, next) = self
                .inner
                .forward_with_key_and_state(&input.select(0, i)?, k, &state)?;
            outputs.push(y);
            state = next;
        }
        Ok((Variable::stack(&outputs, 0)?, state))
    }

    fn init_state(&self, input: Option<&Tensor>) -> Result<State> {
        let row = input.map(|x| x.select(0, 0)).transpose()?;
        self.inner.init_state(row.as_ref())
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        Box::new(Batched::new(Box::new(self.inner).into_eval()))
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.inner.parameters()
    }

    fn named_parameters(&self) -> HashMap<String, Parameter> {
        self.inner.named_parameters()
    }

    fn name(&self) -> &'static str {
        "Batched"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{BatchNorm, BatchNormOptions, Dropout, Linear};
    use crate::module::tree_state;

    struct TestIdentity;

    impl Module for TestIdentity {
        fn forward(&self, input: &Variable) -> Result<Variable> {
            Ok(input.clone())
        }
    }

    struct TestDouble;

    impl Module for TestDouble {
        fn forward(&self, input: &Variable) -> Result<Variable> {
            input.add(input)
        }
    }

    fn input(data: Vec<f32>, shape: &[usize]) -> Variable {
        Variable::from_tensor(Tensor::from_vec(data, shape).unwrap())
    }

    #[test]
    fn test_sequential_creation() {
        let seq = Sequential::new().add(TestIdentity).add(TestIdentity);
        assert_eq!(seq.len(), 2);
        assert!(!seq.is_empty());
    }

    #[test]
    fn test_sequential_forward() {
        let seq = Sequential::new().add(TestDouble).add(TestDouble);
        let output = seq.forward(&input(vec![1.0, 2.0], &[2])).unwrap();
        // 1*2*2=4, 2*2*2=8
        assert_eq!(output.data().to_vec(), vec![4.0, 8.0]);
    }

    #[test]
    fn test_sequential_named() {
        let key = PrngKey::new(0);
        let seq = Sequential::new()
            .add_named("fc", Linear::new(2, 3, &key).unwrap())
            .add_named("scale", TestDouble);

        let names: Vec<&str> = seq.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["fc", "scale"]);

        let params = seq.named_parameters();
        assert!(params.contains_key("fc.weight"));
        assert!(params.contains_key("fc.bias"));
        assert_eq!(seq.num_parameters(), 2 * 3 + 3);
    }

    #[test]
    fn test_state_threading() {
        let seq = Sequential::new().add(TestIdentity).add(TestDouble);
        let state = seq.init_state(None).unwrap();
        assert_eq!(state, State::Tree(vec![State::Empty, State::Empty]));

        let (y, next) = seq
            .forward_with_state(&input(vec![3.0], &[1]), &state)
            .unwrap();
        assert_eq!(y.data().to_vec(), vec![6.0]);
        assert_eq!(next, state);

        let wrong = State::Tree(vec![State::Empty]);
        assert!(seq.forward_with_state(&input(vec![3.0], &[1]), &wrong).is_err());
    }

    #[test]
    fn test_keys_are_threaded() {
        let seq = Sequential::new().add(Dropout::new(0.5).unwrap());
        let x = Variable::from_tensor(Tensor::ones(&[64]));
        let a = seq.forward_with_key(&x, &PrngKey::new(1)).unwrap();
        let b = seq.forward_with_key(&x, &PrngKey::new(1)).unwrap();
        let c = seq.forward_with_key(&x, &PrngKey::new(2)).unwrap();
        assert_eq!(a.data().to_vec(), b.data().to_vec());
        assert_ne!(a.data().to_vec(), c.data().to_vec());
    }

    #[test]
    fn test_batched_maps_rows() {
        let batched = Batched::new(TestDouble);
        let x = input(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let y = batched.forward(&x).unwrap();
        assert_eq!(y.shape(), vec![2, 2]);
        assert_eq!(y.data().to_vec(), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_batched_gradients_flow() {
        let key = PrngKey::new(3);
        let layer = Linear::new(2, 1, &key).unwrap();
        let weight = layer.weight().unwrap();
        let batched = Batched::new(layer);

        let x = input(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        batched.forward(&x).unwrap().sum().unwrap().backward().unwrap();
        // d/dW of sum over rows of x·W is the column sum of x.
        let grad = weight.grad().unwrap();
        assert_eq!(grad.shape(), &[2, 1]);
        assert!((grad.to_vec()[0] - 4.0).abs() < 1e-5);
        assert!((grad.to_vec()[1] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_batched_threads_state_through_rows() {
        let options = BatchNormOptions {
            axis: 0,
            ..BatchNormOptions::default()
        };
        let layer = BatchNorm::with_options(2, options, &PrngKey::new(0)).unwrap();
        let batched = Batched::new(layer);
        let x = input(vec![1.0, 3.0, 5.0, 7.0, 1.0, 3.0, 5.0, 7.0], &[2, 2, 2]);

        let state = tree_state(&batched, Some(&x.data())).unwrap();
        let (y, next) = batched.forward_with_state(&x, &state).unwrap();
        assert_eq!(y.shape(), vec![2, 2, 2]);

        // Two updates with channel means [2, 6].
        let State::BatchNorm(bn) = &next else {
            panic!("expected batch norm state, got {next:?}");
        };
        let decay = 1.0 - 0.99f32 * 0.99;
        let mean = bn.running_mean.to_vec();
        assert!((mean[0] - 2.0 * decay).abs() < 1e-5);
        assert!((mean[1] - 6.0 * decay).abs() < 1e-5);
        assert_ne!(next, state);
    }
}
