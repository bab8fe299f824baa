//! Dropout Layers - Random Zeroing and Random Application
//!
//! All layers here are training-only: [`tree_eval`](crate::tree_eval)
//! replaces the dropout variants with [`Identity`] and a [`RandomApply`]
//! with its wrapped layer.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use lamina_autograd::Variable;
use lamina_core::{PrngKey, Result};
use lamina_tensor::Tensor;

use crate::functional::{dropout, dropout_channels, validate_probability, validate_spatial_ndim};
use crate::layers::linear::Identity;
use crate::module::{Module, State};
use crate::parameter::Parameter;

// =============================================================================
// Dropout
// =============================================================================

/// Zeroes each element with probability `p`.
///
/// Survivors are scaled by `1 / (1 - p)`; `p = 1` yields zeros.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    /// Creates a layer; `p` must be in `[0, 1]`.
    pub fn new(p: f32) -> Result<Self> {
        Ok(Self {
            p: validate_probability(p, "p")?,
        })
    }

    /// Drop probability.
    pub fn p(&self) -> f32 {
        self.p
    }
}

impl Default for Dropout {
    fn default() -> Self {
        Self { p: 0.5 }
    }
}

impl Module for Dropout {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        dropout(input, self.p, key)
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        Box::new(Identity)
    }

    fn name(&self) -> &'static str {
        "Dropout"
    }
}

// =============================================================================
// Channel Dropout
// =============================================================================

/// Zeroes whole channels of a `(C, *spatial)` input with probability `p`.
#[derive(Debug, Clone, Copy)]
pub struct DropoutNd<const N: usize> {
    p: f32,
}

/// Channel dropout for `(C, L)` inputs.
pub type Dropout1D = DropoutNd<1>;
/// Channel dropout for `(C, H, W)` inputs.
pub type Dropout2D = DropoutNd<2>;
/// Channel dropout for `(C, H, W, D)` inputs.
pub type Dropout3D = DropoutNd<3>;

impl<const N: usize> DropoutNd<N> {
    /// Creates a layer; `p` must be in `[0, 1]`.
    pub fn new(p: f32) -> Result<Self> {
        Ok(Self {
            p: validate_probability(p, "p")?,
        })
    }

    /// Drop probability.
    pub fn p(&self) -> f32 {
        self.p
    }
}

impl<const N: usize> Module for DropoutNd<N> {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        validate_spatial_ndim(input, N, self.name())?;
        dropout_channels(input, self.p, key)
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        Box::new(Identity)
    }

    fn name(&self) -> &'static str {
        match N {
            1 => "Dropout1D",
            2 => "Dropout2D",
            3 => "Dropout3D",
            _ => "DropoutND",
        }
    }
}

// =============================================================================
// RandomApply
// =============================================================================

/// Applies the wrapped layer with probability `p`, otherwise passes the
/// input through.
pub struct RandomApply {
    layer: Box<dyn Module>,
    p: f32,
}

impl RandomApply {
    /// Wraps `layer`; `p` must be in `[0, 1]`.
    pub fn new<M: Module + 'static>(layer: M, p: f32) -> Result<Self> {
        Ok(Self {
            layer: Box::new(layer),
            p: validate_probability(p, "p")?,
        })
    }

    /// Application probability.
    pub fn p(&self) -> f32 {
        self.p
    }
}

impl Module for RandomApply {
    fn forward(&self, input: &Variable) -> Result<Variable> {
        self.forward_with_key(input, &PrngKey::default())
    }

    fn forward_with_key(&self, input: &Variable, key: &PrngKey) -> Result<Variable> {
        let keys = key.split(2);
        if keys[0].bernoulli(f64::from(self.p), 1)[0] {
            self.layer.forward_with_key(input, &keys[1])
        } else {
            Ok(input.clone())
        }
    }

    fn forward_with_state(&self, input: &Variable, state: &State) -> Result<(Variable, State)> {
        self.forward_with_key_and_state(input, &PrngKey::default(), state)
    }

    /// The wrapped layer's state is updated only when the layer is applied.
    fn forward_with_key_and_state(
        &self,
        input: &Variable,
        key: &PrngKey,
        state: &State,
    ) -> Result<(Variable, State)> {
        let keys = key.split(2);
        if keys[0].bernoulli(f64::from(self.p), 1)[0] {
            self.layer.forward_with_key_and_state(input, &keys[1], state)
        } else {
            Ok((input.clone(), state.clone()))
        }
    }

    fn init_state(&self, input: Option<&Tensor>) -> Result<State> {
        self.layer.init_state(input)
    }

    fn into_eval(self: Box<Self>) -> Box<dyn Module> {
        self.layer.into_eval()
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.layer.parameters()
    }

    fn name(&self) -> &'static str {
        "RandomApply"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::norm::{BatchNorm, BatchNormState};
    use crate::module::{tree_eval, tree_state};

    struct AddOne;

    impl Module for AddOne {
        fn forward(&self, input: &Variable) -> Result<Variable> {
            Ok(input.add_scalar(1.0))
        }
    }

    #[test]
    fn test_probability_validation() {
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(1.1).is_err());
        assert!(Dropout::new(1.0).is_ok());
        assert!(Dropout2D::new(2.0).is_err());
        assert!(RandomApply::new(AddOne, 1.5).is_err());
        assert_eq!(Dropout::default().p(), 0.5);
    }

    #[test]
    fn test_dropout_is_deterministic_per_key() {
        let layer = Dropout::new(0.5).unwrap();
        let x = Variable::from_tensor(Tensor::ones(&[32]));
        let a = layer.forward_with_key(&x, &PrngKey::new(4)).unwrap();
        let b = layer.forward_with_key(&x, &PrngKey::new(4)).unwrap();
        assert_eq!(a.data().to_vec(), b.data().to_vec());
        assert!(a.data().to_vec().iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn test_dropout_nd_validates_rank() {
        let layer = Dropout2D::new(0.5).unwrap();
        assert!(layer.forward(&Variable::from_tensor(Tensor::ones(&[4, 4]))).is_err());
        let y = layer.forward(&Variable::from_tensor(Tensor::ones(&[4, 3, 3]))).unwrap();
        assert_eq!(y.shape(), vec![4, 3, 3]);
        assert_eq!(Dropout1D::new(0.1).unwrap().name(), "Dropout1D");
    }

    #[test]
    fn test_random_apply() {
        let x = Variable::from_tensor(Tensor::zeros(&[2]));
        let always = RandomApply::new(AddOne, 1.0).unwrap();
        let never = RandomApply::new(AddOne, 0.0).unwrap();
        assert_eq!(always.forward(&x).unwrap().data().to_vec(), vec![1.0, 1.0]);
        assert_eq!(never.forward(&x).unwrap().data().to_vec(), vec![0.0, 0.0]);

        let half = RandomApply::new(AddOne, 0.5).unwrap();
        let applied = (0..200)
            .filter(|&i| half.forward_with_key(&x, &PrngKey::new(i)).unwrap().data().to_vec()[0] == 1.0)
            .count();
        assert!((60..140).contains(&applied));
    }

    #[test]
    fn test_random_apply_threads_wrapped_state() {
        let key = PrngKey::new(0);
        let x = Variable::from_tensor(
            Tensor::from_vec(vec![5.0, -3.0, 5.0, -3.0, 5.0, -3.0], &[3, 2]).unwrap(),
        );

        let always = RandomApply::new(BatchNorm::new(2, &key).unwrap(), 1.0).unwrap();
        let state = tree_state(&always, None).unwrap();
        assert_eq!(state, State::BatchNorm(BatchNormState::new(2)));
        let (_, next) = always.forward_with_state(&x, &state).unwrap();
        let State::BatchNorm(bn) = &next else {
            panic!("expected batch norm state, got {next:?}");
        };
        let mean = bn.running_mean.to_vec();
        assert!((mean[0] - 0.05).abs() < 1e-5);
        assert!((mean[1] + 0.03).abs() < 1e-5);

        let never = RandomApply::new(BatchNorm::new(2, &key).unwrap(), 0.0).unwrap();
        let state = tree_state(&never, None).unwrap();
        let (y, next) = never.forward_with_key_and_state(&x, &key, &state).unwrap();
        assert_eq!(next, state);
        assert_eq!(y.data().to_vec(), x.data().to_vec());
    }

    #[test]
    fn test_eval_forms() {
        assert_eq!(tree_eval(Box::new(Dropout::new(0.3).unwrap())).name(), "Identity");
        assert_eq!(tree_eval(Box::new(Dropout3D::new(0.3).unwrap())).name(), "Identity");

        let wrapped = RandomApply::new(Dropout::new(0.9).unwrap(), 1.0).unwrap();
        let eval = tree_eval(Box::new(wrapped));
        assert_eq!(eval.name(), "Identity");
    }
}
