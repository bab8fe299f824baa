//! Backward Pass - Reverse-Mode Gradient Computation
//!
//! Walks the recorded graph in reverse topological order, summing gradients
//! per node before applying its backward rule. Also provides finite
//! difference helpers for checking backward rules.
//!
//! @version 0.1.0
//! @author Lamina Development Team

use std::collections::{HashMap, HashSet};

use lamina_core::error::{Error, Result};
use lamina_tensor::Tensor;
use tracing::debug;

use crate::grad_fn::{GradFn, GradFnId};
use crate::variable::Variable;

// =============================================================================
// Backward Function
// =============================================================================

/// Propagates `grad_output` from `output` into every reachable leaf.
pub fn backward(output: &Variable, grad_output: &Tensor) -> Result<()> {
    let Some(grad_fn) = output.grad_fn().cloned() else {
        if output.is_leaf() && output.requires_grad() {
            output.accumulate_grad(grad_output)?;
        }
        return Ok(());
    };

    let mut topo_order: Vec<GradFn> = Vec::new();
    let mut visited: HashSet<GradFnId> = HashSet::new();
    build_topo_order(&grad_fn, &mut topo_order, &mut visited);
    debug!(nodes = topo_order.len(), root = grad_fn.name(), "backward pass");

    let mut grad_map: HashMap<GradFnId, Tensor> = HashMap::new();
    grad_map.insert(grad_fn.id(), grad_output.clone());

    for node in topo_order.iter().rev() {
        let Some(grad) = grad_map.remove(&node.id()) else {
            continue;
        };
        let input_grads = node.apply(&grad)?;

        for (next, input_grad) in node.next_functions().iter().zip(input_grads) {
            let (Some(next), Some(input_grad)) = (next, input_grad) else {
                continue;
            };
            let merged = match grad_map.remove(&next.id()) {
                Some(existing) => existing.add(&input_grad)?,
                None => input_grad,
            };
            grad_map.insert(next.id(), merged);
        }
    }
    Ok(())
}

/// Depth-first post-order over the graph, iterative so deep graphs do not
/// overflow the stack.
fn build_topo_order(root: &GradFn, order: &mut Vec<GradFn>, visited: &mut HashSet<GradFnId>) {
    let mut stack: Vec<(GradFn, bool)> = vec![(root.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.id()) {
            continue;
        }
        stack.push((node.clone(), true));
        for next in node.next_functions().iter().flatten() {
            if !visited.contains(&next.id()) {
                stack.push((next.clone(), false));
            }
        }
    }
}

// =============================================================================
// Gradient Checking
// =============================================================================

/// Central finite-difference gradient of a scalar-valued `func` at `input`.
pub fn numerical_gradient<F>(func: F, input: &Variable, eps: f32) -> Result<Tensor>
where
    F: Fn(&Variable) -> Result<Variable>,
{
    let input_data = input.data();
    let base = input_data.to_vec();
    let mut grad = vec![0.0f32; base.len()];

    let eval = |data: Vec<f32>| -> Result<f32> {
        let x = Variable::from_tensor(Tensor::from_vec(data, input_data.shape())?);
        let y = func(&x)?;
        if y.numel() != 1 {
            return Err(Error::GradientError {
                message: "numerical_gradient needs a scalar-valued function".into(),
            });
        }
        y.data().item()
    };

    for i in 0..base.len() {
        let mut plus = base.clone();
        plus[i] += eps;
        let mut minus = base.clone();
        minus[i] -= eps;
        grad[i] = (eval(plus)? - eval(minus)?) / (2.0 * eps);
    }
    Tensor::from_vec(grad, input_data.shape())
}

/// Whether `analytical` matches `numerical` within `atol + rtol * |numerical|`.
#[must_use]
pub fn gradcheck(analytical: &Tensor, numerical: &Tensor, rtol: f32, atol: f32) -> bool {
    analytical.shape() == numerical.shape()
        && analytical
            .as_slice()
            .iter()
            .zip(numerical.as_slice())
            .all(|(&a, &n)| (a - n).abs() <= atol + rtol * n.abs())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_tensor::GatherPlan;

    fn var(data: Vec<f32>, shape: &[usize]) -> Variable {
        Variable::new(Tensor::from_vec(data, shape).unwrap(), true)
    }

    #[test]
    fn test_simple_backward() {
        let x = var(vec![3.0], &[1]);
        x.pow(2.0).backward().unwrap();
        assert!((x.grad().unwrap().to_vec()[0] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_input_accumulates() {
        // y = x * x + x, dy/dx = 2x + 1
        let x = var(vec![2.0], &[1]);
        let y = x.mul(&x).unwrap().add(&x).unwrap();
        y.backward().unwrap();
        assert!((x.grad().unwrap().to_vec()[0] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_broadcast_backward() {
        let a = var(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = var(vec![1.0, 1.0, 1.0], &[3]);
        a.mul(&b).unwrap().sum().unwrap().backward().unwrap();
        assert_eq!(b.grad().unwrap().to_vec(), vec![5.0, 7.0, 9.0]);
        assert_eq!(a.grad().unwrap().to_vec(), vec![1.0; 6]);
    }

    #[test]
    fn test_einsum_gradcheck() {
        let w = Tensor::from_vec(vec![0.5, -1.0, 2.0, 0.25, 1.5, -0.5], &[3, 2]).unwrap();
        let f = |x: &Variable| -> Result<Variable> {
            let wv = Variable::from_tensor(w.clone());
            Variable::einsum("...a,ab->...b", &[x, &wv])?.pow(2.0).sum()
        };
        let x = var(vec![0.1, 0.2, 0.3, -0.4, 0.5, 0.6], &[2, 3]);
        f(&x).unwrap().backward().unwrap();
        let numerical = numerical_gradient(f, &x, 1e-3).unwrap();
        assert!(gradcheck(&x.grad().unwrap(), &numerical, 1e-2, 1e-2));
    }

    #[test]
    fn test_gather_and_stack_gradients() {
        let x = var(vec![1.0, 2.0, 3.0], &[3]);
        let plan = GatherPlan::pad(&[3], &[(1, 1)], 0.0).unwrap();
        let padded = x.gather(&plan).unwrap();
        let stacked = Variable::stack(&[padded.clone(), padded], 0).unwrap();
        stacked.select(1, 1).unwrap().sum().unwrap().backward().unwrap();
        assert_eq!(x.grad().unwrap().to_vec(), vec![2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gradcheck() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let b = Tensor::from_vec(vec![1.001, 2.001, 3.001], &[3]).unwrap();
        assert!(gradcheck(&a, &b, 0.01, 0.01));
        assert!(!gradcheck(&a, &b, 0.0001, 0.0001));
    }
}
