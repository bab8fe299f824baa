//! End-to-end tests for the Lamina layer library.
//! Each test builds a small model the way a user would.

use lamina::prelude::*;
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lamina_nn=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn mse(pred: &Variable, target: &Variable) -> Variable {
    pred.sub(target).unwrap().pow(2.0).mean().unwrap()
}

/// A single linear layer fits y = 2x + 1 with plain gradient descent.
#[test]
fn test_linear_regression_training() {
    init_tracing();
    let key = PrngKey::new(7);
    let model = Linear::new(1, 1, &key).unwrap();

    let xs: Vec<f32> = (0..8).map(|i| i as f32 / 4.0 - 1.0).collect();
    let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    let x = Variable::from_tensor(Tensor::from_vec(xs, &[8, 1]).unwrap());
    let y = Variable::from_tensor(Tensor::from_vec(ys, &[8, 1]).unwrap());

    let initial = mse(&model.forward(&x).unwrap(), &y).data().item().unwrap();
    for _ in 0..200 {
        model.zero_grad();
        let loss = mse(&model.forward(&x).unwrap(), &y);
        loss.backward().unwrap();
        for param in model.parameters() {
            let grad = param.grad().unwrap();
            param.update_data(param.data().sub(&grad.mul_scalar(0.1)).unwrap());
        }
    }
    let last = mse(&model.forward(&x).unwrap(), &y).data().item().unwrap();
    info!(initial, last, "regression loss");
    assert!(last < 1e-3 && last < initial);

    let weight = model.weight().unwrap().data().to_vec()[0];
    assert!((weight - 2.0).abs() < 0.1);
}

/// Running statistics move toward the batch mean with momentum 0.99.
#[test]
fn test_batch_norm_state_threading() {
    init_tracing();
    let key = PrngKey::new(0);
    let model = Sequential::new()
        .add(Identity)
        .add_named("bn", BatchNorm::new(2, &key).unwrap());

    let mut state = tree_state(&model, None).unwrap();
    let batch = Tensor::from_vec(vec![5.0, -3.0, 5.0, -3.0, 5.0, -3.0], &[3, 2]).unwrap();
    let x = Variable::from_tensor(batch);
    for step in 0..3u64 {
        let (y, next) = model
            .forward_with_key_and_state(&x, &key.fold_in(step), &state)
            .unwrap();
        assert!(y.data().to_vec().iter().all(|v| v.abs() < 1e-3));
        state = next;
    }

    let children = state.children().unwrap();
    assert_eq!(children[0], State::Empty);
    let State::BatchNorm(bn) = &children[1] else {
        panic!("expected batch norm state, got {:?}", children[1]);
    };
    let decay = 1.0 - 0.99f32.powi(3);
    let mean = bn.running_mean.to_vec();
    assert!((mean[0] - 5.0 * decay).abs() < 1e-4);
    assert!((mean[1] + 3.0 * decay).abs() < 1e-4);
}

/// An augmentation pipeline over a batch of images feeding a lazy head.
#[test]
fn test_image_pipeline_and_eval() {
    init_tracing();
    let key = PrngKey::new(3);
    let features = Sequential::new()
        .add(Resize2D::new(&[8]).unwrap())
        .add(RandomZoom2D::default())
        .add(CenterCrop2D::new(&[6]).unwrap())
        .add(Dropout2D::new(0.2).unwrap())
        .add(Flatten::default());
    let pipeline = Batched::new(features);

    let images = Variable::from_tensor(Tensor::ones(&[3, 2, 4, 4]));
    let flat = pipeline.forward_with_key(&images, &key).unwrap();
    assert_eq!(flat.shape(), vec![3, 72]);

    let head = Linear::lazy(4, &key.fold_in(1)).unwrap();
    assert!(head.forward(&flat).is_err());
    let head = head.materialize(&flat.data()).unwrap();
    assert_eq!(head.forward(&flat).unwrap().shape(), vec![3, 4]);

    let eval = tree_eval(Box::new(pipeline));
    let a = eval.forward_with_key(&images, &PrngKey::new(1)).unwrap();
    let b = eval.forward_with_key(&images, &PrngKey::new(2)).unwrap();
    assert_eq!(a.data().to_vec(), b.data().to_vec());
    assert!(a.data().to_vec().iter().all(|&v| (v - 1.0).abs() < 1e-5));
}

/// Mixed normalization layers keep gradients flowing to every parameter.
#[test]
fn test_normalized_mlp_gradients() {
    init_tracing();
    let key = PrngKey::new(11);
    let keys = key.split(4);
    let model = Sequential::new()
        .add_named("in", Linear::new(6, 8, &keys[0]).unwrap())
        .add_named("ln", LayerNorm::new(&[8], &keys[1]).unwrap())
        .add_named("mlp", Mlp::new(&[8, 8, 2], &keys[2]).unwrap());

    let x = Variable::from_tensor(lamina::tensor::randn(&PrngKey::new(5), &[4, 6]));
    let loss = model.forward(&x).unwrap().pow(2.0).mean().unwrap();
    loss.backward().unwrap();

    let named = model.named_parameters();
    assert!(named.contains_key("in.weight"));
    assert!(named.contains_key("ln.weight"));
    assert!(named.contains_key("mlp.layers.1.bias"));
    for (name, param) in &named {
        assert!(param.grad().is_some(), "{name} has no gradient");
    }
}

/// Axis-selective linear maps over image channels and height.
#[test]
fn test_general_linear_and_group_norm() {
    init_tracing();
    let key = PrngKey::new(2);
    let x = Variable::from_tensor(Tensor::ones(&[4, 3, 5]));

    let proj = GeneralLinear::new(&[4, 3], 6, &[0, 1], &key).unwrap();
    let y = proj.forward(&x).unwrap();
    assert_eq!(y.shape(), vec![5, 6]);

    let norm = GroupNorm::new(4, 2, &key).unwrap();
    let z = norm.forward(&x).unwrap();
    assert_eq!(z.shape(), vec![4, 3, 5]);
    assert!(GroupNorm::new(5, 2, &key).is_err());
}

/// Options round-trip through JSON the way configuration files supply them.
#[test]
fn test_options_from_json() {
    let options: BatchNormOptions = serde_json::from_str(r#"{"momentum": 0.9, "axis": 0}"#).unwrap();
    assert!((options.momentum - 0.9).abs() < 1e-6);
    assert_eq!(options.axis, 0);

    let options: LinearOptions = serde_json::from_str(r#"{"bias_init": null}"#).unwrap();
    let layer = Linear::with_options(3, 2, options, &PrngKey::new(0)).unwrap();
    assert!(layer.bias().is_none());
}
