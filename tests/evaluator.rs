use std::{num::NonZeroUsize, sync::Arc};

use ignis::{
    arch::{layers::Dense, loss::Mse, Model, Sequential},
    data::{DataLoader, InMemoryDataset},
    device::Device,
    engine::RunOptions,
    metrics::{AveragePrecision, BoxedMetric, Loss},
    training::{create_supervised_evaluator, Batch, EvaluatorOptions},
    EngineErr,
};
use ndarray::array;
use parking_lot::Mutex;

/// A 1 -> 1 linear model that returns its input.
fn identity() -> Arc<Mutex<Sequential>> {
    let model = Sequential::with_params([Dense::new((1, 1), None)], vec![1., 0.]).unwrap();
    Arc::new(Mutex::new(model))
}

fn scores() -> DataLoader {
    let dataset = InMemoryDataset::new(
        array![[0.1], [0.4], [0.35], [0.8]],
        array![[0.], [0.], [1.], [1.]],
    )
    .unwrap();

    DataLoader::new(dataset, NonZeroUsize::new(3).unwrap())
}

#[test]
fn evaluator_computes_average_precision() {
    let model = identity();
    let metrics: Vec<(&str, BoxedMetric<Batch>)> = vec![
        ("ap", Box::new(AveragePrecision::new())),
        ("mse", Box::new(Loss::new(Mse))),
    ];

    let mut evaluator =
        create_supervised_evaluator(Arc::clone(&model), metrics, EvaluatorOptions::default())
            .unwrap();
    let state = evaluator.run(&mut scores(), RunOptions::new()).unwrap();

    assert_eq!(state.iteration, 2);
    assert!((state.metrics["ap"] - 0.8333333).abs() < 1e-6);

    let mse = (0.01 + 0.16 + 0.4225 + 0.04) / 4.;
    assert!((state.metrics["mse"] - mse).abs() < 1e-6);

    let model = model.lock();
    assert!(!model.is_training());
    assert_eq!(model.params(), [1., 0.]);
    assert!(model.grad().iter().all(|&g| g == 0.));
}

#[test]
fn metrics_are_recomputed_on_every_run() {
    let metrics: Vec<(&str, BoxedMetric<Batch>)> = vec![("ap", Box::new(AveragePrecision::new()))];
    let mut evaluator =
        create_supervised_evaluator(identity(), metrics, EvaluatorOptions::default()).unwrap();

    let mut data = scores();
    for _ in 0..2 {
        let state = evaluator.run(&mut data, RunOptions::new()).unwrap();
        assert!((state.metrics["ap"] - 0.8333333).abs() < 1e-6);
    }
}

#[test]
fn evaluator_rejects_xla() {
    let metrics: Vec<(&str, BoxedMetric<Batch>)> = Vec::new();
    let evaluator = create_supervised_evaluator(
        identity(),
        metrics,
        EvaluatorOptions::default().device(Device::Xla(1)),
    );

    assert!(matches!(evaluator, Err(EngineErr::XlaUnsupported)));
}

#[test]
fn non_binary_targets_fail_the_run() {
    let dataset = InMemoryDataset::new(array![[0.1], [0.4]], array![[0.], [3.]]).unwrap();
    let mut data = DataLoader::new(dataset, NonZeroUsize::new(2).unwrap());

    let metrics: Vec<(&str, BoxedMetric<Batch>)> = vec![(
        "ap",
        Box::new(AveragePrecision::new().check_compute_fn(false)),
    )];
    let mut evaluator =
        create_supervised_evaluator(identity(), metrics, EvaluatorOptions::default()).unwrap();

    assert!(matches!(
        evaluator.run(&mut data, RunOptions::new()),
        Err(EngineErr::InvalidTargets(_))
    ));
}
