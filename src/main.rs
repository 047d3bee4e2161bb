use std::{env, num::NonZeroUsize, sync::Arc};

use anyhow::Context as _;
use ignis::{
    arch::{activations::ActFn, layers::Dense, loss::BinaryCrossEntropy, Model, Sequential},
    config::{OptimizerConfig, TrainingConfig},
    data::{DataLoader, InMemoryDataset},
    engine::{Context, Event, RunOptions},
    metrics::{AveragePrecision, BoxedMetric, Loss},
    optimization::{Adam, GradientDescent, Optimizer},
    training::{
        create_supervised_evaluator, create_supervised_trainer, Batch, EvaluatorOptions,
        TrainerOptions,
    },
};
use log::info;
use ndarray::Array2;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Points in the square `[-1, 1)²`, labelled 1 above the diagonal.
fn synthetic(samples: usize, rng: &mut impl Rng) -> anyhow::Result<InMemoryDataset> {
    let x = Array2::<f32>::from_shape_fn((samples, 2), |_| rng.random_range(-1.0..1.0));
    let y = Array2::from_shape_fn((samples, 1), |(i, _)| (x[[i, 0]] + x[[i, 1]] > 0.) as u8 as f32);

    Ok(InMemoryDataset::new(x, y)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => TrainingConfig::from_file(&path)
            .with_context(|| format!("failed to read configuration from {path}"))?,
        None => TrainingConfig::default(),
    };
    info!("{config:?}");

    let seed = config.seed.unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut model = Sequential::new([
        Dense::new((2, 8), Some(ActFn::sigmoid(1.))),
        Dense::new((8, 1), Some(ActFn::sigmoid(1.))),
    ]);
    model.init_uniform(&mut rng, 1.);

    let optimizer: Box<dyn Optimizer> = match config.optimizer {
        OptimizerConfig::GradientDescent => Box::new(GradientDescent::new(config.learning_rate)),
        OptimizerConfig::Adam => Box::new(Adam::with_defaults(model.size(), config.learning_rate)),
    };

    let model = Arc::new(Mutex::new(model));
    let optimizer = Arc::new(Mutex::new(optimizer));

    let mut opts = TrainerOptions::default()
        .device(config.device)
        .non_blocking(config.non_blocking)
        .deterministic(config.deterministic)
        .precision(config.precision());
    if let Some(clip) = config.clip_grad_norm {
        opts = opts.clip_grad_norm(clip);
    }

    let mut trainer =
        create_supervised_trainer(Arc::clone(&model), optimizer, BinaryCrossEntropy, opts)?;

    trainer.add_event_handler(Event::EpochCompleted.every(5), |ctx: &mut Context<f32>| {
        let state = ctx.state();
        info!(
            "Epoch[{}] loss: {:.4}",
            state.epoch,
            state.output.unwrap_or_default()
        );
        Ok(())
    })?;

    let mut train_data = DataLoader::new(synthetic(config.samples, &mut rng)?, config.batch_size)
        .shuffled(seed);
    trainer.run(
        &mut train_data,
        RunOptions::new()
            .max_epochs(config.epochs.get())
            .seed(seed),
    )?;

    let metrics: [(&str, BoxedMetric<Batch>); 2] = [
        ("average_precision", Box::new(AveragePrecision::new())),
        ("bce", Box::new(Loss::new(BinaryCrossEntropy))),
    ];
    let mut evaluator = create_supervised_evaluator(
        model,
        metrics,
        EvaluatorOptions::default().device(config.device),
    )?;

    let eval_batch = NonZeroUsize::new(64).unwrap_or(config.batch_size);
    let mut eval_data = DataLoader::new(synthetic(config.samples / 4 + 1, &mut rng)?, eval_batch);
    let state = evaluator.run(&mut eval_data, RunOptions::new())?;

    for (name, value) in &state.metrics {
        println!("{name}: {value:.4}");
    }

    Ok(())
}
