use std::sync::Arc;

use log::info;
use ndarray::Array2;
use parking_lot::Mutex;

use super::{prepare_batch, Batch, PrepareBatchFn};
use crate::{
    arch::Model,
    device::Device,
    engine::{Context, Engine},
    metrics::{attach, BoxedMetric},
    Result,
};

/// Maps `(x, y, y_pred)` to the evaluator's iteration output.
pub type EvaluatorOutputFn<O> = Box<dyn Fn(Array2<f32>, Array2<f32>, Array2<f32>) -> O + Send>;

/// How `create_supervised_evaluator` builds its inference function.
pub struct EvaluatorOptions<B, O> {
    pub device: Device,
    pub non_blocking: bool,
    pub prepare_batch: PrepareBatchFn<B>,
    pub output_transform: EvaluatorOutputFn<O>,
}

impl Default for EvaluatorOptions<Batch, Batch> {
    /// Batches are `(x, y)` pairs and the output is `(y_pred, y)`, what metrics expect.
    fn default() -> Self {
        Self::new(prepare_batch, |_x, y, y_pred| (y_pred, y))
    }
}

impl<B, O> EvaluatorOptions<B, O> {
    pub fn new<P, T>(prepare_batch: P, output_transform: T) -> Self
    where
        P: Fn(B, Device, bool) -> Result<Batch> + Send + 'static,
        T: Fn(Array2<f32>, Array2<f32>, Array2<f32>) -> O + Send + 'static,
    {
        Self {
            device: Device::Cpu,
            non_blocking: false,
            prepare_batch: Box::new(prepare_batch),
            output_transform: Box::new(output_transform),
        }
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Replaces the batch preparation, changing the batch type the evaluator accepts.
    pub fn with_prepare_batch<B2, P>(self, prepare_batch: P) -> EvaluatorOptions<B2, O>
    where
        P: Fn(B2, Device, bool) -> Result<Batch> + Send + 'static,
    {
        EvaluatorOptions {
            device: self.device,
            non_blocking: self.non_blocking,
            prepare_batch: Box::new(prepare_batch),
            output_transform: self.output_transform,
        }
    }

    /// Replaces the output transform, changing the evaluator's output type.
    pub fn with_output_transform<O2, T>(self, output_transform: T) -> EvaluatorOptions<B, O2>
    where
        T: Fn(Array2<f32>, Array2<f32>, Array2<f32>) -> O2 + Send + 'static,
    {
        EvaluatorOptions {
            device: self.device,
            non_blocking: self.non_blocking,
            prepare_batch: self.prepare_batch,
            output_transform: Box::new(output_transform),
        }
    }
}

/// Creates an evaluator engine for a supervised model.
///
/// Every iteration puts the model in evaluation mode and runs the forward pass without touching
/// its gradient. Each metric is attached to the engine under its name, so after a run its value
/// is in `state.metrics`.
///
/// # Arguments
/// * `model` - The model to evaluate.
/// * `metrics` - Pairs of metric names and metrics.
/// * `opts` - Device, batch preparation and output options.
///
/// # Returns
/// The evaluator engine, or an error if the device is unavailable.
pub fn create_supervised_evaluator<M, B, O, I, S>(
    model: Arc<Mutex<M>>,
    metrics: I,
    opts: EvaluatorOptions<B, O>,
) -> Result<Engine<B, O>>
where
    M: Model + 'static,
    B: 'static,
    O: 'static,
    I: IntoIterator<Item = (S, BoxedMetric<O>)>,
    S: Into<String>,
{
    let EvaluatorOptions {
        device,
        non_blocking,
        prepare_batch,
        output_transform,
    } = opts;

    device.ensure_supported()?;

    let inference = move |_ctx: &mut Context<O>, batch: B| -> Result<O> {
        let mut model = model.lock();
        model.set_training(false);

        let (x, y) = prepare_batch(batch, device, non_blocking)?;
        let y_pred = model.forward(x.view())?;

        Ok(output_transform(x, y, y_pred))
    };

    let mut evaluator = Engine::new(inference);

    for (name, metric) in metrics {
        let name = name.into();
        info!("attaching metric {name} to the evaluator");
        attach(metric, &mut evaluator, name)?;
    }

    Ok(evaluator)
}
