use std::sync::Arc;

use log::info;
use ndarray::Array2;
use parking_lot::Mutex;

use super::{prepare_batch, Batch, ClipGradNorm, PrepareBatchFn};
use crate::{
    arch::{loss::LossFn, Model},
    device::Device,
    engine::{Context, Engine},
    optimization::Optimizer,
    precision::Precision,
    Result,
};

/// Maps `(x, y, y_pred, loss)` to the trainer's iteration output.
pub type TrainerOutputFn<O> =
    Box<dyn Fn(Array2<f32>, Array2<f32>, Array2<f32>, f32) -> O + Send>;

/// How `create_supervised_trainer` builds its update function.
pub struct TrainerOptions<B, O> {
    pub device: Device,
    pub non_blocking: bool,
    pub prepare_batch: PrepareBatchFn<B>,
    pub output_transform: TrainerOutputFn<O>,
    pub deterministic: bool,
    pub precision: Precision,
    pub clip_grad_norm: Option<ClipGradNorm>,
}

impl Default for TrainerOptions<Batch, f32> {
    /// Batches are `(x, y)` pairs and the output is the batch loss.
    fn default() -> Self {
        Self::new(prepare_batch, |_x, _y, _y_pred, loss| loss)
    }
}

impl<B, O> TrainerOptions<B, O> {
    pub fn new<P, T>(prepare_batch: P, output_transform: T) -> Self
    where
        P: Fn(B, Device, bool) -> Result<Batch> + Send + 'static,
        T: Fn(Array2<f32>, Array2<f32>, Array2<f32>, f32) -> O + Send + 'static,
    {
        Self {
            device: Device::Cpu,
            non_blocking: false,
            prepare_batch: Box::new(prepare_batch),
            output_transform: Box::new(output_transform),
            deterministic: false,
            precision: Precision::Full,
            clip_grad_norm: None,
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

    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn clip_grad_norm(mut self, clip: ClipGradNorm) -> Self {
        self.clip_grad_norm = Some(clip);
        self
    }

    /// Replaces the batch preparation, changing the batch type the trainer accepts.
    pub fn with_prepare_batch<B2, P>(self, prepare_batch: P) -> TrainerOptions<B2, O>
    where
        P: Fn(B2, Device, bool) -> Result<Batch> + Send + 'static,
    {
        TrainerOptions {
            device: self.device,
            non_blocking: self.non_blocking,
            prepare_batch: Box::new(prepare_batch),
            output_transform: self.output_transform,
            deterministic: self.deterministic,
            precision: self.precision,
            clip_grad_norm: self.clip_grad_norm,
        }
    }

    /// Replaces the output transform, changing the trainer's output type.
    pub fn with_output_transform<O2, T>(self, output_transform: T) -> TrainerOptions<B, O2>
    where
        T: Fn(Array2<f32>, Array2<f32>, Array2<f32>, f32) -> O2 + Send + 'static,
    {
        TrainerOptions {
            device: self.device,
            non_blocking: self.non_blocking,
            prepare_batch: self.prepare_batch,
            output_transform: Box::new(output_transform),
            deterministic: self.deterministic,
            precision: self.precision,
            clip_grad_norm: self.clip_grad_norm,
        }
    }
}

/// Creates a trainer engine for a supervised model.
///
/// Every iteration puts the model in training mode, zeroes its gradient, prepares the batch,
/// runs the forward pass and the loss, back-propagates, clips the gradient if asked to and
/// steps the optimizer. Under mixed precision the forward pass is autocast, the loss is scaled
/// and steps with overflowed gradients are skipped.
///
/// The device only applies to batches, the model is never moved.
///
/// # Arguments
/// * `model` - The model to train.
/// * `optimizer` - The optimizer updating the model's parameters.
/// * `loss_fn` - The loss function.
/// * `opts` - Device, batch preparation, output, determinism, precision and clipping options.
///
/// # Returns
/// The trainer engine, or an error if the device is unavailable.
pub fn create_supervised_trainer<M, Opt, L, B, O>(
    model: Arc<Mutex<M>>,
    optimizer: Arc<Mutex<Opt>>,
    loss_fn: L,
    opts: TrainerOptions<B, O>,
) -> Result<Engine<B, O>>
where
    M: Model + 'static,
    Opt: Optimizer + 'static,
    L: LossFn + Send + 'static,
    B: 'static,
    O: 'static,
{
    let TrainerOptions {
        device,
        non_blocking,
        prepare_batch,
        output_transform,
        deterministic,
        mut precision,
        clip_grad_norm,
    } = opts;

    device.ensure_supported()?;

    info!(
        "creating supervised trainer: device={device} precision={precision:?} deterministic={deterministic} clip_grad_norm={clip_grad_norm:?}"
    );

    let update = move |_ctx: &mut Context<O>, batch: B| -> Result<O> {
        let mut model = model.lock();
        let mut optimizer = optimizer.lock();

        model.set_training(true);
        model.zero_grad();

        let (x, y) = prepare_batch(batch, device, non_blocking)?;
        let y_pred = precision.forward(&mut *model, x.view())?;
        loss_fn.check(y_pred.view(), y.view())?;
        let loss = loss_fn.loss(y_pred.view(), y.view());

        precision.backward(&mut *model, loss_fn.loss_prime(y_pred.view(), y.view()))?;

        if let Some(clip) = clip_grad_norm {
            clip.apply(model.grad_mut());
        }

        precision.step(&mut *model, &mut *optimizer)?;

        Ok(output_transform(x, y, y_pred, loss))
    };

    let trainer = if deterministic {
        Engine::deterministic(update)
    } else {
        Engine::new(update)
    };

    Ok(trainer)
}
