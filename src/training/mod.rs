//! Factories wiring a model, an optimizer and a loss into trainer and evaluator engines.

mod clip;
mod evaluator;
mod trainer;

use ndarray::Array2;

pub use clip::ClipGradNorm;
pub use evaluator::{create_supervised_evaluator, EvaluatorOptions, EvaluatorOutputFn};
pub use trainer::{create_supervised_trainer, TrainerOptions, TrainerOutputFn};

use crate::{
    device::{convert_tensor, Device},
    Result,
};

/// A supervised batch: inputs and targets, one sample per row.
pub type Batch = (Array2<f32>, Array2<f32>);

/// Turns whatever the data source yields into a `Batch` placed on a device.
pub type PrepareBatchFn<B> = Box<dyn Fn(B, Device, bool) -> Result<Batch> + Send>;

/// Places both halves of a batch on `device`.
///
/// # Arguments
/// * `batch` - The `(x, y)` pair.
/// * `device` - Where the arrays go.
/// * `non_blocking` - Whether the copy may happen asynchronously with respect to the host.
pub fn prepare_batch(batch: Batch, device: Device, non_blocking: bool) -> Result<Batch> {
    let (x, y) = batch;

    Ok((
        convert_tensor(x, device, non_blocking)?,
        convert_tensor(y, device, non_blocking)?,
    ))
}
