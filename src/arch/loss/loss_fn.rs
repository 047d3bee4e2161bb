use ndarray::{Array2, ArrayView2};

use crate::{EngineErr, Result};

/// A differentiable loss over a batch of predictions, one sample per row.
///
/// Both methods expect `y_pred` and `y` to have the same shape; callers check it with
/// `LossFn::check` first.
pub trait LossFn {
    /// The loss averaged over every element of the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// The derivative of `loss` with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;

    /// Fails if the targets don't have the shape of the predictions.
    fn check(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<()> {
        if y_pred.dim() != y.dim() {
            return Err(EngineErr::SizeMismatch {
                what: "targets",
                got: y.len(),
                expected: y_pred.len(),
            });
        }

        Ok(())
    }
}
