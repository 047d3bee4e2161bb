use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A trainable model owning its flat parameter and gradient buffers.
pub trait Model: Send {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    fn grad(&self) -> &[f32];

    fn grad_mut(&mut self) -> &mut [f32];

    /// Borrows both buffers mutably at once.
    fn params_and_grad_mut(&mut self) -> (&mut [f32], &mut [f32]);

    /// Borrows both buffers at once, for optimizer steps.
    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        let (params, grad) = self.params_and_grad_mut();
        (params, grad)
    }

    fn zero_grad(&mut self) {
        self.grad_mut().fill(0.);
    }

    /// Switches between training and evaluation mode.
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Accumulates into the gradient buffer the gradient of the loss whose derivative with
    /// respect to the last forward output is `d`.
    fn backward(&mut self, d: Array2<f32>) -> Result<()>;
}
