use crate::{EngineErr, Result};

pub trait Optimizer: Send {
    /// Updates `params` in place following the algorithm's learning rule.
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        (**self).step(params, grad)
    }
}

pub(super) fn check_sizes(params: &[f32], grad: &[f32]) -> Result<()> {
    if params.len() != grad.len() {
        return Err(EngineErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
