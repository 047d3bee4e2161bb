use half::f16;
use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;

use crate::{optimization::Optimizer, Result};

/// Dynamic loss scaling for mixed precision training.
///
/// Loss gradients are multiplied by `scale` so small values survive half precision, gradients
/// are divided back before the optimizer step, and steps whose gradients overflowed are skipped
/// while the scale backs off. After `growth_interval` clean steps the scale grows again.
///
/// A scaled gradient overflows when it is not finite or falls outside the half precision range.
#[derive(Debug, Clone)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: usize,
    growth_tracker: usize,
    found_inf: bool,
    unscaled: bool,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl GradScaler {
    /// Creates a new `GradScaler` starting at a scale of 2^16.
    pub fn new() -> Self {
        Self {
            scale: 65536.,
            growth_factor: 2.,
            backoff_factor: 0.5,
            growth_interval: 2000,
            growth_tracker: 0,
            found_inf: false,
            unscaled: false,
        }
    }

    pub fn with_init_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_growth_factor(mut self, growth_factor: f32) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f32) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_growth_interval(mut self, growth_interval: usize) -> Self {
        self.growth_interval = growth_interval.max(1);
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Whether the last unscaled gradient overflowed.
    pub fn found_inf(&self) -> bool {
        self.found_inf
    }

    /// Scales the derivative of the loss, which scales every gradient computed from it.
    pub fn scale_loss_grad(&self, d: Array2<f32>) -> Array2<f32> {
        d * self.scale
    }

    /// Divides `grad` by the current scale in place, recording whether it overflowed.
    pub fn unscale(&mut self, grad: &mut [f32]) {
        let max = f16::MAX.to_f32();
        let inv = 1. / self.scale;

        self.found_inf = grad.par_iter().any(|g| !g.is_finite() || g.abs() > max);
        grad.par_iter_mut().for_each(|g| *g *= inv);
        self.unscaled = true;
    }

    /// Steps the optimizer unless the gradient overflowed.
    ///
    /// # Returns
    /// Whether the step was taken.
    pub fn step<O>(&mut self, optimizer: &mut O, params: &mut [f32], grad: &mut [f32]) -> Result<bool>
    where
        O: Optimizer + ?Sized,
    {
        if !self.unscaled {
            self.unscale(grad);
        }

        if self.found_inf {
            debug!(scale = self.scale; "gradient overflow, skipping optimizer step");
            return Ok(false);
        }

        optimizer.step(params, grad)?;
        Ok(true)
    }

    /// Adjusts the scale for the next iteration.
    pub fn update(&mut self) {
        if self.found_inf {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker == self.growth_interval {
                let grown = self.scale * self.growth_factor;
                if grown.is_finite() {
                    self.scale = grown;
                } else {
                    warn!(scale = self.scale; "loss scale can't grow any further");
                }
                self.growth_tracker = 0;
            }
        }

        self.found_inf = false;
        self.unscaled = false;
    }
}
