use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Gradient norm clipping parameters.
///
/// `norm_type` is the `p` of the p-norm, `f32::INFINITY` for the max norm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipGradNorm {
    pub max_norm: f32,
    #[serde(default = "default_norm_type")]
    pub norm_type: f32,
}

fn default_norm_type() -> f32 {
    2.
}

impl ClipGradNorm {
    pub fn new(max_norm: f32) -> Self {
        Self {
            max_norm,
            norm_type: default_norm_type(),
        }
    }

    pub fn with_norm_type(mut self, norm_type: f32) -> Self {
        self.norm_type = norm_type;
        self
    }

    /// Rescales `grad` in place so that its norm is at most `max_norm`.
    ///
    /// # Returns
    /// The norm of the gradient before clipping.
    pub fn apply(&self, grad: &mut [f32]) -> f32 {
        let total_norm = norm(grad, self.norm_type);
        let clip_coef = self.max_norm / (total_norm + 1e-6);

        if clip_coef < 1. {
            grad.par_iter_mut().for_each(|g| *g *= clip_coef);
        }

        total_norm
    }
}

fn norm(grad: &[f32], norm_type: f32) -> f32 {
    if norm_type.is_infinite() {
        return grad.par_iter().map(|g| g.abs()).reduce(|| 0., f32::max);
    }

    grad.par_iter()
        .map(|g| g.abs().powf(norm_type))
        .sum::<f32>()
        .powf(1. / norm_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_to_the_max_norm() {
        let mut grad = [3., 4.];
        let total = ClipGradNorm::new(1.).apply(&mut grad);

        assert!((total - 5.).abs() < 1e-6);
        assert!((grad[0] - 0.6).abs() < 1e-5);
        assert!((grad[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let mut grad = [0.3, 0.4];
        ClipGradNorm::new(1.).apply(&mut grad);

        assert_eq!(grad, [0.3, 0.4]);
    }

    #[test]
    fn infinity_and_l1_norms() {
        let mut grad = [-3., 1.];
        let total = ClipGradNorm::new(1.5)
            .with_norm_type(f32::INFINITY)
            .apply(&mut grad);
        assert_eq!(total, 3.);
        assert!((grad[0] + 1.5).abs() < 1e-5);

        let mut grad = [-3., 1.];
        let total = ClipGradNorm::new(10.).with_norm_type(1.).apply(&mut grad);
        assert!((total - 4.).abs() < 1e-6);
    }
}
