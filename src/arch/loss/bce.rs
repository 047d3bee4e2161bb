use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

const EPS: f32 = 1e-7;

/// Binary cross entropy over probabilities in `(0, 1)`.
#[derive(Default, Clone, Copy)]
pub struct BinaryCrossEntropy;

impl BinaryCrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for BinaryCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let total = Zip::from(&y_pred).and(&y).fold(0.0, |acc, &p, &y| {
            let p = p.clamp(EPS, 1. - EPS);
            acc - (y * p.ln() + (1. - y) * (1. - p).ln())
        });

        total / y_pred.len().max(1) as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.len().max(1) as f32;

        Zip::from(&y_pred).and(&y).map_collect(|&p, &y| {
            let p = p.clamp(EPS, 1. - EPS);
            (p - y) / (p * (1. - p)) / n
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn confident_right_answers_cost_little() {
        let bce = BinaryCrossEntropy;
        let y = array![[1.], [0.]];

        let good = bce.loss(array![[0.99], [0.01]].view(), y.view());
        let bad = bce.loss(array![[0.01], [0.99]].view(), y.view());

        assert!(good < 0.02);
        assert!(bad > 4.);
    }

    #[test]
    fn gradient_points_towards_the_target() {
        let bce = BinaryCrossEntropy;
        let d = bce.loss_prime(array![[0.5], [0.5]].view(), array![[1.], [0.]].view());

        assert!(d[[0, 0]] < 0.);
        assert!(d[[1, 0]] > 0.);
    }
}
