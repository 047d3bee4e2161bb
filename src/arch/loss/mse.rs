use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

/// Mean squared error, averaged over every element of the batch.
#[derive(Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let total = Zip::from(&y_pred)
            .and(&y)
            .fold(0.0, |acc, &p, &y| acc + (p - y).powi(2));

        total / y_pred.len().max(1) as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let scale = 2. / y_pred.len().max(1) as f32;
        Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&p, &y| (p - y) * scale)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::EngineErr;

    #[test]
    fn mean_over_every_element() {
        let mse = Mse;
        let y_pred = array![[1., 2.], [3., 4.]];
        let y = array![[0., 2.], [3., 2.]];

        assert_eq!(mse.loss(y_pred.view(), y.view()), 5. / 4.);
        assert_eq!(
            mse.loss_prime(y_pred.view(), y.view()),
            array![[0.5, 0.], [0., 1.]]
        );
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let y_pred = Array2::<f32>::zeros((2, 1));
        let y = Array2::<f32>::zeros((3, 1));

        assert!(matches!(
            Mse.check(y_pred.view(), y.view()),
            Err(EngineErr::SizeMismatch { got: 3, expected: 2, .. })
        ));
        assert!(Mse.check(y_pred.view(), y_pred.view()).is_ok());
    }
}
