use ndarray::Array2;

use super::{Metric, OutputTransform};
use crate::{arch::loss::LossFn, EngineErr, Result};

/// Average of a loss function over the samples of an epoch, each batch weighted by its size.
pub struct Loss<L, O> {
    loss_fn: L,
    output_transform: OutputTransform<O>,
    sum: f64,
    num_examples: usize,
}

impl<L: LossFn> Loss<L, (Array2<f32>, Array2<f32>)> {
    pub fn new(loss_fn: L) -> Self {
        Self::with_output_transform(loss_fn, |(y_pred, y): &(Array2<f32>, Array2<f32>)| {
            (y_pred.clone(), y.clone())
        })
    }
}

impl<L: LossFn, O> Loss<L, O> {
    pub fn with_output_transform<T>(loss_fn: L, output_transform: T) -> Self
    where
        T: Fn(&O) -> (Array2<f32>, Array2<f32>) + Send + 'static,
    {
        Self {
            loss_fn,
            output_transform: Box::new(output_transform),
            sum: 0.,
            num_examples: 0,
        }
    }
}

impl<L: LossFn, O> Metric<O> for Loss<L, O> {
    fn reset(&mut self) {
        self.sum = 0.;
        self.num_examples = 0;
    }

    fn update(&mut self, output: &O) -> Result<()> {
        let (y_pred, y) = (self.output_transform)(output);
        self.loss_fn.check(y_pred.view(), y.view())?;

        let n = y_pred.nrows();
        self.sum += self.loss_fn.loss(y_pred.view(), y.view()) as f64 * n as f64;
        self.num_examples += n;
        Ok(())
    }

    fn compute(&mut self) -> Result<f64> {
        if self.num_examples == 0 {
            return Err(EngineErr::MetricNotComputable {
                metric: "Loss",
                reason: "it must have at least one example before it can be computed",
            });
        }

        Ok(self.sum / self.num_examples as f64)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::loss::Mse;

    #[test]
    fn weights_batches_by_size() {
        let mut metric = Loss::new(Mse::new());

        metric.update(&(array![[1.]], array![[0.]])).unwrap();
        metric.update(&(array![[0.], [0.], [0.]], array![[0.], [0.], [0.]])).unwrap();

        let loss = metric.compute().unwrap();
        let single = Mse::new().loss(array![[1.]].view(), array![[0.]].view()) as f64;
        assert!((loss - single / 4.).abs() < 1e-9);
    }

    #[test]
    fn empty_loss_is_not_computable() {
        assert!(Loss::new(Mse::new()).compute().is_err());
    }
}
