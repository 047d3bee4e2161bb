use log::warn;
use ndarray::{Array2, ArrayView2};

use super::Metric;
use crate::{EngineErr, Result};

/// Maps an engine output to `(y_pred, y)`.
pub type OutputTransform<O> = Box<dyn Fn(&O) -> (Array2<f32>, Array2<f32>) + Send>;

/// Computes a value from all the predictions and targets of an epoch.
pub type ComputeFn = Box<dyn Fn(ArrayView2<f32>, ArrayView2<f32>) -> Result<f64> + Send>;

/// Accumulates every prediction and target of an epoch and runs `compute_fn` over all of them
/// when the epoch completes.
///
/// Predictions and targets must have the same shape, one sample per row, and the number of
/// columns can't change within an epoch.
pub struct EpochMetric<O> {
    name: &'static str,
    compute_fn: ComputeFn,
    output_transform: OutputTransform<O>,
    check_compute_fn: bool,
    predictions: Vec<f32>,
    targets: Vec<f32>,
    columns: Option<usize>,
    rows: usize,
}

impl EpochMetric<(Array2<f32>, Array2<f32>)> {
    /// An `EpochMetric` over `(y_pred, y)` outputs.
    pub fn new<F>(compute_fn: F) -> Self
    where
        F: Fn(ArrayView2<f32>, ArrayView2<f32>) -> Result<f64> + Send + 'static,
    {
        Self::with_output_transform(compute_fn, |(y_pred, y): &(Array2<f32>, Array2<f32>)| {
            (y_pred.clone(), y.clone())
        })
    }
}

impl<O> EpochMetric<O> {
    pub fn with_output_transform<F, T>(compute_fn: F, output_transform: T) -> Self
    where
        F: Fn(ArrayView2<f32>, ArrayView2<f32>) -> Result<f64> + Send + 'static,
        T: Fn(&O) -> (Array2<f32>, Array2<f32>) + Send + 'static,
    {
        Self {
            name: "EpochMetric",
            compute_fn: Box::new(compute_fn),
            output_transform: Box::new(output_transform),
            check_compute_fn: true,
            predictions: Vec::new(),
            targets: Vec::new(),
            columns: None,
            rows: 0,
        }
    }

    /// Whether to try `compute_fn` on the first batch and warn if it fails. On by default.
    pub fn check_compute_fn(mut self, check: bool) -> Self {
        self.check_compute_fn = check;
        self
    }

    pub fn checks_compute_fn(&self) -> bool {
        self.check_compute_fn
    }

    pub(crate) fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Number of samples accumulated since the last reset.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    fn check_shape(&self, y_pred: &Array2<f32>, y: &Array2<f32>) -> Result<()> {
        if y_pred.dim() != y.dim() {
            return Err(EngineErr::SizeMismatch {
                what: "targets",
                got: y.len(),
                expected: y_pred.len(),
            });
        }

        match self.columns {
            Some(columns) if columns != y_pred.ncols() => Err(EngineErr::SizeMismatch {
                what: "prediction columns",
                got: y_pred.ncols(),
                expected: columns,
            }),
            _ => Ok(()),
        }
    }
}

impl<O> Metric<O> for EpochMetric<O> {
    fn reset(&mut self) {
        self.predictions.clear();
        self.targets.clear();
        self.columns = None;
        self.rows = 0;
    }

    fn update(&mut self, output: &O) -> Result<()> {
        let (y_pred, y) = (self.output_transform)(output);
        self.check_shape(&y_pred, &y)?;

        if self.rows == 0 && self.check_compute_fn {
            if let Err(e) = (self.compute_fn)(y_pred.view(), y.view()) {
                warn!("Probably, there can be a problem with `compute_fn`: {e}");
            }
        }

        self.predictions.extend(y_pred.iter());
        self.targets.extend(y.iter());
        self.columns = Some(y_pred.ncols());
        self.rows += y_pred.nrows();

        Ok(())
    }

    fn compute(&mut self) -> Result<f64> {
        let Some(columns) = self.columns.filter(|_| self.rows > 0) else {
            return Err(EngineErr::MetricNotComputable {
                metric: self.name,
                reason: "it must have at least one example before it can be computed",
            });
        };

        let shape = (self.rows, columns);
        let y_pred = ArrayView2::from_shape(shape, &self.predictions)
            .map_err(|e| EngineErr::custom(e.to_string()))?;
        let y = ArrayView2::from_shape(shape, &self.targets)
            .map_err(|e| EngineErr::custom(e.to_string()))?;

        (self.compute_fn)(y_pred, y)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn sum_of_products(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f64> {
        Ok((&y_pred * &y).sum() as f64)
    }

    #[test]
    fn accumulates_the_whole_epoch() {
        let mut metric = EpochMetric::new(sum_of_products);

        metric.update(&(array![[1., 2.]], array![[3., 4.]])).unwrap();
        metric.update(&(array![[5., 6.], [7., 8.]], array![[1., 1.], [1., 0.]])).unwrap();

        assert_eq!(metric.len(), 3);
        assert_eq!(metric.compute().unwrap(), 11. + 11. + 7.);

        metric.reset();
        assert!(metric.is_empty());
    }

    #[test]
    fn compute_without_samples_fails() {
        let mut metric = EpochMetric::new(sum_of_products);

        assert!(matches!(
            metric.compute(),
            Err(EngineErr::MetricNotComputable { .. })
        ));
    }

    #[test]
    fn shapes_must_agree() {
        let mut metric = EpochMetric::new(sum_of_products);

        assert!(metric.update(&(array![[1., 2.]], array![[1.]])).is_err());

        metric.update(&(array![[1., 2.]], array![[1., 0.]])).unwrap();
        assert!(metric.update(&(array![[1.]], array![[1.]])).is_err());
    }

    #[test]
    fn custom_output_transform() {
        let mut metric = EpochMetric::with_output_transform(sum_of_products, |out: &(f32, f32)| {
            (array![[out.0]], array![[out.1]])
        })
        .check_compute_fn(false);

        metric.update(&(2., 3.)).unwrap();
        metric.update(&(1., 1.)).unwrap();

        assert_eq!(metric.compute().unwrap(), 7.);
    }
}
