use log::warn;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use super::{EpochMetric, Metric};
use crate::{EngineErr, Result};

/// Average precision of the predictions of an epoch, for binary or multilabel targets.
///
/// Predictions are scores (probabilities or confidence values), one column per label; targets
/// must be made of 0s and 1s. Multilabel scores are the unweighted mean over labels.
///
/// Unlike a bare `EpochMetric`, the score isn't tried on the first batch unless
/// `check_compute_fn(true)` is set.
pub struct AveragePrecision<O> {
    inner: EpochMetric<O>,
}

impl AveragePrecision<(Array2<f32>, Array2<f32>)> {
    pub fn new() -> Self {
        Self {
            inner: EpochMetric::new(average_precision_score)
                .named("AveragePrecision")
                .check_compute_fn(false),
        }
    }
}

impl Default for AveragePrecision<(Array2<f32>, Array2<f32>)> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> AveragePrecision<O> {
    /// An `AveragePrecision` over outputs that `output_transform` maps to `(y_pred, y)`.
    pub fn with_output_transform<T>(output_transform: T) -> Self
    where
        T: Fn(&O) -> (Array2<f32>, Array2<f32>) + Send + 'static,
    {
        Self {
            inner: EpochMetric::with_output_transform(average_precision_score, output_transform)
                .named("AveragePrecision")
                .check_compute_fn(false),
        }
    }

    pub fn check_compute_fn(self, check: bool) -> Self {
        Self {
            inner: self.inner.check_compute_fn(check),
        }
    }
}

impl<O> Metric<O> for AveragePrecision<O> {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, output: &O) -> Result<()> {
        self.inner.update(output)
    }

    fn compute(&mut self) -> Result<f64> {
        self.inner.compute()
    }
}

/// Average precision of `y_score` against `y_true`, macro averaged over columns.
///
/// # Arguments
/// * `y_score` - The scores, one sample per row and one label per column.
/// * `y_true` - The 0/1 targets, same shape as `y_score`.
///
/// # Returns
/// The sum over score thresholds of the precision at each threshold weighted by the increase
/// in recall from the previous one.
pub fn average_precision_score(y_score: ArrayView2<f32>, y_true: ArrayView2<f32>) -> Result<f64> {
    if y_score.dim() != y_true.dim() {
        return Err(EngineErr::SizeMismatch {
            what: "targets",
            got: y_true.len(),
            expected: y_score.len(),
        });
    }

    if y_true.iter().any(|&t| t != 0. && t != 1.) {
        return Err(EngineErr::InvalidTargets(
            "AveragePrecision expects y to be comprised of 0's and 1's",
        ));
    }

    let columns = y_score.ncols();
    if columns == 0 {
        return Err(EngineErr::MetricNotComputable {
            metric: "AveragePrecision",
            reason: "there are no labels to score",
        });
    }

    let total: f64 = (0..columns)
        .into_par_iter()
        .map(|c| binary_average_precision(y_score.index_axis(Axis(1), c), y_true.index_axis(Axis(1), c)))
        .sum();

    Ok(total / columns as f64)
}

fn binary_average_precision(y_score: ArrayView1<f32>, y_true: ArrayView1<f32>) -> f64 {
    let positives = y_true.iter().filter(|&&t| t == 1.).count();
    if positives == 0 {
        warn!("No positive class found in y_true, recall is set to one for all thresholds");
        return 0.;
    }

    let n = y_score.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| y_score[b].total_cmp(&y_score[a]));

    let mut true_positives = 0usize;
    let mut prev_recall = 0.;
    let mut ap = 0.;

    for (i, &idx) in order.iter().enumerate() {
        if y_true[idx] == 1. {
            true_positives += 1;
        }

        // Samples with equal scores share a threshold.
        if i + 1 < n && y_score[order[i + 1]] == y_score[idx] {
            continue;
        }

        let precision = true_positives as f64 / (i + 1) as f64;
        let recall = true_positives as f64 / positives as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }

    ap
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn binary_scores() {
        let y_true = array![[0.], [0.], [1.], [1.]];
        let y_score = array![[0.1], [0.4], [0.35], [0.8]];

        let ap = average_precision_score(y_score.view(), y_true.view()).unwrap();
        assert!(close(ap, 0.8333333), "{ap}");
    }

    #[test]
    fn perfect_ranking_scores_one() {
        let y_true = array![[1.], [0.], [1.], [0.]];
        let y_score = array![[0.9], [0.2], [0.8], [0.1]];

        let ap = average_precision_score(y_score.view(), y_true.view()).unwrap();
        assert!(close(ap, 1.));
    }

    #[test]
    fn tied_scores_share_a_threshold() {
        let y_true = array![[1.], [0.], [1.], [0.]];
        let y_score = array![[0.5], [0.5], [0.5], [0.5]];

        let ap = average_precision_score(y_score.view(), y_true.view()).unwrap();
        assert!(close(ap, 0.5));
    }

    #[test]
    fn multilabel_is_macro_averaged() {
        let y_true = array![[0., 1.], [0., 0.], [1., 1.], [1., 0.]];
        let y_score = array![[0.1, 0.9], [0.4, 0.2], [0.35, 0.8], [0.8, 0.1]];

        let ap = average_precision_score(y_score.view(), y_true.view()).unwrap();
        assert!(close(ap, (0.8333333 + 1.) / 2.), "{ap}");
    }

    #[test]
    fn targets_must_be_binary() {
        let y_true = array![[0.], [2.]];
        let y_score = array![[0.1], [0.4]];

        assert!(matches!(
            average_precision_score(y_score.view(), y_true.view()),
            Err(EngineErr::InvalidTargets(_))
        ));
    }

    #[test]
    fn no_positives_scores_zero() {
        let y_true = array![[0.], [0.]];
        let y_score = array![[0.1], [0.4]];

        let ap = average_precision_score(y_score.view(), y_true.view()).unwrap();
        assert_eq!(ap, 0.);
    }

    #[test]
    fn score_is_not_tried_on_the_first_batch_by_default() {
        let metric = AveragePrecision::new();
        assert!(!metric.inner.checks_compute_fn());

        let metric = AveragePrecision::with_output_transform(|out: &(Array2<f32>, Array2<f32>)| {
            out.clone()
        });
        assert!(!metric.inner.checks_compute_fn());
        assert!(metric.check_compute_fn(true).inner.checks_compute_fn());

        assert!(EpochMetric::new(average_precision_score).checks_compute_fn());
    }

    #[test]
    fn metric_over_several_batches() {
        let mut metric = AveragePrecision::new();

        metric.reset();
        metric.update(&(array![[0.1], [0.4]], array![[0.], [0.]])).unwrap();
        metric.update(&(array![[0.35], [0.8]], array![[1.], [1.]])).unwrap();

        assert!(close(metric.compute().unwrap(), 0.8333333));
    }
}
