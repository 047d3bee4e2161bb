//! Metrics accumulated over an epoch and published into the engine's state.

mod average_precision;
mod epoch_metric;
mod loss;

use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, MutexGuard};

pub use average_precision::{average_precision_score, AveragePrecision};
pub use epoch_metric::{ComputeFn, EpochMetric, OutputTransform};
pub use loss::Loss;

use crate::{
    engine::{Context, Engine, Event, RemovableEventHandle},
    Result,
};

/// A value computed from the outputs of an engine's iterations.
pub trait Metric<O> {
    /// Clears the accumulated state, called at the start of every epoch.
    fn reset(&mut self);

    /// Accumulates one iteration's output.
    fn update(&mut self, output: &O) -> Result<()>;

    /// Computes the metric over everything accumulated since the last reset.
    fn compute(&mut self) -> Result<f64>;
}

impl<O, M: Metric<O> + ?Sized> Metric<O> for Box<M> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn update(&mut self, output: &O) -> Result<()> {
        (**self).update(output)
    }

    fn compute(&mut self) -> Result<f64> {
        (**self).compute()
    }
}

/// A type-erased metric, as taken by `create_supervised_evaluator`.
pub type BoxedMetric<O> = Box<dyn Metric<O> + Send>;

/// A metric attached to an engine.
pub struct MetricHandle<M> {
    name: String,
    metric: Arc<Mutex<M>>,
    handles: Vec<RemovableEventHandle>,
}

impl<M> MetricHandle<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locks the attached metric.
    pub fn metric(&self) -> MutexGuard<'_, M> {
        self.metric.lock()
    }

    /// Removes the metric's handlers from `engine`.
    pub fn detach<B, O>(self, engine: &mut Engine<B, O>) -> Result<()> {
        for handle in self.handles {
            engine.remove_event_handler(handle)?;
        }

        Ok(())
    }
}

/// Attaches `metric` to `engine`: it is reset when an epoch starts, updated with every
/// iteration's output and computed into `state.metrics[name]` when the epoch completes.
pub fn attach<M, B, O>(
    metric: M,
    engine: &mut Engine<B, O>,
    name: impl Into<String>,
) -> Result<MetricHandle<M>>
where
    M: Metric<O> + Send + 'static,
    B: 'static,
    O: 'static,
{
    let name = name.into();
    let metric = Arc::new(Mutex::new(metric));

    let m = Arc::clone(&metric);
    let started = engine.add_event_handler(Event::EpochStarted, move |_: &mut Context<O>| {
        m.lock().reset();
        Ok(())
    })?;

    let m = Arc::clone(&metric);
    let iteration = engine.add_event_handler(
        Event::IterationCompleted,
        move |ctx: &mut Context<O>| match ctx.state().output.as_ref() {
            Some(output) => m.lock().update(output),
            None => Ok(()),
        },
    )?;

    let m = Arc::clone(&metric);
    let key = name.clone();
    let completed = engine.add_event_handler(Event::EpochCompleted, move |ctx: &mut Context<O>| {
        let value = m.lock().compute()?;
        debug!(metric = key.as_str(), value = value; "metric computed");
        ctx.state_mut().metrics.insert(key.clone(), value);
        Ok(())
    })?;

    Ok(MetricHandle {
        name,
        metric,
        handles: vec![started, iteration, completed],
    })
}
