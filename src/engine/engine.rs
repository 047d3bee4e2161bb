use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::Rng;

use super::{DataSource, Event, EventsList, RemovableEventHandle, State, StateDict};
use crate::{EngineErr, Result};

/// The function run on every batch; its result becomes `state.output`.
pub type ProcessFn<B, O> = Box<dyn FnMut(&mut Context<O>, B) -> Result<O> + Send>;

type Handler<O> = Arc<Mutex<dyn FnMut(&mut Context<O>) -> Result<()> + Send>>;

/// What handlers and process functions get to see and steer while an engine runs.
pub struct Context<O> {
    state: State<O>,
    should_terminate: bool,
    should_terminate_single_epoch: bool,
    exception: Option<EngineErr>,
}

impl<O> Context<O> {
    fn new() -> Self {
        Self {
            state: State::default(),
            should_terminate: false,
            should_terminate_single_epoch: false,
            exception: None,
        }
    }

    pub fn state(&self) -> &State<O> {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State<O> {
        &mut self.state
    }

    /// Stops the run once the current iteration is finished.
    pub fn terminate(&mut self) {
        info!("Terminate signaled. Engine will stop after current iteration is finished.");
        self.should_terminate = true;
    }

    /// Skips the rest of the current epoch once the current iteration is finished.
    pub fn terminate_epoch(&mut self) {
        info!("Terminate current epoch is signaled. Current epoch iteration will stop after current iteration is finished.");
        self.should_terminate_single_epoch = true;
    }

    pub fn should_terminate(&self) -> bool {
        self.should_terminate
    }

    /// The error that made the run fail, available to `Event::ExceptionRaised` handlers.
    pub fn exception(&self) -> Option<&EngineErr> {
        self.exception.as_ref()
    }
}

/// Arguments of `Engine::run`. Unset values fall back to the state or to defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub max_epochs: Option<usize>,
    pub epoch_length: Option<usize>,
    pub seed: Option<u64>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = Some(max_epochs);
        self
    }

    pub fn epoch_length(mut self, epoch_length: usize) -> Self {
        self.epoch_length = Some(epoch_length);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

struct Registration<O> {
    id: usize,
    event: super::CallableEvent,
    handler: Handler<O>,
}

/// Runs a process function over the batches of a `DataSource` for a number of epochs, firing
/// `Event`s to the registered handlers along the way.
///
/// A run that is terminated early can be resumed by calling `run` again; a run that reached its
/// budget starts over.
pub struct Engine<B, O> {
    process_fn: ProcessFn<B, O>,
    handlers: Vec<Registration<O>>,
    ctx: Context<O>,
    next_id: usize,
    deterministic: bool,
    needs_reset: bool,
    init_iter: Option<usize>,
}

impl<B, O> Engine<B, O> {
    /// Creates a new `Engine`.
    ///
    /// # Arguments
    /// * `process_fn` - The function applied to every batch.
    ///
    /// # Returns
    /// A new `Engine` instance.
    pub fn new<F>(process_fn: F) -> Self
    where
        F: FnMut(&mut Context<O>, B) -> Result<O> + Send + 'static,
    {
        Self {
            process_fn: Box::new(process_fn),
            handlers: Vec::new(),
            ctx: Context::new(),
            next_id: 0,
            deterministic: false,
            needs_reset: true,
            init_iter: None,
        }
    }

    /// Creates a new `Engine` whose batch order only depends on the run's seed.
    ///
    /// Before every fresh pass the data source is reseeded with `seed + epoch_index`, and a
    /// run resumed in the middle of an epoch skips the batches that epoch already consumed.
    pub fn deterministic<F>(process_fn: F) -> Self
    where
        F: FnMut(&mut Context<O>, B) -> Result<O> + Send + 'static,
    {
        Self {
            deterministic: true,
            ..Self::new(process_fn)
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn state(&self) -> &State<O> {
        &self.ctx.state
    }

    pub fn state_mut(&mut self) -> &mut State<O> {
        &mut self.ctx.state
    }

    pub fn terminate(&mut self) {
        self.ctx.terminate();
    }

    pub fn terminate_epoch(&mut self) {
        self.ctx.terminate_epoch();
    }

    /// Registers `handler` to run every time one of `events` fires.
    ///
    /// # Arguments
    /// * `events` - An event, a filtered event or a list of them joined with `|`.
    /// * `handler` - The function to call.
    ///
    /// # Returns
    /// A handle for removing the handler, or an error if a filter is invalid.
    pub fn add_event_handler<E, H>(
        &mut self,
        events: E,
        handler: H,
    ) -> Result<RemovableEventHandle>
    where
        E: Into<EventsList>,
        H: FnMut(&mut Context<O>) -> Result<()> + Send + 'static,
    {
        let events = events.into();
        for event in events.iter() {
            event.validate()?;
        }

        let handler: Handler<O> = Arc::new(Mutex::new(handler));
        let mut ids = Vec::with_capacity(events.len());

        for event in events.iter() {
            let id = self.next_id;
            self.next_id += 1;

            debug!(event = event.event().name(), id = id; "added event handler");
            self.handlers.push(Registration {
                id,
                event: event.clone(),
                handler: Arc::clone(&handler),
            });
            ids.push(id);
        }

        Ok(RemovableEventHandle { ids })
    }

    /// Unregisters every handler registration behind `handle`.
    ///
    /// Nothing is removed if any of them is no longer registered.
    pub fn remove_event_handler(&mut self, handle: RemovableEventHandle) -> Result<()> {
        if let Some(&id) = handle
            .ids
            .iter()
            .find(|&&id| !self.handlers.iter().any(|reg| reg.id == id))
        {
            return Err(EngineErr::UnknownHandler(id));
        }

        self.handlers.retain(|reg| !handle.ids.contains(&reg.id));
        Ok(())
    }

    pub fn has_event_handler(&self, event: Event) -> bool {
        self.handlers.iter().any(|reg| reg.event.event() == event)
    }

    /// Runs, in registration order, the handlers whose filter accepts `event`'s current count.
    pub fn fire_event(&mut self, event: Event) -> Result<()> {
        let count = event.count(&self.ctx.state);

        for reg in &self.handlers {
            if !reg.event.matches(event, count) {
                continue;
            }

            let mut handler = reg.handler.lock();
            (&mut *handler)(&mut self.ctx)?;
        }

        Ok(())
    }

    /// Runs the engine over `data`.
    ///
    /// # Arguments
    /// * `data` - The source of batches.
    /// * `opts` - Epoch budget, epoch length and seed of the run.
    ///
    /// # Returns
    /// The state after the run, or the error that stopped it if no `Event::ExceptionRaised`
    /// handler took care of it.
    pub fn run<D>(&mut self, data: &mut D, opts: RunOptions) -> Result<&State<O>>
    where
        D: DataSource<Batch = B>,
    {
        self.setup_state(data, opts)?;
        self.needs_reset = true;
        self.ctx.exception = None;

        if let Err(e) = self.internal_run(data) {
            self.needs_reset = true;
            error!("Engine run is terminating due to exception: {e}");
            self.handle_exception(e)?;
        }

        Ok(&self.ctx.state)
    }

    /// Checkpoints the state's counters.
    pub fn state_dict(&self) -> Result<StateDict> {
        let state = &self.ctx.state;
        let (Some(epoch_length), Some(max_epochs)) = (state.epoch_length, state.max_epochs) else {
            return Err(EngineErr::InvalidStateDict(
                "the engine has no epoch length or max epochs yet",
            ));
        };

        Ok(StateDict {
            epoch_length,
            max_epochs,
            iteration: Some(state.iteration),
            epoch: None,
            seed: state.seed,
        })
    }

    /// Restores the counters from a checkpoint; the next `run` resumes from there.
    pub fn load_state_dict(&mut self, dict: &StateDict) -> Result<()> {
        let (iteration, epoch) = dict.counters()?;
        let state = &mut self.ctx.state;

        state.iteration = iteration;
        state.epoch = epoch;
        state.epoch_length = Some(dict.epoch_length);
        state.max_epochs = Some(dict.max_epochs);
        state.seed = dict.seed;

        Ok(())
    }

    fn setup_state<D>(&mut self, data: &D, opts: RunOptions) -> Result<()>
    where
        D: DataSource<Batch = B>,
    {
        let state = &mut self.ctx.state;

        if state.max_epochs.is_none() || state.is_done() {
            let max_epochs = opts.max_epochs.unwrap_or(1);
            let epoch_length = match opts.epoch_length.or_else(|| data.len()) {
                Some(0) => return Err(EngineErr::EmptyData),
                len => len,
            };

            state.iteration = 0;
            state.epoch = 0;
            state.max_epochs = Some(max_epochs);
            state.epoch_length = epoch_length;
            state.seed = Some(
                opts.seed
                    .unwrap_or_else(|| rand::rng().random_range(0..100_000_000)),
            );
            self.init_iter = None;

            info!("Engine run starting with max_epochs={max_epochs}.");
            return Ok(());
        }

        if let Some(max_epochs) = opts.max_epochs {
            if max_epochs < state.epoch {
                return Err(EngineErr::MaxEpochsBelowStart {
                    max_epochs,
                    epoch: state.epoch,
                });
            }

            state.max_epochs = Some(max_epochs);
        }

        match (opts.epoch_length, state.epoch_length) {
            (Some(got), Some(expected)) if got != expected => {
                return Err(EngineErr::EpochLengthMismatch { got, expected });
            }
            (Some(got), None) => state.epoch_length = Some(got),
            _ => {}
        }

        // Without a known length the interrupted first pass is replayed to measure it.
        let init_iter = match state.epoch_length {
            Some(len) => {
                state.epoch = state.iteration / len;
                state.iteration % len
            }
            None => {
                state.epoch = state.epoch.saturating_sub(1);
                state.iteration
            }
        };
        self.init_iter = Some(init_iter);

        info!(
            "Engine run resuming from iteration {}, epoch {} until {} epochs",
            state.iteration,
            state.epoch,
            state.max_epochs.unwrap_or_default()
        );

        Ok(())
    }

    fn internal_run<D>(&mut self, data: &mut D) -> Result<()>
    where
        D: DataSource<Batch = B>,
    {
        self.ctx.should_terminate = false;
        self.ctx.should_terminate_single_epoch = false;

        let start = Instant::now();
        self.fire_event(Event::Started)?;

        while !self.ctx.state.is_done() && !self.ctx.should_terminate {
            self.ctx.state.epoch += 1;
            self.fire_event(Event::EpochStarted)?;

            let epoch_start = Instant::now();
            self.run_once_on_dataset(data)?;

            if self.ctx.should_terminate {
                self.fire_event(Event::Terminate)?;
            } else {
                self.fire_event(Event::EpochCompleted)?;
                if self.ctx.should_terminate {
                    self.fire_event(Event::Terminate)?;
                }
            }

            let taken = epoch_start.elapsed();
            self.ctx.state.times.insert(Event::EpochCompleted, taken);
            info!(
                "Epoch[{}] Complete. Time taken: {}",
                self.ctx.state.epoch,
                hms(taken)
            );
        }

        let taken = start.elapsed();
        self.ctx.state.times.insert(Event::Completed, taken);
        self.fire_event(Event::Completed)?;
        info!("Engine run complete. Time taken: {}", hms(taken));

        Ok(())
    }

    fn run_once_on_dataset<D>(&mut self, data: &mut D) -> Result<()>
    where
        D: DataSource<Batch = B>,
    {
        let mut iter_counter = self.init_iter.take().unwrap_or(0);

        if self.needs_reset {
            let skip = if self.deterministic || self.ctx.state.epoch_length.is_none() {
                iter_counter
            } else {
                0
            };
            self.setup_data(data, skip);
        }

        let mut should_exit = false;

        loop {
            self.fire_event(Event::GetBatchStarted)?;

            let Some(batch) = data.next_batch() else {
                if self.ctx.state.epoch_length.is_none() {
                    if iter_counter == 0 {
                        return Err(EngineErr::EmptyData);
                    }

                    debug!("epoch length set to {iter_counter} after the first pass");
                    self.ctx.state.epoch_length = Some(iter_counter);
                    self.needs_reset = true;
                    break;
                }

                if should_exit {
                    warn!(
                        "Data iterator can not provide data anymore but required total number of iterations to run is not reached. Current iteration: {}",
                        self.ctx.state.iteration
                    );
                    self.ctx.should_terminate = true;
                    break;
                }

                self.fire_event(Event::DataloaderStopIteration)?;
                self.setup_data(data, 0);
                should_exit = true;
                continue;
            };

            self.fire_event(Event::GetBatchCompleted)?;
            iter_counter += 1;
            should_exit = false;

            self.ctx.state.iteration += 1;
            self.fire_event(Event::IterationStarted)?;

            let output = (self.process_fn)(&mut self.ctx, batch)?;
            self.ctx.state.output = Some(output);
            self.fire_event(Event::IterationCompleted)?;

            if self.ctx.should_terminate || self.ctx.should_terminate_single_epoch {
                self.fire_event(Event::TerminateSingleEpoch)?;
                self.ctx.should_terminate_single_epoch = false;
                self.needs_reset = true;
                break;
            }

            if self.ctx.state.epoch_length == Some(iter_counter) {
                break;
            }
        }

        Ok(())
    }

    fn setup_data<D>(&mut self, data: &mut D, skip: usize)
    where
        D: DataSource<Batch = B>,
    {
        if self.deterministic {
            let state = &self.ctx.state;
            let epoch_index = match state.epoch_length {
                Some(len) => state.iteration / len,
                None => state.epoch.saturating_sub(1),
            };
            let seed = state.seed.unwrap_or_default().wrapping_add(epoch_index as u64);

            debug!(seed = seed, skip = skip; "reseeding data source");
            data.reseed(seed);
        }

        data.reset();
        for _ in 0..skip {
            if data.next_batch().is_none() {
                break;
            }
        }

        self.needs_reset = false;
    }

    fn handle_exception(&mut self, err: EngineErr) -> Result<()> {
        if !self.has_event_handler(Event::ExceptionRaised) {
            return Err(err);
        }

        self.ctx.exception = Some(err);
        self.fire_event(Event::ExceptionRaised)
    }
}

fn hms(taken: Duration) -> String {
    let secs = taken.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
