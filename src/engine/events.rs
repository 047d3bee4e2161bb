use std::{fmt, ops::BitOr, sync::Arc};

use super::State;
use crate::{EngineErr, Result};

/// The lifecycle events fired by an `Engine` during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    Started,
    EpochStarted,
    GetBatchStarted,
    GetBatchCompleted,
    IterationStarted,
    IterationCompleted,
    DataloaderStopIteration,
    ExceptionRaised,
    TerminateSingleEpoch,
    Terminate,
    EpochCompleted,
    Completed,
}

impl Event {
    /// Returns the canonical upper snake case name of this event.
    pub fn name(self) -> &'static str {
        match self {
            Event::Started => "STARTED",
            Event::EpochStarted => "EPOCH_STARTED",
            Event::GetBatchStarted => "GET_BATCH_STARTED",
            Event::GetBatchCompleted => "GET_BATCH_COMPLETED",
            Event::IterationStarted => "ITERATION_STARTED",
            Event::IterationCompleted => "ITERATION_COMPLETED",
            Event::DataloaderStopIteration => "DATALOADER_STOP_ITERATION",
            Event::ExceptionRaised => "EXCEPTION_RAISED",
            Event::TerminateSingleEpoch => "TERMINATE_SINGLE_EPOCH",
            Event::Terminate => "TERMINATE",
            Event::EpochCompleted => "EPOCH_COMPLETED",
            Event::Completed => "COMPLETED",
        }
    }

    /// The state counter filters are evaluated against when this event fires.
    ///
    /// # Arguments
    /// * `state` - The engine's state at the moment of firing.
    ///
    /// # Returns
    /// The iteration count for per-iteration events, the epoch count otherwise.
    pub fn count<O>(self, state: &State<O>) -> usize {
        match self {
            Event::GetBatchStarted
            | Event::GetBatchCompleted
            | Event::IterationStarted
            | Event::IterationCompleted
            | Event::DataloaderStopIteration
            | Event::TerminateSingleEpoch => state.iteration,
            _ => state.epoch,
        }
    }

    /// Fires only every `n` counts of this event.
    pub fn every(self, n: usize) -> CallableEvent {
        CallableEvent::new(self, Some(EventFilter::Every(n)))
    }

    /// Fires only when this event's count equals `n`.
    pub fn once(self, n: usize) -> CallableEvent {
        CallableEvent::new(self, Some(EventFilter::Once(n)))
    }

    /// Fires only when `f` accepts this event's count.
    pub fn filter<F>(self, f: F) -> CallableEvent
    where
        F: Fn(usize) -> bool + Send + Sync + 'static,
    {
        CallableEvent::new(self, Some(EventFilter::Custom(Arc::new(f))))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decides whether a handler runs for a given event count.
#[derive(Clone)]
pub enum EventFilter {
    Every(usize),
    Once(usize),
    Custom(Arc<dyn Fn(usize) -> bool + Send + Sync>),
}

impl EventFilter {
    /// Checks that the filter's arguments are usable.
    pub fn validate(&self) -> Result<()> {
        match *self {
            EventFilter::Every(0) => Err(EngineErr::InvalidFilter {
                filter: "every",
                value: 0,
            }),
            EventFilter::Once(0) => Err(EngineErr::InvalidFilter {
                filter: "once",
                value: 0,
            }),
            _ => Ok(()),
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        match self {
            EventFilter::Every(n) => count % n == 0,
            EventFilter::Once(n) => count == *n,
            EventFilter::Custom(f) => f(count),
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::Every(n) => write!(f, "Every({n})"),
            EventFilter::Once(n) => write!(f, "Once({n})"),
            EventFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// An event together with an optional filter.
#[derive(Debug, Clone)]
pub struct CallableEvent {
    event: Event,
    filter: Option<EventFilter>,
}

impl CallableEvent {
    pub fn new(event: Event, filter: Option<EventFilter>) -> Self {
        Self { event, filter }
    }

    pub fn event(&self) -> Event {
        self.event
    }

    /// Whether a handler registered on this callable event must run.
    ///
    /// # Arguments
    /// * `event` - The event being fired.
    /// * `count` - The counter value associated to the fired event.
    pub fn matches(&self, event: Event, count: usize) -> bool {
        if self.event != event {
            return false;
        }

        self.filter.as_ref().is_none_or(|filter| filter.accepts(count))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match &self.filter {
            Some(filter) => filter.validate(),
            None => Ok(()),
        }
    }
}

impl From<Event> for CallableEvent {
    fn from(event: Event) -> Self {
        Self::new(event, None)
    }
}

/// A list of events a single handler is registered on, built with `|`.
#[derive(Debug, Clone, Default)]
pub struct EventsList {
    events: Vec<CallableEvent>,
}

impl EventsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<E: Into<CallableEvent>>(&mut self, event: E) {
        self.events.push(event.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallableEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Event> for EventsList {
    fn from(event: Event) -> Self {
        Self {
            events: vec![event.into()],
        }
    }
}

impl From<CallableEvent> for EventsList {
    fn from(event: CallableEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}

impl<E: Into<CallableEvent>> BitOr<E> for Event {
    type Output = EventsList;

    fn bitor(self, rhs: E) -> EventsList {
        EventsList::from(self) | rhs
    }
}

impl<E: Into<CallableEvent>> BitOr<E> for CallableEvent {
    type Output = EventsList;

    fn bitor(self, rhs: E) -> EventsList {
        EventsList::from(self) | rhs
    }
}

impl<E: Into<CallableEvent>> BitOr<E> for EventsList {
    type Output = EventsList;

    fn bitor(mut self, rhs: E) -> EventsList {
        self.push(rhs);
        self
    }
}

/// Identifies the handler registrations made by a single `add_event_handler` call.
///
/// Hand it back to `Engine::remove_event_handler` to unregister them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovableEventHandle {
    pub(crate) ids: Vec<usize>,
}
