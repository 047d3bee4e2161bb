//! The event-driven execution engine.

mod data;
#[allow(clippy::module_inception)]
mod engine;
mod events;
mod state;

pub use data::{Batches, DataSource, Stream};
pub use engine::{Context, Engine, ProcessFn, RunOptions};
pub use events::{CallableEvent, Event, EventFilter, EventsList, RemovableEventHandle};
pub use state::{State, StateDict};
