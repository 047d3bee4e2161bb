pub mod arch;
pub mod config;
pub mod data;
pub mod device;
pub mod engine;
mod error;
pub mod metrics;
pub mod optimization;
pub mod precision;
pub mod training;

pub use error::{EngineErr, Result};
