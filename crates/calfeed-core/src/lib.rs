//! Core types shared by the calfeed crates: query time windows and tracing setup.

pub mod time;
pub mod tracing;

pub use time::TimeWindow;
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
