//! Core types: event snapshots, time windows, tracing

pub mod event;
pub mod time;
pub mod tracing;

pub use event::{EventSnapshot, UNTITLED};
pub use time::{TimeWindow, local_midnight, truncate_datetime_to_minute, truncate_to_minute};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
