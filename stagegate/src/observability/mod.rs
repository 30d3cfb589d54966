//! Observability utilities.
//!
//! The engine, coordinator and bus log through `tracing`; this module installs
//! a subscriber. Bus-level observers live in [`crate::bus`].

mod logging;

pub use logging::{env_filter, init_tracing, init_tracing_with_level, LogFormat, DEFAULT_LOG_LEVEL};
