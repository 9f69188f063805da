//! Logging setup.
//!
//! Library code only emits `tracing` events and spans; the binary decides how
//! they are rendered by calling [`init_logging`] once at startup.

mod logging;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER, ENV_LOG, ENV_LOG_FORMAT};
