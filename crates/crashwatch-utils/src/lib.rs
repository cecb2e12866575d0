//! # crashwatch utilities
//!
//! Shared helpers for the crashwatch workspace, mainly the `tracing`
//! subscriber setup used by the CLI.
//!
//! `crashwatch-core` only emits events through the `tracing` macros; whether
//! and where they are printed is decided here.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    LogFormat, LogLevel, LoggingConfig, LoggingError, LoggingGuard, dated_log_file, init_logging, init_logging_to_file,
    init_logging_with_level,
};
pub use tracing::{debug, error, info, trace, warn};
