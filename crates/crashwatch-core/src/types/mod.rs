//! # Types
//!
//! Value types shared by the tracer and the crash manager.

pub mod address;
pub mod entry;
pub mod identity;
pub mod signal;

pub use address::{Address, POINTER_HEX_WIDTH};
pub use entry::{StackTraceEntry, LIBRARY_COLUMN_WIDTH};
pub use identity::FailureIdentity;
pub use signal::FatalSignal;
