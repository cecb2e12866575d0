//! Common module for library exports

pub use crate::config::CrashConfig;
pub use crate::error::{CrashError, CrashResult};
pub use crate::manager::{CrashDelegate, CrashManager};
pub use crate::tracer::StackTracer;
pub use crate::types::address::Address;
pub use crate::types::{FailureIdentity, FatalSignal, StackTraceEntry};
