//! # crashwatch-core
//!
//! In-process crash capture for Rust programs.
//!
//! This crate provides:
//! - Handlers for fatal signals (`SIGILL`, `SIGBUS`, `SIGSEGV`, `SIGFPE`,
//!   `SIGABRT`, `SIGTRAP`) and a panic hook
//! - Stack capture and symbolization into [`StackTraceEntry`] values
//! - "Intelligent" traces that drop the capture machinery's own frames
//! - A persisted plain-text crash report and an optional [`CrashDelegate`]
//!   callback
//!
//! The process still terminates exactly as it would without this crate:
//! handlers record, then hand the failure back to whatever was installed
//! before.
//!
//! ## Why unsafe code is needed
//!
//! Installing signal handlers (`sigaction`), looking up loaded images
//! (`dladdr`) and re-raising signals (`raise`) are libc calls with no safe
//! wrapper. The handler itself runs in async-signal context, which Rust's
//! type system cannot describe. These calls are confined to `handler` and
//! `tracer::source`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use crashwatch_core::CrashManager;
//!
//! let manager = CrashManager::shared();
//! manager.manage_crashes()?;
//! # Ok::<(), crashwatch_core::CrashError>(())
//! ```

#![allow(unsafe_code)] // Required for sigaction, dladdr and raise

pub mod config;
pub mod error;
mod handler;
pub mod manager;
pub mod prelude;
pub mod report;
pub mod store;
pub mod tracer;
pub mod types;

pub use config::CrashConfig;
// Re-export commonly used types
pub use error::{CrashError, CrashResult};
pub use manager::{CrashDelegate, CrashManager, CrashManagerBuilder};
pub use report::CrashReport;
pub use store::{FileReportStore, ReportStore};
pub use tracer::{NativeStackSource, StackSource, StackTracer, SyntheticStackSource};
pub use types::{FailureIdentity, FatalSignal, StackTraceEntry};
