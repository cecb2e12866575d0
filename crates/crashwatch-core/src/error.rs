//! # Error Types
//!
//! General error handling for crash capture.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Only the normal-operation surface returns these errors (installing and
//! removing handlers, deleting a report). Nothing reachable from a fatal
//! handler propagates a `CrashError`: failures there are swallowed so the
//! original fault can finish terminating the process.

use thiserror::Error;

/// Main error type for crash manager operations
///
/// ## Error Categories
///
/// 1. **Installation errors**: SignalInstall, ManagerConflict
/// 2. **Configuration errors**: DataDirUnavailable, InvalidArgument
/// 3. **I/O errors**: Io (report file operations)
#[derive(Error, Debug)]
pub enum CrashError
{
    /// `sigaction()` refused to install or restore a handler
    ///
    /// This happens when:
    /// - The signal number is not valid on this platform
    /// - The process is running under a sandbox that forbids handler changes
    #[error("Failed to install handler for signal {signal} ({name}): errno {errno}")]
    SignalInstall
    {
        /// Raw signal number
        signal: i32,
        /// Symbolic signal name (e.g. `SIGSEGV`)
        name: &'static str,
        /// `errno` reported by `sigaction()`
        errno: i32,
    },

    /// Another `CrashManager` instance already owns the process-wide handlers
    ///
    /// Signal and panic handlers are process-global, so only one manager can
    /// be managing crashes at a time. Stop the active manager first.
    #[error("Another crash manager is already managing crashes in this process")]
    ManagerConflict,

    /// No private writable data directory could be resolved
    ///
    /// Relative report paths are resolved against this directory.
    #[error("No writable data directory available for crash reports")]
    DataDirUnavailable,

    /// Invalid argument passed to a crash manager function
    ///
    /// Examples:
    /// - An empty report path
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (report file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, CrashError>`
///
/// ```rust
/// use crashwatch_core::error::CrashResult;
/// fn foo() -> CrashResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type CrashResult<T> = std::result::Result<T, CrashError>;
