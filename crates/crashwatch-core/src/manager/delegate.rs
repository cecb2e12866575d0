//! Crash notification callback.

use crate::types::{FailureIdentity, StackTraceEntry};

/// Receiver for crash notifications
///
/// Register one with [`CrashManager::set_crash_delegate`](super::CrashManager::set_crash_delegate).
/// The manager holds only a `Weak` reference, so a delegate that has been
/// dropped is silently skipped.
///
/// Both methods run on the faulting thread, synchronously, before the
/// process is allowed to terminate. Keep them short. A delegate that
/// faults or panics while handling a crash is not recovered from.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use crashwatch_core::{CrashDelegate, FailureIdentity, StackTraceEntry};
///
/// struct Uploader;
///
/// impl CrashDelegate for Uploader
/// {
///     fn crash_occurred(&self, identity: &FailureIdentity, trace: &[StackTraceEntry])
///     {
///         eprintln!("{identity}: {} frames", trace.len());
///     }
///
///     fn report_context(&self) -> Option<String>
///     {
///         Some("build=1.2.3".to_string())
///     }
/// }
///
/// let delegate: Arc<dyn CrashDelegate> = Arc::new(Uploader);
/// crashwatch_core::CrashManager::shared().set_crash_delegate(Some(Arc::downgrade(&delegate)));
/// ```
pub trait CrashDelegate: Send + Sync
{
    /// A fatal event was recorded.
    ///
    /// `trace` is the intelligent trace (capture machinery removed), as
    /// parsed entries rather than rendered text. It is called after the
    /// report has been written, or after the write failed.
    fn crash_occurred(&self, identity: &FailureIdentity, trace: &[StackTraceEntry]);

    /// Extra context lines to include in the report.
    fn report_context(&self) -> Option<String>
    {
        None
    }
}
