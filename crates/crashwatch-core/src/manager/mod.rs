//! # Crash manager
//!
//! Owns the crash report and the lifecycle of the process-wide handlers.
//!
//! ## State
//!
//! A manager is either idle (no handlers installed) or managing. Both
//! transitions are idempotent: [`CrashManager::manage_crashes`] on a managing
//! manager and [`CrashManager::stop_managing_crashes`] on an idle one do
//! nothing.
//!
//! ## Fatal event sequence
//!
//! 1. The handler captures raw frames (signal-safe) and the failure identity
//! 2. Frames are symbolized, the intelligent trace is taken and rendered
//! 3. The report replaces whatever is at [`CrashManager::error_report_path`]
//! 4. The delegate, if any, is called with the identity and parsed trace
//! 5. The previous handler takes over and the process terminates as it
//!    would have without the manager
//!
//! Nothing in this sequence propagates an error or logs.

mod builder;
mod delegate;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, TryLockError, Weak};

pub use builder::CrashManagerBuilder;
pub use delegate::CrashDelegate;
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::config::{resolve_under, CrashConfig};
use crate::error::{CrashError, CrashResult};
use crate::handler;
use crate::report::CrashReport;
use crate::store::{FileReportStore, ReportStore};
use crate::tracer::StackTracer;
use crate::types::{FailureIdentity, StackTraceEntry};

static SHARED: Lazy<CrashManager> = Lazy::new(|| {
    CrashManager::from_parts(CrashConfig::from_env(), StackTracer::new(), Box::new(FileReportStore))
});

/// Installs crash handlers and manages the persisted crash report
///
/// Most applications use the process-wide [`CrashManager::shared`] instance.
/// Tests and embedders that need a fake store or stack source build their
/// own with [`CrashManager::builder`] and leak it to get the `'static`
/// lifetime the handlers require.
///
/// ## Example
///
/// ```rust,no_run
/// use crashwatch_core::CrashManager;
///
/// let manager = CrashManager::shared();
/// if let Some(report) = manager.error_report() {
///     eprintln!("previous run crashed:\n{report}");
///     manager.delete_error_report()?;
/// }
/// manager.manage_crashes()?;
/// # Ok::<(), crashwatch_core::CrashError>(())
/// ```
pub struct CrashManager
{
    tracer: StackTracer,
    store: Box<dyn ReportStore>,
    data_dir: PathBuf,
    report_path: RwLock<PathBuf>,
    delegate: RwLock<Option<Weak<dyn CrashDelegate>>>,
    max_trace_entries: usize,
    managing: AtomicBool,
}

impl CrashManager
{
    /// Start building a manager.
    pub fn builder() -> CrashManagerBuilder
    {
        CrashManagerBuilder::new()
    }

    /// The process-wide manager, configured from the environment on first use.
    ///
    /// See [`CrashConfig::from_env`].
    pub fn shared() -> &'static CrashManager
    {
        &SHARED
    }

    pub(crate) fn from_parts(config: CrashConfig, tracer: StackTracer, store: Box<dyn ReportStore>) -> Self
    {
        let report_path = config.resolved_report_path();
        let max_trace_entries = config.effective_max_trace_entries();
        Self {
            tracer,
            store,
            data_dir: config.data_dir,
            report_path: RwLock::new(report_path),
            delegate: RwLock::new(None),
            max_trace_entries,
            managing: AtomicBool::new(false),
        }
    }

    /// Install the signal handlers and the panic hook.
    ///
    /// Calling this again while managing is a no-op.
    ///
    /// Every panic is recorded, including panics later caught by
    /// `catch_unwind` and panics that only end a worker thread. The report
    /// file holds the latest one, so a caught panic replaces the report of an
    /// earlier crash that has not been read yet. Read the previous report
    /// before calling this.
    ///
    /// The calling thread gets a dedicated alternate signal stack for stack
    /// faults. A stack fault on another thread is still handed on to the
    /// runtime but is only recorded if that thread's alternate stack is large
    /// enough to symbolize on.
    ///
    /// ## Errors
    ///
    /// - `CrashError::ManagerConflict` if a different manager is managing
    ///   crashes in this process.
    /// - `CrashError::SignalInstall` if a handler could not be installed.
    pub fn manage_crashes(&'static self) -> CrashResult<()>
    {
        if self.is_managing() {
            return Ok(());
        }

        // Resolving the name allocates; do it now rather than mid-crash.
        let process_name = self.tracer.process_name();
        handler::install(self)?;
        self.managing.store(true, Ordering::Release);

        info!(process = process_name, path = %self.error_report_path().display(), "Managing crashes");
        Ok(())
    }

    /// Restore the handlers that were installed before [`manage_crashes`](Self::manage_crashes).
    ///
    /// Calling this while idle is a no-op.
    ///
    /// ## Errors
    ///
    /// Returns `CrashError::SignalInstall` if a previous signal action could
    /// not be restored. The manager is idle afterward either way.
    pub fn stop_managing_crashes(&self) -> CrashResult<()>
    {
        if !self.managing.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = handler::uninstall(self);
        match &result {
            Ok(()) => info!("Stopped managing crashes"),
            Err(err) => warn!(error = %err, "Stopped managing crashes with errors"),
        }
        result
    }

    /// `true` while this manager's handlers are installed.
    pub fn is_managing(&self) -> bool
    {
        self.managing.load(Ordering::Acquire) && handler::is_installed(self)
    }

    /// The tracer used for fatal traces.
    pub fn tracer(&self) -> &StackTracer
    {
        &self.tracer
    }

    /// Private data directory that relative report paths resolve under.
    pub fn data_dir(&self) -> &Path
    {
        &self.data_dir
    }

    /// Absolute path of the crash report.
    pub fn error_report_path(&self) -> PathBuf
    {
        self.report_path.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Change where the crash report is written.
    ///
    /// Relative paths resolve under [`data_dir`](Self::data_dir). An existing
    /// report at the old path is left where it is.
    ///
    /// ## Errors
    ///
    /// Returns `CrashError::InvalidArgument` for an empty path.
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use crashwatch_core::CrashManager;
    ///
    /// let manager = CrashManager::shared();
    /// manager.set_error_report_path("crash.log")?;
    /// assert!(manager.error_report_path().is_absolute());
    /// assert!(manager.error_report_path().ends_with("crash.log"));
    /// # Ok::<(), crashwatch_core::CrashError>(())
    /// ```
    pub fn set_error_report_path(&self, path: impl AsRef<Path>) -> CrashResult<()>
    {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(CrashError::InvalidArgument("report path must not be empty".to_string()));
        }

        let resolved = resolve_under(&self.data_dir, path);
        debug!(path = %resolved.display(), "Crash report path set");
        *self.report_path.write().unwrap_or_else(PoisonError::into_inner) = resolved;
        Ok(())
    }

    /// Contents of the crash report, or `None` if there is none.
    pub fn error_report(&self) -> Option<String>
    {
        let path = self.error_report_path();
        match self.store.read(&path) {
            Ok(report) => Some(report),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "No readable crash report");
                None
            }
        }
    }

    /// `true` if a readable crash report exists.
    pub fn error_report_present(&self) -> bool
    {
        self.store.exists(&self.error_report_path())
    }

    /// The crash report parsed back into its parts.
    pub fn parsed_error_report(&self) -> Option<CrashReport>
    {
        self.error_report().as_deref().and_then(CrashReport::parse)
    }

    /// Remove the crash report. Succeeds when there is none.
    ///
    /// ## Errors
    ///
    /// Returns `CrashError::Io` if the file exists but cannot be removed.
    pub fn delete_error_report(&self) -> CrashResult<()>
    {
        let path = self.error_report_path();
        self.store.remove(&path)?;
        debug!(path = %path.display(), "Crash report deleted");
        Ok(())
    }

    /// Register (or with `None`, clear) the crash delegate.
    pub fn set_crash_delegate(&self, delegate: Option<Weak<dyn CrashDelegate>>)
    {
        *self.delegate.write().unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    /// Record a crash report for `identity` with the current stack, as if a
    /// fatal event had just happened here.
    ///
    /// The delegate is notified the same way as for a real fatal event. This
    /// does not require the manager to be managing crashes.
    ///
    /// ## Errors
    ///
    /// Returns `CrashError::Io` if the report could not be written.
    #[inline(never)]
    pub fn record_crash(&self, identity: &FailureIdentity) -> CrashResult<()>
    {
        let trace = self.tracer.generate_trace_with_max(self.max_trace_entries);
        let path = self.error_report_path();
        let delegate = self.delegate.read().unwrap_or_else(PoisonError::into_inner).clone();

        let result = self.write_report(&path, delegate, identity, &trace);
        match &result {
            Ok(()) => info!(failure = %identity, path = %path.display(), frames = trace.len(), "Crash report recorded"),
            Err(err) => warn!(failure = %identity, path = %path.display(), error = %err, "Crash report not written"),
        }
        result.map_err(CrashError::from)
    }

    /// Capture raw frames for a fatal event. Signal-safe.
    #[inline(never)]
    pub(crate) fn capture_frames(&self, frames: &mut [usize]) -> usize
    {
        let limit = frames.len().min(self.max_trace_entries);
        self.tracer.capture_raw(&mut frames[..limit])
    }

    /// Finish a fatal event from frames captured by a handler.
    ///
    /// Never blocks on the manager's locks; if one is held the step it guards
    /// is skipped.
    pub(crate) fn record_captured(&self, identity: &FailureIdentity, frames: &[usize])
    {
        let trace = self.tracer.symbolicate(frames);
        let delegate = try_read(&self.delegate).flatten();
        if let Some(path) = try_read(&self.report_path) {
            let _ = self.write_report(&path, delegate, identity, &trace);
        } else if let Some(delegate) = delegate.and_then(|weak| weak.upgrade()) {
            delegate.crash_occurred(identity, &self.tracer.intelligent_trace(&trace));
        }
    }

    fn write_report(
        &self,
        path: &Path,
        delegate: Option<Weak<dyn CrashDelegate>>,
        identity: &FailureIdentity,
        trace: &[StackTraceEntry],
    ) -> std::io::Result<()>
    {
        let trace = self.tracer.intelligent_trace(trace);
        let delegate = delegate.and_then(|weak| weak.upgrade());
        let context = delegate.as_ref().and_then(|delegate| delegate.report_context());

        let report = CrashReport::new(self.tracer.process_name(), identity, &trace, context.as_deref());
        let written = self.store.write(path, &report.render());

        if let Some(delegate) = delegate {
            delegate.crash_occurred(identity, &trace);
        }
        written
    }
}

impl std::fmt::Debug for CrashManager
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("CrashManager")
            .field("data_dir", &self.data_dir)
            .field("report_path", &self.error_report_path())
            .field("max_trace_entries", &self.max_trace_entries)
            .field("managing", &self.is_managing())
            .finish_non_exhaustive()
    }
}

fn try_read<T: Clone>(lock: &RwLock<T>) -> Option<T>
{
    match lock.try_read() {
        Ok(guard) => Some(guard.clone()),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().clone()),
        Err(TryLockError::WouldBlock) => None,
    }
}
