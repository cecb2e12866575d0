//! # Crash manager configuration
//!
//! Where reports go and how deep fatal traces are captured.
//!
//! ## Environment Variables
//!
//! - `CRASHWATCH_DATA_DIR`: private writable data directory
//! - `CRASHWATCH_REPORT_PATH`: report file (relative values resolve under
//!   the data directory)
//!
//! ## Example
//!
//! ```rust,no_run
//! use crashwatch_core::CrashConfig;
//!
//! let config = CrashConfig::from_env().with_report_path("last-crash.txt");
//! assert!(config.resolved_report_path().ends_with("last-crash.txt"));
//! ```

use std::path::{Path, PathBuf};

use crate::error::{CrashError, CrashResult};
use crate::tracer::{StackTracer, DEFAULT_MAX_ENTRIES, MAX_CAPTURE_DEPTH};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CRASHWATCH_DATA_DIR";

/// Environment variable overriding the report path.
pub const REPORT_PATH_ENV: &str = "CRASHWATCH_REPORT_PATH";

/// File name of the report when no path is configured.
pub const DEFAULT_REPORT_FILE_NAME: &str = "crash-report.txt";

/// Settings a [`CrashManager`](crate::CrashManager) is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashConfig
{
    /// Private writable directory that relative report paths resolve under
    pub data_dir: PathBuf,
    /// Report file; may be relative to `data_dir`
    pub report_path: PathBuf,
    /// Frames captured on a fatal event (clamped to [`MAX_CAPTURE_DEPTH`])
    pub max_trace_entries: usize,
}

impl CrashConfig
{
    /// Defaults, without consulting the environment.
    ///
    /// The data directory is `<local data dir>/<process name>`, or
    /// `<temp dir>/<process name>` on platforms without one.
    pub fn new() -> Self
    {
        let process_name = StackTracer::shared().process_name();
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(process_name);

        Self {
            data_dir,
            report_path: PathBuf::from(DEFAULT_REPORT_FILE_NAME),
            max_trace_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Defaults with `CRASHWATCH_DATA_DIR` / `CRASHWATCH_REPORT_PATH` applied.
    pub fn from_env() -> Self
    {
        let mut config = Self::new();
        if let Some(dir) = non_empty_env(DATA_DIR_ENV) {
            config.data_dir = absolutize(PathBuf::from(dir));
        }
        if let Some(path) = non_empty_env(REPORT_PATH_ENV) {
            config.report_path = PathBuf::from(path);
        }
        config
    }

    /// Set the data directory. Relative values are taken from the current
    /// working directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.data_dir = absolutize(dir.into());
        self
    }

    /// Set the report path. Relative values resolve under the data directory.
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.report_path = path.into();
        self
    }

    /// Set how many frames a fatal event captures.
    pub fn with_max_trace_entries(mut self, max_entries: usize) -> Self
    {
        self.max_trace_entries = max_entries;
        self
    }

    /// Frame cap actually used for fatal traces.
    pub fn effective_max_trace_entries(&self) -> usize
    {
        self.max_trace_entries.min(MAX_CAPTURE_DEPTH)
    }

    /// The report path as an absolute path.
    pub fn resolved_report_path(&self) -> PathBuf
    {
        resolve_under(&self.data_dir, &self.report_path)
    }

    /// Check that the data directory is usable as a root for report paths.
    ///
    /// ## Errors
    ///
    /// Returns `CrashError::DataDirUnavailable` if the directory is not
    /// absolute (no working directory could be determined to anchor it).
    pub fn validate(&self) -> CrashResult<()>
    {
        if self.data_dir.as_os_str().is_empty() || !self.data_dir.is_absolute() {
            return Err(CrashError::DataDirUnavailable);
        }
        Ok(())
    }
}

impl Default for CrashConfig
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Join `path` onto `root` unless it is already absolute.
pub(crate) fn resolve_under(root: &Path, path: &Path) -> PathBuf
{
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn absolutize(path: PathBuf) -> PathBuf
{
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn non_empty_env(name: &str) -> Option<String>
{
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
