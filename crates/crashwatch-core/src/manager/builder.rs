//! # Crash Manager Builder
//!
//! Fluent configuration for a [`CrashManager`] that does not use the
//! process-wide defaults: a different data directory, a custom report store,
//! or a replayed stack source.

use std::path::PathBuf;

use super::CrashManager;
use crate::config::CrashConfig;
use crate::error::CrashResult;
use crate::store::{FileReportStore, ReportStore};
use crate::tracer::{StackSource, StackTracer};

/// Builder for [`CrashManager`].
///
/// ## Example
///
/// ```rust,no_run
/// use crashwatch_core::CrashManager;
///
/// let manager: &'static CrashManager = Box::leak(Box::new(
///     CrashManager::builder()
///         .with_data_dir("/var/lib/myapp")
///         .with_report_path("last-crash.txt")
///         .with_max_trace_entries(64)
///         .build()?,
/// ));
/// manager.manage_crashes()?;
/// # Ok::<(), crashwatch_core::CrashError>(())
/// ```
pub struct CrashManagerBuilder
{
    config: CrashConfig,
    tracer: Option<StackTracer>,
    store: Option<Box<dyn ReportStore>>,
}

impl std::fmt::Debug for CrashManagerBuilder
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("CrashManagerBuilder")
            .field("config", &self.config)
            .field("tracer", &self.tracer)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl CrashManagerBuilder
{
    /// Start from [`CrashConfig::from_env`].
    pub fn new() -> Self
    {
        Self::from_config(CrashConfig::from_env())
    }

    /// Start from an explicit configuration.
    pub fn from_config(config: CrashConfig) -> Self
    {
        Self {
            config,
            tracer: None,
            store: None,
        }
    }

    /// Set the private data directory.
    ///
    /// Relative values are taken from the current working directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.config = self.config.with_data_dir(dir);
        self
    }

    /// Set the report path. Relative values resolve under the data directory.
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.config = self.config.with_report_path(path);
        self
    }

    /// Set how many frames a fatal event captures.
    pub fn with_max_trace_entries(mut self, max_entries: usize) -> Self
    {
        self.config = self.config.with_max_trace_entries(max_entries);
        self
    }

    /// Use a custom tracer.
    pub fn with_tracer(mut self, tracer: StackTracer) -> Self
    {
        self.tracer = Some(tracer);
        self
    }

    /// Use a tracer over a custom stack source.
    pub fn with_stack_source(self, source: impl StackSource + 'static) -> Self
    {
        self.with_tracer(StackTracer::with_source(source))
    }

    /// Persist reports through a custom store.
    pub fn with_report_store(mut self, store: impl ReportStore + 'static) -> Self
    {
        self.store = Some(Box::new(store));
        self
    }

    /// Build the manager.
    ///
    /// ## Errors
    ///
    /// Returns `CrashError::DataDirUnavailable` if the data directory is not
    /// an absolute path.
    pub fn build(self) -> CrashResult<CrashManager>
    {
        self.config.validate()?;
        Ok(CrashManager::from_parts(
            self.config,
            self.tracer.unwrap_or_default(),
            self.store.unwrap_or_else(|| Box::new(FileReportStore)),
        ))
    }
}

impl Default for CrashManagerBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}
