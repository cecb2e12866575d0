//! # Logging Utilities
//!
//! `tracing` subscriber setup for crashwatch binaries.
//!
//! Events go to stderr, so the CLI's stdout stays clean for report text and
//! traces. Optionally a copy is written to a log file through a
//! non-blocking `tracing-appender` writer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crashwatch_utils::init_logging;
//!
//! // Keep the guard alive for as long as file logging should keep flushing
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `RUST_LOG=debug`, `RUST_LOG=crashwatch_core=debug`)
//! - `CRASHWATCH_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
//! - `CRASHWATCH_LOG_FILE`: optional log file path; when set, events are also
//!   written there

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "CRASHWATCH_LOG_FORMAT";

/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "CRASHWATCH_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Resolved logging settings
///
/// `level` of `None` means "use `RUST_LOG`, or `info` when it is unset".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingConfig
{
    /// Explicit level; overrides `RUST_LOG` when set
    pub level: Option<LogLevel>,
    /// Output format for every sink
    pub format: LogFormat,
    /// Additional log file
    pub file: Option<PathBuf>,
}

impl LoggingConfig
{
    /// Read `CRASHWATCH_LOG_FORMAT` and `CRASHWATCH_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// Returns `LoggingError::InvalidFormat` for an unrecognized format.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// ## Errors
    ///
    /// Returns `LoggingError::InvalidFormat` for an unrecognized format.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoggingError>
    {
        let format = match lookup(LOG_FORMAT_ENV).filter(|value| !value.trim().is_empty()) {
            Some(value) => value.parse().map_err(LoggingError::InvalidFormat)?,
            None => LogFormat::Pretty,
        };
        let file = lookup(LOG_FILE_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            level: None,
            format,
            file,
        })
    }

    /// Override the level.
    pub fn with_level(mut self, level: LogLevel) -> Self
    {
        self.level = Some(level);
        self
    }

    /// Override the log file.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self
    {
        self.file = Some(file.into());
        self
    }

    /// Install the global subscriber for these settings.
    ///
    /// ## Errors
    ///
    /// Returns an error if a global subscriber is already installed or the
    /// log file's directory cannot be created.
    pub fn init(self) -> Result<LoggingGuard, LoggingError>
    {
        let filter = env_filter(self.level.map(Into::into));
        let mut layers: Vec<BoxedLayer> = vec![stderr_layer(self.format, filter.clone())];

        let mut worker = None;
        if let Some(file) = &self.file {
            let (writer, guard) = file_writer(file)?;
            layers.push(file_layer(self.format, writer, filter));
            worker = Some(guard);
        }

        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

        Ok(LoggingGuard { _worker: worker })
    }
}

/// Keeps the background log file writer alive
///
/// Dropping it flushes and stops file logging. Console logging is unaffected.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _worker: Option<WorkerGuard>,
}

/// Initialize logging from the environment
///
/// ## Example
///
/// ```rust,no_run
/// use crashwatch_utils::init_logging;
///
/// let _guard = init_logging().expect("Failed to initialize logging");
/// tracing::info!("Application started");
/// ```
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `CRASHWATCH_LOG_FORMAT` holds an unknown format
/// - The directory for `CRASHWATCH_LOG_FILE` cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    LoggingConfig::from_env()?.init()
}

/// Initialize logging with an explicit level and format
///
/// `CRASHWATCH_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let mut config = LoggingConfig::from_lookup(|name| {
        if name == LOG_FILE_ENV {
            std::env::var(name).ok()
        } else {
            None
        }
    })?;
    config.format = format;
    config.with_level(level).init()
}

/// Initialize logging to stderr and `log_file`
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the file's directory
/// cannot be created.
pub fn init_logging_to_file(log_file: impl Into<PathBuf>, level: Option<LogLevel>) -> Result<LoggingGuard, LoggingError>
{
    let mut config = LoggingConfig::from_env()?.with_file(log_file);
    config.level = level.or(config.level);
    config.init()
}

/// `<dir>/<YYYY-MM-DD>-<stem>.log` for today (UTC)
///
/// ## Example
///
/// ```rust
/// use crashwatch_utils::dated_log_file;
///
/// let path = dated_log_file("/var/log/myapp", "crashwatch");
/// assert!(path.to_string_lossy().ends_with("-crashwatch.log"));
/// ```
pub fn dated_log_file(dir: impl AsRef<Path>, stem: &str) -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    dir.as_ref().join(format!("{today}-{stem}.log"))
}

/// Filter priority: explicit level, then `RUST_LOG`, then `info`.
fn env_filter(explicit_level: Option<Level>) -> EnvFilter
{
    match explicit_level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn stderr_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(io::stderr().is_terminal())
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, writer: NonBlocking, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false) // No ANSI in files
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_writer(log_file: &Path) -> Result<(NonBlocking, WorkerGuard), LoggingError>
{
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let file_name = log_file.file_name().ok_or_else(|| {
        LoggingError::FileError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("log file path has no file name: {}", log_file.display()),
        ))
    })?;

    // The caller picks the file name, so never roll it over
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a
    {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str(" dev ").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("invalid").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_config_defaults_without_env()
    {
        let config = LoggingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_config_reads_env()
    {
        let vars = [(LOG_FORMAT_ENV, "json"), (LOG_FILE_ENV, "/tmp/crashwatch.log")];
        let config = LoggingConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/crashwatch.log")));
    }

    #[test]
    fn test_config_rejects_unknown_format()
    {
        let vars = [(LOG_FORMAT_ENV, "xml")];
        let err = LoggingConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFormat(_)));
    }

    #[test]
    fn test_empty_values_are_ignored()
    {
        let vars = [(LOG_FORMAT_ENV, " "), (LOG_FILE_ENV, "")];
        let config = LoggingConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.file, None);
    }

    #[test]
    fn test_dated_log_file()
    {
        let path = dated_log_file("/var/log/app", "crashwatch");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(path.starts_with("/var/log/app"));
        assert!(name.ends_with("-crashwatch.log"));
        assert_eq!(name.len(), "YYYY-MM-DD-crashwatch.log".len());
    }

    #[test]
    fn test_file_writer_creates_directory()
    {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("nested/logs/run.log");
        let (_writer, _guard) = file_writer(&log_file).unwrap();
        assert!(dir.path().join("nested/logs").is_dir());
    }
}
