mod crash;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use crashwatch_core::{CrashConfig, CrashManager, CrashManagerBuilder, CrashReport, CrashResult, StackTracer};
use crashwatch_utils::{LogLevel, LoggingConfig, debug, info};

use crate::crash::CrashKind;

/// Inspect crash reports, print live stack traces, and trigger sample crashes.
#[derive(Parser, Debug)]
#[command(name = "crashwatch")]
#[command(version)]
#[command(about = "Inspect crash reports, print live stack traces, and trigger sample crashes", long_about = None)]
struct Cli
{
    /// Crash report file (relative paths resolve under the data directory)
    #[arg(long, global = true)]
    report: Option<PathBuf>,
    /// Private data directory for crash reports
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print the persisted crash report
    Show
    {
        /// Print only the failure, timestamp and a condensed trace
        #[arg(long, default_value_t = false)]
        summary: bool,
    },
    /// Print the crash report path
    Path,
    /// Exit with status 0 if a crash report exists, 1 otherwise
    Present,
    /// Delete the persisted crash report
    Delete,
    /// Print the stack trace of this process
    Trace
    {
        /// Maximum number of entries to capture
        #[arg(short, long, default_value_t = crashwatch_core::tracer::DEFAULT_MAX_ENTRIES)]
        max: usize,
        /// Print one space-separated line of symbol names
        #[arg(long, default_value_t = false)]
        condensed: bool,
        /// Drop the tracer's own frames from the top of the trace
        #[arg(long, default_value_t = false)]
        intelligent: bool,
    },
    /// Install the crash handlers and crash on purpose
    Crash
    {
        /// What kind of failure to trigger
        #[arg(value_enum)]
        kind: CrashKind,
    },
}

fn main() -> ExitCode
{
    let cli = Cli::parse();

    let logging = LoggingConfig::from_env().map(|config| match cli.log_level {
        Some(level) => config.with_level(level),
        None => config,
    });
    let _guard = match logging.and_then(LoggingConfig::init) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: Cli) -> CrashResult<ExitCode>
{
    let manager = build_manager(&cli)?;

    match cli.command {
        Commands::Show { summary } => {
            let Some(report) = manager.error_report() else {
                eprintln!("No crash report at {}", manager.error_report_path().display());
                return Ok(ExitCode::FAILURE);
            };
            if summary {
                print_summary(manager, &report);
            } else {
                print!("{report}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Path => {
            println!("{}", manager.error_report_path().display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Present => {
            if manager.error_report_present() {
                println!("{}", manager.error_report_path().display());
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Delete => {
            manager.delete_error_report()?;
            println!("Deleted {}", manager.error_report_path().display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Trace {
            max,
            condensed,
            intelligent,
        } => {
            let tracer = StackTracer::shared();
            let mut trace = tracer.generate_trace_with_max(max);
            if intelligent {
                trace = tracer.intelligent_trace(&trace);
            }
            if condensed {
                println!("{}", tracer.condensed_printable_trace(&trace));
            } else {
                print!("{}", tracer.printable_trace(&trace));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Crash { kind } => {
            manager.manage_crashes()?;
            info!(kind = ?kind, "Triggering sample crash");
            eprintln!("Crash report will be written to {}", manager.error_report_path().display());
            crash::trigger(kind);
            // Only reached if the platform did not deliver the fault
            manager.stop_managing_crashes()?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Build the manager for this invocation; the handlers need it for the
/// remaining life of the process.
fn build_manager(cli: &Cli) -> CrashResult<&'static CrashManager>
{
    let mut config = CrashConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(report) = &cli.report {
        config = config.with_report_path(report);
    }
    debug!(data_dir = %config.data_dir.display(), "Crash manager configured");

    let manager = CrashManagerBuilder::from_config(config).build()?;
    Ok(Box::leak(Box::new(manager)))
}

fn print_summary(manager: &CrashManager, report: &str)
{
    let Some(parsed) = CrashReport::parse(report) else {
        // Not in the expected layout; show it as is
        print!("{report}");
        return;
    };

    println!("Process:   {} (pid {})", parsed.process_name, parsed.pid);
    println!("Failure:   {}", parsed.failure);
    println!("Generated: {}", parsed.generated.to_rfc3339());
    println!("Frames:    {}", parsed.frames.len());
    println!("Trace:     {}", manager.tracer().condensed_printable_trace(&parsed.entries()));
}
