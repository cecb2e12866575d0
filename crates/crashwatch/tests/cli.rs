//! End-to-end tests running the `crashwatch` binary

use std::path::Path;
use std::process::{Command, Output};

use crashwatch_core::{CrashReport, StackTraceEntry};

const BIN: &str = env!("CARGO_BIN_EXE_crashwatch");

fn crashwatch(data_dir: &Path, args: &[&str]) -> Output
{
    Command::new(BIN)
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("CRASHWATCH_REPORT_PATH")
        .env_remove("CRASHWATCH_LOG_FILE")
        .env_remove("CRASHWATCH_LOG_FORMAT")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run crashwatch")
}

fn stdout(output: &Output) -> String
{
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// The recorded trace, parsed back from `show`.
fn reported_trace(data_dir: &Path) -> Vec<StackTraceEntry>
{
    let report = stdout(&crashwatch(data_dir, &["show"]));
    CrashReport::parse(&report).expect("report should parse").entries()
}

/// The trace must start at the failing code, with sane offsets throughout.
fn assert_trace_starts_near(trace: &[StackTraceEntry], function: &str, within: usize)
{
    let first = trace.first().expect("trace should not be empty");
    let name = first.selector_name();
    assert!(
        !name.starts_with("std::panicking::")
            && !name.starts_with("core::panicking::")
            && !name.starts_with("<alloc::boxed::Box<")
            && !name.starts_with("crashwatch_core::"),
        "trace starts in capture machinery: {first}"
    );
    assert!(first.is_resolved(), "trace starts with an unresolved frame: {first}");
    assert!(
        trace.iter().take(within).any(|entry| entry.selector_name().contains(function)),
        "{function} not within the first {within} frames"
    );

    for entry in trace.iter().filter(|entry| entry.is_resolved()) {
        assert!((0..1 << 20).contains(&entry.offset()), "implausible offset in {entry}");
    }
    assert!(first.offset() > 0, "first frame has no offset: {first}");
}

#[test]
fn test_no_report_initially()
{
    let dir = tempfile::tempdir().unwrap();

    let present = crashwatch(dir.path(), &["present"]);
    assert_eq!(present.status.code(), Some(1));

    let show = crashwatch(dir.path(), &["show"]);
    assert_eq!(show.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&show.stderr).contains("No crash report"));
}

#[test]
fn test_path_resolves_relative_report_under_data_dir()
{
    let dir = tempfile::tempdir().unwrap();
    let output = crashwatch(dir.path(), &["--report", "crash.log", "path"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), dir.path().join("crash.log").display().to_string());
}

#[test]
fn test_trace_prints_numbered_lines()
{
    let dir = tempfile::tempdir().unwrap();
    let output = crashwatch(dir.path(), &["trace", "--max", "5"]);
    assert!(output.status.success());

    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert!(!lines.is_empty() && lines.len() <= 5);
    for (position, line) in lines.iter().enumerate() {
        assert!(line.starts_with(&position.to_string()), "unexpected line {line}");
    }
}

#[test]
fn test_intelligent_condensed_trace_skips_tracer_frames()
{
    let dir = tempfile::tempdir().unwrap();
    let output = crashwatch(dir.path(), &["trace", "--intelligent", "--condensed"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(!text.starts_with("backtrace::"));
    assert!(!text.contains("crashwatch_core::tracer::StackTracer::generate_trace"));
}

#[cfg(unix)]
#[test]
fn test_arithmetic_fault_is_recorded_and_still_fatal()
{
    use std::os::unix::process::ExitStatusExt;

    let dir = tempfile::tempdir().unwrap();
    let crash = crashwatch(dir.path(), &["crash", "divide-by-zero"]);
    assert_eq!(crash.status.signal(), Some(libc::SIGFPE));

    let present = crashwatch(dir.path(), &["present"]);
    assert!(present.status.success());

    let show = crashwatch(dir.path(), &["show"]);
    let report = stdout(&show);
    assert!(report.contains(&format!("signal {}", libc::SIGFPE)));
    assert!(report.contains("SIGFPE"));
    assert!(report.contains("Stack trace:"));

    let trace = reported_trace(dir.path());
    assert!(
        trace[0].selector_name().contains("crashwatch::crash::divide_by_zero"),
        "unexpected first frame {}",
        trace[0]
    );
    assert_trace_starts_near(&trace, "crashwatch::crash::divide_by_zero", 1);

    let summary = crashwatch(dir.path(), &["show", "--summary"]);
    assert!(stdout(&summary).contains("Failure:   signal"));

    let delete = crashwatch(dir.path(), &["delete"]);
    assert!(delete.status.success());
    assert_eq!(crashwatch(dir.path(), &["present"]).status.code(), Some(1));
    assert!(crashwatch(dir.path(), &["delete"]).status.success());
}

#[cfg(unix)]
#[test]
fn test_segmentation_fault_records_fault_address()
{
    use std::os::unix::process::ExitStatusExt;

    let dir = tempfile::tempdir().unwrap();
    let crash = crashwatch(dir.path(), &["crash", "dangling-reference"]);
    assert_eq!(crash.status.signal(), Some(libc::SIGSEGV));

    let report = stdout(&crashwatch(dir.path(), &["show"]));
    assert!(report.contains("SIGSEGV"));
    assert!(report.contains(&format!(" at {}", crashwatch_core::types::Address::from(0x10usize))));

    // The faulting store is the volatile write itself or the function doing it
    let trace = reported_trace(dir.path());
    let first = trace[0].selector_name();
    assert!(first.contains("write_volatile") || first.contains("dangling_reference"), "unexpected first frame {}", trace[0]);
    assert_trace_starts_near(&trace, "crashwatch::crash::dangling_reference", 4);
}

#[cfg(unix)]
#[test]
fn test_abort_is_recorded()
{
    use std::os::unix::process::ExitStatusExt;

    let dir = tempfile::tempdir().unwrap();
    let crash = crashwatch(dir.path(), &["crash", "abort"]);
    assert_eq!(crash.status.signal(), Some(libc::SIGABRT));

    let report = stdout(&crashwatch(dir.path(), &["show"]));
    assert!(report.contains("SIGABRT"));
    assert_trace_starts_near(&reported_trace(dir.path()), "crashwatch::crash::abort", 2);
}

#[test]
fn test_panic_is_recorded_and_exit_code_preserved()
{
    let dir = tempfile::tempdir().unwrap();
    let crash = crashwatch(dir.path(), &["crash", "out-of-bounds"]);
    assert_eq!(crash.status.code(), Some(101));
    assert!(String::from_utf8_lossy(&crash.stderr).contains("index out of bounds"));

    let report = stdout(&crashwatch(dir.path(), &["show"]));
    assert!(report.contains("Failure: panic 'index out of bounds"));
    assert!(report.contains("on thread 'main'"));

    // Slice indexing helpers may sit between the panic and the caller
    assert_trace_starts_near(&reported_trace(dir.path()), "crashwatch::crash::out_of_bounds", 6);
}

#[test]
fn test_unimplemented_is_recorded()
{
    let dir = tempfile::tempdir().unwrap();
    let crash = crashwatch(dir.path(), &["crash", "unimplemented"]);
    assert_eq!(crash.status.code(), Some(101));

    let report = stdout(&crashwatch(dir.path(), &["show"]));
    assert!(report.contains("not implemented"));
    assert_trace_starts_near(&reported_trace(dir.path()), "crashwatch::crash::unimplemented_operation", 1);
}
