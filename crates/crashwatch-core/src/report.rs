//! # Crash reports
//!
//! The text artifact written when a fatal event is captured.
//!
//! ## Format
//!
//! ```text
//! Crash report for myapp (pid 4242)
//! Failure: signal 8 (SIGFPE: arithmetic fault)
//! Generated: 2026-03-01T12:00:00.000000Z
//! Context:
//!   session=abc123
//! Stack trace:
//! 3   myapp                            0x000055d0c1a2b3c4 myapp::divide + 20
//! 4   myapp                            0x000055d0c1a2b400 main + 40
//! ```
//!
//! The `Context:` block only appears when the delegate supplied context. The
//! stack trace block is exactly what
//! [`StackTracer::printable_trace`](crate::StackTracer::printable_trace)
//! renders, one frame per line.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::types::{FailureIdentity, StackTraceEntry};

const HEADER_PREFIX: &str = "Crash report for ";
const FAILURE_PREFIX: &str = "Failure: ";
const GENERATED_PREFIX: &str = "Generated: ";
const CONTEXT_HEADER: &str = "Context:";
const TRACE_HEADER: &str = "Stack trace:";
const CONTEXT_INDENT: &str = "  ";

/// A crash report, either about to be written or read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport
{
    /// Name of the process that crashed
    pub process_name: String,
    /// Its process id
    pub pid: u32,
    /// Rendered failure identity
    pub failure: String,
    /// When the report was generated
    pub generated: DateTime<Utc>,
    /// Delegate-supplied context lines
    pub context: Vec<String>,
    /// Rendered frame lines, capture point first
    pub frames: Vec<String>,
}

impl CrashReport
{
    /// Build a report for `identity` from an already filtered trace.
    pub fn new(process_name: &str, identity: &FailureIdentity, trace: &[StackTraceEntry], context: Option<&str>) -> Self
    {
        Self {
            process_name: process_name.to_string(),
            pid: std::process::id(),
            failure: identity.to_string(),
            generated: Utc::now().trunc_subsecs(6),
            context: context.map(|text| text.lines().map(str::to_string).collect()).unwrap_or_default(),
            frames: trace.iter().map(ToString::to_string).collect(),
        }
    }

    /// Render the report text.
    pub fn render(&self) -> String
    {
        let mut text = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(text, "{HEADER_PREFIX}{} (pid {})", self.process_name, self.pid);
        let _ = writeln!(text, "{FAILURE_PREFIX}{}", self.failure);
        let _ = writeln!(
            text,
            "{GENERATED_PREFIX}{}",
            self.generated.to_rfc3339_opts(SecondsFormat::Micros, true)
        );
        if !self.context.is_empty() {
            let _ = writeln!(text, "{CONTEXT_HEADER}");
            for line in &self.context {
                let _ = writeln!(text, "{CONTEXT_INDENT}{line}");
            }
        }
        let _ = writeln!(text, "{TRACE_HEADER}");
        for frame in &self.frames {
            let _ = writeln!(text, "{frame}");
        }
        text
    }

    /// Read a report back from its rendered text.
    ///
    /// Returns `None` if the header, failure or generation line is missing or
    /// malformed. Frame lines are kept verbatim.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use crashwatch_core::CrashReport;
    ///
    /// let text = "Crash report for app (pid 7)\n\
    ///             Failure: signal 8 (SIGFPE: arithmetic fault)\n\
    ///             Generated: 2026-03-01T12:00:00Z\n\
    ///             Stack trace:\n\
    ///             0   app   0x10 main + 4\n";
    /// let report = CrashReport::parse(text).unwrap();
    /// assert_eq!(report.pid, 7);
    /// assert_eq!(report.frames.len(), 1);
    /// ```
    pub fn parse(text: &str) -> Option<Self>
    {
        let mut lines = text.lines();

        let header = lines.next()?.strip_prefix(HEADER_PREFIX)?;
        let (process_name, pid) = header.rsplit_once(" (pid ")?;
        let pid = pid.strip_suffix(')')?.parse().ok()?;

        let failure = lines.next()?.strip_prefix(FAILURE_PREFIX)?.to_string();
        let generated = DateTime::parse_from_rfc3339(lines.next()?.strip_prefix(GENERATED_PREFIX)?)
            .ok()?
            .with_timezone(&Utc);

        let mut context = Vec::new();
        let mut line = lines.next()?;
        if line == CONTEXT_HEADER {
            loop {
                line = lines.next()?;
                match line.strip_prefix(CONTEXT_INDENT) {
                    Some(entry) => context.push(entry.to_string()),
                    None => break,
                }
            }
        }
        if line != TRACE_HEADER {
            return None;
        }

        let frames = lines.filter(|line| !line.trim().is_empty()).map(str::to_string).collect();

        Some(Self {
            process_name: process_name.to_string(),
            pid,
            failure,
            generated,
            context,
            frames,
        })
    }

    /// Parse the frame lines back into entries.
    pub fn entries(&self) -> Vec<StackTraceEntry>
    {
        self.frames
            .iter()
            .enumerate()
            .map(|(position, line)| StackTraceEntry::from_trace_line_at(u32::try_from(position).unwrap_or(u32::MAX), line))
            .collect()
    }
}
