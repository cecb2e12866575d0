//! # Stack tracer
//!
//! Captures the current thread's call stack as [`StackTraceEntry`] values and
//! post-processes traces for display.
//!
//! ## Ordering
//!
//! Entry 0 is always the capture point (the innermost frame). Higher entry
//! numbers walk outward toward the thread's entry point.
//!
//! ## Intelligent traces
//!
//! A trace captured from a signal handler or panic hook starts with frames
//! that belong to the capture machinery itself: the tracer, the handler,
//! the unwinder, the panic runtime, the signal trampoline. An *intelligent*
//! trace drops that leading run so the first entry is the code that actually
//! failed. Only the head of the trace is stripped, and entries keep their
//! original numbers.

mod demangle;
pub mod source;
mod symtab;

use once_cell::sync::{Lazy, OnceCell};
use std::fmt;
use std::path::Path;

pub use source::{format_trace_line, NativeStackSource, StackSource, SyntheticStackSource};

use crate::types::StackTraceEntry;

/// Entry cap used by [`StackTracer::generate_trace`].
pub const DEFAULT_MAX_ENTRIES: usize = 40;

/// Hard upper bound on frames captured in one trace.
///
/// Raw frame buffers are sized to this so capture never allocates.
pub const MAX_CAPTURE_DEPTH: usize = 128;

/// Symbol prefixes that identify capture machinery frames.
pub const CAPTURE_MACHINERY_PREFIXES: &[&str] = &[
    "crashwatch_core::handler::",
    "crashwatch_core::manager::CrashManager::",
    "crashwatch_core::tracer::StackTracer::",
    "<crashwatch_core::tracer::",
    "crashwatch_core::tracer::source::",
    "backtrace::",
    "_Unwind_",
    "std::panicking::",
    "std::panic::",
    "core::panicking::",
    "__rust_",
    "std::sys::backtrace::__rust_end_short_backtrace",
    "std::sys::pal::unix::abort_internal",
    "std::sys::abort_internal",
    "std::process::abort",
];

/// Function whose caller is the kernel's signal return trampoline.
pub const SIGNAL_HANDLER_FUNCTION: &str = "crashwatch_core::handler::on_fatal_signal";

/// Opening of the call shim for a boxed closure, such as an installed panic
/// hook. Matched together with [`BOXED_FN_CALL_TRAIT`], since the generic
/// parameters in between depend on how the symbol was mangled.
pub const BOXED_FN_CALL_PREFIX: &str = "<alloc::boxed::Box<";

/// Trait part of the boxed closure call shim.
pub const BOXED_FN_CALL_TRAIT: &str = " as core::ops::function::Fn";

/// Exact symbol names that identify capture machinery frames.
pub const CAPTURE_MACHINERY_FUNCTIONS: &[&str] = &[
    "__restore_rt",
    "_sigtramp",
    "raise",
    "abort",
    "gsignal",
    "__GI_raise",
    "__GI_abort",
    "pthread_kill",
    "__pthread_kill",
    "__pthread_kill_implementation",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "rust_panic",
    "core::result::unwrap_failed",
    "core::option::unwrap_failed",
    "core::option::expect_failed",
];

/// Image name prefixes whose frames are all capture machinery (unwinder runtimes).
pub const CAPTURE_MACHINERY_LIBRARIES: &[&str] = &["libunwind.", "libgcc_s."];

static SHARED: Lazy<StackTracer> = Lazy::new(StackTracer::new);

/// Captures and formats stack traces
///
/// A tracer is cheap to keep around: it owns a [`StackSource`] and caches
/// the process name the first time it is needed.
///
/// ## Example
///
/// ```rust
/// use crashwatch_core::StackTracer;
///
/// let tracer = StackTracer::shared();
/// let trace = tracer.generate_trace_with_max(5);
/// assert!(trace.len() <= 5);
/// print!("{}", tracer.printable_trace(&trace));
/// ```
pub struct StackTracer
{
    source: Box<dyn StackSource>,
    process_name: OnceCell<String>,
}

impl StackTracer
{
    /// Tracer over the real stack of the calling thread.
    pub fn new() -> Self
    {
        Self::with_source(NativeStackSource)
    }

    /// Tracer over a custom frame source.
    pub fn with_source(source: impl StackSource + 'static) -> Self
    {
        Self {
            source: Box::new(source),
            process_name: OnceCell::new(),
        }
    }

    /// The process-wide tracer instance.
    ///
    /// Every call returns the same instance.
    pub fn shared() -> &'static StackTracer
    {
        &SHARED
    }

    /// Running executable's name, as used in trace lines for frames of the
    /// main image.
    ///
    /// Resolved once and cached. Falls back to `argv[0]` and finally to
    /// `<unknown>` if the executable path cannot be determined.
    pub fn process_name(&self) -> &str
    {
        self.process_name.get_or_init(resolve_process_name)
    }

    /// Capture the current stack, at most [`DEFAULT_MAX_ENTRIES`] entries.
    #[inline(never)]
    pub fn generate_trace(&self) -> Vec<StackTraceEntry>
    {
        self.generate_trace_with_max(DEFAULT_MAX_ENTRIES)
    }

    /// Capture the current stack, at most `max_entries` entries.
    ///
    /// `max_entries` is clamped to [`MAX_CAPTURE_DEPTH`]. A cap of 0 yields an
    /// empty trace.
    #[inline(never)]
    pub fn generate_trace_with_max(&self, max_entries: usize) -> Vec<StackTraceEntry>
    {
        let mut frames = [0usize; MAX_CAPTURE_DEPTH];
        let limit = max_entries.min(MAX_CAPTURE_DEPTH);
        let count = self.capture_raw(&mut frames[..limit]);
        self.symbolicate(&frames[..count])
    }

    /// Capture raw return addresses into `frames` without symbolizing them.
    ///
    /// Returns the number written. Safe to call from a signal handler.
    #[inline(never)]
    pub fn capture_raw(&self, frames: &mut [usize]) -> usize
    {
        self.source.capture(frames)
    }

    /// Turn raw return addresses into parsed entries, numbered by position.
    pub fn symbolicate(&self, frames: &[usize]) -> Vec<StackTraceEntry>
    {
        let process_name = self.process_name();
        frames
            .iter()
            .enumerate()
            .map(|(index, &address)| {
                let line = self.source.describe(index, address, process_name);
                StackTraceEntry::from_trace_line_at(u32::try_from(index).unwrap_or(u32::MAX), &line)
            })
            .collect()
    }

    /// Drop the leading capture machinery frames from `trace`.
    ///
    /// Stops at the first frame that is not capture machinery; nothing after
    /// it is removed. Applying this to its own output changes nothing.
    ///
    /// Two kinds of unresolved frame count as machinery while still in the
    /// head:
    ///
    /// - the frame right after [`SIGNAL_HANDLER_FUNCTION`], which is the
    ///   kernel's signal return trampoline
    /// - a run of unresolved frames followed by a machinery frame from the
    ///   same image, such as the internals of `raise` inside libc
    pub fn intelligent_trace(&self, trace: &[StackTraceEntry]) -> Vec<StackTraceEntry>
    {
        trace[machinery_head_len(trace)..].to_vec()
    }

    /// One rendered line per entry, each terminated by `\n`.
    pub fn printable_trace(&self, trace: &[StackTraceEntry]) -> String
    {
        trace.iter().map(|entry| format!("{entry}\n")).collect()
    }

    /// Space-separated `Type::method` / function names, skipping unresolved
    /// entries.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use crashwatch_core::{StackTraceEntry, StackTracer};
    ///
    /// let trace = vec![
    ///     StackTraceEntry::from_trace_line("0 App 0x10 -[Worker run] + 4"),
    ///     StackTraceEntry::from_trace_line("1 libc 0x20 0x0 + 32"),
    ///     StackTraceEntry::from_trace_line("2 App 0x30 main + 8"),
    /// ];
    /// assert_eq!(StackTracer::shared().condensed_printable_trace(&trace), "Worker::run main");
    /// ```
    pub fn condensed_printable_trace(&self, trace: &[StackTraceEntry]) -> String
    {
        trace.iter().filter_map(StackTraceEntry::condensed).collect::<Vec<_>>().join(" ")
    }
}

impl Default for StackTracer
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl fmt::Debug for StackTracer
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("StackTracer")
            .field("process_name", &self.process_name.get())
            .finish_non_exhaustive()
    }
}

/// Whether `entry` belongs to the tracer, handlers, unwinder or panic runtime.
pub fn is_capture_machinery(entry: &StackTraceEntry) -> bool
{
    if CAPTURE_MACHINERY_LIBRARIES.iter().any(|prefix| entry.library().starts_with(prefix)) {
        return true;
    }
    if entry.object_class().is_some() || !entry.is_resolved() {
        return false;
    }
    let name = entry.selector_name();
    CAPTURE_MACHINERY_FUNCTIONS.contains(&name)
        || CAPTURE_MACHINERY_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || (name.starts_with(BOXED_FN_CALL_PREFIX) && name.contains(BOXED_FN_CALL_TRAIT))
}

/// Number of leading entries of `trace` that belong to the capture machinery.
fn machinery_head_len(trace: &[StackTraceEntry]) -> usize
{
    let mut skip = 0;
    while let Some(entry) = trace.get(skip) {
        if is_capture_machinery(entry) {
            skip += 1;
            let returns_to_trampoline = entry.selector_name() == SIGNAL_HANDLER_FUNCTION;
            if returns_to_trampoline && trace.get(skip).is_some_and(|next| !next.is_resolved()) {
                skip += 1;
            }
            continue;
        }
        if entry.is_resolved() {
            break;
        }

        let run = trace[skip..]
            .iter()
            .take_while(|next| !next.is_resolved() && next.library() == entry.library())
            .count();
        match trace.get(skip + run) {
            Some(next) if next.library() == entry.library() && is_capture_machinery(next) => skip += run,
            _ => break,
        }
    }
    skip
}

fn resolve_process_name() -> String
{
    let file_name = |path: &Path| path.file_name().map(|name| name.to_string_lossy().into_owned());

    std::env::current_exe()
        .ok()
        .and_then(|path| file_name(&path))
        .or_else(|| std::env::args_os().next().and_then(|arg| file_name(Path::new(&arg))))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "<unknown>".to_string())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn synthetic(lines: &[&str]) -> StackTracer
    {
        StackTracer::with_source(SyntheticStackSource::new(lines.iter().copied()))
    }

    const CRASH_LINES: &[&str] = &[
        "0   myapp                            0x0000000000001000 backtrace::backtrace::trace_unsynchronized + 12",
        "1   myapp                            0x0000000000001100 crashwatch_core::handler::on_fatal_signal + 80",
        "2   libc.so.6                        0x0000000000002000 __restore_rt + 0",
        "3   myapp                            0x0000000000003000 myapp::divide + 20",
        "4   myapp                            0x0000000000003100 raise + 4",
        "5   myapp                            0x0000000000003200 main + 40",
    ];

    #[test]
    fn test_generate_trace_respects_cap()
    {
        let tracer = StackTracer::new();
        assert!(tracer.generate_trace().len() <= DEFAULT_MAX_ENTRIES);
        assert!(tracer.generate_trace_with_max(3).len() <= 3);
        assert!(tracer.generate_trace_with_max(0).is_empty());
    }

    #[test]
    fn test_generate_trace_numbers_from_zero()
    {
        let trace = StackTracer::new().generate_trace_with_max(10);
        assert!(!trace.is_empty());
        for (position, entry) in trace.iter().enumerate() {
            assert_eq!(entry.trace_entry_number() as usize, position);
        }
    }

    #[test]
    fn test_process_name_is_cached_and_non_empty()
    {
        let tracer = StackTracer::new();
        let first = tracer.process_name().as_ptr();
        assert!(!tracer.process_name().is_empty());
        assert_eq!(first, tracer.process_name().as_ptr());
    }

    #[test]
    fn test_shared_is_singleton()
    {
        assert!(std::ptr::eq(StackTracer::shared(), StackTracer::shared()));
    }

    #[test]
    fn test_intelligent_trace_strips_only_the_head()
    {
        let tracer = synthetic(CRASH_LINES);
        let trace = tracer.generate_trace();
        let smart = tracer.intelligent_trace(&trace);

        assert_eq!(smart.len(), 3);
        assert_eq!(smart[0].selector_name(), "myapp::divide");
        assert_eq!(smart[0].trace_entry_number(), 3);
        // `raise` after the first user frame is kept
        assert_eq!(smart[1].selector_name(), "raise");
    }

    #[test]
    fn test_intelligent_trace_is_idempotent()
    {
        let tracer = synthetic(CRASH_LINES);
        let once = tracer.intelligent_trace(&tracer.generate_trace());
        let twice = tracer.intelligent_trace(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_intelligent_trace_keeps_unresolved_head()
    {
        let tracer = synthetic(&["0   libfoo.so   0x0000000000000100 0x0000000000000000 + 256", "1   myapp   0x200 main + 1"]);
        let trace = tracer.generate_trace();
        assert_eq!(tracer.intelligent_trace(&trace).len(), 2);
    }

    const PANIC_LINES: &[&str] = &[
        "0   myapp                            0x0000555555561000 backtrace::backtrace::libunwind::trace + 14",
        "1   myapp                            0x0000555555561100 <crashwatch_core::tracer::source::NativeStackSource as crashwatch_core::tracer::source::StackSource>::capture + 96",
        "2   myapp                            0x0000555555561200 crashwatch_core::manager::CrashManager::capture_frames + 40",
        "3   myapp                            0x0000555555561300 crashwatch_core::handler::on_panic + 120",
        "4   myapp                            0x0000555555561400 crashwatch_core::handler::install_panic_hook::{{closure}} + 24",
        "5   myapp                            0x0000555555561500 <alloc::boxed::Box<dyn for<'a, 'b> core::ops::function::Fn<(&'a std::panic::PanicHookInfo<'b>,), Output = ()> + core::marker::Send + core::marker::Sync> as core::ops::function::Fn<(&std::panic::PanicHookInfo,)>>::call + 28",
        "6   myapp                            0x0000555555561600 std::panicking::rust_panic_with_hook + 512",
        "7   myapp                            0x0000555555561700 std::panicking::begin_panic_handler::{{closure}} + 140",
        "8   myapp                            0x0000555555561800 std::sys::backtrace::__rust_end_short_backtrace + 12",
        "9   myapp                            0x0000555555561900 __rustc::rust_begin_unwind + 28",
        "10  myapp                            0x0000555555561a00 core::panicking::panic_fmt + 52",
        "11  myapp                            0x0000555555561b00 core::panicking::panic_bounds_check + 76",
        "12  myapp                            0x0000555555562000 myapp::lookup + 44",
        "13  myapp                            0x0000555555562100 <alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call + 20",
        "14  myapp                            0x0000555555562200 main + 16",
    ];

    const RAISE_LINES: &[&str] = &[
        "0   myapp                            0x0000555555561000 backtrace::backtrace::trace_unsynchronized + 12",
        "1   myapp                            0x0000555555561100 crashwatch_core::handler::on_fatal_signal + 80",
        "2   libc.so.6                        0x00007ffff7c42520 0x00007ffff7c00000 + 271648",
        "3   libc.so.6                        0x00007ffff7c969fc 0x00007ffff7c00000 + 616956",
        "4   libc.so.6                        0x00007ffff7c96a10 0x00007ffff7c00000 + 616976",
        "5   libc.so.6                        0x00007ffff7c42476 gsignal + 22",
        "6   myapp                            0x0000555555562000 myapp::divide + 20",
        "7   libc.so.6                        0x00007ffff7c29d90 0x00007ffff7c00000 + 171408",
        "8   myapp                            0x0000555555562100 main + 40",
    ];

    const FAULT_LINES: &[&str] = &[
        "0   myapp                            0x0000555555561000 backtrace::backtrace::trace_unsynchronized + 12",
        "1   myapp                            0x0000555555561100 crashwatch_core::handler::on_fatal_signal + 80",
        "2   libc.so.6                        0x00007ffff7c42520 0x00007ffff7c00000 + 271648",
        "3   myapp                            0x0000555555562000 myapp::store + 8",
        "4   libc.so.6                        0x00007ffff7c29d90 0x00007ffff7c00000 + 171408",
        "5   myapp                            0x0000555555562100 main + 40",
    ];

    #[test]
    fn test_intelligent_trace_skips_panic_runtime_and_boxed_hook()
    {
        let tracer = synthetic(PANIC_LINES);
        let smart = tracer.intelligent_trace(&tracer.generate_trace());

        assert_eq!(smart[0].selector_name(), "myapp::lookup");
        assert_eq!(smart[0].trace_entry_number(), 12);
        // A boxed closure call after user code is not machinery
        assert_eq!(smart.len(), 3);
    }

    #[test]
    fn test_intelligent_trace_skips_unresolved_raise_internals()
    {
        let tracer = synthetic(RAISE_LINES);
        let smart = tracer.intelligent_trace(&tracer.generate_trace());

        assert_eq!(smart[0].selector_name(), "myapp::divide");
        assert_eq!(smart.len(), 3);
        assert!(!smart[1].is_resolved());
        assert_eq!(tracer.intelligent_trace(&smart), smart);
    }

    #[test]
    fn test_intelligent_trace_skips_unresolved_signal_trampoline()
    {
        let tracer = synthetic(FAULT_LINES);
        let smart = tracer.intelligent_trace(&tracer.generate_trace());

        assert_eq!(smart[0].selector_name(), "myapp::store");
        assert_eq!(smart[0].trace_entry_number(), 3);
        assert_eq!(smart.len(), 3);
    }

    #[test]
    fn test_boxed_closure_call_shim_is_machinery()
    {
        for name in [
            "<alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call",
            "<alloc::boxed::Box<dyn core::ops::function::Fn<(&std::panic::PanicHookInfo,)> + core::marker::Sync + core::marker::Send> as core::ops::function::Fn<(&std::panic::PanicHookInfo,)>>::call",
        ] {
            let entry = StackTraceEntry::from_trace_line(&format!("0   myapp   0x10 {name} + 4"));
            assert!(is_capture_machinery(&entry), "{name}");
        }
        let other = StackTraceEntry::from_trace_line("0   myapp   0x10 <alloc::boxed::Box<T> as core::fmt::Debug>::fmt + 4");
        assert!(!is_capture_machinery(&other));
    }

    #[test]
    fn test_unwinder_library_is_machinery()
    {
        let entry = StackTraceEntry::from_trace_line("0   libgcc_s.so.1   0x10 0x0 + 16");
        assert!(is_capture_machinery(&entry));
    }

    #[test]
    fn test_printable_trace_one_line_per_entry()
    {
        let tracer = synthetic(CRASH_LINES);
        let trace = tracer.generate_trace();
        let printable = tracer.printable_trace(&trace);

        assert_eq!(printable.lines().count(), trace.len());
        assert!(printable.ends_with('\n'));
        let third = printable.lines().nth(3).unwrap_or_default();
        assert!(third.starts_with("3   myapp"));
        assert!(third.ends_with("myapp::divide + 20"));
    }

    #[test]
    fn test_printable_trace_of_empty_trace()
    {
        assert_eq!(StackTracer::shared().printable_trace(&[]), "");
        assert_eq!(StackTracer::shared().condensed_printable_trace(&[]), "");
    }

    #[test]
    fn test_condensed_trace()
    {
        let tracer = synthetic(CRASH_LINES);
        let smart = tracer.intelligent_trace(&tracer.generate_trace());
        assert_eq!(tracer.condensed_printable_trace(&smart), "myapp::divide raise main");
    }
}
