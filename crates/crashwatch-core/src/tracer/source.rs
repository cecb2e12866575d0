//! Where raw frames and their trace lines come from.
//!
//! Capturing a trace is split into two phases:
//!
//! 1. [`StackSource::capture`] walks the stack and stores the return address
//!    of every frame in a caller-provided buffer. This phase does not
//!    allocate, lock, or touch anything but the buffer, so it can run inside
//!    a signal handler.
//! 2. [`StackSource::describe`] turns one address into a trace line. This
//!    phase allocates and reads symbol tables. In the fatal path it runs
//!    after phase 1 has already secured the raw frames, so a failure here
//!    loses symbol names but never the addresses.

use std::ffi::c_void;
use std::path::Path;

use super::demangle::display_symbol;
use super::symtab;
use crate::types::{Address, LIBRARY_COLUMN_WIDTH};

/// A provider of stack frames.
///
/// [`StackTracer`](super::StackTracer) owns one of these. The default is
/// [`NativeStackSource`], which walks the real stack of the calling thread.
/// Tests (and tools that replay recorded traces) can plug in a
/// [`SyntheticStackSource`] instead.
pub trait StackSource: Send + Sync
{
    /// Fill `frames` with return addresses, innermost frame first.
    ///
    /// Returns how many slots were written. Must stop once `frames` is full.
    ///
    /// Implementations must be async-signal-safe: no allocation, no locks.
    fn capture(&self, frames: &mut [usize]) -> usize;

    /// Render the trace line for the frame at `index` whose return address
    /// is `address`.
    ///
    /// `process_name` is the label to use for frames of the main executable.
    /// The line's leading frame number, if any, must be `index`: it becomes
    /// the entry number.
    fn describe(&self, index: usize, address: usize, process_name: &str) -> String;
}

/// Stack source backed by the platform unwinder and the dynamic loader.
///
/// - Frames are walked with `backtrace::trace_unsynchronized`.
/// - The owning image comes from `dladdr(3)`.
/// - The enclosing function and the offset into it come from the image's
///   symbol table, then from the exported symbol `dladdr` reports.
/// - When neither knows the address, the name comes from the debug info
///   `backtrace` finds and the offset is 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeStackSource;

impl StackSource for NativeStackSource
{
    #[inline(never)]
    fn capture(&self, frames: &mut [usize]) -> usize
    {
        if frames.is_empty() {
            return 0;
        }

        let mut count = 0;
        // SAFETY: the unsynchronized walker takes no lock and does not
        // allocate. The closure only writes into `frames`, bounded by `count`.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as usize;
                if ip == 0 {
                    return false;
                }
                frames[count] = ip;
                count += 1;
                count < frames.len()
            });
        }
        count
    }

    fn describe(&self, index: usize, address: usize, process_name: &str) -> String
    {
        let image = image_info(address);
        let library = image
            .as_ref()
            .and_then(|image| image.path.as_deref())
            .map_or_else(|| process_name.to_string(), |path| library_name(path, process_name));
        let address = Address::from(address);

        match symbolize(address, image.as_ref()) {
            Some((name, offset)) => format_trace_line(index, &library, address, &name, offset),
            None => {
                let base = image.map_or(Address::ZERO, |image| image.base);
                let offset = address.offset_from(base).unwrap_or(0);
                format_trace_line(index, &library, address, &base.to_string(), offset)
            }
        }
    }
}

/// Lay out one trace line in the fixed-width column format.
///
/// ## Example
///
/// ```rust
/// use crashwatch_core::tracer::format_trace_line;
/// use crashwatch_core::types::Address;
///
/// let line = format_trace_line(3, "myapp", Address::from(0x1000usize), "myapp::run", 16);
/// assert!(line.starts_with("3   myapp "));
/// assert!(line.ends_with(" myapp::run + 16"));
/// ```
pub fn format_trace_line(index: usize, library: &str, address: Address, symbol: &str, offset: usize) -> String
{
    format!("{index:<4}{library:<width$} {address} {symbol} + {offset}", width = LIBRARY_COLUMN_WIDTH)
}

/// What the dynamic loader knows about an address.
struct ImageInfo
{
    /// Path of the containing image, if the loader recorded one
    path: Option<String>,
    /// Load base of the containing image
    base: Address,
    /// Nearest exported symbol and its start address
    symbol: Option<(String, Address)>,
}

#[cfg(unix)]
fn image_info(address: usize) -> Option<ImageInfo>
{
    use std::mem::MaybeUninit;

    let mut info = MaybeUninit::<libc::Dl_info>::zeroed();
    // Return addresses point one past the call; step back so a call that ends
    // a function is attributed to that function.
    let lookup = address.saturating_sub(1);
    // SAFETY: dladdr only reads loader tables and writes into `info`.
    let found = unsafe { libc::dladdr(lookup as *const c_void, info.as_mut_ptr()) };
    if found == 0 {
        return None;
    }
    // SAFETY: dladdr returned non-zero, so it filled in `info`.
    let info = unsafe { info.assume_init() };

    let path = c_string(info.dli_fname).filter(|path| !path.is_empty());
    let symbol = if info.dli_saddr.is_null() {
        None
    } else {
        c_string(info.dli_sname)
            .filter(|name| !name.is_empty())
            .map(|name| (display_symbol(&name), Address::from(info.dli_saddr as usize)))
    };

    Some(ImageInfo {
        path,
        base: Address::from(info.dli_fbase as usize),
        symbol,
    })
}

#[cfg(not(unix))]
fn image_info(_address: usize) -> Option<ImageInfo>
{
    None
}

#[cfg(unix)]
fn c_string(ptr: *const libc::c_char) -> Option<String>
{
    use std::ffi::CStr;

    if ptr.is_null() {
        return None;
    }
    // SAFETY: the loader hands out NUL-terminated strings that live as long
    // as the image stays mapped.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Name of the function containing `address` and the offset of `address`
/// from its start.
fn symbolize(address: Address, image: Option<&ImageInfo>) -> Option<(String, usize)>
{
    // Look up the byte before the return address, so a call that ends a
    // function is attributed to that function.
    let lookup = address.value().saturating_sub(1);

    if let Some(image) = image {
        let symbols = image.path.as_deref().and_then(|path| symtab::image_symbols(Path::new(path)));
        let image_offset = lookup.checked_sub(image.base.value());
        if let (Some(symbols), Some(image_offset)) = (symbols, image_offset) {
            if let Some((name, offset)) = symbols.lookup(image_offset as u64) {
                return Some((name.to_string(), offset as usize + 1));
            }
        }
        if let Some((name, start)) = &image.symbol {
            if let Some(offset) = address.offset_from(*start) {
                return Some((name.clone(), offset));
            }
        }
    }

    resolve_name(lookup).map(|name| (name, 0))
}

/// Symbol name from debug info. Does not say where the function starts.
fn resolve_name(lookup: usize) -> Option<String>
{
    let mut resolved = None;
    backtrace::resolve(lookup as *mut c_void, |symbol| {
        if resolved.is_none() {
            resolved = symbol.name().map(|name| format!("{name:#}"));
        }
    });
    resolved
}

/// Image label for a loader path: its file name, or the process name when
/// the path has none.
fn library_name(path: &str, process_name: &str) -> String
{
    match Path::new(path).file_name() {
        Some(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => process_name.to_string(),
    }
}

/// Stack source that replays pre-rendered trace lines.
///
/// Each line's address column becomes the "captured" return address, and
/// `describe` hands the line back with its leading frame number replaced by
/// the frame's position. Useful for exercising delegates and report handling
/// without depending on what the real stack looks like.
///
/// ## Example
///
/// ```rust
/// use crashwatch_core::tracer::{StackTracer, SyntheticStackSource};
///
/// let tracer = StackTracer::with_source(SyntheticStackSource::new([
///     "0   myapp   0x0000000000001000 myapp::inner + 4",
///     "1   myapp   0x0000000000002000 main + 8",
/// ]));
/// let trace = tracer.generate_trace();
/// assert_eq!(trace.len(), 2);
/// assert_eq!(trace[1].selector_name(), "main");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SyntheticStackSource
{
    lines: Vec<String>,
    addresses: Vec<usize>,
}

impl SyntheticStackSource
{
    /// Replay `lines`, innermost frame first.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let addresses = lines
            .iter()
            .map(|line| crate::types::StackTraceEntry::from_trace_line(line).address().value())
            .collect();
        Self { lines, addresses }
    }

    /// Number of frames this source replays.
    pub fn len(&self) -> usize
    {
        self.lines.len()
    }

    /// `true` if there are no frames to replay.
    pub fn is_empty(&self) -> bool
    {
        self.lines.is_empty()
    }
}

impl StackSource for SyntheticStackSource
{
    fn capture(&self, frames: &mut [usize]) -> usize
    {
        let count = frames.len().min(self.addresses.len());
        frames[..count].copy_from_slice(&self.addresses[..count]);
        count
    }

    fn describe(&self, index: usize, address: usize, process_name: &str) -> String
    {
        match self.lines.get(index) {
            Some(line) => renumber(line, index),
            None => format_trace_line(index, process_name, Address::from(address), &Address::ZERO.to_string(), 0),
        }
    }
}

/// `line` with its leading frame number set to `index`, or prefixed with one.
fn renumber(line: &str, index: usize) -> String
{
    let body = line.trim_start();
    let digits = body.len() - body.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let rest = &body[digits..];
    if digits > 0 && rest.starts_with(char::is_whitespace) {
        format!("{index}{rest}")
    } else {
        format!("{index:<4}{body}")
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_native_capture_respects_buffer_size()
    {
        let mut frames = [0usize; 2];
        let count = NativeStackSource.capture(&mut frames);
        assert!(count <= 2);
        assert!(frames[..count].iter().all(|&ip| ip != 0));
    }

    #[test]
    fn test_native_capture_with_empty_buffer()
    {
        assert_eq!(NativeStackSource.capture(&mut []), 0);
    }

    #[test]
    fn test_native_describe_produces_parseable_line()
    {
        let mut frames = [0usize; 8];
        let count = NativeStackSource.capture(&mut frames);
        assert!(count > 0);

        let line = NativeStackSource.describe(0, frames[0], "proc");
        let entry = crate::types::StackTraceEntry::from_trace_line(&line);
        assert_eq!(entry.trace_entry_number(), 0);
        assert_eq!(entry.address().value(), frames[0]);
        assert!(!entry.library().is_empty());
    }

    #[test]
    fn test_library_name_uses_file_name()
    {
        assert_eq!(library_name("/usr/lib/libc.so.6", "proc"), "libc.so.6");
        assert_eq!(library_name("/", "proc"), "proc");
    }

    #[test]
    fn test_synthetic_source_truncates_to_buffer()
    {
        let source = SyntheticStackSource::new(["0 a 0x10 f + 1", "1 a 0x20 g + 2", "2 a 0x30 h + 3"]);
        let mut frames = [0usize; 2];
        assert_eq!(source.capture(&mut frames), 2);
        assert_eq!(frames, [0x10, 0x20]);
        assert_eq!(source.describe(1, 0x20, "proc"), "1 a 0x20 g + 2");
    }

    #[test]
    fn test_synthetic_lines_are_renumbered_by_position()
    {
        let source = SyntheticStackSource::new(["7   a 0x10 f + 1", "a 0x20 g + 2", "12 a 0x30 h + 3"]);
        assert_eq!(source.describe(0, 0x10, "proc"), "0   a 0x10 f + 1");
        assert_eq!(source.describe(1, 0x20, "proc"), "1   a 0x20 g + 2");
        assert_eq!(source.describe(2, 0x30, "proc"), "2 a 0x30 h + 3");
    }

    #[test]
    fn test_native_offsets_are_relative_to_the_enclosing_function()
    {
        let mut frames = [0usize; 16];
        let count = NativeStackSource.capture(&mut frames);
        let entries: Vec<_> = frames[..count]
            .iter()
            .enumerate()
            .map(|(index, &address)| {
                crate::types::StackTraceEntry::from_trace_line(&NativeStackSource.describe(index, address, "proc"))
            })
            .collect();

        let resolved: Vec<_> = entries.iter().filter(|entry| entry.is_resolved()).collect();
        assert!(resolved.len() >= 2, "too few resolved frames: {entries:?}");
        for entry in &resolved {
            assert!((0..1 << 20).contains(&entry.offset()), "implausible offset in {entry}");
        }
        assert!(resolved
            .iter()
            .any(|entry| entry.selector_name().contains("test_native_offsets_are_relative_to_the_enclosing_function")));

        let distinct: std::collections::HashSet<i64> = resolved.iter().map(|entry| entry.offset()).collect();
        assert!(distinct.len() > 1, "every frame has the same offset: {distinct:?}");
    }

    #[test]
    fn test_synthetic_source_describes_unknown_index_as_unresolved()
    {
        let source = SyntheticStackSource::new(Vec::<String>::new());
        let line = source.describe(4, 0x99, "proc");
        let entry = crate::types::StackTraceEntry::from_trace_line(&line);
        assert!(!entry.is_resolved());
        assert_eq!(entry.library(), "proc");
        assert_eq!(entry.address().value(), 0x99);
    }
}
