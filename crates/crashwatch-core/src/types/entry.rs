//! Parsed stack trace entries.
//!
//! A trace line uses the column layout of `backtrace_symbols(3)`:
//!
//! ```text
//! 3   myapp                            0x000055d0c1a2b3c4 myapp::worker::run + 52
//! 4   Foundation                       0x00000001a2b3c4d5 -[NSOperation start] + 848
//! 5   libsystem_c.dylib                0x00000001a2b3c4d5 0x00000001a2b30000 + 50389
//! ```
//!
//! That is: frame index, image name, hexadecimal address, then the symbol and
//! its byte offset. The symbol takes one of two shapes:
//!
//! - **Method frames**: `-[Type method]` (instance-level) or `+[Type method]`
//!   (type-level), as emitted for Objective-C frames on Apple platforms.
//! - **Function frames**: a bare (already demangled) function name.
//!
//! When the image has no symbol for the address the symbol column holds the
//! image base address instead, and the entry is reported as unresolved.
//!
//! Parsing never fails. Anything that does not fit degrades to empty/zero
//! fields while [`StackTraceEntry::raw_entry`] keeps the original text.

use std::fmt;

use super::Address;

/// Width of the image name column in rendered trace lines.
pub const LIBRARY_COLUMN_WIDTH: usize = 32;

/// One frame of a captured stack trace.
///
/// Entries are immutable once parsed. Use the accessors to read fields.
///
/// ## Example
///
/// ```rust
/// use crashwatch_core::StackTraceEntry;
///
/// let entry = StackTraceEntry::from_trace_line("2   myapp   0x0000000000401a2c myapp::compute + 28");
/// assert_eq!(entry.trace_entry_number(), 2);
/// assert_eq!(entry.library(), "myapp");
/// assert_eq!(entry.selector_name(), "myapp::compute");
/// assert_eq!(entry.offset(), 28);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceEntry
{
    trace_entry_number: u32,
    library: String,
    address: Address,
    object_class: Option<String>,
    is_class_level_selector: bool,
    selector_name: String,
    offset: i64,
    raw_entry: String,
}

impl StackTraceEntry
{
    /// Parse a trace line, taking the entry number from the line itself.
    ///
    /// Lines without a leading index get entry number 0.
    pub fn from_trace_line(line: &str) -> Self
    {
        Self::parse(line, 0)
    }

    /// Parse a trace line captured at `position` in its trace.
    ///
    /// `position` is used as the entry number when the line carries no index
    /// of its own.
    pub fn from_trace_line_at(position: u32, line: &str) -> Self
    {
        Self::parse(line, position)
    }

    fn parse(line: &str, fallback_number: u32) -> Self
    {
        let mut entry = Self {
            trace_entry_number: fallback_number,
            library: String::new(),
            address: Address::ZERO,
            object_class: None,
            is_class_level_selector: false,
            selector_name: String::new(),
            offset: 0,
            raw_entry: line.to_string(),
        };

        let text = line.trim();
        let mut body = text;
        if let Some((first, rest)) = split_first_token(text) {
            if let Ok(number) = first.parse::<u32>() {
                entry.trace_entry_number = number;
                body = rest;
            }
        }

        let Some((start, token, address)) =
            tokens(body).find_map(|(start, token)| Address::parse_hex(token).map(|address| (start, token, address)))
        else {
            return entry;
        };

        entry.library = body[..start].trim().to_string();
        entry.address = address;

        let (symbol, offset) = split_offset(body[start + token.len()..].trim());
        entry.offset = offset;

        if symbol.is_empty() || Address::parse_hex(symbol).is_some() {
            return entry;
        }

        match method_frame(symbol) {
            Some((class_level, class, selector)) => {
                entry.object_class = Some(class.to_string());
                entry.is_class_level_selector = class_level;
                entry.selector_name = selector.to_string();
            }
            None => entry.selector_name = symbol.to_string(),
        }

        entry
    }

    /// This entry's position in the original stack trace (0 = capture point).
    pub fn trace_entry_number(&self) -> u32
    {
        self.trace_entry_number
    }

    /// Which binary image (library, framework, or the process) the frame is in.
    pub fn library(&self) -> &str
    {
        &self.library
    }

    /// The instruction address.
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// The owning type, for method frames.
    pub fn object_class(&self) -> Option<&str>
    {
        self.object_class.as_deref()
    }

    /// `true` if the frame is a type-level (`+[...]`) method.
    pub fn is_class_level_selector(&self) -> bool
    {
        self.is_class_level_selector
    }

    /// The method or function name. Empty when unresolved.
    pub fn selector_name(&self) -> &str
    {
        &self.selector_name
    }

    /// Byte offset from the start of the resolved symbol.
    pub fn offset(&self) -> i64
    {
        self.offset
    }

    /// The original, unparsed trace line.
    pub fn raw_entry(&self) -> &str
    {
        &self.raw_entry
    }

    /// `true` if a symbol name was recovered for this frame.
    pub fn is_resolved(&self) -> bool
    {
        !self.selector_name.is_empty()
    }

    /// The symbol column as it appears in a trace line.
    ///
    /// Returns `None` for unresolved frames.
    pub fn symbol(&self) -> Option<String>
    {
        if !self.is_resolved() {
            return None;
        }
        Some(match &self.object_class {
            Some(class) => {
                let marker = if self.is_class_level_selector { '+' } else { '-' };
                format!("{marker}[{class} {}]", self.selector_name)
            }
            None => self.selector_name.clone(),
        })
    }

    /// Compact `Type::method` (or bare function) form used by condensed traces.
    pub fn condensed(&self) -> Option<String>
    {
        if !self.is_resolved() {
            return None;
        }
        Some(match &self.object_class {
            Some(class) => format!("{class}::{}", self.selector_name),
            None => self.selector_name.clone(),
        })
    }
}

impl fmt::Display for StackTraceEntry
{
    /// Fixed-width trace line; unresolved frames print `raw_entry` verbatim.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.symbol() {
            Some(symbol) => write!(
                f,
                "{:<4}{:<width$} {} {} + {}",
                self.trace_entry_number,
                self.library,
                self.address,
                symbol,
                self.offset,
                width = LIBRARY_COLUMN_WIDTH
            ),
            None => f.write_str(&self.raw_entry),
        }
    }
}

/// Whitespace-separated tokens with their byte offsets into `text`.
fn tokens(text: &str) -> impl Iterator<Item = (usize, &str)> + '_
{
    let base = text.as_ptr() as usize;
    text.split_whitespace().map(move |token| (token.as_ptr() as usize - base, token))
}

fn split_first_token(text: &str) -> Option<(&str, &str)>
{
    if text.is_empty() {
        return None;
    }
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => Some((first, rest.trim_start())),
        None => Some((text, "")),
    }
}

/// Split `symbol + offset`; a missing or unparseable offset yields 0.
fn split_offset(symbol_part: &str) -> (&str, i64)
{
    if let Some((symbol, offset)) = symbol_part.rsplit_once(" + ") {
        if let Some(value) = parse_offset(offset.trim()) {
            return (symbol.trim_end(), value);
        }
    }
    (symbol_part, 0)
}

fn parse_offset(token: &str) -> Option<i64>
{
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

/// Recognise `-[Type method]` / `+[Type method]`.
///
/// Returns `(class_level, type, method)`.
fn method_frame(symbol: &str) -> Option<(bool, &str, &str)>
{
    let class_level = match symbol.as_bytes().first()? {
        b'+' => true,
        b'-' => false,
        _ => return None,
    };
    let inner = symbol[1..].strip_prefix('[')?.strip_suffix(']')?;
    let (class, selector) = inner.split_once(' ')?;
    let (class, selector) = (class.trim(), selector.trim());
    if class.is_empty() || selector.is_empty() {
        return None;
    }
    Some((class_level, class, selector))
}
