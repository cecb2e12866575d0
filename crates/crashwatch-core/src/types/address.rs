//! Instruction address type.

use std::fmt;

/// Number of hex digits needed to print a pointer on this target.
pub const POINTER_HEX_WIDTH: usize = (usize::BITS / 4) as usize;

/// Strongly typed in-process instruction address
///
/// This wrapper around `usize` keeps raw return addresses from being mixed up
/// with offsets, frame counts, or other integers flowing through the tracer.
///
/// Addresses always render as `0x` followed by a zero-padded, pointer-width
/// hex number, which is the layout the trace line parser expects back.
///
/// ## Example
///
/// ```rust
/// use crashwatch_core::types::Address;
///
/// let addr = Address::from(0x1000usize);
/// assert_eq!(addr.value(), 0x1000);
/// assert_eq!(Address::parse_hex("0x1000"), Some(addr));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address
{
    /// The null address (0x0)
    ///
    /// Used as the placeholder when a trace line carries no parseable address.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `usize` value
    pub const fn new(value: usize) -> Self
    {
        Address(value)
    }

    /// Get the raw `usize` value of this address
    pub const fn value(self) -> usize
    {
        self.0
    }

    /// Subtract an offset from this address, checking for underflow
    ///
    /// ## Example
    ///
    /// ```rust
    /// use crashwatch_core::types::Address;
    ///
    /// let addr = Address::from(0x1000usize);
    /// assert_eq!(addr.checked_sub(0x100), Some(Address::from(0xf00usize)));
    /// assert_eq!(addr.checked_sub(usize::MAX), None);
    /// ```
    pub fn checked_sub(self, offset: usize) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Byte distance from `base` up to this address, if `base` is not above it.
    pub fn offset_from(self, base: Address) -> Option<usize>
    {
        self.0.checked_sub(base.0)
    }

    /// Parse a `0x`-prefixed hexadecimal token.
    ///
    /// Returns `None` for anything else (no prefix, empty digits, overflow).
    pub fn parse_hex(token: &str) -> Option<Self>
    {
        let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X"))?;
        if digits.is_empty() {
            return None;
        }
        usize::from_str_radix(digits, 16).ok().map(Address)
    }
}

impl From<usize> for Address
{
    fn from(value: usize) -> Self
    {
        Address(value)
    }
}

impl From<Address> for usize
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:0width$x}", self.0, width = POINTER_HEX_WIDTH)
    }
}
