//! Fatal process signals handled by the crash manager.

use std::fmt;

/// A fatal signal the crash manager installs a handler for
///
/// These are the synchronous "the process cannot continue" signals. The raw
/// numbers come from `libc` so they match the running platform (for example
/// `SIGBUS` is 7 on Linux and 10 on macOS).
///
/// ## Example
///
/// ```rust
/// use crashwatch_core::types::FatalSignal;
///
/// let signal = FatalSignal::ArithmeticFault;
/// assert_eq!(signal.name(), "SIGFPE");
/// assert_eq!(FatalSignal::from_raw(signal.raw()), Some(signal));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalSignal
{
    /// `SIGILL` - illegal instruction
    IllegalInstruction,
    /// `SIGBUS` - bus error (misaligned or unmapped physical access)
    BusError,
    /// `SIGSEGV` - segmentation violation (invalid memory reference)
    SegmentationViolation,
    /// `SIGFPE` - erroneous arithmetic operation
    ArithmeticFault,
    /// `SIGABRT` - abnormal termination, usually from `abort()`
    Abort,
    /// `SIGTRAP` - trace/breakpoint trap
    Trap,
}

impl FatalSignal
{
    /// Every signal the manager installs a handler for, in installation order.
    pub const ALL: [FatalSignal; 6] = [
        FatalSignal::IllegalInstruction,
        FatalSignal::BusError,
        FatalSignal::SegmentationViolation,
        FatalSignal::ArithmeticFault,
        FatalSignal::Abort,
        FatalSignal::Trap,
    ];

    /// Platform signal number.
    #[cfg(unix)]
    pub const fn raw(self) -> i32
    {
        match self {
            FatalSignal::IllegalInstruction => libc::SIGILL,
            FatalSignal::BusError => libc::SIGBUS,
            FatalSignal::SegmentationViolation => libc::SIGSEGV,
            FatalSignal::ArithmeticFault => libc::SIGFPE,
            FatalSignal::Abort => libc::SIGABRT,
            FatalSignal::Trap => libc::SIGTRAP,
        }
    }

    /// Platform signal number (POSIX numbering where the platform has none).
    #[cfg(not(unix))]
    pub const fn raw(self) -> i32
    {
        match self {
            FatalSignal::IllegalInstruction => 4,
            FatalSignal::BusError => 10,
            FatalSignal::SegmentationViolation => 11,
            FatalSignal::ArithmeticFault => 8,
            FatalSignal::Abort => 6,
            FatalSignal::Trap => 5,
        }
    }

    /// Look up a fatal signal by its platform number.
    pub fn from_raw(raw: i32) -> Option<Self>
    {
        Self::ALL.into_iter().find(|signal| signal.raw() == raw)
    }

    /// Position of this signal in [`FatalSignal::ALL`].
    pub(crate) const fn slot(self) -> usize
    {
        match self {
            FatalSignal::IllegalInstruction => 0,
            FatalSignal::BusError => 1,
            FatalSignal::SegmentationViolation => 2,
            FatalSignal::ArithmeticFault => 3,
            FatalSignal::Abort => 4,
            FatalSignal::Trap => 5,
        }
    }

    /// Symbolic name, e.g. `SIGSEGV`.
    pub const fn name(self) -> &'static str
    {
        match self {
            FatalSignal::IllegalInstruction => "SIGILL",
            FatalSignal::BusError => "SIGBUS",
            FatalSignal::SegmentationViolation => "SIGSEGV",
            FatalSignal::ArithmeticFault => "SIGFPE",
            FatalSignal::Abort => "SIGABRT",
            FatalSignal::Trap => "SIGTRAP",
        }
    }

    /// Short human-readable description.
    pub const fn description(self) -> &'static str
    {
        match self {
            FatalSignal::IllegalInstruction => "illegal instruction",
            FatalSignal::BusError => "bus error",
            FatalSignal::SegmentationViolation => "segmentation violation",
            FatalSignal::ArithmeticFault => "arithmetic fault",
            FatalSignal::Abort => "abort",
            FatalSignal::Trap => "trace trap",
        }
    }

    /// Whether this signal can report a thread running off its stack, and so
    /// needs to be handled on an alternate stack.
    pub const fn may_be_stack_overflow(self) -> bool
    {
        matches!(self, FatalSignal::SegmentationViolation | FatalSignal::BusError)
    }

    /// Whether the kernel reports a meaningful faulting address in `si_addr`.
    pub const fn reports_fault_address(self) -> bool
    {
        matches!(
            self,
            FatalSignal::SegmentationViolation | FatalSignal::BusError | FatalSignal::IllegalInstruction | FatalSignal::ArithmeticFault
        )
    }
}

impl fmt::Display for FatalSignal
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "signal {} ({}: {})", self.raw(), self.name(), self.description())
    }
}
