//! Identity of the failure that triggered a crash report.

use std::any::Any;
use std::fmt;
use std::panic::PanicHookInfo;

use super::{Address, FatalSignal};

/// What went wrong: a fatal signal or an uncaught panic.
///
/// This is the first argument every [`CrashDelegate`](crate::CrashDelegate)
/// callback receives, and its `Display` form is the report's `Failure:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureIdentity
{
    /// The process received a fatal signal.
    Signal
    {
        /// Which signal was delivered
        signal: FatalSignal,
        /// Faulting address from `siginfo_t`, for signals that carry one
        fault_address: Option<Address>,
    },
    /// A panic propagated into the panic hook.
    Panic
    {
        /// Panic payload rendered as text
        message: String,
        /// `file:line:column` of the panic site, if the runtime reported it
        location: Option<String>,
        /// Name of the panicking thread (`<unnamed>` when it has none)
        thread: String,
    },
}

impl FailureIdentity
{
    /// Identity for a fatal signal without a fault address.
    pub fn signal(signal: FatalSignal) -> Self
    {
        FailureIdentity::Signal {
            signal,
            fault_address: None,
        }
    }

    /// Build the identity for the panic currently being reported.
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self
    {
        let thread = std::thread::current();
        FailureIdentity::Panic {
            message: payload_message(info.payload()),
            location: info.location().map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column())),
            thread: thread.name().unwrap_or("<unnamed>").to_string(),
        }
    }

    /// The signal, if this failure is signal-type.
    pub fn as_signal(&self) -> Option<FatalSignal>
    {
        match self {
            FailureIdentity::Signal { signal, .. } => Some(*signal),
            FailureIdentity::Panic { .. } => None,
        }
    }

    /// `true` for panic-type failures.
    pub fn is_panic(&self) -> bool
    {
        matches!(self, FailureIdentity::Panic { .. })
    }
}

/// Render a panic payload the way the default hook does.
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> String
{
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

impl fmt::Display for FailureIdentity
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            FailureIdentity::Signal { signal, fault_address } => {
                write!(f, "{signal}")?;
                if let Some(address) = fault_address {
                    write!(f, " at {address}")?;
                }
                Ok(())
            }
            FailureIdentity::Panic {
                message,
                location,
                thread,
            } => {
                write!(f, "panic '{message}'")?;
                if let Some(location) = location {
                    write!(f, " at {location}")?;
                }
                write!(f, " on thread '{thread}'")
            }
        }
    }
}
