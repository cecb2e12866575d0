//! Sample failures for exercising the crash handlers end to end.
//!
//! Each trigger is `#[inline(never)]` so it shows up as its own frame in the
//! resulting report.

#![allow(unsafe_code)] // Faults are raised on purpose

use std::hint::black_box;

use clap::ValueEnum;

/// What kind of failure `crashwatch crash` triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CrashKind
{
    /// Arithmetic fault (`SIGFPE`)
    DivideByZero,
    /// Write through a dangling pointer (`SIGSEGV`)
    DanglingReference,
    /// Call an operation that is not implemented (panic)
    Unimplemented,
    /// Index past the end of a slice (panic)
    OutOfBounds,
    /// Abort the process (`SIGABRT`)
    Abort,
}

/// Trigger `kind`. Returns only if the platform failed to deliver the fault.
pub fn trigger(kind: CrashKind)
{
    match kind {
        CrashKind::DivideByZero => divide_by_zero(),
        CrashKind::DanglingReference => dangling_reference(),
        CrashKind::Unimplemented => unimplemented_operation(),
        CrashKind::OutOfBounds => out_of_bounds(),
        CrashKind::Abort => abort(),
    }
}

/// Integer division by zero panics in Rust instead of trapping, so raise
/// the signal the hardware would have delivered.
#[inline(never)]
fn divide_by_zero()
{
    // SAFETY: raising a signal has no memory-safety preconditions.
    unsafe {
        libc::raise(libc::SIGFPE);
    }
}

#[inline(never)]
fn dangling_reference()
{
    // Low, never-mapped page
    let dangling = black_box(0x10usize) as *mut u8;
    // SAFETY: not safe at all; this write is meant to fault.
    unsafe {
        dangling.write_volatile(0x2a);
    }
}

#[inline(never)]
fn unimplemented_operation()
{
    unimplemented!("sample crash: operation not implemented");
}

#[inline(never)]
fn out_of_bounds()
{
    let values = black_box(vec![1u8, 2, 3]);
    let index = black_box(values.len() + 7);
    let value = values[index];
    black_box(value);
}

#[inline(never)]
fn abort()
{
    std::process::abort();
}
