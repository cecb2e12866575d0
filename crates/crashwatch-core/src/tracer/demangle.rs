//! Symbol demangling utilities.
//!
//! Symbols that come straight from the dynamic loader (`dladdr`) are still in
//! their linkage form. This module turns them into the human-readable names
//! used in trace lines:
//!
//! - **Rust**: legacy (`_ZN...E`) and v0 (`_R...`) mangling are demangled
//!   by `rustc_demangle`, without the trailing hash.
//! - **Everything else** (C, unmangled globals) is passed through unchanged.

use rustc_demangle::try_demangle;

/// Produce the display form of a raw linkage name.
///
/// ## Example
///
/// ```rust,no_run
/// // Note: This function is internal to the crate.
/// // "_ZN4core9panicking9panic_fmt17h0123456789abcdefE" -> "core::panicking::panic_fmt"
/// // "abort"                                           -> "abort"
/// ```
pub(crate) fn display_symbol(raw: &str) -> String
{
    match try_demangle(raw) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_legacy_rust_symbol_is_demangled_without_hash()
    {
        assert_eq!(
            display_symbol("_ZN4core9panicking9panic_fmt17h0123456789abcdefE"),
            "core::panicking::panic_fmt"
        );
    }

    #[test]
    fn test_c_symbol_passes_through()
    {
        assert_eq!(display_symbol("abort"), "abort");
        assert_eq!(display_symbol("__restore_rt"), "__restore_rt");
    }
}
