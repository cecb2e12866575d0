//! Build script for crashwatch-core
//!
//! This script checks toolchain and target requirements before compilation:
//! - Minimum Rust version (the panic hook API uses `PanicHookInfo`, stable in 1.81.0)
//! - Target support for fatal signal capture (Unix only)
//!
//! ## Requirements
//!
//! - **Rust**: 1.81.0 or newer
//! - **Unix targets**: full capture (signals + panics)
//! - **Other targets**: panic capture only

fn main()
{
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::parse("1.81.0").unwrap();

        if rustc_version < min_rust_version {
            panic!(
                "crashwatch-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    // CARGO_CFG_* describes the target, not the host running this script
    let family = std::env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if !family.split(',').any(|f| f == "unix") {
        println!("cargo:warning=crashwatch-core: fatal signal capture is only available on unix targets; panics are still recorded");
    }
}
