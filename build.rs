//! This build script handles:
//! - Exposing build-time information to the firmware.
//! - Copying `memory.x` to the output directory to allow the firmware to be
//!   created.
//!
//! ## `memory.x` file handling
//!
//! This build script copies the appropriate memory.x file from the `link/`
//! dir into a directory where the linker can find it at link time.  This is
//! only done for firmware builds - host builds of the library (tests, the
//! simulator) need no linker configuration.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

// memory.x handling derived from embassy-rs examples.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    // Git state and the defmt log level both end up in the firmware
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-env-changed=DEFMT_LOG");

    built::write_built_file().expect("Failed to acquire build-time information");

    if env::var_os("CARGO_FEATURE_FIRMWARE").is_none() {
        return;
    }

    link_firmware();
}

fn link_firmware() {
    // One layout per chip.  Neither source is named memory.x, or the linker
    // would find it in the package root rather than in OUT_DIR.
    #[cfg(feature = "pico")]
    let memory_x = {
        println!("cargo:rerun-if-changed=link/memory.rp2040.x");
        include_bytes!("link/memory.rp2040.x")
    };
    #[cfg(feature = "pico2")]
    let memory_x = {
        println!("cargo:rerun-if-changed=link/memory.rp235x.x");
        include_bytes!("link/memory.rp235x.x")
    };
    #[cfg(not(any(feature = "pico", feature = "pico2")))]
    let memory_x: &[u8] = {
        panic!("The firmware feature requires either the 'pico' or 'pico2' feature");
    };

    let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    File::create(out.join("memory.x"))
        .and_then(|mut f| f.write_all(memory_x))
        .expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out.display());

    println!("cargo:rustc-link-arg=-v");
    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    println!("cargo:rustc-link-arg-bins=-Tdevice.x");

    // RP2040 boot2 and ROM function table
    #[cfg(feature = "pico")]
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
}
