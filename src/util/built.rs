//! This file handles build-time information.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use defmt::info;

use crate::constants::{
    BOOTLOADER_VERSION_MAJOR, BOOTLOADER_VERSION_MINOR, FIRMWARE_VERSION_MAJOR,
    FIRMWARE_VERSION_MINOR,
};

// Import the build-time information from the `built.rs` output file generated
// during the build process by `build.rs`.
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Log build-time information, and the versions we report over USB.
pub fn log_fw_info(bin_name: &str, serial: &str) {
    info!("{} starting as {}", built_info::PKG_NAME, bin_name);
    info!("Author: {}", built_info::PKG_AUTHORS);
    info!("Package version: {}", built_info::PKG_VERSION);
    info!(
        "xu1541 firmware version: {}.{}, bootloader: {}.{}",
        FIRMWARE_VERSION_MAJOR,
        FIRMWARE_VERSION_MINOR,
        BOOTLOADER_VERSION_MAJOR,
        BOOTLOADER_VERSION_MINOR
    );
    info!("Serial: {}", serial);

    info!("Git commit: {}", built_info::GIT_COMMIT_HASH.unwrap_or("unknown"));
    info!("Git dirty: {}", built_info::GIT_DIRTY.unwrap_or(false));

    info!("Built: {}", built_info::BUILT_TIME_UTC);
    info!("Rust version: {}", built_info::RUSTC_VERSION);
    info!("Target triple: {}", built_info::TARGET);
    info!("Build profile: {}", built_info::PROFILE);
    info!("Enabled features: {}", built_info::FEATURES_LOWERCASE_STR);
}
