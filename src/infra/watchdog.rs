//! Hardware watchdog creation, and reboots.
//!
//! There is a single task doing bus work, and it feeds the watchdog from
//! every engine wait loop and from its own main loop.  If it ever stops
//! doing so for [`WATCHDOG_TIMER`] the device resets.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::peripherals::WATCHDOG as P_RpWatchdog;
use embassy_rp::watchdog::Watchdog;

use crate::constants::WATCHDOG_TIMER;

/// Create and start the hardware watchdog.  It is then owned by the bus,
/// which is what needs to feed it.
pub fn create_watchdog(p_watchdog: P_RpWatchdog) -> Watchdog {
    let mut watchdog = Watchdog::new(p_watchdog);
    watchdog.start(WATCHDOG_TIMER);
    info!("Watchdog started");
    watchdog
}

/// Perform a normal reboot.
pub fn reboot_normal() -> ! {
    info!("Rebooting");
    cortex_m::peripheral::SCB::sys_reset();
}

/// Reboot into the boot ROM's USB bootloader, for a firmware update.
pub fn reboot_bootloader() -> ! {
    info!("Rebooting into the bootloader");

    #[cfg(feature = "pico")]
    #[allow(unused_unsafe)]
    unsafe {
        embassy_rp::rom_data::reset_to_usb_boot(0, 0);
    }

    #[cfg(feature = "pico2")]
    #[allow(unused_unsafe)]
    unsafe {
        // BOOTSEL reboot type, no delay
        embassy_rp::rom_data::reboot(0x0002, 10, 0, 0);
    }

    // Shouldn't get here.  Reboot normally instead.
    reboot_normal()
}
