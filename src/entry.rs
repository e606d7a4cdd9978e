//! Firmware start of day, and panic handling.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_executor::Spawner;
use embassy_rp::gpio::Flex;
use embassy_time::Timer;

use crate::constants::{LOOP_LOG_INTERVAL, SERIAL};
use crate::core1::spawn_core1;
use crate::dev_info::DeviceInfo;
use crate::dispatch::{Dispatcher, RamEeprom};
use crate::infra::gpio::{IecLines, Line, RpBus, pins};
use crate::infra::watchdog::{create_watchdog, reboot_normal};
use crate::protocol::IecDriver;
use crate::task::spawn_or_reboot;
use crate::usb::control::DISPATCHER;
use crate::usb::{UsbStack, usb_task};
use crate::util::built::log_fw_info;

/// Main entry point for the firmware.  Called by the binary's `main()`.
pub async fn common_main(spawner: Spawner, bin_name: &'static str) -> ! {
    let p = embassy_rp::init(Default::default());

    log_fw_info(bin_name, SERIAL);

    // Start the watchdog first, in case anything below hangs.
    let watchdog = create_watchdog(p.WATCHDOG);

    // Pins are listed in `pins`.  These have to match.
    let lines = IecLines {
        clock: Line::new(Flex::new(p.PIN_19), Flex::new(p.PIN_11)),
        data: Line::new(Flex::new(p.PIN_20), Flex::new(p.PIN_13)),
        atn: Line::new(Flex::new(p.PIN_17), Flex::new(p.PIN_12)),
        reset: Line::new(Flex::new(p.PIN_18), Flex::new(p.PIN_10)),
        srq: Line::new(Flex::new(p.PIN_16), Flex::new(p.PIN_14)),
    };
    let parallel = [
        Flex::new(p.PIN_2),
        Flex::new(p.PIN_3),
        Flex::new(p.PIN_4),
        Flex::new(p.PIN_5),
        Flex::new(p.PIN_9),
        Flex::new(p.PIN_8),
        Flex::new(p.PIN_7),
        Flex::new(p.PIN_6),
    ];
    debug!("Parallel port on pins {}", pins::PARALLEL);

    // The parallel port header is always fitted on this hardware.
    let bus = RpBus::new(lines, parallel, watchdog);
    let info = DeviceInfo::for_hardware(true);
    info!("Capabilities: 0x{:04x}", info.capabilities.bits());
    let dispatcher = Dispatcher::new(IecDriver::new(bus), RamEeprom::new(), info);
    DISPATCHER.lock(|d| d.borrow_mut().replace(dispatcher));

    // Create the USB stack after the dispatcher, so the first request finds
    // it.
    let usb = UsbStack::create_static(p.USB);
    spawn_or_reboot(spawner.spawn(usb_task(usb)), "USB");

    // Bus operations run on core 1, so they don't hold up the USB stack.
    spawn_core1(p.CORE1);

    loop {
        trace!("Main loop");
        Timer::after(LOOP_LOG_INTERVAL).await;
    }
}

/// Called by the binary's defmt panic handler.
pub fn defmt_panic_handler() -> ! {
    error!("defmt panic");
    reboot_normal()
}

/// Called by the binary's panic handler.  We log and reboot, which leaves
/// the bus released.
pub fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    error!("Panic: {}", defmt::Display2Format(info));
    reboot_normal()
}
