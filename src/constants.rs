//! This module contains constants for the xu1541 adapter.
//!
//! Protocol constants are used by both the library (engine, dispatcher) and
//! the host crate, which shares these values on the wire.  USB descriptor and
//! watchdog constants are only used by the firmware.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use static_assertions::const_assert;

//
// Firmware identity, reported by INFO
//

/// Firmware major version.
pub const FIRMWARE_VERSION_MAJOR: u8 = 1;

/// Firmware minor version.
pub const FIRMWARE_VERSION_MINOR: u8 = 8;

/// Version of the bootloader we hand over to for FLASH.  On the RP chips
/// this is the boot ROM, so the version is fixed.
pub const BOOTLOADER_VERSION_MAJOR: u8 = 1;
pub const BOOTLOADER_VERSION_MINOR: u8 = 0;

/// Length of the INFO response with bootloader information.
pub const INFO_RESPONSE_LEN: usize = 6;

/// Length of the INFO response from a device without bootloader
/// information.
pub const INFO_RESPONSE_SHORT_LEN: usize = 4;

//
// Dispatcher constants
//

/// Size of the single I/O request buffer.
pub const IO_BUFFER_SIZE: usize = 128;
pub const IO_BUFFER_SIZE_U16: u16 = IO_BUFFER_SIZE as u16;

/// Maximum size of a synchronous reply to a command.
pub const MAX_REPLY_LEN: usize = 6;

/// Length of the GET_RESULT response.
pub const GET_RESULT_RESPONSE_LEN: usize = 4;

/// Length of the ECHO response.
pub const ECHO_RESPONSE_LEN: usize = 4;

/// Number of events kept in the event log.
pub const EVENT_LOG_SIZE: usize = 8;

/// Size of the emulated EEPROM.
pub const EEPROM_SIZE: usize = 64;

/// Longest IRQ_PAUSE we will perform.
pub const MAX_IRQ_PAUSE_MS: u16 = 1000;

const_assert!(IO_BUFFER_SIZE <= u16::MAX as usize);
const_assert!(MAX_REPLY_LEN >= INFO_RESPONSE_LEN);
const_assert!(MAX_REPLY_LEN >= GET_RESULT_RESPONSE_LEN);

//
// Watchdog and loop timers
//

/// Watchdog timer - the watchdog resets the system if it isn't feed at
/// least this frequently.
pub const WATCHDOG_TIMER: Duration = Duration::from_secs(1);

/// How often the dispatcher task pauses so the USB stack can run, when
/// there is no request in flight.
pub const DISPATCH_LOOP_TIMER: Duration = Duration::from_micros(100);

/// How long to wait after FLASH before entering the bootloader, so the
/// status stage of the request completes first.
pub const BOOTLOADER_REBOOT_DELAY: Duration = Duration::from_millis(100);

/// Stack size for core 1, which runs the dispatcher task.
pub const CORE1_STACK_SIZE: usize = 4096;

/// How often we aim to log from our primary loops to prove they are still
/// alive.
pub const LOOP_LOG_INTERVAL: Duration = Duration::from_secs(5);

//
// USB device configuration constants.
//

/// USB Descriptor information - what current in mA this device draws.  We'll
/// be conservative (i.e. high) and suggest it might draw as much as 500mA.
pub const USB_POWER_MA: u16 = 500;

/// USB Descriptor information - maximum endpoint 0 (control endpoint)
/// packet size.
pub const MAX_PACKET_SIZE_0: u8 = 64;

/// USB Descriptor information - Vendor ID and Product ID.  These are the
/// values used by the original xu1541, so existing host software finds us.
pub const XU1541_VENDOR_ID: u16 = 0x0403;
pub const XU1541_PRODUCT_ID: u16 = 0xc632;

/// USB Descriptor information - manufacturer string
pub const MANUFACTURER: &str = "piers.rocks";

/// USB Descriptor info - product string
pub const PRODUCT: &str = "xu1541";

/// USB Descriptor info - serial number string
pub const SERIAL: &str = "000";

/// USB Descriptor info - device class, subclass, and protocol
pub const USB_CLASS: u8 = 0xff;
pub const USB_SUB_CLASS: u8 = 0;
pub const USB_PROTOCOL: u8 = 0;
