//! xu1541-rs
//!
//! An xu1541-compatible USB to Commodore IEC bus adapter.  This library
//! contains:
//! - [`protocol`] - the IEC protocol engine, which drives the bus lines and
//!   implements the CBM, S1, S2, PP and P2 byte transfer protocols.
//! - [`dispatch`] - the command dispatcher, which decodes xu1541 USB control
//!   requests and runs long bus operations asynchronously, reporting their
//!   results via GET_RESULT.
//! - The wire types shared with host software: [`types`], [`dev_info`] and
//!   [`constants`].
//! - With the `sim` feature, [`sim`] - a line level simulation of the bus
//!   and of the drives on it, for testing the above on a PC.
//!
//! With the `firmware` feature it also contains the RP2040/RP235x firmware
//! that exposes the dispatcher over USB, using
//! [`VID/PID 0403:c632`](constants::XU1541_VENDOR_ID).

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(feature = "firmware", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("The 'firmware' feature requires either 'pico' or 'pico2'");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Logging macros must be declared first.
mod fmt;

pub mod constants;
pub mod dev_info;
pub mod dispatch;
pub mod protocol;
pub mod types;
pub mod util;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(feature = "firmware")]
mod core1;
#[cfg(feature = "firmware")]
mod entry;
#[cfg(feature = "firmware")]
mod infra;
#[cfg(feature = "firmware")]
mod task;
#[cfg(feature = "firmware")]
mod usb;

pub use dev_info::DeviceInfo;
pub use dispatch::{Command, IoMode};
pub use types::{Capabilities, Direction, Lines};

#[cfg(feature = "firmware")]
pub use entry::{common_main, defmt_panic_handler, panic_handler};

// Extra binary information that picotool can read.
#[cfg(feature = "firmware")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"xu1541 by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(
        c"An xu1541 compatible USB adapter for Commodore disk drives, supporting the CBM, S1, S2, PP and P2 transfer protocols."
    ),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

// A note about Statics
//
// The firmware keeps a few statics, to avoid lifetime issues and to allow
// tasks to be spawned that access them.
//
// - StaticCell for statics that cannot be initialized at compile time, such
//   as the UsbDevice.
// - ConstStaticCell for those that can, such as the USB descriptor buffers.
//   These can be take()n once only.
// - A blocking Mutex wrapping a RefCell for statics that need mutable access
//   from more than one place.  The dispatcher is the only one of these.
//   Everything runs in thread mode on core 0, so ThreadModeRawMutex is
//   enough.
//
// Statics live in the module that creates them.
