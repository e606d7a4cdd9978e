//! Constants used by the host side of the xu1541.
//!
//! Anything that has to agree with the device - command codes, the USB IDs,
//! the I/O buffer size - comes from the `xu1541` crate and is re-exported
//! here.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::time::Duration;

pub use xu1541::constants::{
    FIRMWARE_VERSION_MAJOR, GET_RESULT_RESPONSE_LEN, INFO_RESPONSE_LEN, IO_BUFFER_SIZE,
    XU1541_PRODUCT_ID, XU1541_VENDOR_ID,
};

/// Oldest firmware major version this crate will talk to.
pub const MIN_FIRMWARE_MAJOR: u8 = 1;

/// The adapter's only interface.
pub const XU1541_INTERFACE: u8 = 0;

//
// Timeouts
//

/// Used to wait for the USB device to respond to a control message.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Used to wait between GET_RESULT polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long an asynchronous bus operation may take before we give up.  A
/// listener can legitimately take 20s to accept a byte.
pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a transfer mode probe may take before the mode is judged not to
/// work.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

//
// Bus and drive
//

/// Minimum Commodore disk drive device number.  Lower numbers are other
/// device types, such as printers.
pub const DEVICE_MIN_NUM: u8 = 8;

/// Maximum disk drive device number we accept.
pub const DEVICE_MAX_NUM: u8 = 11;

/// Default device number.
pub const DEFAULT_DEVICE_NUM: u8 = 8;

/// Channel used for file reads and writes.
pub const DATA_CHANNEL: u8 = 2;

/// The drive's command and status channel.
pub const STATUS_CHANNEL: u8 = 15;

/// Longest status message we'll read.
pub const MAX_STATUS_LEN: usize = 64;

/// Status messages starting with this are success.
pub const STATUS_OK_PREFIX: &str = "00,";

/// Size of a disk block, as moved by `read_block` and `write_block`.
pub const BLOCK_SIZE: usize = 256;

/// Default number of blocks between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1;

/// Byte written, and expected back, when probing a transfer mode.
pub const PROBE_MARKER: u8 = 0x55;
