//! Host side of the xu1541 USB to Commodore IEC bus adapter.
//!
//! - [`device`] finds the adapter and checks what it can do.
//! - [`Bus`] issues the adapter's commands, polling for the results of
//!   those which take time on the bus.
//! - [`Xu1541`] moves files and disk blocks to and from a drive, picking
//!   the fastest working transfer mode when asked to.
//!
//! Everything is synchronous.  The same code runs against the real adapter
//! ([`UsbTransport`]) or the device firmware's own dispatcher driving a
//! simulated bus ([`SimTransport`]).
//!
//! ```ignore
//! use xu1541_host::{Settings, UsbConfig, Xu1541};
//!
//! let xu = Xu1541::open(Settings::default(), &UsbConfig::default())?;
//! let status = xu.write_file("HELLO", b"hello world")?;
//! println!("{status}");
//! ```

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod bus;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod mode;
pub mod transfer;
pub mod transport;

pub use crate::bus::Bus;
pub use crate::config::{DriveType, Settings, TransferMode, UsbConfig};
pub use crate::device::{find_devices, identify, open_device};
pub use crate::error::{Result, Severity, Xu1541Error};
pub use crate::transfer::{DriveStatus, Xu1541};
pub use crate::transport::{SimTransport, Transport, UsbTransport};
