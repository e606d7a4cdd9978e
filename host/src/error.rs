//! Error handling for the host side.
//!
//! Every error has a [`Severity`], which is how a front end decides whether
//! to carry on with the next file of a batch, or stop.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use xu1541::protocol::DriverError;

/// How bad an error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "[Fatal]"),
            Severity::Warning => write!(f, "[Warning]"),
            Severity::Info => write!(f, "[Info]"),
            Severity::Debug => write!(f, "[Debug]"),
        }
    }
}

/// Errors from the host side of the xu1541.
#[derive(Debug, Error)]
pub enum Xu1541Error {
    /// libusb failed.  A STALLed request shows up as `rusb::Error::Pipe`.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("No xu1541 found: VID={vid:04x} PID={pid:04x}")]
    DeviceNotFound { vid: u16, pid: u16 },

    /// The device didn't finish an operation in time.
    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout {
        operation: String,
        waited: Duration,
    },

    /// The device reported a bus error.  `count` bytes were moved first.
    #[error("Bus error {error} after {count} bytes")]
    Bus { error: DriverError, count: usize },

    /// Nothing answered on the bus.
    #[error("No device {device} on the bus")]
    NoDevice { device: u8 },

    /// The device sent something we didn't expect.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The device is still working on an earlier request.
    #[error("Device busy")]
    Busy,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The adapter can't do what was asked - usually because the parallel
    /// cable isn't fitted.
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// The drive completed the operation, but reported an error on its status
    /// channel.
    #[error("Drive {device} status: {status}")]
    Status { device: u8, status: String },

    /// The handle was aborted, and can no longer be used.
    #[error("Aborted")]
    Aborted,
}

impl Xu1541Error {
    pub fn severity(&self) -> Severity {
        match self {
            Xu1541Error::Usb(_)
            | Xu1541Error::DeviceNotFound { .. }
            | Xu1541Error::Protocol(_)
            | Xu1541Error::InvalidArgument(_)
            | Xu1541Error::Unsupported(_) => Severity::Fatal,
            Xu1541Error::Timeout { .. }
            | Xu1541Error::Bus { .. }
            | Xu1541Error::NoDevice { .. }
            | Xu1541Error::Busy
            | Xu1541Error::Status { .. } => Severity::Warning,
            Xu1541Error::Aborted => Severity::Info,
        }
    }

    /// The one line a front end prints for this error, labelled with its
    /// severity.
    pub fn report(&self) -> String {
        format!("{} {}", self.severity(), self)
    }

    /// How many bytes were transferred before the error, if it interrupted a
    /// transfer.
    pub fn count(&self) -> Option<usize> {
        match self {
            Xu1541Error::Bus { count, .. } => Some(*count),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Xu1541Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_labels() {
        let e = Xu1541Error::Status {
            device: 8,
            status: "62,FILE NOT FOUND,00,00".to_string(),
        };
        assert_eq!(e.severity(), Severity::Warning);
        assert_eq!(
            e.report(),
            "[Warning] Drive 8 status: 62,FILE NOT FOUND,00,00"
        );

        let e = Xu1541Error::DeviceNotFound {
            vid: 0x0403,
            pid: 0xc632,
        };
        assert_eq!(e.report(), "[Fatal] No xu1541 found: VID=0403 PID=c632");
        assert_eq!(Xu1541Error::Aborted.report(), "[Info] Aborted");
        assert_eq!(Severity::Debug.to_string(), "[Debug]");
    }

    #[test]
    fn bus_error_count() {
        let e = Xu1541Error::Bus {
            error: DriverError::Io,
            count: 2,
        };
        assert_eq!(e.count(), Some(2));
        assert_eq!(e.to_string(), "Bus error Io after 2 bytes");
        assert_eq!(Xu1541Error::Busy.count(), None);
    }
}
