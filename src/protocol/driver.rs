//! This file defines the `BusLines` trait, which is implemented by the
//! hardware (and the simulator) to give the engine access to the bus, and the
//! errors the engine returns.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

use crate::types::Lines;

/// Defines errors for the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// Device timeout - no response within expected time
    Timeout,
    /// No devices detected on the bus
    NoDevices,
    /// The device we were talking to went away
    NoDevice,
    /// The device didn't acknowledge a byte
    Io,
    /// Operation was cancelled
    Abort,
    /// The talker signalled end of data.  Not an error to the caller - the
    /// read loop converts it into a short read.
    Eoi,
}

impl DriverError {
    /// The code used for this error on the wire, in GET_RESULT.
    pub fn code(self) -> u8 {
        match self {
            Self::Timeout => 1,
            Self::NoDevices => 2,
            Self::NoDevice => 3,
            Self::Io => 4,
            Self::Abort => 5,
            // Never reported - converted to a short read
            Self::Eoi => 0,
        }
    }

    /// Parse a GET_RESULT error code.  0 means no error, so gives `None`, as
    /// does an unknown code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Timeout),
            2 => Some(Self::NoDevices),
            3 => Some(Self::NoDevice),
            4 => Some(Self::Io),
            5 => Some(Self::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timeout"),
            Self::NoDevices => write!(f, "NoDevices"),
            Self::NoDevice => write!(f, "NoDevice"),
            Self::Io => write!(f, "Io"),
            Self::Abort => write!(f, "Abort"),
            Self::Eoi => write!(f, "Eoi"),
        }
    }
}

/// Access to the physical bus.
///
/// The bus is open-collector: a line is either asserted (we pull it low) or
/// released (we stop driving it, and the pull-up takes it high unless
/// another device is pulling it low).  Implementations must never drive a
/// line high.
pub trait BusLines {
    /// Assert (pull low) the given lines.
    fn set(&mut self, lines: Lines);

    /// Release the given lines.
    fn release(&mut self, lines: Lines);

    /// The lines currently asserted on the bus, by anyone.
    fn poll(&mut self) -> Lines;

    /// Drive a byte onto the parallel port.  LSB is DIO 0.
    fn pp_write(&mut self, byte: u8);

    /// Turn the parallel port around to input, and read it.
    fn pp_read(&mut self) -> u8;
}

/// A transfer which failed part way through.  Carries the number of bytes
/// moved before the failure, which the host uses to report partial
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferError {
    pub error: DriverError,
    pub count: usize,
}

impl TransferError {
    pub fn new(error: DriverError, count: usize) -> Self {
        Self { error, count }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} bytes", self.error, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        for error in [
            DriverError::Timeout,
            DriverError::NoDevices,
            DriverError::NoDevice,
            DriverError::Io,
            DriverError::Abort,
        ] {
            assert_eq!(DriverError::from_code(error.code()), Some(error));
        }
        assert_eq!(DriverError::Eoi.code(), 0);
        assert_eq!(DriverError::from_code(0), None);
        assert_eq!(DriverError::from_code(6), None);
        assert_eq!(DriverError::from_code(0x42), None);
    }
}
