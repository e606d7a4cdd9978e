//! This module implements the IEC protocol engine.
//!
//! The engine owns the bus lines (via a [`BusLines`] implementation) and
//! implements the bit level encodings of each of the supported protocols:
//! - CBM - the standard Commodore serial protocol, with EOI signalling and
//!   ATN command bytes.
//! - S1 - a faster bit-serial protocol, for use with custom 1541 drive
//!   routines.
//! - S2 - a faster serial protocol which borrows ATN as a clock, moving 2
//!   bits per cycle.
//! - PP - a parallel protocol, moving 2 bytes per handshake over the
//!   parallel port.
//! - P2 - a parallel protocol moving 1 byte per CLK toggle.
//!
//! On top of the byte level it provides bus session control - reset,
//! listen, talk, open, close - in `session`.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod driver;
pub mod event;
pub mod iec;
mod read;
pub mod session;
mod write;

pub use driver::{BusLines, DriverError, TransferError};
pub use event::{Event, EventLog, EventType};
pub use iec::{IecDriver, IecTimeouts};
pub use session::BusState;

use bitflags::bitflags;
use core::fmt;

/// Bus command byte - LISTEN, OR'd with the device number.
pub const CMD_LISTEN: u8 = 0x20;

/// Bus command byte - UNLISTEN.
pub const CMD_UNLISTEN: u8 = 0x3f;

/// Bus command byte - TALK, OR'd with the device number.
pub const CMD_TALK: u8 = 0x40;

/// Bus command byte - UNTALK.
pub const CMD_UNTALK: u8 = 0x5f;

/// Bus command byte - secondary address (data channel), OR'd with the
/// secondary address.
pub const CMD_SECONDARY: u8 = 0x60;

/// Bus command byte - CLOSE, OR'd with the secondary address.
pub const CMD_CLOSE: u8 = 0xe0;

/// Bus command byte - OPEN, OR'd with the secondary address.
pub const CMD_OPEN: u8 = 0xf0;

/// Mask for the device number within LISTEN and TALK.
pub const DEVICE_MASK: u8 = 0x1f;

/// Mask for the secondary address within the secondary, OPEN and CLOSE
/// commands.
pub const SECONDARY_MASK: u8 = 0x0f;

/// Supported transfer protocols.  The discriminant is the value used on the
/// wire, in the index of REQUEST_READ, and as the offset from the S1
/// command code for the sub-protocol commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolType {
    Cbm = 0,
    S1 = 1,
    S2 = 2,
    PP = 3,
    P2 = 4,
}

impl ProtocolType {
    /// How many bytes are moved by each handshake of this protocol.
    pub fn bytes_per_handshake(self) -> usize {
        match self {
            Self::PP => 2,
            _ => 1,
        }
    }

    /// Whether this protocol needs the parallel port.
    pub fn is_parallel(self) -> bool {
        matches!(self, Self::PP | Self::P2)
    }
}

/// Implement `TryFrom` for `ProtocolType` in order to parse an incoming byte
/// into a `ProtocolType`.
impl TryFrom<u8> for ProtocolType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cbm),
            1 => Ok(Self::S1),
            2 => Ok(Self::S2),
            3 => Ok(Self::PP),
            4 => Ok(Self::P2),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbm => write!(f, "CBM"),
            Self::S1 => write!(f, "S1"),
            Self::S2 => write!(f, "S2"),
            Self::PP => write!(f, "PP"),
            Self::P2 => write!(f, "P2"),
        }
    }
}

bitflags! {
    /// Flags modifying a CBM protocol write.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtocolFlags: u8 {
        const NONE = 0x00;
        /// After the write, turn the bus around so the device talks.
        const CBM_TALK = 0x01;
        /// Send the bytes under ATN, as commands.
        const CBM_ATN = 0x02;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ProtocolFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ProtocolFlags({})", self.bits());
    }
}

impl fmt::Display for ProtocolFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolFlags({})", self.bits())
    }
}

impl ProtocolFlags {
    pub fn is_talk(self) -> bool {
        self.contains(Self::CBM_TALK)
    }

    pub fn is_atn(self) -> bool {
        self.contains(Self::CBM_ATN)
    }
}

impl TryFrom<u8> for ProtocolFlags {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ProtocolFlags::from_bits(value).ok_or(())
    }
}
