//! This module contains general types used across the adapter.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use core::fmt;

/// Direction - used to apply to Control transfers, and other operations/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// In is from the device to the host.
    In,

    /// Out is from the host to the device.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "In"),
            Direction::Out => write!(f, "Out"),
        }
    }
}

bitflags! {
    /// The IEC bus lines.  A set bit means the line is asserted (pulled
    /// low).  These values are also used on the wire, by IEC_POLL, IEC_WAIT
    /// and IEC_SETRELEASE.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lines: u8 {
        const DATA = 0x01;
        const CLOCK = 0x02;
        const ATN = 0x04;
        const RESET = 0x08;
        const SRQ = 0x10;
    }
}

impl Lines {
    /// The lines a host is allowed to touch via IEC_SETRELEASE and IEC_WAIT.
    pub const EXTERNAL: Lines = Lines::DATA
        .union(Lines::CLOCK)
        .union(Lines::ATN)
        .union(Lines::RESET)
        .union(Lines::SRQ);

    /// The lines that carry the serial protocols.
    pub const SERIAL: Lines = Lines::DATA.union(Lines::CLOCK).union(Lines::ATN);
}

impl fmt::Display for Lines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Lines {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Lines(0x{:02x})", self.bits());
    }
}

bitflags! {
    /// Capabilities reported in the INFO response.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u16 {
        /// Standard CBM serial protocol
        const CBM = 0x0001;
        /// Low level line control (poll, wait, set/release)
        const LL = 0x0002;
        /// Parallel port fitted
        const PP = 0x0004;
        /// Nibbler support
        const NIB = 0x0008;
        /// Serial 1 protocol
        const S1 = 0x0010;
        /// Serial 2 protocol
        const S2 = 0x0020;
        /// Parallel protocol
        const PP_PROTO = 0x0040;
        /// Parallel 2 protocol
        const P2 = 0x0080;
        /// Bootloader present, and version information available
        const BOOTLOADER = 0x4000;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Capabilities {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Capabilities(0x{:04x})", self.bits());
    }
}
