//! Device identity and capabilities, as reported by INFO.
//!
//! The same type is used by the host to parse the reply, so both sides
//! agree on the layout:
//!
//! | Byte | Contents |
//! |---|---|
//! | 0 | Firmware major version |
//! | 1 | Firmware minor version |
//! | 2-3 | Capabilities, little endian |
//! | 4 | Bootloader major version (6 byte reply only) |
//! | 5 | Bootloader minor version (6 byte reply only) |
//!
//! Older devices send the first 4 bytes only.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::{
    BOOTLOADER_VERSION_MAJOR, BOOTLOADER_VERSION_MINOR, FIRMWARE_VERSION_MAJOR,
    FIRMWARE_VERSION_MINOR, INFO_RESPONSE_LEN, INFO_RESPONSE_SHORT_LEN,
};
use crate::types::Capabilities;

/// What INFO reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware: (u8, u8),
    pub bootloader: Option<(u8, u8)>,
    pub capabilities: Capabilities,
}

impl DeviceInfo {
    /// This firmware's INFO.  The parallel protocols, and raw parallel port
    /// access, are only offered if the parallel cable is fitted.
    pub fn for_hardware(parallel_port: bool) -> Self {
        let mut capabilities = Capabilities::CBM
            | Capabilities::LL
            | Capabilities::S1
            | Capabilities::S2
            | Capabilities::BOOTLOADER;
        if parallel_port {
            capabilities |= Capabilities::PP | Capabilities::PP_PROTO | Capabilities::P2;
        }
        Self {
            firmware: (FIRMWARE_VERSION_MAJOR, FIRMWARE_VERSION_MINOR),
            bootloader: Some((BOOTLOADER_VERSION_MAJOR, BOOTLOADER_VERSION_MINOR)),
            capabilities,
        }
    }

    /// Write the INFO reply into `buf`, returning its length.  `buf` must
    /// hold at least [`INFO_RESPONSE_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let [cap_lo, cap_hi] = self.capabilities.bits().to_le_bytes();
        buf[0] = self.firmware.0;
        buf[1] = self.firmware.1;
        buf[2] = cap_lo;
        buf[3] = cap_hi;
        match self.bootloader {
            Some((major, minor)) => {
                buf[4] = major;
                buf[5] = minor;
                INFO_RESPONSE_LEN
            }
            None => INFO_RESPONSE_SHORT_LEN,
        }
    }

    /// Parse an INFO reply.  Unknown capability bits are dropped.  The
    /// bootloader version is only believed if the BOOTLOADER capability
    /// says it is there.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < INFO_RESPONSE_SHORT_LEN {
            return None;
        }
        let capabilities = Capabilities::from_bits_truncate(u16::from_le_bytes([buf[2], buf[3]]));
        let bootloader = if buf.len() >= INFO_RESPONSE_LEN
            && capabilities.contains(Capabilities::BOOTLOADER)
        {
            Some((buf[4], buf[5]))
        } else {
            None
        };
        Some(Self {
            firmware: (buf[0], buf[1]),
            bootloader,
            capabilities,
        })
    }

    pub fn supports(&self, capabilities: Capabilities) -> bool {
        self.capabilities.contains(capabilities)
    }

    /// Whether the parallel cable is fitted, and the parallel protocol is
    /// available over it.
    pub fn has_parallel_cable(&self) -> bool {
        self.supports(Capabilities::PP | Capabilities::PP_PROTO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_info() {
        let info = DeviceInfo::for_hardware(true);
        let mut buf = [0u8; INFO_RESPONSE_LEN];
        assert_eq!(info.encode(&mut buf), 6);
        assert_eq!(buf[0], FIRMWARE_VERSION_MAJOR);
        assert_eq!(buf[2], 0xf7);
        assert_eq!(buf[3], 0x40);
        assert_eq!(DeviceInfo::decode(&buf), Some(info));
        assert!(info.has_parallel_cable());
    }

    #[test]
    fn short_info_has_no_bootloader() {
        let info = DeviceInfo::decode(&[1, 4, 0x33, 0x00]).unwrap();
        assert_eq!(info.firmware, (1, 4));
        assert_eq!(info.bootloader, None);
        assert!(info.supports(Capabilities::S2));
        assert!(!info.has_parallel_cable());
        assert_eq!(DeviceInfo::decode(&[1, 2]), None);
    }
}
