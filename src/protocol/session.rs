//! Bus session control - LISTEN, TALK, their inverses, and OPEN and CLOSE.
//!
//! Each of these is a CBM write of one or two command bytes under ATN.  The
//! engine tracks the resulting bus state, which is used for logging and by
//! the dispatcher's sanity checks.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

use super::driver::{BusLines, DriverError};
use super::iec::IecDriver;
use super::{
    CMD_CLOSE, CMD_LISTEN, CMD_OPEN, CMD_SECONDARY, CMD_TALK, CMD_UNLISTEN, CMD_UNTALK,
    DEVICE_MASK, ProtocolFlags, ProtocolType, SECONDARY_MASK,
};

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::util::time::Clock;

/// What the bus is doing, as far as we know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Not yet reset, or a command failed part way through.
    Unknown,
    /// Nobody is talking or listening.
    Free,
    /// We hold ATN to send command bytes.  A raw write under ATN leaves
    /// the bus here, as who it addressed isn't tracked.
    BusyAtn,
    /// The given device is listening to us.
    Listening(u8),
    /// The given device is talking to us.
    Talking(u8),
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Free => write!(f, "Free"),
            Self::BusyAtn => write!(f, "BusyAtn"),
            Self::Listening(dev) => write!(f, "Listening({dev})"),
            Self::Talking(dev) => write!(f, "Talking({dev})"),
        }
    }
}

impl<B: BusLines + Clock> IecDriver<B> {
    /// Tell a device to listen on the given secondary address.
    pub fn listen(&mut self, device: u8, secondary: u8) -> Result<(), DriverError> {
        let cmd = [
            CMD_LISTEN | (device & DEVICE_MASK),
            CMD_SECONDARY | (secondary & SECONDARY_MASK),
        ];
        self.command(&cmd, ProtocolFlags::CBM_ATN, BusState::Listening(device))
    }

    /// Tell a device to talk on the given secondary address.  Turns the bus
    /// around, so the device holds CLK when this returns successfully.
    pub fn talk(&mut self, device: u8, secondary: u8) -> Result<(), DriverError> {
        let cmd = [
            CMD_TALK | (device & DEVICE_MASK),
            CMD_SECONDARY | (secondary & SECONDARY_MASK),
        ];
        self.command(
            &cmd,
            ProtocolFlags::CBM_ATN | ProtocolFlags::CBM_TALK,
            BusState::Talking(device),
        )
    }

    /// Tell all devices to stop listening.
    pub fn unlisten(&mut self) -> Result<(), DriverError> {
        self.command(&[CMD_UNLISTEN], ProtocolFlags::CBM_ATN, BusState::Free)
    }

    /// Tell all devices to stop talking.
    pub fn untalk(&mut self) -> Result<(), DriverError> {
        self.command(&[CMD_UNTALK], ProtocolFlags::CBM_ATN, BusState::Free)
    }

    /// Send OPEN for the given secondary address.  The device is left
    /// listening, for the caller to send the filename and then UNLISTEN.
    pub fn open(&mut self, device: u8, secondary: u8) -> Result<(), DriverError> {
        let cmd = [
            CMD_LISTEN | (device & DEVICE_MASK),
            CMD_OPEN | (secondary & SECONDARY_MASK),
        ];
        self.command(&cmd, ProtocolFlags::CBM_ATN, BusState::Listening(device))
    }

    /// OPEN, send the filename, and UNLISTEN.
    pub fn open_file(&mut self, device: u8, secondary: u8, name: &[u8]) -> Result<(), DriverError> {
        self.open(device, secondary)?;
        if !name.is_empty() {
            if let Err(e) = self.write(name, ProtocolType::Cbm, ProtocolFlags::NONE) {
                // Leave the bus tidy before reporting the failure
                let _ = self.unlisten();
                return Err(e.error);
            }
        }
        self.unlisten()
    }

    /// Send CLOSE for the given secondary address, and UNLISTEN.
    pub fn close(&mut self, device: u8, secondary: u8) -> Result<(), DriverError> {
        let cmd = [
            CMD_LISTEN | (device & DEVICE_MASK),
            CMD_CLOSE | (secondary & SECONDARY_MASK),
        ];
        self.command(&cmd, ProtocolFlags::CBM_ATN, BusState::Listening(device))?;
        self.unlisten()
    }

    fn command(
        &mut self,
        cmd: &[u8],
        flags: ProtocolFlags,
        state: BusState,
    ) -> Result<(), DriverError> {
        match self.write(cmd, ProtocolType::Cbm, flags) {
            Ok(_) => {
                trace!("Bus state {} -> {}", self.state, state);
                self.state = state;
                Ok(())
            }
            Err(e) => {
                debug!("Bus command {} failed: {}", cmd[0], e.error);
                self.state = BusState::Unknown;
                Err(e.error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IecTimeouts;
    use crate::sim::{CbmDrive, NoPeer, SimBus};
    use crate::types::Lines;
    use embassy_time::Duration;

    fn drive() -> IecDriver<SimBus<CbmDrive>> {
        let mut iec = IecDriver::new(SimBus::new(CbmDrive::new(8)));
        iec.reset().unwrap();
        iec
    }

    #[test]
    fn listen_then_unlisten() {
        let mut iec = drive();
        iec.listen(8, 2).unwrap();
        assert_eq!(iec.state(), BusState::Listening(8));
        iec.unlisten().unwrap();
        assert_eq!(iec.state(), BusState::Free);

        let drive = iec.bus().peer();
        assert_eq!(drive.commands(), &[0x28, 0x62, 0x3f]);
        assert!(!drive.is_listening());
    }

    #[test]
    fn talk_turns_the_bus_around() {
        let mut iec = drive();
        iec.bus_mut().peer_mut().add_file("DATA", b"x");
        iec.open_file(8, 2, b"DATA").unwrap();
        iec.talk(8, 2).unwrap();
        assert_eq!(iec.state(), BusState::Talking(8));

        // The drive now holds CLK, and we hold DATA
        assert!(iec.poll_lines().contains(Lines::CLOCK));
        assert!(iec.bus().host_lines().contains(Lines::DATA));
        assert!(!iec.bus().host_lines().contains(Lines::ATN));

        iec.untalk().unwrap();
        iec.close(8, 2).unwrap();
        assert_eq!(iec.state(), BusState::Free);
    }

    #[test]
    fn talk_to_missing_file_times_out() {
        let timeouts = IecTimeouts {
            talk_turnaround: Duration::from_millis(10),
            ..Default::default()
        };
        let mut iec = IecDriver::with_timeouts(SimBus::new(CbmDrive::new(8)), timeouts);
        iec.reset().unwrap();
        iec.open_file(8, 2, b"MISSING").unwrap();
        assert_eq!(iec.talk(8, 2), Err(DriverError::Timeout));
        assert_eq!(iec.state(), BusState::Unknown);
    }

    #[test]
    fn commands_with_no_devices() {
        let mut iec = IecDriver::new(SimBus::new(NoPeer));
        assert_eq!(iec.listen(8, 0), Err(DriverError::NoDevices));
        assert_eq!(iec.state(), BusState::Unknown);
        assert!(iec.bus().host_lines().is_empty());
    }

    #[test]
    fn raw_atn_write_leaves_bus_busy() {
        let mut iec = drive();
        assert_eq!(iec.state(), BusState::Free);
        let cmd = [CMD_LISTEN | 8, CMD_SECONDARY | 2];
        let written = iec
            .write(&cmd, ProtocolType::Cbm, ProtocolFlags::CBM_ATN)
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(iec.state(), BusState::BusyAtn);
        assert!(iec.bus().peer().is_listening());

        // A session command puts the tracking back in step
        iec.unlisten().unwrap();
        assert_eq!(iec.state(), BusState::Free);

        iec.write(&cmd, ProtocolType::Cbm, ProtocolFlags::CBM_ATN)
            .unwrap();
        assert_eq!(iec.state(), BusState::BusyAtn);
        iec.reset().unwrap();
        assert_eq!(iec.state(), BusState::Free);
    }

    #[test]
    fn failed_atn_write_leaves_state_unknown() {
        let timeouts = IecTimeouts {
            talk_turnaround: Duration::from_millis(10),
            ..Default::default()
        };
        let mut iec = IecDriver::with_timeouts(SimBus::new(CbmDrive::new(8)), timeouts);
        iec.reset().unwrap();
        iec.open_file(8, 2, b"MISSING").unwrap();
        assert_eq!(iec.state(), BusState::Free);

        let cmd = [CMD_TALK | 8, CMD_SECONDARY | 2];
        let flags = ProtocolFlags::CBM_ATN | ProtocolFlags::CBM_TALK;
        let e = iec.write(&cmd, ProtocolType::Cbm, flags).unwrap_err();
        assert_eq!(e.error, DriverError::Timeout);
        assert_eq!(iec.state(), BusState::Unknown);
    }

    #[test]
    fn open_file_sends_name() {
        let mut iec = drive();
        iec.open_file(8, 1, b"OUT,P,W").unwrap();
        let drive = iec.bus().peer();
        assert_eq!(drive.commands(), &[0x28, 0xf1, 0x3f]);
        assert_eq!(drive.open_name(1), Some(&b"OUT,P,W"[..]));
    }
}
