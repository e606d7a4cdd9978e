//! This file implements the read side of the IEC protocol driver - reading
//! bytes from the drive, in each of the supported protocols.
//!
//! Based on the xum1541 source code.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use super::ProtocolType;
use super::driver::{BusLines, DriverError, TransferError};
use super::event::EventType;
use super::iec::IecDriver;

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::types::Lines;
use crate::util::time::iec::{IEC_T_EOI_ACK, IEC_T_POST_ACK, READ_CLK_TIMEOUT};
use crate::util::time::{Clock, block_us, iec_delay};

impl<B: BusLines + Clock> IecDriver<B> {
    /// Read up to `buf.len()` bytes from the bus using the given protocol.
    ///
    /// A CBM read stops early, successfully, once the talker signals EOI.
    /// Returns the number of bytes read.
    pub fn read(&mut self, buf: &mut [u8], protocol: ProtocolType) -> Result<usize, TransferError> {
        trace!("Read up to {} bytes, protocol {}", buf.len(), protocol);
        self.bus.feed_watchdog();

        self.startup_read(protocol);

        let mut count = 0;
        while count < buf.len() {
            self.bus.feed_watchdog();

            let mut chunk = [0u8; 2];
            let result = match protocol {
                ProtocolType::Cbm => self.read_cbm().map(|b| {
                    chunk[0] = b;
                    1
                }),
                ProtocolType::S1 => self.read_s1().map(|b| {
                    chunk[0] = b;
                    1
                }),
                ProtocolType::S2 => self.read_s2().map(|b| {
                    chunk[0] = b;
                    1
                }),
                ProtocolType::PP => self.read_pp().map(|(b0, b1)| {
                    chunk = [b0, b1];
                    2
                }),
                ProtocolType::P2 => self.read_p2().map(|b| {
                    chunk[0] = b;
                    1
                }),
            };

            match result {
                Ok(len) => {
                    // A PP read of an odd length discards the last byte of
                    // the final pair
                    let len = len.min(buf.len() - count);
                    buf[count..count + len].copy_from_slice(&chunk[..len]);
                    count += len;
                }
                Err(DriverError::Eoi) => {
                    trace!("Read stopped at EOI after {} bytes", count);
                    break;
                }
                Err(e) => {
                    debug!("Read failed after {} bytes: {}", count, e);
                    return Err(TransferError::new(e, count));
                }
            }

            // Stop once the talker has signalled that was the last byte
            if protocol == ProtocolType::Cbm && self.get_eoi() {
                break;
            }
        }

        self.bus.feed_watchdog();
        trace!("Read complete, {} bytes", count);
        Ok(count)
    }

    fn startup_read(&mut self, protocol: ProtocolType) {
        match protocol {
            ProtocolType::Cbm => (),
            ProtocolType::S1 | ProtocolType::PP | ProtocolType::P2 => {
                self.set_lines(Lines::CLOCK);
            }
            ProtocolType::S2 => {
                self.set_release(Lines::ATN, Lines::CLOCK | Lines::DATA);
            }
        }
    }

    // To read a byte using CBM:
    // - Wait for the talker to release CLK, saying it is ready to send
    // - Release DATA, saying we're ready to receive
    // - If the talker doesn't pull CLK within 400us, it is signalling EOI.
    //   Acknowledge by pulsing DATA.
    // - Receive the 8 bits
    // - Acknowledge the frame by pulling DATA
    fn read_cbm(&mut self) -> Result<u8, DriverError> {
        // Wait for clock to be released
        let timeout = self.timeouts.read_start;
        if !self.wait_for(Lines::CLOCK, Lines::empty(), timeout) {
            debug!("Raw read: talker didn't release CLK");
            self.record(EventType::ReadStartTimeout);
            return Err(DriverError::Timeout);
        }

        // Break if we've already seen EOI
        if self.get_eoi() {
            debug!("Raw read: EOI detected");
            return Err(DriverError::Eoi);
        }

        // Release DATA line to signal we're ready for data
        self.release_lines(Lines::DATA);

        // Wait up to 400us for CLK to be pulled low by the drive
        let clock = self.wait_for(Lines::CLOCK, Lines::CLOCK, READ_CLK_TIMEOUT);

        // Check for EOI signalling from talker
        if !clock {
            trace!("Clock high - so EOI signalled");
            self.set_eoi();
            self.set_lines(Lines::DATA);
            block_us!(self.bus, IEC_T_EOI_ACK);
            self.release_lines(Lines::DATA);
        }

        let byte = self.critical(|iec| iec.iec_receive_byte())?;

        // Acknowledge byte received by pulling DATA
        self.set_lines(Lines::DATA);
        block_us!(self.bus, IEC_T_POST_ACK);

        Ok(byte)
    }

    // Receive a single byte, LSB first.  Each bit is valid on DATA while CLK
    // is released, with released meaning 1.
    fn iec_receive_byte(&mut self) -> Result<u8, DriverError> {
        if !self.wait_timeout_2ms(Lines::CLOCK, Lines::CLOCK) {
            debug!("Receive byte: no clock");
            self.record(EventType::ReadBitTimeout);
            return Err(DriverError::Timeout);
        }

        let mut byte: u8 = 0;

        for _ in 0..8 {
            if !self.wait_timeout_2ms(Lines::CLOCK, Lines::empty()) {
                debug!("Receive byte: clock not released");
                self.record(EventType::ReadBitTimeout);
                return Err(DriverError::Timeout);
            }

            byte >>= 1;
            if !self.get(Lines::DATA) {
                byte |= 0x80;
            }

            if !self.wait_timeout_2ms(Lines::CLOCK, Lines::CLOCK) {
                debug!("Receive byte: no clock in loop");
                self.record(EventType::ReadBitTimeout);
                return Err(DriverError::Timeout);
            }
        }

        Ok(byte)
    }

    // S1 involves reading a bit at a time, starting with the LSB, as follows:
    // - Wait for DATA line to be released
    // - Release CLK, and read the drive's CLK - this is our next bit
    // - Pull DATA low to acknowledge the bit
    // - Wait for CLK to change
    // - Release DATA
    // - Wait for DATA to be pulled low
    // - Pull CLK low
    fn read_s1(&mut self) -> Result<u8, DriverError> {
        let mut byte = 0;

        for _ in 0..8 {
            self.fast_wait(Lines::DATA, Lines::empty())?;

            self.release_lines(Lines::CLOCK);
            iec_delay!(self.bus);

            let bit = self.get(Lines::CLOCK);
            byte = (byte >> 1) | ((bit as u8) << 7);

            self.set_lines(Lines::DATA);

            let changed = if bit { Lines::empty() } else { Lines::CLOCK };
            self.fast_wait(Lines::CLOCK, changed)?;

            self.release_lines(Lines::DATA);
            iec_delay!(self.bus);

            self.fast_wait(Lines::DATA, Lines::DATA)?;

            self.set_lines(Lines::CLOCK);
        }

        Ok(byte)
    }

    // S2 involves reading a bit every time the CLK line changes, with the
    // first bit of each pair when CLK is released, and the second when it is
    // pulled low.  We flip ATN once we've read each bit.
    fn read_s2(&mut self) -> Result<u8, DriverError> {
        let mut byte = 0;

        for _ in 0..4 {
            self.fast_wait(Lines::CLOCK, Lines::empty())?;
            iec_delay!(self.bus);
            byte = (byte >> 1) | ((self.get(Lines::DATA) as u8) << 7);
            self.release_lines(Lines::ATN);

            self.fast_wait(Lines::CLOCK, Lines::CLOCK)?;
            iec_delay!(self.bus);
            byte = (byte >> 1) | ((self.get(Lines::DATA) as u8) << 7);
            self.set_lines(Lines::ATN);
        }

        Ok(byte)
    }

    // PP involves reading 2 bytes:
    // - Wait for DATA to be pulled low
    // - Read the first byte from the parallel port, and release CLK
    // - Wait for DATA to be released
    // - Read the second byte from the parallel port, and set CLK
    fn read_pp(&mut self) -> Result<(u8, u8), DriverError> {
        self.fast_wait(Lines::DATA, Lines::DATA)?;
        let byte_0 = self.bus.pp_read();
        self.release_lines(Lines::CLOCK);

        self.fast_wait(Lines::DATA, Lines::empty())?;
        let byte_1 = self.bus.pp_read();
        self.set_lines(Lines::CLOCK);

        Ok((byte_0, byte_1))
    }

    // P2 involves reading a single byte from the parallel port:
    // - Release CLK
    // - Wait for DATA to be released
    // - Read the byte, and set CLK
    // - Wait for DATA to be pulled low
    fn read_p2(&mut self) -> Result<u8, DriverError> {
        self.release_lines(Lines::CLOCK);
        self.fast_wait(Lines::DATA, Lines::empty())?;

        let byte = self.bus.pp_read();
        self.set_lines(Lines::CLOCK);

        self.fast_wait(Lines::DATA, Lines::DATA)?;

        Ok(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolFlags;
    use crate::sim::{CbmDrive, Loopback, SimBus};
    use embassy_time::Duration;

    #[test]
    fn every_byte_round_trips() {
        for protocol in [
            ProtocolType::S1,
            ProtocolType::S2,
            ProtocolType::PP,
            ProtocolType::P2,
        ] {
            let peer = Loopback::new(protocol, protocol.bytes_per_handshake());
            let mut iec = IecDriver::new(SimBus::new(peer));
            for b in 0..=255u8 {
                assert_eq!(iec.write(&[b], protocol, ProtocolFlags::NONE), Ok(1));
                // Give the drive time to turn around
                iec.bus_mut().advance(Duration::from_micros(100));

                let mut buf = [0u8; 1];
                assert_eq!(iec.read(&mut buf, protocol), Ok(1), "{protocol} byte {b}");
                assert_eq!(buf[0], b, "{protocol}");
            }
        }
    }

    #[test]
    fn cbm_read_stops_at_eoi() {
        let mut iec = IecDriver::new(SimBus::new(CbmDrive::new(8)));
        iec.bus_mut().peer_mut().add_file("FILE", b"hello");
        iec.reset().unwrap();
        iec.open_file(8, 2, b"FILE").unwrap();
        iec.talk(8, 2).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(iec.read(&mut buf, ProtocolType::Cbm), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert!(iec.get_eoi());
    }

    #[test]
    fn block_round_trips_in_pairs() {
        let mut iec = IecDriver::new(SimBus::new(Loopback::new(ProtocolType::PP, 128)));
        let block: [u8; 128] = core::array::from_fn(|i| (i * 7) as u8);
        assert_eq!(iec.write(&block, ProtocolType::PP, ProtocolFlags::NONE), Ok(128));

        let mut buf = [0u8; 128];
        assert_eq!(iec.read(&mut buf, ProtocolType::PP), Ok(128));
        assert_eq!(buf, block);
    }
}
