//! This file implements the write side of the IEC protocol driver - writing
//! bytes from the adapter to the drive, in each of the supported protocols.
//!
//! Based on the xum1541 source code.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use super::driver::{BusLines, DriverError, TransferError};
use super::event::EventType;
use super::iec::IecDriver;
use super::session::BusState;
use super::{ProtocolFlags, ProtocolType};

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::types::Lines;
use crate::util::time::iec::{IEC_T_BB, IEC_T_NE, IEC_T_R, IEC_T_S, IEC_T_V};
use crate::util::time::{Clock, block_us, iec_delay};

impl<B: BusLines + Clock> IecDriver<B> {
    /// Write bytes to the bus using the given protocol.
    ///
    /// Returns the number of bytes written.  On failure, the error carries
    /// how many bytes made it before the failure, so that a NAK of the 3rd
    /// byte reports 2.
    ///
    /// For CBM, `flags` controls whether the bytes are commands (sent under
    /// ATN), and whether the bus is turned around afterwards so the device
    /// talks.  The last byte of a non-ATN CBM write is sent with EOI.
    pub fn write(
        &mut self,
        data: &[u8],
        protocol: ProtocolType,
        flags: ProtocolFlags,
    ) -> Result<usize, TransferError> {
        trace!(
            "Write {} bytes, protocol {}, flags {}",
            data.len(),
            protocol,
            flags
        );
        self.bus.feed_watchdog();

        self.startup_write(protocol, flags)
            .map_err(|e| TransferError::new(e, 0))?;

        let loop_result = self.write_main_loop(data, protocol, flags);

        let result = match protocol {
            ProtocolType::Cbm => self.cbm_terminate_write(loop_result, flags),
            _ => loop_result,
        };

        self.bus.feed_watchdog();
        match result {
            Ok(count) => trace!("Write complete, {} bytes", count),
            Err(e) => {
                debug!("Write failed: {}", e);
                if protocol == ProtocolType::Cbm && flags.is_atn() {
                    self.state = BusState::Unknown;
                }
            }
        }
        result
    }

    fn startup_write(
        &mut self,
        protocol: ProtocolType,
        flags: ProtocolFlags,
    ) -> Result<(), DriverError> {
        match protocol {
            ProtocolType::Cbm => self.cbm_startup_write(flags),
            ProtocolType::S1 => {
                self.set_release(Lines::CLOCK, Lines::DATA);
                Ok(())
            }
            ProtocolType::S2 => {
                self.set_release(Lines::ATN, Lines::CLOCK | Lines::DATA);
                Ok(())
            }
            ProtocolType::PP | ProtocolType::P2 => {
                self.set_lines(Lines::CLOCK);
                Ok(())
            }
        }
    }

    fn cbm_startup_write(&mut self, flags: ProtocolFlags) -> Result<(), DriverError> {
        self.clear_eoi();

        // Check if any device is present on the bus.  If both ATN and RESET
        // are held low, this corresponds to a device present but powered
        // off.  If we carried on, we'd get stuck waiting for a listener.
        let held = Lines::ATN | Lines::RESET;
        let timeout = self.timeouts.handshake;
        if !self.wait_while(held, held, timeout) {
            debug!("Raw write: ATN and RESET both held");
            self.record(EventType::NoDevices);
            return Err(DriverError::NoDevices);
        }

        // Release DATA
        self.release_lines(Lines::DATA);

        // Either pull CLK low, or both ATN and CLK
        if flags.is_atn() {
            trace!("Bus state {} -> {}", self.state, BusState::BusyAtn);
            self.state = BusState::BusyAtn;
            self.set_lines(Lines::CLOCK | Lines::ATN);
        } else {
            self.set_lines(Lines::CLOCK);
        }

        // Short delay to let lines settle
        iec_delay!(self.bus);

        // Wait for any device to pull DATA after we set CLK.  This should be
        // the 1ms ATN response time, but allow a bit longer.
        if !self.wait_timeout_2ms(Lines::DATA, Lines::DATA) {
            debug!("Raw write: No devices detected");
            self.release_lines(Lines::CLOCK | Lines::ATN);
            self.record(EventType::NoDevices);
            return Err(DriverError::NoDevices);
        }

        // Wait for drive to be ready for us to release CLK.  The transfer
        // starts to be unreliable below 10us.
        block_us!(self.bus, IEC_T_NE);

        Ok(())
    }

    fn cbm_terminate_write(
        &mut self,
        loop_result: Result<usize, TransferError>,
        flags: ProtocolFlags,
    ) -> Result<usize, TransferError> {
        match loop_result {
            Ok(count) => {
                if flags.is_talk() {
                    trace!("Put drive into talk mode");

                    // Hold DATA and release ATN
                    self.set_release(Lines::DATA, Lines::ATN);
                    self.bus.block_ns(500);

                    // Release CLK and wait for the device to grab it
                    self.release_lines(Lines::CLOCK);
                    iec_delay!(self.bus);

                    let timeout = self.timeouts.talk_turnaround;
                    if self.wait_for(Lines::CLOCK, Lines::CLOCK, timeout) {
                        Ok(count)
                    } else {
                        debug!("Device didn't take CLK after talk turnaround");
                        self.record(EventType::TalkTimeout);
                        self.release_lines(Lines::DATA | Lines::CLOCK | Lines::ATN);
                        Err(TransferError::new(DriverError::Timeout, count))
                    }
                } else {
                    self.release_lines(Lines::ATN);
                    Ok(count)
                }
            }
            Err(e) => {
                block_us!(self.bus, IEC_T_R);
                self.release_lines(Lines::CLOCK | Lines::ATN);
                Err(e)
            }
        }
    }

    fn write_main_loop(
        &mut self,
        data: &[u8],
        protocol: ProtocolType,
        flags: ProtocolFlags,
    ) -> Result<usize, TransferError> {
        let mut count = 0;

        // PP moves 2 bytes per handshake.  An odd trailing byte is padded,
        // and the pad isn't counted.
        for chunk in data.chunks(protocol.bytes_per_handshake()) {
            self.bus.feed_watchdog();

            let result = match protocol {
                ProtocolType::Cbm => {
                    let is_last = count == data.len() - 1;
                    self.write_cbm(flags, is_last, chunk[0])
                }
                ProtocolType::S1 => self.write_s1(chunk[0]),
                ProtocolType::S2 => self.write_s2(chunk[0]),
                ProtocolType::PP => {
                    let byte_1 = chunk.get(1).copied().unwrap_or(0);
                    self.write_pp(chunk[0], byte_1)
                }
                ProtocolType::P2 => self.write_p2(chunk[0]),
            };

            match result {
                Ok(()) => count += chunk.len(),
                Err(e) => {
                    debug!("Write failed after {} bytes: {}", count, e);
                    return Err(TransferError::new(e, count));
                }
            }
        }

        Ok(count)
    }

    // To write a byte using CBM:
    // - The listener must be holding DATA, else it has gone away
    // - Release CLK, to say we're ready to send, and wait (for a long time,
    //   if necessary) for the listener to release DATA
    // - For the last byte (not under ATN) don't pull CLK straight away.
    //   The listener times out and acknowledges EOI by pulsing DATA.
    // - Pull CLK, and clock out the 8 bits, LSB first
    // - The listener acknowledges the frame by pulling DATA
    fn write_cbm(&mut self, flags: ProtocolFlags, is_last: bool, byte: u8) -> Result<(), DriverError> {
        // Be sure DATA line has been pulled by device
        if !self.get(Lines::DATA) {
            debug!("Raw write: Device not present");
            return Err(DriverError::NoDevice);
        }

        // Release CLK and wait for listener to release DATA
        if !self.wait_for_listener() {
            debug!("Raw write: No listener");
            self.record(EventType::ListenerTimeout);
            return Err(DriverError::Timeout);
        }

        // Signal EOI for last byte
        if is_last && !flags.is_atn() {
            trace!("Signal EOI");
            self.wait_timeout_2ms(Lines::DATA, Lines::DATA);
            self.wait_timeout_2ms(Lines::DATA, Lines::empty());
        }

        // Pull CLK low
        self.set_lines(Lines::CLOCK);

        // Send the byte
        if self.critical(|iec| iec.iec_send_byte(byte)) {
            block_us!(self.bus, IEC_T_BB);
            Ok(())
        } else {
            debug!("Raw write: io err");
            self.record(EventType::AckTimeout);
            Err(DriverError::Io)
        }
    }

    fn wait_for_listener(&mut self) -> bool {
        self.release_lines(Lines::CLOCK);
        let timeout = self.timeouts.listener;
        self.wait_for(Lines::DATA, Lines::empty(), timeout)
    }

    // Send a byte, one bit at a time.  A 0 bit is sent by pulling DATA, and
    // each bit is clocked by releasing CLK.  Timing is critical here.
    fn iec_send_byte(&mut self, b: u8) -> bool {
        let mut data = b;

        for _ in 0..8 {
            // Wait for setup time
            block_us!(self.bus, IEC_T_S + 55);

            // Set the bit value on the DATA line
            if (data & 1) == 0 {
                self.set_lines(Lines::DATA);
                iec_delay!(self.bus);
            }

            // Trigger clock edge and hold valid for specified time
            self.release_lines(Lines::CLOCK);
            block_us!(self.bus, IEC_T_V);

            // Prepare for next bit
            self.set_release(Lines::CLOCK, Lines::DATA);
            data >>= 1;
        }

        // Wait for acknowledgement
        let ack = self.wait_timeout_2ms(Lines::DATA, Lines::DATA);
        if !ack {
            debug!("send_byte: no ack");
        }
        ack
    }

    // To write a byte using S1:
    // - Send the byte bit by bit, starting from the MSB
    // - For each bit, set DATA to represent the bit (1 is pulled low, 0 high)
    // - Release CLK
    // - Wait for the drive to pull CLK, having sampled the bit
    // - Send the bit a second time, using DATA in the opposite direction
    // - Wait for drive to release CLK
    // - Set CLK and release DATA
    // - Wait for DATA to be released
    fn write_s1(&mut self, byte: u8) -> Result<(), DriverError> {
        let mut byte = byte;

        for _ in 0..8 {
            let bit = byte & 0x80 != 0;
            if bit {
                self.set_lines(Lines::DATA);
            } else {
                self.release_lines(Lines::DATA);
            }
            self.settle();

            self.release_lines(Lines::CLOCK);
            self.settle();

            self.fast_wait(Lines::CLOCK, Lines::CLOCK)?;

            // Second copy of the bit, inverted
            if bit {
                self.release_lines(Lines::DATA);
            } else {
                self.set_lines(Lines::DATA);
            }

            self.fast_wait(Lines::CLOCK, Lines::empty())?;

            self.set_release(Lines::CLOCK, Lines::DATA);
            self.settle();

            self.fast_wait(Lines::DATA, Lines::empty())?;

            byte <<= 1;
        }

        Ok(())
    }

    // To write a byte using S2:
    // - Send the byte 2 bits for each pass through the loop, starting from
    //   the LSB
    // - For the first bit of the pair, set DATA to represent the bit (1 is
    //   pulled low, 0 high), then release ATN
    // - Wait for CLK to be released
    // - Send the next bit, then set ATN
    // - Wait for CLK to be set
    // - Finally, release DATA
    fn write_s2(&mut self, byte: u8) -> Result<(), DriverError> {
        let mut byte = byte;

        for _ in 0..4 {
            self.s2_put_bit(byte & 1 != 0);
            byte >>= 1;
            self.release_lines(Lines::ATN);
            self.fast_wait(Lines::CLOCK, Lines::empty())?;

            self.s2_put_bit(byte & 1 != 0);
            byte >>= 1;
            self.set_lines(Lines::ATN);
            self.fast_wait(Lines::CLOCK, Lines::CLOCK)?;
        }

        self.release_lines(Lines::DATA);
        iec_delay!(self.bus);

        Ok(())
    }

    fn s2_put_bit(&mut self, bit: bool) {
        if bit {
            self.set_lines(Lines::DATA);
        } else {
            self.release_lines(Lines::DATA);
        }
        iec_delay!(self.bus);
    }

    // To write 2 bytes using PP:
    // - Wait for the drive to pull DATA, saying it's ready
    // - Put the first byte on the parallel port, and release CLK
    // - Wait for DATA to be released
    // - Put the second byte on the parallel port, and set CLK
    fn write_pp(&mut self, byte_0: u8, byte_1: u8) -> Result<(), DriverError> {
        self.fast_wait(Lines::DATA, Lines::DATA)?;

        self.bus.pp_write(byte_0);
        self.bus.block_ns(500);
        self.release_lines(Lines::CLOCK);

        self.fast_wait(Lines::DATA, Lines::empty())?;

        self.bus.pp_write(byte_1);
        self.bus.block_ns(500);
        self.set_lines(Lines::CLOCK);

        Ok(())
    }

    // To write a byte using P2:
    // - Put the byte on the parallel port, and release CLK
    // - Wait for DATA to be released, saying the drive has read it
    // - Set CLK
    // - Wait for DATA to be pulled low again
    fn write_p2(&mut self, byte: u8) -> Result<(), DriverError> {
        self.bus.pp_write(byte);
        self.bus.block_ns(500);
        self.release_lines(Lines::CLOCK);

        self.fast_wait(Lines::DATA, Lines::empty())?;

        self.set_lines(Lines::CLOCK);

        self.fast_wait(Lines::DATA, Lines::DATA)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IecTimeouts;
    use crate::sim::{CbmDrive, Loopback, NoPeer, SimBus};
    use embassy_time::Duration;

    fn listening_drive(drive: CbmDrive) -> IecDriver<SimBus<CbmDrive>> {
        let mut iec = IecDriver::new(SimBus::new(drive));
        iec.reset().unwrap();
        iec.listen(8, 2).unwrap();
        iec
    }

    #[test]
    fn eoi_only_on_last_byte() {
        let mut iec = listening_drive(CbmDrive::new(8));
        assert_eq!(iec.write(b"A", ProtocolType::Cbm, ProtocolFlags::NONE), Ok(1));
        assert_eq!(iec.bus().peer().received(), &[(b'A', true)]);

        assert_eq!(iec.write(b"BCD", ProtocolType::Cbm, ProtocolFlags::NONE), Ok(3));
        assert_eq!(
            &iec.bus().peer().received()[1..],
            &[(b'B', false), (b'C', false), (b'D', true)]
        );
    }

    #[test]
    fn nak_reports_bytes_before_it() {
        let mut iec = listening_drive(CbmDrive::new(8).with_nak_on_data_byte(2));
        assert_eq!(
            iec.write(b"0123456789", ProtocolType::Cbm, ProtocolFlags::NONE),
            Err(TransferError::new(DriverError::Io, 2))
        );
        assert!(!iec.bus().host_lines().intersects(Lines::ATN | Lines::CLOCK));
    }

    #[test]
    fn write_with_no_devices_fails_fast() {
        let mut iec = IecDriver::new(SimBus::new(NoPeer));
        let start = iec.bus().now();
        assert_eq!(
            iec.write(b"x", ProtocolType::Cbm, ProtocolFlags::NONE),
            Err(TransferError::new(DriverError::NoDevices, 0))
        );
        assert!(iec.bus().now() - start < Duration::from_millis(3));
        assert!(iec.bus().host_lines().is_empty());
    }

    #[test]
    fn pp_pads_odd_length() {
        let mut iec = IecDriver::new(SimBus::new(Loopback::new(ProtocolType::PP, 4)));
        assert_eq!(iec.write(b"abc", ProtocolType::PP, ProtocolFlags::NONE), Ok(3));
        assert_eq!(iec.bus().peer().received(), b"abc\0");
    }

    #[test]
    fn fast_write_with_no_drive_times_out() {
        let timeouts = IecTimeouts {
            fast_handshake: Duration::from_millis(1),
            ..Default::default()
        };
        let mut iec = IecDriver::with_timeouts(SimBus::new(NoPeer), timeouts);
        let result = iec.write(b"ab", ProtocolType::S2, ProtocolFlags::NONE);
        assert_eq!(result, Err(TransferError::new(DriverError::Timeout, 0)));
    }
}
