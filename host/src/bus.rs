//! Bus operations, as issued to the adapter.
//!
//! Quick commands get their reply straight back.  Anything which moves bytes
//! over the bus, or waits on it, is started with one request and then
//! polled with GET_RESULT until the device has finished:
//!
//! | Operation | Start | Finished when GET_RESULT says |
//! |---|---|---|
//! | write | WRITE (or S1..P2 WRITE) with the data | RESULT - bytes written |
//! | read | REQUEST_READ (or S1..P2 READ) | READ_DONE - bytes to collect with READ, or RESULT - nothing read |
//! | talk, listen, open, close... | the command itself | RESULT |
//!
//! Transfers longer than the device's buffer are split into
//! [`IO_BUFFER_SIZE`] chunks.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use xu1541::dev_info::DeviceInfo;
use xu1541::dispatch::SubOp;
use xu1541::protocol::{DriverError, ProtocolFlags, ProtocolType};
use xu1541::{Capabilities, Command, IoMode, Lines};

use crate::config::UsbConfig;
use crate::constants::{GET_RESULT_RESPONSE_LEN, IO_BUFFER_SIZE};
use crate::device::{echo, identify};
use crate::error::{Result, Xu1541Error};
use crate::transport::Transport;

/// What GET_RESULT reported for a finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outcome {
    mode: IoMode,
    result: u16,
    error: Option<DriverError>,
}

/// The bus, as seen through the adapter.
pub struct Bus<T> {
    transport: T,
    info: DeviceInfo,
    poll_interval: Duration,
    result_timeout: Duration,
}

impl<T: Transport> Bus<T> {
    /// Handshake with the adapter, and wrap it.
    pub fn new(mut transport: T, config: &UsbConfig) -> Result<Self> {
        let info = identify(&mut transport)?;
        Ok(Self {
            transport,
            info,
            poll_interval: config.poll_interval,
            result_timeout: config.result_timeout,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Change how long we wait for asynchronous operations.  Returns the old
    /// value.
    pub fn set_result_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.result_timeout, timeout)
    }
}

/// Bus session control
impl<T: Transport> Bus<T> {
    /// Reset the bus.  Replaces anything the device was part way through.
    pub fn reset(&mut self) -> Result<()> {
        debug!("Bus reset");
        self.async_command(Command::Reset, 0, 0, None).map(|_| ())
    }

    pub fn talk(&mut self, device: u8, secondary: u8) -> Result<()> {
        trace!("Talk {device}/{secondary}");
        self.async_command(Command::Talk, device.into(), secondary.into(), Some(device))
            .map(|_| ())
    }

    pub fn listen(&mut self, device: u8, secondary: u8) -> Result<()> {
        trace!("Listen {device}/{secondary}");
        self.async_command(Command::Listen, device.into(), secondary.into(), Some(device))
            .map(|_| ())
    }

    pub fn untalk(&mut self) -> Result<()> {
        self.async_command(Command::Untalk, 0, 0, None).map(|_| ())
    }

    pub fn unlisten(&mut self) -> Result<()> {
        self.async_command(Command::Unlisten, 0, 0, None).map(|_| ())
    }

    /// Start opening a file.  Must be followed by writing the name, then
    /// [`Bus::unlisten`].
    pub fn open(&mut self, device: u8, secondary: u8) -> Result<()> {
        trace!("Open {device}/{secondary}");
        self.async_command(Command::Open, device.into(), secondary.into(), Some(device))
            .map(|_| ())
    }

    pub fn close(&mut self, device: u8, secondary: u8) -> Result<()> {
        trace!("Close {device}/{secondary}");
        self.async_command(Command::Close, device.into(), secondary.into(), Some(device))
            .map(|_| ())
    }

    /// Whether the last talker signalled EOI.
    pub fn get_eoi(&mut self) -> Result<bool> {
        let mut buf = [0u8; 1];
        self.control_in_exact(Command::GetEoi, 0, 0, &mut buf)?;
        Ok(buf[0] != 0)
    }

    pub fn clear_eoi(&mut self) -> Result<()> {
        self.transport
            .control_out(Command::ClearEoi.into(), 0, 0, &[])
    }
}

/// Byte transfers
impl<T: Transport> Bus<T> {
    /// Write `data` in the given protocol.  `flags` only apply to the CBM
    /// protocol.  Returns the bytes written, which is all of them - a
    /// partial write is a [`Xu1541Error::Bus`] error carrying the count.
    pub fn raw_write(
        &mut self,
        data: &[u8],
        protocol: ProtocolType,
        flags: ProtocolFlags,
    ) -> Result<usize> {
        self.check_protocol(protocol)?;

        let mut total = 0;
        for chunk in data.chunks(IO_BUFFER_SIZE) {
            let len = chunk.len() as u16;
            match protocol {
                ProtocolType::Cbm => self.start(Command::Write, len, flags.bits().into(), chunk)?,
                _ => self.start(
                    sub_command(protocol),
                    SubOp::Write as u16,
                    len,
                    chunk,
                )?,
            }

            let outcome = self.wait_result("write")?;
            let written = outcome.result as usize;
            if let Some(error) = outcome.error {
                debug!("{protocol} write failed after {} bytes: {error}", total + written);
                return Err(Xu1541Error::Bus {
                    error,
                    count: total + written,
                });
            }
            total += written;
            if written < chunk.len() {
                return Err(Xu1541Error::Bus {
                    error: DriverError::Io,
                    count: total,
                });
            }
        }

        trace!("{protocol} wrote {total} bytes");
        Ok(total)
    }

    /// Read into `buf` in the given protocol.  Returns how many bytes were
    /// read, which is less than asked for when a CBM talker signals EOI.
    pub fn raw_read(&mut self, buf: &mut [u8], protocol: ProtocolType) -> Result<usize> {
        self.check_protocol(protocol)?;

        let mut total = 0;
        while total < buf.len() {
            let want = (buf.len() - total).min(IO_BUFFER_SIZE);
            match protocol {
                ProtocolType::Cbm => {
                    self.start(Command::RequestRead, want as u16, protocol as u16, &[])?
                }
                _ => self.start(sub_command(protocol), SubOp::Read as u16, want as u16, &[])?,
            }

            let outcome = self.wait_result("read")?;
            let got = match outcome.mode {
                IoMode::ReadDone => {
                    let count = outcome.result as usize;
                    if count > want {
                        return Err(Xu1541Error::Protocol(format!(
                            "{protocol} read of {want} bytes returned {count}"
                        )));
                    }
                    self.collect(&mut buf[total..total + count])?
                }
                _ => 0,
            };
            total += got;

            if let Some(error) = outcome.error {
                debug!("{protocol} read failed after {total} bytes: {error}");
                return Err(Xu1541Error::Bus {
                    error,
                    count: total,
                });
            }

            // A short read means the talker signalled EOI.  A full one might
            // have ended exactly on it.
            if got < want || (protocol == ProtocolType::Cbm && self.get_eoi()?) {
                break;
            }
        }

        trace!("{protocol} read {total} bytes");
        Ok(total)
    }

    // Drain a finished read into buf, with as many READs as it takes.
    fn collect(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let len = self
                .transport
                .control_in(Command::Read.into(), 0, 0, &mut buf[total..])?;
            if len == 0 {
                break;
            }
            total += len;
        }
        if total != buf.len() {
            return Err(Xu1541Error::Protocol(format!(
                "READ returned {total} of {} bytes",
                buf.len()
            )));
        }
        Ok(total)
    }

    /// The largest transfer the device accepts in one request for the given
    /// fast protocol.
    pub fn protocol_info(&mut self, protocol: ProtocolType) -> Result<u16> {
        if protocol == ProtocolType::Cbm {
            return Ok(IO_BUFFER_SIZE as u16);
        }
        let mut buf = [0u8; 2];
        self.control_in_exact(sub_command(protocol), SubOp::Info as u16, 0, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn check_protocol(&self, protocol: ProtocolType) -> Result<()> {
        let needed = match protocol {
            ProtocolType::Cbm => Capabilities::CBM,
            ProtocolType::S1 => Capabilities::S1,
            ProtocolType::S2 => Capabilities::S2,
            ProtocolType::PP => Capabilities::PP_PROTO,
            ProtocolType::P2 => Capabilities::P2,
        };
        if self.info.supports(needed) {
            Ok(())
        } else {
            Err(Xu1541Error::Unsupported(format!(
                "{protocol} protocol not supported by this adapter"
            )))
        }
    }
}

/// Low level line control, and the parallel port
impl<T: Transport> Bus<T> {
    pub fn iec_poll(&mut self) -> Result<Lines> {
        let mut buf = [0u8; 1];
        self.control_in_exact(Command::IecPoll, 0, 0, &mut buf)?;
        Ok(Lines::from_bits_truncate(buf[0]))
    }

    /// Wait for `line` to become asserted (or released).  Returns the state
    /// of all the lines at that point.
    pub fn iec_wait(&mut self, line: Lines, asserted: bool) -> Result<Lines> {
        let outcome = self.async_command(Command::IecWait, line.bits().into(), asserted.into(), None)?;
        Ok(Lines::from_bits_truncate(outcome.result as u8))
    }

    pub fn iec_setrelease(&mut self, set: Lines, release: Lines) -> Result<()> {
        self.transport.control_out(
            Command::IecSetRelease.into(),
            set.bits() as u16,
            release.bits() as u16,
            &[],
        )
    }

    pub fn pp_read(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.control_in_exact(Command::PpRead, 0, 0, &mut buf)?;
        Ok(buf[0])
    }

    pub fn pp_write(&mut self, byte: u8) -> Result<()> {
        self.transport
            .control_out(Command::PpWrite.into(), byte as u16, 0, &[])
    }
}

/// Device maintenance and diagnostics
impl<T: Transport> Bus<T> {
    pub fn echo(&mut self, value: u16, index: u16) -> Result<(u16, u16)> {
        echo(&mut self.transport, value, index)
    }

    /// Read from the device's settings EEPROM.  Returns the bytes read.
    pub fn eeprom_read(&mut self, address: u16, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len() as u16;
        self.transport
            .control_in(Command::EepromRead.into(), address, len, buf)
    }

    pub fn eeprom_write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.transport
            .control_out(Command::EepromWrite.into(), address, 0, data)
    }

    /// Ask the device to enter its bootloader.  The device goes away
    /// afterwards, so this consumes the bus.
    pub fn flash(mut self) -> Result<T> {
        info!("Asking the xu1541 to enter its bootloader");
        self.transport.control_out(Command::Flash.into(), 0, 0, &[])?;
        Ok(self.transport)
    }

    /// An entry from the device's event log, most recent first: the event
    /// type and how many times it has happened.  `None` past the end.
    pub fn get_event(&mut self, index: u16) -> Result<Option<(u8, u8)>> {
        let mut buf = [0u8; 2];
        self.control_in_exact(Command::GetEvent, index, 0, &mut buf)?;
        Ok(match buf {
            [0, 0] => None,
            [event_type, count] => Some((event_type, count)),
        })
    }

    /// Have the device busy-wait, with interrupts off, for `ms`.  The device
    /// caps how long it will pause for.
    pub fn irq_pause(&mut self, ms: u16) -> Result<()> {
        self.async_command(Command::IrqPause, ms, 0, None).map(|_| ())
    }
}

/// Request plumbing
impl<T: Transport> Bus<T> {
    // Run a command whose result comes back via GET_RESULT.  Bus errors are
    // mapped to NoDevice when the command addressed `device` and nothing
    // answered.
    fn async_command(
        &mut self,
        command: Command,
        value: u16,
        index: u16,
        device: Option<u8>,
    ) -> Result<Outcome> {
        self.start(command, value, index, &[])?;
        let outcome = self.wait_result(&command.to_string())?;
        match (outcome.error, device) {
            (None, _) => Ok(outcome),
            (Some(DriverError::NoDevices | DriverError::NoDevice), Some(device)) => {
                Err(Xu1541Error::NoDevice { device })
            }
            (Some(error), _) => Err(Xu1541Error::Bus { error, count: 0 }),
        }
    }

    // Start a request.  If the device STALLs it, find out whether that's
    // because it is still busy with an earlier one.
    fn start(&mut self, command: Command, value: u16, index: u16, data: &[u8]) -> Result<()> {
        match self.transport.control_out(command.into(), value, index, data) {
            Err(Xu1541Error::Usb(rusb::Error::Pipe)) => {
                let mut buf = [0u8; GET_RESULT_RESPONSE_LEN];
                self.transport
                    .control_in(Command::GetResult.into(), 0, 0, &mut buf)?;
                match IoMode::try_from(buf[0]) {
                    Ok(IoMode::Idle) | Err(_) => {
                        Err(Xu1541Error::Protocol(format!("{command} rejected")))
                    }
                    Ok(mode) => {
                        debug!("{command} rejected, device is in {mode}");
                        Err(Xu1541Error::Busy)
                    }
                }
            }
            result => result,
        }
    }

    // Poll GET_RESULT until the operation has finished.
    fn wait_result(&mut self, operation: &str) -> Result<Outcome> {
        let started = Instant::now();
        loop {
            match self.poll_result(operation) {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => (),
                // The device may be too busy to answer in time
                Err(Xu1541Error::Usb(rusb::Error::Timeout)) => {
                    debug!("GET_RESULT timed out waiting for {operation}");
                }
                Err(e) => return Err(e),
            }

            let waited = started.elapsed();
            if waited >= self.result_timeout {
                warn!("Gave up waiting for {operation} after {waited:?}");
                return Err(Xu1541Error::Timeout {
                    operation: operation.to_string(),
                    waited,
                });
            }
            self.transport.pause(self.poll_interval);
        }
    }

    // One GET_RESULT.  None while the operation is still in progress.
    fn poll_result(&mut self, operation: &str) -> Result<Option<Outcome>> {
        let mut buf = [0u8; GET_RESULT_RESPONSE_LEN];
        self.control_in_exact(Command::GetResult, 0, 0, &mut buf)?;
        let mode = IoMode::try_from(buf[0])
            .map_err(|_| Xu1541Error::Protocol(format!("unknown I/O state {}", buf[0])))?;

        match mode {
            IoMode::ReadDone | IoMode::Result => {
                let error = match buf[3] {
                    0 => None,
                    code => Some(DriverError::from_code(code).ok_or_else(|| {
                        Xu1541Error::Protocol(format!("unknown error code {code}"))
                    })?),
                };
                Ok(Some(Outcome {
                    mode,
                    result: u16::from_le_bytes([buf[1], buf[2]]),
                    error,
                }))
            }
            IoMode::Idle => Err(Xu1541Error::Protocol(format!(
                "{operation}: device has no request in progress"
            ))),
            _ => Ok(None),
        }
    }

    fn control_in_exact(
        &mut self,
        command: Command,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        let len = self
            .transport
            .control_in(command.into(), value, index, buf)?;
        if len != buf.len() {
            return Err(Xu1541Error::Protocol(format!(
                "{command} reply of {len} bytes, expected {}",
                buf.len()
            )));
        }
        Ok(())
    }
}

// The sub-protocol command for a fast protocol.
fn sub_command(protocol: ProtocolType) -> Command {
    match protocol {
        ProtocolType::S2 => Command::S2,
        ProtocolType::PP => Command::Pp,
        ProtocolType::P2 => Command::P2,
        _ => Command::S1,
    }
}
