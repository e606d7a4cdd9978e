//! File and block transfers with a drive.
//!
//! [`Xu1541`] owns the bus, the session settings and the resolved transfer
//! mode.  It can be shared between threads, so that one thread can
//! [`Xu1541::abort`] a transfer running in another.
//!
//! File transfers always use the standard CBM protocol to open and close
//! the file, and to read the drive's status.  The file's contents are
//! moved using the session's transfer mode.  The fast modes need a transfer
//! routine to be running on the drive, which is the caller's business.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use xu1541::protocol::{ProtocolFlags, ProtocolType};

use crate::bus::Bus;
use crate::config::{Settings, TransferMode, UsbConfig};
use crate::constants::{
    BLOCK_SIZE, DATA_CHANNEL, MAX_STATUS_LEN, STATUS_CHANNEL, STATUS_OK_PREFIX,
};
use crate::device::open_device;
use crate::error::{Result, Xu1541Error};
use crate::mode;
use crate::transport::{Transport, UsbTransport};

/// The text of a drive's status channel, for example
/// `00, OK,00,00` or `62,FILE NOT FOUND,00,00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveStatus {
    message: String,
}

impl DriveStatus {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.message.starts_with(STATUS_OK_PREFIX)
    }

    /// A status other than OK as an error.
    pub fn into_result(self, device: u8) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Xu1541Error::Status {
                device,
                status: self.message,
            })
        }
    }
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A session with a drive, via an xu1541.
pub struct Xu1541<T> {
    handle: Mutex<Option<Bus<T>>>,
    settings: Settings,
    mode: Mutex<Option<TransferMode>>,
    aborted: AtomicBool,
}

impl Xu1541<UsbTransport> {
    /// Open the USB adapter and start a session.
    pub fn open(settings: Settings, usb: &UsbConfig) -> Result<Self> {
        let transport = open_device(usb)?;
        Self::new(transport, settings, usb)
    }
}

/// Session management
impl<T: Transport> Xu1541<T> {
    /// Start a session over the given transport.  The transfer mode isn't
    /// resolved until it is first needed.
    pub fn new(transport: T, settings: Settings, usb: &UsbConfig) -> Result<Self> {
        settings.validate()?;
        let bus = Bus::new(transport, usb)?;
        info!(
            "Session with drive {} ({}), transfer mode {}",
            settings.device_number, settings.drive_type, settings.transfer_mode
        );
        Ok(Self {
            handle: Mutex::new(Some(bus)),
            settings,
            mode: Mutex::new(None),
            aborted: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The transfer mode used for file contents, resolving
    /// [`TransferMode::Auto`] the first time it is called.
    pub fn transfer_mode(&self) -> Result<TransferMode> {
        self.with_bus(|bus| self.session_mode(bus))
    }

    /// Run `f` with the bus.  Fails once the session is aborted.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut Bus<T>) -> Result<R>) -> Result<R> {
        self.check_aborted()?;
        let mut guard = self.handle.lock();
        let bus = guard.as_mut().ok_or(Xu1541Error::Aborted)?;
        f(bus)
    }

    /// Reset the bus.
    pub fn reset_bus(&self) -> Result<()> {
        self.with_bus(|bus| bus.reset())
    }

    /// Stop using the adapter.  Any transfer in progress stops at the next
    /// chunk boundary, the bus is reset if possible, and every later call
    /// fails with [`Xu1541Error::Aborted`].  Returns the transport.
    pub fn abort(&self) -> Option<T> {
        info!("Aborting session");
        self.aborted.store(true, Ordering::SeqCst);

        let mut bus = self.handle.lock().take()?;
        if let Err(e) = bus.reset() {
            warn!("Bus reset after abort failed: {e}");
        }
        Some(bus.into_transport())
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn check_aborted(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Xu1541Error::Aborted)
        } else {
            Ok(())
        }
    }

    fn session_mode(&self, bus: &mut Bus<T>) -> Result<TransferMode> {
        let mut cached = self.mode.lock();
        if let Some(mode) = *cached {
            return Ok(mode);
        }
        let mode = mode::resolve(bus, self.settings.transfer_mode)?;
        *cached = Some(mode);
        Ok(mode)
    }

    fn session_protocol(&self, bus: &mut Bus<T>) -> Result<ProtocolType> {
        Ok(self
            .session_mode(bus)?
            .protocol()
            .unwrap_or(ProtocolType::Cbm))
    }
}

/// File transfers
impl<T: Transport> Xu1541<T> {
    /// Write a file to the drive.  Returns the drive's status afterwards,
    /// which may be an error - the drive has finished with the file either
    /// way.  Fails if the bus transfer fails.
    pub fn write_file(&self, name: &str, data: &[u8]) -> Result<DriveStatus> {
        self.write_file_with_progress(name, data, |_, _| ())
    }

    /// As [`Xu1541::write_file`], calling `progress(blocks_done, blocks)`
    /// every `progress_interval` blocks, and once at the end.
    pub fn write_file_with_progress(
        &self,
        name: &str,
        data: &[u8],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<DriveStatus> {
        let device = self.settings.device_number;
        let name = write_name(name)?;
        debug!("Writing {} bytes to {device}:{name}", data.len());

        self.with_bus(|bus| {
            let protocol = self.session_protocol(bus)?;
            open_file(bus, device, &name)?;

            let result = self.write_contents(bus, device, data, protocol, &mut progress);
            if result.is_err() {
                // Whatever state the drive is in, get it off the bus
                if let Err(e) = bus.unlisten() {
                    debug!("Unlisten after failed write: {e}");
                }
            }
            if let Err(e) = bus.close(device, DATA_CHANNEL) {
                debug!("Close after write: {e}");
            }

            let status = read_status(bus, device)?;
            result?;
            if !status.is_ok() {
                warn!("Drive {device} status after write: {status}");
            }
            Ok(status)
        })
    }

    fn write_contents(
        &self,
        bus: &mut Bus<T>,
        device: u8,
        data: &[u8],
        protocol: ProtocolType,
        progress: &mut impl FnMut(usize, usize),
    ) -> Result<()> {
        let blocks = data.len().div_ceil(BLOCK_SIZE);
        let interval = self.settings.progress_interval;

        bus.listen(device, DATA_CHANNEL)?;
        let mut written = 0;
        for (ii, block) in data.chunks(BLOCK_SIZE).enumerate() {
            self.check_aborted()?;
            bus.raw_write(block, protocol, ProtocolFlags::NONE)
                .map_err(|e| offset_count(e, written))?;
            written += block.len();

            let done = ii + 1;
            if done % interval == 0 || done == blocks {
                progress(done, blocks);
            }
        }
        bus.unlisten()?;

        trace!("Wrote {written} bytes");
        Ok(())
    }

    /// Read a file from the drive.  Returns its contents and the drive's
    /// status.  If the read fails and the drive reports an error, the
    /// error is the drive's status (for example, file not found).
    pub fn read_file(&self, name: &str) -> Result<(Vec<u8>, DriveStatus)> {
        self.read_file_with_progress(name, |_| ())
    }

    /// As [`Xu1541::read_file`], calling `progress(blocks_read)` every
    /// `progress_interval` blocks.
    pub fn read_file_with_progress(
        &self,
        name: &str,
        mut progress: impl FnMut(usize),
    ) -> Result<(Vec<u8>, DriveStatus)> {
        let device = self.settings.device_number;
        if name.is_empty() {
            return Err(Xu1541Error::InvalidArgument("empty file name".into()));
        }
        debug!("Reading {device}:{name}");

        self.with_bus(|bus| {
            let protocol = self.session_protocol(bus)?;
            open_file(bus, device, name)?;

            let mut data = Vec::new();
            let result = self.read_contents(bus, device, protocol, &mut data, &mut progress);
            if let Err(e) = bus.untalk() {
                debug!("Untalk after read: {e}");
            }
            if let Err(e) = bus.close(device, DATA_CHANNEL) {
                debug!("Close after read: {e}");
            }

            let status = read_status(bus, device)?;
            if let Err(e) = result {
                debug!("Read of {name} failed: {e}");
                status.into_result(device)?;
                return Err(e);
            }
            if !status.is_ok() {
                warn!("Drive {device} status after read: {status}");
            }
            Ok((data, status))
        })
    }

    fn read_contents(
        &self,
        bus: &mut Bus<T>,
        device: u8,
        protocol: ProtocolType,
        data: &mut Vec<u8>,
        progress: &mut impl FnMut(usize),
    ) -> Result<()> {
        let interval = self.settings.progress_interval;

        bus.talk(device, DATA_CHANNEL)?;
        let mut blocks = 0;
        loop {
            self.check_aborted()?;
            let mut block = [0u8; BLOCK_SIZE];
            let len = bus
                .raw_read(&mut block, protocol)
                .map_err(|e| offset_count(e, data.len()))?;
            data.extend_from_slice(&block[..len]);

            blocks += 1;
            if blocks % interval == 0 {
                progress(blocks);
            }

            // A full block might have ended exactly on the end of the file
            if len < BLOCK_SIZE || (protocol == ProtocolType::Cbm && bus.get_eoi()?) {
                break;
            }
        }

        trace!("Read {} bytes", data.len());
        Ok(())
    }

    /// Read the drive's status channel.
    pub fn device_status(&self) -> Result<DriveStatus> {
        let device = self.settings.device_number;
        self.with_bus(|bus| read_status(bus, device))
    }
}

/// Block transfers
impl<T: Transport> Xu1541<T> {
    /// Read one disk block from a channel the caller has already opened
    /// and asked to talk, using the session's transfer mode.  Fails if the
    /// drive sends less than a whole block.
    pub fn read_block(&self) -> Result<[u8; BLOCK_SIZE]> {
        self.with_bus(|bus| {
            let protocol = self.session_protocol(bus)?;
            let mut block = [0u8; BLOCK_SIZE];
            let len = bus.raw_read(&mut block, protocol)?;
            if len != BLOCK_SIZE {
                return Err(Xu1541Error::Protocol(format!(
                    "short block read, {len} of {BLOCK_SIZE} bytes"
                )));
            }
            Ok(block)
        })
    }

    /// Write one disk block to a channel the caller has already opened and
    /// asked to listen, using the session's transfer mode.
    pub fn write_block(&self, block: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.with_bus(|bus| {
            let protocol = self.session_protocol(bus)?;
            bus.raw_write(block, protocol, ProtocolFlags::NONE)
                .map(|_| ())
        })
    }
}

// OPEN the data channel and send the name.
fn open_file<T: Transport>(bus: &mut Bus<T>, device: u8, name: &str) -> Result<()> {
    bus.open(device, DATA_CHANNEL)?;
    if let Err(e) = bus.raw_write(name.as_bytes(), ProtocolType::Cbm, ProtocolFlags::NONE) {
        if let Err(e) = bus.unlisten() {
            debug!("Unlisten after failed open: {e}");
        }
        return Err(e);
    }
    bus.unlisten()
}

// TALK to the status channel and read until EOI.
fn read_status<T: Transport>(bus: &mut Bus<T>, device: u8) -> Result<DriveStatus> {
    bus.talk(device, STATUS_CHANNEL)?;
    let mut buf = [0u8; MAX_STATUS_LEN];
    let result = bus.raw_read(&mut buf, ProtocolType::Cbm);
    if let Err(e) = bus.untalk() {
        debug!("Untalk after status read: {e}");
    }
    let len = result?;

    let message = String::from_utf8_lossy(&buf[..len])
        .trim_end_matches(['\r', '\n'])
        .to_string();
    trace!("Drive {device} status {message}");
    Ok(DriveStatus::new(message))
}

// The name to OPEN a file for writing with.  A bare name is written as a
// PRG file.
fn write_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Xu1541Error::InvalidArgument("empty file name".into()));
    }
    if name.contains(',') {
        Ok(name.to_string())
    } else {
        Ok(format!("{name},P,W"))
    }
}

// Add the bytes moved by earlier chunks to a bus error's count.
fn offset_count(e: Xu1541Error, offset: usize) -> Xu1541Error {
    match e {
        Xu1541Error::Bus { error, count } => Xu1541Error::Bus {
            error,
            count: offset + count,
        },
        e => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xu1541::protocol::DriverError;

    #[test]
    fn drive_status() {
        let status = DriveStatus::new("00, OK,00,00");
        assert!(status.is_ok());
        assert_eq!(status.clone().into_result(8).unwrap(), status);

        let status = DriveStatus::new("62,FILE NOT FOUND,00,00");
        assert!(!status.is_ok());
        assert_eq!(status.to_string(), "62,FILE NOT FOUND,00,00");
        assert!(matches!(
            status.into_result(9),
            Err(Xu1541Error::Status { device: 9, .. })
        ));
    }

    #[test]
    fn names_for_writing() {
        assert_eq!(write_name("GAME").unwrap(), "GAME,P,W");
        assert_eq!(write_name("DATA,S,W").unwrap(), "DATA,S,W");
        assert!(write_name("").is_err());
    }

    #[test]
    fn counts_include_earlier_chunks() {
        let e = offset_count(
            Xu1541Error::Bus {
                error: DriverError::Io,
                count: 3,
            },
            512,
        );
        assert_eq!(e.count(), Some(515));
        assert!(matches!(offset_count(Xu1541Error::Busy, 512), Xu1541Error::Busy));
    }
}
