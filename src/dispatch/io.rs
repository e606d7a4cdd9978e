//! The single outstanding I/O request.
//!
//! Bus transfers take far too long to run inside a control request, so the
//! request handler only records what is wanted here.  The dispatcher's
//! worker then performs the transfer and stores the outcome, for the host to
//! collect with GET_RESULT (and READ, for read data).

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

use embassy_time::Duration;
use heapless::Vec;

use crate::constants::{GET_RESULT_RESPONSE_LEN, IO_BUFFER_SIZE};
use crate::protocol::{ProtocolFlags, ProtocolType};
use crate::types::Lines;

/// Where the request is in its lifecycle.  The discriminant is reported to
/// the host as byte 0 of GET_RESULT.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoMode {
    Idle = 0,
    Read = 1,
    ReadDone = 2,
    WritePrepared = 3,
    Write = 4,
    Async = 5,
    Result = 6,
}

impl TryFrom<u8> for IoMode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Read),
            2 => Ok(Self::ReadDone),
            3 => Ok(Self::WritePrepared),
            4 => Ok(Self::Write),
            5 => Ok(Self::Async),
            6 => Ok(Self::Result),
            _ => Err(()),
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Read => "Read",
            Self::ReadDone => "ReadDone",
            Self::WritePrepared => "WritePrepared",
            Self::Write => "Write",
            Self::Async => "Async",
            Self::Result => "Result",
        };
        write!(f, "{s}")
    }
}

/// A bus operation deferred to the idle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncOp {
    Talk { device: u8, secondary: u8 },
    Listen { device: u8, secondary: u8 },
    Untalk,
    Unlisten,
    Open { device: u8, secondary: u8 },
    Close { device: u8, secondary: u8 },
    Reset,
    Wait { line: Lines, asserted: bool },
    Pause(Duration),
}

/// The I/O request slot.
#[derive(Debug)]
pub struct IoRequest {
    mode: IoMode,
    protocol: ProtocolType,
    flags: ProtocolFlags,
    // Bytes requested by a read, or announced by a write
    len: usize,
    buf: Vec<u8, IO_BUFFER_SIZE>,
    offset: usize,
    op: Option<AsyncOp>,
    result: u16,
    error: u8,
    // Changes whenever the slot is cleared, so a worker can tell whether
    // the request it picked up is still the current one
    ticket: u32,
}

impl Default for IoRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRequest {
    pub const fn new() -> Self {
        Self {
            mode: IoMode::Idle,
            protocol: ProtocolType::Cbm,
            flags: ProtocolFlags::NONE,
            len: 0,
            buf: Vec::new(),
            offset: 0,
            op: None,
            result: 0,
            error: 0,
            ticket: 0,
        }
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    pub fn flags(&self) -> ProtocolFlags {
        self.flags
    }

    pub fn ticket(&self) -> u32 {
        self.ticket
    }

    /// Bytes the pending read should fetch.
    pub fn read_len(&self) -> usize {
        self.len
    }

    /// Whether a new request may be started.  A finished read still owns
    /// the slot until the host has drained it.
    pub fn is_free(&self) -> bool {
        self.mode == IoMode::Idle
    }

    /// Whether a request has been accepted, and the idle loop hasn't
    /// finished with it yet.
    pub fn in_flight(&self) -> bool {
        matches!(
            self.mode,
            IoMode::Read | IoMode::WritePrepared | IoMode::Write | IoMode::Async
        )
    }

    pub fn start_read(&mut self, len: usize, protocol: ProtocolType) {
        self.clear();
        self.len = len.min(IO_BUFFER_SIZE);
        self.protocol = protocol;
        self.mode = IoMode::Read;
    }

    /// Announce a write of `len` bytes, which arrive via [`Self::append`].
    pub fn prepare_write(&mut self, len: usize, protocol: ProtocolType, flags: ProtocolFlags) {
        self.clear();
        self.len = len.min(IO_BUFFER_SIZE);
        self.protocol = protocol;
        self.flags = flags;
        self.mode = IoMode::WritePrepared;
        if self.len == 0 {
            self.mode = IoMode::Write;
        }
    }

    /// Add write data.  Once everything announced has arrived the request
    /// moves on to WRITE, and this returns true.  Anything beyond the
    /// announced length is dropped.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if self.mode != IoMode::WritePrepared {
            return false;
        }
        let room = self.len - self.buf.len();
        let take = data.len().min(room);
        // Can't overflow, len is capped at the buffer's capacity
        let _ = self.buf.extend_from_slice(&data[..take]);
        if self.buf.len() == self.len {
            self.mode = IoMode::Write;
            true
        } else {
            false
        }
    }

    /// The data to write.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Hand the write data to the worker.
    pub fn take_data(&mut self) -> Vec<u8, IO_BUFFER_SIZE> {
        core::mem::take(&mut self.buf)
    }

    pub fn start_async(&mut self, op: AsyncOp) {
        self.clear();
        self.op = Some(op);
        self.mode = IoMode::Async;
    }

    pub fn take_op(&mut self) -> Option<AsyncOp> {
        self.op.take()
    }

    /// Store the outcome of a write or async operation.
    pub fn finish(&mut self, result: u16, error: u8) {
        self.buf.clear();
        self.result = result;
        self.error = error;
        self.mode = IoMode::Result;
    }

    /// Store the data from a read.  With nothing read there is nothing for
    /// the host to drain, so the request goes straight to RESULT.
    pub fn read_done(&mut self, data: &[u8], error: u8) {
        self.buf.clear();
        let take = data.len().min(IO_BUFFER_SIZE);
        let _ = self.buf.extend_from_slice(&data[..take]);
        self.offset = 0;
        self.error = error;
        if self.buf.is_empty() {
            self.finish(0, error);
        } else {
            self.result = self.buf.len() as u16;
            self.mode = IoMode::ReadDone;
        }
    }

    /// Bytes of read data not yet handed to the host.
    pub fn remaining(&self) -> usize {
        match self.mode {
            IoMode::ReadDone => self.buf.len() - self.offset,
            _ => 0,
        }
    }

    /// Copy out as much read data as fits.  The slot returns to IDLE once
    /// it has all gone.
    pub fn drain(&mut self, out: &mut [u8]) -> usize {
        if self.mode != IoMode::ReadDone {
            return 0;
        }
        let count = out.len().min(self.remaining());
        out[..count].copy_from_slice(&self.buf[self.offset..self.offset + count]);
        self.offset += count;
        if self.offset == self.buf.len() {
            self.clear();
        }
        count
    }

    /// Build the GET_RESULT response.  A RESULT is handed over exactly
    /// once, after which the slot is IDLE again.
    pub fn report(&mut self) -> [u8; GET_RESULT_RESPONSE_LEN] {
        let (result, error) = match self.mode {
            IoMode::Result | IoMode::ReadDone => (self.result, self.error),
            _ => (0, 0),
        };
        let result = match self.mode {
            IoMode::ReadDone => self.remaining() as u16,
            _ => result,
        };
        let [lo, hi] = result.to_le_bytes();
        let report = [self.mode as u8, lo, hi, error];
        if self.mode == IoMode::Result {
            self.clear();
        }
        report
    }

    /// Drop whatever is in the slot.
    pub fn clear(&mut self) {
        self.mode = IoMode::Idle;
        self.flags = ProtocolFlags::NONE;
        self.protocol = ProtocolType::Cbm;
        self.len = 0;
        self.buf.clear();
        self.offset = 0;
        self.op = None;
        self.result = 0;
        self.error = 0;
        self.ticket = self.ticket.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_drains_to_idle() {
        let mut io = IoRequest::new();
        io.start_read(10, ProtocolType::Cbm);
        assert_eq!(io.mode(), IoMode::Read);
        io.read_done(b"0123456789", 0);
        assert_eq!(io.report(), [IoMode::ReadDone as u8, 10, 0, 0]);

        let mut out = [0u8; 4];
        let mut total = 0;
        while io.mode() == IoMode::ReadDone {
            total += io.drain(&mut out);
        }
        assert_eq!(total, 10);
        assert_eq!(io.mode(), IoMode::Idle);
    }

    #[test]
    fn empty_read_goes_to_result() {
        let mut io = IoRequest::new();
        io.start_read(5, ProtocolType::S1);
        io.read_done(&[], 1);
        assert_eq!(io.report(), [IoMode::Result as u8, 0, 0, 1]);
        assert_eq!(io.mode(), IoMode::Idle);
    }

    #[test]
    fn write_collects_announced_bytes() {
        let mut io = IoRequest::new();
        io.prepare_write(5, ProtocolType::Cbm, ProtocolFlags::NONE);
        assert!(!io.append(b"abc"));
        assert_eq!(io.mode(), IoMode::WritePrepared);
        assert!(io.append(b"defgh"));
        assert_eq!(io.mode(), IoMode::Write);
        assert_eq!(io.data(), b"abcde");
    }

    #[test]
    fn clearing_moves_the_ticket_on() {
        let mut io = IoRequest::new();
        io.start_read(4, ProtocolType::Cbm);
        let ticket = io.ticket();
        io.finish(0, 5);
        assert_eq!(io.ticket(), ticket);
        io.report();
        assert_ne!(io.ticket(), ticket);

        io.prepare_write(2, ProtocolType::Cbm, ProtocolFlags::NONE);
        let ticket = io.ticket();
        io.start_async(AsyncOp::Reset);
        assert_ne!(io.ticket(), ticket);
    }

    #[test]
    fn result_is_reported_once() {
        let mut io = IoRequest::new();
        io.start_async(AsyncOp::Reset);
        assert_eq!(io.report(), [IoMode::Async as u8, 0, 0, 0]);
        io.finish(0x1234, 0);
        assert_eq!(io.report(), [IoMode::Result as u8, 0x34, 0x12, 0]);
        assert_eq!(io.report(), [IoMode::Idle as u8, 0, 0, 0]);
    }
}
