//! A bus operation taken out of the I/O request slot.
//!
//! A [`Job`] owns the engine for as long as it runs, so the dispatcher can
//! keep answering control requests (GET_RESULT in particular) in the
//! meantime.  The firmware runs jobs without holding the dispatcher lock.
//! Engine-bound quick commands are refused with BUSY until
//! [`super::Dispatcher::finish_job`] hands the engine back.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use heapless::Vec;

use super::io::AsyncOp;
use crate::constants::IO_BUFFER_SIZE;
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::{BusLines, DriverError, IecDriver, ProtocolFlags, ProtocolType};
use crate::util::time::Clock;

// IRQ_PAUSE is broken into slices this long, so the watchdog keeps being
// fed.
const PAUSE_SLICE: Duration = Duration::from_millis(10);

pub(super) enum Work {
    Read {
        len: usize,
        protocol: ProtocolType,
    },
    Write {
        protocol: ProtocolType,
        flags: ProtocolFlags,
        data: Vec<u8, IO_BUFFER_SIZE>,
    },
    Async(AsyncOp),
}

/// A running bus operation, and the engine it runs on.
pub struct Job<B> {
    pub(super) iec: IecDriver<B>,
    // Identifies the request this job belongs to
    pub(super) ticket: u32,
    pub(super) work: Work,
    pub(super) value: u16,
    pub(super) error: u8,
    pub(super) data: Vec<u8, IO_BUFFER_SIZE>,
}

impl<B: BusLines + Clock> Job<B> {
    pub(super) fn new(iec: IecDriver<B>, ticket: u32, work: Work) -> Self {
        Self {
            iec,
            ticket,
            work,
            value: 0,
            error: 0,
            data: Vec::new(),
        }
    }

    /// Whether this is a read, which leaves data for the host to drain.
    pub fn is_read(&self) -> bool {
        matches!(self.work, Work::Read { .. })
    }

    /// Perform the operation.  May busy wait on the bus for many seconds.
    pub fn run(&mut self) {
        match &self.work {
            Work::Read { len, protocol } => {
                let (len, protocol) = (*len, *protocol);
                let mut buf = [0u8; IO_BUFFER_SIZE];
                let len = len.min(IO_BUFFER_SIZE);
                let (count, error) = match self.iec.read(&mut buf[..len], protocol) {
                    Ok(count) => (count, 0),
                    Err(e) => (e.count, e.error.code()),
                };
                debug!("{} read of {} bytes got {}, error {}", protocol, len, count, error);
                // Can't overflow, count is at most len
                let _ = self.data.extend_from_slice(&buf[..count]);
                self.value = count as u16;
                self.error = error;
            }
            Work::Write {
                protocol,
                flags,
                data,
            } => {
                let (count, error) = match self.iec.write(data, *protocol, *flags) {
                    Ok(count) => (count, 0),
                    Err(e) => (e.count, e.error.code()),
                };
                debug!("{} write wrote {} bytes, error {}", protocol, count, error);
                self.value = count as u16;
                self.error = error;
            }
            Work::Async(op) => {
                let op = *op;
                match self.run_async(op) {
                    Ok(value) => self.value = value,
                    Err(e) => {
                        debug!("Async operation failed: {}", e);
                        self.error = e.code();
                    }
                }
            }
        }
    }

    fn run_async(&mut self, op: AsyncOp) -> Result<u16, DriverError> {
        let iec = &mut self.iec;
        match op {
            AsyncOp::Talk { device, secondary } => iec.talk(device, secondary).map(|_| 0),
            AsyncOp::Listen { device, secondary } => iec.listen(device, secondary).map(|_| 0),
            AsyncOp::Untalk => iec.untalk().map(|_| 0),
            AsyncOp::Unlisten => iec.unlisten().map(|_| 0),
            AsyncOp::Open { device, secondary } => iec.open(device, secondary).map(|_| 0),
            AsyncOp::Close { device, secondary } => iec.close(device, secondary).map(|_| 0),
            AsyncOp::Reset => iec.reset().map(|_| 0),
            AsyncOp::Wait { line, asserted } => iec
                .wait_line(line, asserted)
                .map(|lines| lines.bits() as u16),
            AsyncOp::Pause(duration) => {
                self.pause(duration);
                Ok(0)
            }
        }
    }

    // Busy wait with interrupts off, leaving the bus alone
    fn pause(&mut self, duration: Duration) {
        self.iec.critical(|iec| {
            let mut left = duration;
            while left > Duration::from_ticks(0) {
                let slice = left.min(PAUSE_SLICE);
                iec.bus_mut().block_for(slice);
                iec.bus_mut().feed_watchdog();
                left -= slice;
            }
        });
    }
}
