//! The command dispatcher.
//!
//! Decodes vendor control requests from the host into engine calls.  Quick
//! commands are handled there and then, and reply with at most
//! [`MAX_REPLY_LEN`] bytes.  Anything which moves bytes over the bus, or
//! waits on it, is recorded in the single [`IoRequest`] slot and performed
//! later as a [`Job`].  The host polls GET_RESULT until the outcome is
//! available.
//!
//! A job takes the engine with it while it runs ([`Dispatcher::start_job`]),
//! and returns it with the outcome ([`Dispatcher::finish_job`]).  In between
//! the dispatcher still answers control requests, but refuses the quick
//! commands that need the engine with [`DispatchError::Busy`].  An outcome
//! is only recorded if its request is still current.  [`Dispatcher::handle`]
//! does all three steps in one go.
//!
//! Only one request may be outstanding.  A second one while the slot is in
//! use is rejected with [`DispatchError::Busy`], with the exception of
//! RESET, which replaces whatever is there.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod command;
pub mod eeprom;
pub mod io;
pub mod job;

pub use command::{Command, SubOp};
pub use eeprom::{Eeprom, RamEeprom};
pub use io::{AsyncOp, IoMode, IoRequest};
pub use job::Job;

use core::fmt;

use embassy_time::Duration;

use crate::constants::{
    ECHO_RESPONSE_LEN, GET_RESULT_RESPONSE_LEN, INFO_RESPONSE_LEN, IO_BUFFER_SIZE,
    IO_BUFFER_SIZE_U16, MAX_IRQ_PAUSE_MS, MAX_REPLY_LEN,
};
use job::Work;
use crate::dev_info::DeviceInfo;
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::{BusLines, DriverError, IecDriver, ProtocolFlags, ProtocolType};
use crate::types::{Capabilities, Direction, Lines};
use crate::util::time::Clock;

/// Why a request was refused.  The firmware STALLs the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    UnknownCommand,
    WrongDirection,
    /// The I/O request slot is in use, or a job has the engine.
    Busy,
    /// A length (or reply buffer) is out of range.
    BadLength,
    /// Not offered by this hardware, or not implemented.
    NotSupported,
    /// READ with no read data waiting.
    NoData,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownCommand => "unknown command",
            Self::WrongDirection => "wrong direction",
            Self::Busy => "busy",
            Self::BadLength => "bad length",
            Self::NotSupported => "not supported",
            Self::NoData => "no data",
        };
        write!(f, "{s}")
    }
}

/// Something the firmware must do once the current control transfer has
/// been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceAction {
    EnterBootloader,
}

/// Owns the engine, the I/O request slot and the settings store.
pub struct Dispatcher<B, E> {
    // None while a job has it
    iec: Option<IecDriver<B>>,
    eeprom: E,
    info: DeviceInfo,
    io: IoRequest,
    action: Option<DeviceAction>,
}

impl<B: BusLines + Clock, E: Eeprom> Dispatcher<B, E> {
    pub fn new(iec: IecDriver<B>, eeprom: E, info: DeviceInfo) -> Self {
        Self {
            iec: Some(iec),
            eeprom,
            info,
            io: IoRequest::new(),
            action: None,
        }
    }

    /// The engine, unless a job is running on it.
    pub fn iec(&self) -> Option<&IecDriver<B>> {
        self.iec.as_ref()
    }

    pub fn iec_mut(&mut self) -> Option<&mut IecDriver<B>> {
        self.iec.as_mut()
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn eeprom(&self) -> &E {
        &self.eeprom
    }

    pub fn io_mode(&self) -> IoMode {
        self.io.mode()
    }

    /// Whether there is work waiting for [`Self::start_job`].
    pub fn is_pending(&self) -> bool {
        matches!(
            self.io.mode(),
            IoMode::Read | IoMode::Write | IoMode::Async
        )
    }

    /// Collect any action a command asked for.
    pub fn take_action(&mut self) -> Option<DeviceAction> {
        self.action.take()
    }

    /// Abandon the current request, for example because the USB device was
    /// reset.  A request that hadn't completed reports
    /// [`DriverError::Abort`]; finished results are dropped.  A job still
    /// running for it has its outcome discarded.
    pub fn abort(&mut self) {
        if self.io.in_flight() {
            info!("Aborting {} request", self.io.mode());
            self.io.finish(0, DriverError::Abort.code());
        } else {
            self.io.clear();
        }
    }

    /// Handle an IN request, writing the reply into `reply` (sized to the
    /// request's `wLength`).  Returns the reply length.
    pub fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        reply: &mut [u8],
    ) -> Result<usize, DispatchError> {
        let cmd = Self::decode(request, value, Direction::In)?;
        trace!("{} value {} index {}", cmd, value, index);

        match cmd {
            Command::Info => {
                Self::check_reply(reply, INFO_RESPONSE_LEN)?;
                Ok(self.info.encode(reply))
            }
            Command::Read => match self.io.drain(reply) {
                0 => {
                    debug!("READ with no data, slot {}", self.io.mode());
                    Err(DispatchError::NoData)
                }
                count => Ok(count),
            },
            Command::GetEoi => {
                Self::check_reply(reply, 1)?;
                reply[0] = self.engine()?.get_eoi() as u8;
                Ok(1)
            }
            Command::GetResult => {
                Self::check_reply(reply, GET_RESULT_RESPONSE_LEN)?;
                let report = self.io.report();
                reply[..GET_RESULT_RESPONSE_LEN].copy_from_slice(&report);
                Ok(GET_RESULT_RESPONSE_LEN)
            }
            Command::PpRead => {
                self.require(Capabilities::PP)?;
                Self::check_reply(reply, 1)?;
                reply[0] = self.engine()?.pp_read();
                Ok(1)
            }
            Command::IecPoll => {
                self.require(Capabilities::LL)?;
                Self::check_reply(reply, 1)?;
                reply[0] = self.engine()?.poll_lines().bits();
                Ok(1)
            }
            Command::EepromRead => {
                let len = index as usize;
                if len == 0 || len > MAX_REPLY_LEN {
                    return Err(DispatchError::BadLength);
                }
                Self::check_reply(reply, len)?;
                match self.eeprom.read(value as usize, &mut reply[..len]) {
                    0 => Err(DispatchError::BadLength),
                    count => Ok(count),
                }
            }
            Command::GetEvent => {
                Self::check_reply(reply, 2)?;
                let (event_type, count) = match self.engine()?.events().get(value as usize) {
                    Some(event) => (event.event_type as u8, event.count),
                    None => (0, 0),
                };
                reply[0] = event_type;
                reply[1] = count;
                Ok(2)
            }
            Command::Echo => {
                Self::check_reply(reply, ECHO_RESPONSE_LEN)?;
                reply[..2].copy_from_slice(&value.to_le_bytes());
                reply[2..4].copy_from_slice(&index.to_le_bytes());
                Ok(ECHO_RESPONSE_LEN)
            }
            Command::S1 | Command::S2 | Command::Pp | Command::P2 => {
                // Only INFO is an IN request
                let protocol = self.protocol_for(cmd)?;
                trace!("{} INFO", protocol);
                Self::check_reply(reply, 2)?;
                reply[..2].copy_from_slice(&IO_BUFFER_SIZE_U16.to_le_bytes());
                Ok(2)
            }
            _ => Err(DispatchError::WrongDirection),
        }
    }

    /// Handle an OUT request, with any data stage in `data`.
    pub fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), DispatchError> {
        let cmd = Self::decode(request, value, Direction::Out)?;
        trace!(
            "{} value {} index {} data {} bytes",
            cmd,
            value,
            index,
            data.len()
        );

        if cmd.is_async() {
            let op = self.async_op(cmd, value, index)?;
            return self.start_async(op);
        }

        match cmd {
            Command::Write => {
                let flags = ProtocolFlags::from_bits_truncate(index as u8);
                self.prepare_write(value as usize, ProtocolType::Cbm, flags, data)
            }
            Command::ClearEoi => {
                self.engine()?.clear_eoi();
                Ok(())
            }
            Command::RequestRead => {
                let protocol =
                    ProtocolType::try_from(index as u8).map_err(|_| DispatchError::NotSupported)?;
                self.require(Self::capability_for(protocol))?;
                self.request_read(value as usize, protocol)
            }
            Command::PpWrite => {
                self.require(Capabilities::PP)?;
                self.engine()?.pp_write(value as u8);
                Ok(())
            }
            Command::IecSetRelease => {
                self.require(Capabilities::LL)?;
                let set = Lines::from_bits_truncate(value as u8);
                let release = Lines::from_bits_truncate(index as u8);
                self.engine()?.setrelease(set, release);
                Ok(())
            }
            Command::EepromWrite => {
                if data.is_empty() {
                    return Err(DispatchError::BadLength);
                }
                match self.eeprom.write(value as usize, data) {
                    0 => Err(DispatchError::BadLength),
                    _ => Ok(()),
                }
            }
            Command::Flash => {
                info!("Bootloader entry requested");
                self.action = Some(DeviceAction::EnterBootloader);
                Ok(())
            }
            Command::S1 | Command::S2 | Command::Pp | Command::P2 => {
                let protocol = self.protocol_for(cmd)?;
                match SubOp::try_from(value) {
                    Ok(SubOp::Read) => self.request_read(index as usize, protocol),
                    Ok(SubOp::Write) => {
                        self.prepare_write(index as usize, protocol, ProtocolFlags::NONE, data)
                    }
                    _ => Err(DispatchError::WrongDirection),
                }
            }
            cmd if cmd.is_parburst() => {
                debug!("{} not supported", cmd);
                Err(DispatchError::NotSupported)
            }
            _ => Err(DispatchError::WrongDirection),
        }
    }

    /// Perform any bus operation the I/O request is waiting on, and record
    /// its outcome.  Returns whether anything was done.
    pub fn handle(&mut self) -> bool {
        match self.start_job() {
            Some(mut job) => {
                job.run();
                self.finish_job(job);
                true
            }
            None => false,
        }
    }

    /// Pick up the waiting bus operation, if there is one and the engine is
    /// free.  The request stays in flight until [`Self::finish_job`].
    pub fn start_job(&mut self) -> Option<Job<B>> {
        if self.iec.is_none() {
            return None;
        }
        let work = match self.io.mode() {
            IoMode::Read => Work::Read {
                len: self.io.read_len(),
                protocol: self.io.protocol(),
            },
            IoMode::Write => Work::Write {
                protocol: self.io.protocol(),
                flags: self.io.flags(),
                data: self.io.take_data(),
            },
            IoMode::Async => match self.io.take_op() {
                Some(op) => Work::Async(op),
                None => {
                    warn!("Async request with no operation");
                    self.io.finish(0, DriverError::Abort.code());
                    return None;
                }
            },
            _ => return None,
        };
        let iec = self.iec.take()?;
        trace!("Starting {} job", self.io.mode());
        Some(Job::new(iec, self.io.ticket(), work))
    }

    /// Take the engine back from a job, and record the outcome if the
    /// request it ran for is still waiting on it.
    pub fn finish_job(&mut self, job: Job<B>) {
        let is_read = job.is_read();
        let Job {
            iec,
            ticket,
            value,
            error,
            data,
            ..
        } = job;
        self.iec = Some(iec);

        if ticket != self.io.ticket() || !self.io.in_flight() {
            info!("Discarding outcome of abandoned request");
            return;
        }
        if is_read {
            self.io.read_done(&data, error);
        } else {
            self.io.finish(value, error);
        }
    }

    fn engine(&mut self) -> Result<&mut IecDriver<B>, DispatchError> {
        self.iec.as_mut().ok_or_else(|| {
            debug!("Engine busy with a job");
            DispatchError::Busy
        })
    }

    fn async_op(&self, cmd: Command, value: u16, index: u16) -> Result<AsyncOp, DispatchError> {
        let device = value as u8;
        let secondary = index as u8;
        let op = match cmd {
            Command::Talk => AsyncOp::Talk { device, secondary },
            Command::Listen => AsyncOp::Listen { device, secondary },
            Command::Untalk => AsyncOp::Untalk,
            Command::Unlisten => AsyncOp::Unlisten,
            Command::Open => AsyncOp::Open { device, secondary },
            Command::Close => AsyncOp::Close { device, secondary },
            Command::Reset => AsyncOp::Reset,
            Command::IecWait => {
                self.require(Capabilities::LL)?;
                let line = Lines::from_bits_truncate(value as u8) & Lines::EXTERNAL;
                if line.is_empty() {
                    return Err(DispatchError::NotSupported);
                }
                AsyncOp::Wait {
                    line,
                    asserted: index != 0,
                }
            }
            Command::IrqPause => {
                let ms = value.min(MAX_IRQ_PAUSE_MS);
                AsyncOp::Pause(Duration::from_millis(ms as u64))
            }
            _ => return Err(DispatchError::UnknownCommand),
        };
        Ok(op)
    }

    fn start_async(&mut self, op: AsyncOp) -> Result<(), DispatchError> {
        if !self.io.is_free() {
            if op != AsyncOp::Reset {
                return Err(DispatchError::Busy);
            }
            info!("Reset replaces {} request", self.io.mode());
        }
        self.io.start_async(op);
        Ok(())
    }

    fn request_read(&mut self, len: usize, protocol: ProtocolType) -> Result<(), DispatchError> {
        if len == 0 || len > IO_BUFFER_SIZE {
            return Err(DispatchError::BadLength);
        }
        if !self.io.is_free() {
            debug!("Read request while {}", self.io.mode());
            return Err(DispatchError::Busy);
        }
        self.io.start_read(len, protocol);
        Ok(())
    }

    fn prepare_write(
        &mut self,
        len: usize,
        protocol: ProtocolType,
        flags: ProtocolFlags,
        data: &[u8],
    ) -> Result<(), DispatchError> {
        // The whole write arrives in this request's data stage
        if len == 0 || len > IO_BUFFER_SIZE || data.len() != len {
            debug!("Write of {} bytes with {} bytes of data", len, data.len());
            return Err(DispatchError::BadLength);
        }
        if !self.io.is_free() {
            debug!("Write request while {}", self.io.mode());
            return Err(DispatchError::Busy);
        }
        self.io.prepare_write(len, protocol, flags);
        self.io.append(data);
        Ok(())
    }

    fn protocol_for(&self, cmd: Command) -> Result<ProtocolType, DispatchError> {
        let protocol = cmd.protocol().ok_or(DispatchError::UnknownCommand)?;
        self.require(Self::capability_for(protocol))?;
        Ok(protocol)
    }

    fn capability_for(protocol: ProtocolType) -> Capabilities {
        match protocol {
            ProtocolType::Cbm => Capabilities::CBM,
            ProtocolType::S1 => Capabilities::S1,
            ProtocolType::S2 => Capabilities::S2,
            ProtocolType::PP => Capabilities::PP_PROTO,
            ProtocolType::P2 => Capabilities::P2,
        }
    }

    fn require(&self, capabilities: Capabilities) -> Result<(), DispatchError> {
        if self.info.supports(capabilities) {
            Ok(())
        } else {
            debug!("Not supported by this hardware");
            Err(DispatchError::NotSupported)
        }
    }

    fn decode(request: u8, value: u16, dir: Direction) -> Result<Command, DispatchError> {
        let cmd = Command::try_from(request).map_err(|_| {
            info!("Unknown command {}", request);
            DispatchError::UnknownCommand
        })?;
        if cmd.direction(value) != dir {
            info!("{} sent with direction {}", cmd, dir);
            return Err(DispatchError::WrongDirection);
        }
        Ok(cmd)
    }

    fn check_reply(reply: &[u8], len: usize) -> Result<(), DispatchError> {
        if reply.len() < len {
            Err(DispatchError::BadLength)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventType, IecTimeouts};
    use crate::sim::{CbmDrive, Loopback, NoPeer, Peer, SimBus};

    type SimDispatcher<P> = Dispatcher<SimBus<P>, RamEeprom>;

    fn dispatcher<P: Peer>(peer: P, parallel: bool) -> SimDispatcher<P> {
        let iec = IecDriver::new(SimBus::new(peer));
        Dispatcher::new(iec, RamEeprom::new(), DeviceInfo::for_hardware(parallel))
    }

    fn out<P: Peer>(d: &mut SimDispatcher<P>, cmd: Command, value: u16, index: u16, data: &[u8]) {
        d.control_out(cmd.into(), value, index, data).unwrap();
    }

    // Run the idle loop until the request completes, and collect the result
    fn result<P: Peer>(d: &mut SimDispatcher<P>) -> [u8; 4] {
        while d.handle() {}
        let mut reply = [0u8; 4];
        let len = d
            .control_in(Command::GetResult.into(), 0, 0, &mut reply)
            .unwrap();
        assert_eq!(len, 4);
        reply
    }

    fn async_ok<P: Peer>(d: &mut SimDispatcher<P>, cmd: Command, value: u16, index: u16) {
        out(d, cmd, value, index, &[]);
        assert_eq!(result(d), [IoMode::Result as u8, 0, 0, 0], "{cmd}");
    }

    fn write_cbm<P: Peer>(d: &mut SimDispatcher<P>, data: &[u8]) -> [u8; 4] {
        out(d, Command::Write, data.len() as u16, 0, data);
        result(d)
    }

    #[test]
    fn info_and_echo() {
        let mut d = dispatcher(NoPeer, false);
        let mut reply = [0u8; 8];
        assert_eq!(d.control_in(0, 0, 0, &mut reply), Ok(6));
        assert_eq!(reply[2], 0x33);
        assert_eq!(d.control_in(0xff, 0x1234, 0xabcd, &mut reply), Ok(4));
        assert_eq!(&reply[..4], &[0x34, 0x12, 0xcd, 0xab]);
    }

    #[test]
    fn bad_requests_are_rejected() {
        let mut d = dispatcher(NoPeer, false);
        let mut reply = [0u8; 8];
        assert_eq!(d.control_out(0, 0, 0, &[]), Err(DispatchError::WrongDirection));
        assert_eq!(
            d.control_in(Command::Talk.into(), 8, 0, &mut reply),
            Err(DispatchError::WrongDirection)
        );
        assert_eq!(d.control_out(0x30, 0, 0, &[]), Err(DispatchError::UnknownCommand));
        assert_eq!(
            d.control_out(Command::ParburstRead.into(), 0, 0, &[]),
            Err(DispatchError::NotSupported)
        );
        assert_eq!(
            d.control_in(Command::GetResult.into(), 0, 0, &mut reply[..2]),
            Err(DispatchError::BadLength)
        );
    }

    #[test]
    fn parallel_needs_the_cable() {
        let mut d = dispatcher(NoPeer, false);
        let mut reply = [0u8; 2];
        assert_eq!(
            d.control_in(Command::PpRead.into(), 0, 0, &mut reply),
            Err(DispatchError::NotSupported)
        );
        assert_eq!(
            d.control_out(Command::Pp.into(), 1, 2, &[]),
            Err(DispatchError::NotSupported)
        );
        assert_eq!(
            d.control_out(Command::RequestRead.into(), 2, 4, &[]),
            Err(DispatchError::NotSupported)
        );
        assert_eq!(d.control_in(Command::S2.into(), 0, 0, &mut reply), Ok(2));
        assert_eq!(reply, [128, 0]);
    }

    #[test]
    fn second_request_is_busy() {
        let mut d = dispatcher(NoPeer, false);
        out(&mut d, Command::RequestRead, 10, 0, &[]);
        assert_eq!(
            d.control_out(Command::RequestRead.into(), 10, 0, &[]),
            Err(DispatchError::Busy)
        );
        assert_eq!(
            d.control_out(Command::Listen.into(), 8, 0, &[]),
            Err(DispatchError::Busy)
        );
        assert_eq!(
            d.control_out(Command::Write.into(), 1, 0, &[0]),
            Err(DispatchError::Busy)
        );

        // RESET is always accepted
        out(&mut d, Command::Reset, 0, 0, &[]);
        assert_eq!(d.io_mode(), IoMode::Async);
    }

    #[test]
    fn request_read_length_is_checked() {
        let mut d = dispatcher(NoPeer, false);
        assert_eq!(
            d.control_out(Command::RequestRead.into(), 0, 0, &[]),
            Err(DispatchError::BadLength)
        );
        assert_eq!(
            d.control_out(Command::RequestRead.into(), 129, 0, &[]),
            Err(DispatchError::BadLength)
        );
        assert_eq!(
            d.control_out(Command::Write.into(), 2, 0, &[1, 2, 3]),
            Err(DispatchError::BadLength)
        );
    }

    #[test]
    fn no_devices_is_reported_and_logged() {
        let mut d = dispatcher(NoPeer, false);
        out(&mut d, Command::Listen, 8, 0, &[]);
        assert_eq!(
            result(&mut d),
            [IoMode::Result as u8, 0, 0, DriverError::NoDevices.code()]
        );
        assert_eq!(d.io_mode(), IoMode::Idle);

        let mut reply = [0u8; 2];
        d.control_in(Command::GetEvent.into(), 0, 0, &mut reply)
            .unwrap();
        assert_eq!(reply, [EventType::NoDevices as u8, 1]);
        d.control_in(Command::GetEvent.into(), 5, 0, &mut reply)
            .unwrap();
        assert_eq!(reply, [0, 0]);
    }

    #[test]
    fn file_write_and_read_back() {
        let mut d = dispatcher(CbmDrive::new(8), false);
        async_ok(&mut d, Command::Reset, 0, 0);

        // Save
        async_ok(&mut d, Command::Open, 8, 1);
        assert_eq!(write_cbm(&mut d, b"HELLO,P,W"), [6, 9, 0, 0]);
        async_ok(&mut d, Command::Unlisten, 0, 0);
        async_ok(&mut d, Command::Listen, 8, 1);
        let payload: std::vec::Vec<u8> = (0..200u16).map(|i| i as u8).collect();
        for chunk in payload.chunks(IO_BUFFER_SIZE) {
            let [state, lo, hi, error] = write_cbm(&mut d, chunk);
            assert_eq!(state, IoMode::Result as u8);
            assert_eq!(u16::from_le_bytes([lo, hi]) as usize, chunk.len());
            assert_eq!(error, 0);
        }
        async_ok(&mut d, Command::Unlisten, 0, 0);
        async_ok(&mut d, Command::Close, 8, 1);
        assert_eq!(d.iec().unwrap().bus().peer().file("HELLO"), Some(&payload[..]));

        // Load
        async_ok(&mut d, Command::Open, 8, 0);
        write_cbm(&mut d, b"HELLO");
        async_ok(&mut d, Command::Unlisten, 0, 0);
        async_ok(&mut d, Command::Talk, 8, 0);
        let mut loaded = std::vec::Vec::new();
        let mut reply = [0u8; 64];
        while !d.iec().unwrap().get_eoi() {
            out(&mut d, Command::RequestRead, IO_BUFFER_SIZE_U16, 0, &[]);
            let [state, lo, _, error] = result(&mut d);
            assert_eq!(state, IoMode::ReadDone as u8);
            assert_eq!(error, 0);
            let mut left = lo as usize;
            while left > 0 {
                let len = d
                    .control_in(Command::Read.into(), 0, 0, &mut reply)
                    .unwrap();
                loaded.extend_from_slice(&reply[..len]);
                left -= len;
            }
            assert_eq!(d.io_mode(), IoMode::Idle);
        }
        let mut eoi = [0u8; 1];
        d.control_in(Command::GetEoi.into(), 0, 0, &mut eoi).unwrap();
        assert_eq!(eoi, [1]);
        async_ok(&mut d, Command::Untalk, 0, 0);
        async_ok(&mut d, Command::Close, 8, 0);
        assert_eq!(loaded, payload);
    }

    #[test]
    fn nak_reports_bytes_written() {
        let mut d = dispatcher(CbmDrive::new(8).with_nak_on_data_byte(2), false);
        async_ok(&mut d, Command::Reset, 0, 0);
        async_ok(&mut d, Command::Listen, 8, 2);
        assert_eq!(
            write_cbm(&mut d, b"0123456789"),
            [IoMode::Result as u8, 2, 0, DriverError::Io.code()]
        );
    }

    #[test]
    fn sub_protocol_read_drains_to_idle() {
        let mut d = dispatcher(Loopback::new(ProtocolType::S1, 10), false);
        out(&mut d, Command::S1, SubOp::Write as u16, 10, b"0123456789");
        assert_eq!(result(&mut d), [IoMode::Result as u8, 10, 0, 0]);

        d.iec_mut()
            .unwrap()
            .bus_mut()
            .advance(Duration::from_micros(100));
        out(&mut d, Command::S1, SubOp::Read as u16, 10, &[]);
        assert_eq!(result(&mut d), [IoMode::ReadDone as u8, 10, 0, 0]);

        let mut reply = [0u8; 4];
        let mut read = std::vec::Vec::new();
        for expected in [4, 4, 2] {
            assert_eq!(d.io_mode(), IoMode::ReadDone);
            let len = d
                .control_in(Command::Read.into(), 0, 0, &mut reply)
                .unwrap();
            assert_eq!(len, expected);
            read.extend_from_slice(&reply[..len]);
        }
        assert_eq!(d.io_mode(), IoMode::Idle);
        assert_eq!(read, b"0123456789");
        assert_eq!(
            d.control_in(Command::Read.into(), 0, 0, &mut reply),
            Err(DispatchError::NoData)
        );
    }

    #[test]
    fn write_data_must_match_length() {
        let mut d = dispatcher(Loopback::new(ProtocolType::S2, 4), false);
        assert_eq!(
            d.control_out(Command::S2.into(), SubOp::Write as u16, 4, b"ab"),
            Err(DispatchError::BadLength)
        );
        assert_eq!(
            d.control_out(Command::Write.into(), 3, 0, b"ab"),
            Err(DispatchError::BadLength)
        );
        assert_eq!(
            d.control_out(Command::Write.into(), 0, 0, &[]),
            Err(DispatchError::BadLength)
        );
        assert_eq!(d.io_mode(), IoMode::Idle);
        assert!(!d.handle());

        // The slot is still free for a complete write
        out(&mut d, Command::S2, SubOp::Write as u16, 4, b"abcd");
        assert_eq!(result(&mut d), [IoMode::Result as u8, 4, 0, 0]);
        assert_eq!(d.iec().unwrap().bus().peer().received(), b"abcd");
    }

    #[test]
    fn requests_answered_while_job_runs() {
        let mut d = dispatcher(CbmDrive::new(8), false);
        out(&mut d, Command::Reset, 0, 0, &[]);
        let mut job = d.start_job().unwrap();
        assert!(d.iec().is_none());
        assert!(d.start_job().is_none());

        // The host sees the request still in progress
        let mut reply = [0u8; 4];
        d.control_in(Command::GetResult.into(), 0, 0, &mut reply)
            .unwrap();
        assert_eq!(reply, [IoMode::Async as u8, 0, 0, 0]);
        assert_eq!(d.control_in(0xff, 1, 2, &mut reply), Ok(4));

        // Anything needing the engine must wait for it
        assert_eq!(
            d.control_in(Command::GetEoi.into(), 0, 0, &mut reply[..1]),
            Err(DispatchError::Busy)
        );
        assert_eq!(
            d.control_out(Command::ClearEoi.into(), 0, 0, &[]),
            Err(DispatchError::Busy)
        );
        assert_eq!(
            d.control_out(Command::Listen.into(), 8, 0, &[]),
            Err(DispatchError::Busy)
        );

        job.run();
        d.finish_job(job);
        assert!(d.iec().is_some());
        assert_eq!(result(&mut d), [IoMode::Result as u8, 0, 0, 0]);
        assert_eq!(d.iec().unwrap().bus().peer().resets(), 1);
    }

    #[test]
    fn abandoned_job_outcome_is_discarded() {
        let mut d = dispatcher(CbmDrive::new(8), false);
        async_ok(&mut d, Command::Reset, 0, 0);

        // Aborted while running: the host gets the abort, not the outcome
        out(&mut d, Command::Listen, 8, 2, &[]);
        let mut job = d.start_job().unwrap();
        d.abort();
        job.run();
        d.finish_job(job);
        assert_eq!(
            result(&mut d),
            [IoMode::Result as u8, 0, 0, DriverError::Abort.code()]
        );
        assert_eq!(d.io_mode(), IoMode::Idle);

        // Replaced by RESET while running: the reset still happens
        out(&mut d, Command::Unlisten, 0, 0, &[]);
        let mut job = d.start_job().unwrap();
        out(&mut d, Command::Reset, 0, 0, &[]);
        job.run();
        d.finish_job(job);
        assert_eq!(d.io_mode(), IoMode::Async);
        assert_eq!(result(&mut d), [IoMode::Result as u8, 0, 0, 0]);
        assert_eq!(d.iec().unwrap().bus().peer().resets(), 2);
    }

    #[test]
    fn line_control() {
        let timeouts = IecTimeouts {
            listener: Duration::from_millis(5),
            ..Default::default()
        };
        let iec = IecDriver::with_timeouts(SimBus::new(NoPeer), timeouts);
        let mut d = Dispatcher::new(iec, RamEeprom::new(), DeviceInfo::for_hardware(false));
        out(&mut d, Command::IecSetRelease, Lines::ATN.bits() as u16, 0, &[]);
        let mut reply = [0u8; 1];
        d.control_in(Command::IecPoll.into(), 0, 0, &mut reply)
            .unwrap();
        assert_eq!(reply, [Lines::ATN.bits()]);

        out(&mut d, Command::IecWait, Lines::ATN.bits() as u16, 1, &[]);
        assert_eq!(
            result(&mut d),
            [IoMode::Result as u8, Lines::ATN.bits(), 0, 0]
        );

        out(&mut d, Command::IecSetRelease, 0, Lines::ATN.bits() as u16, &[]);
        out(&mut d, Command::IecWait, Lines::ATN.bits() as u16, 1, &[]);
        assert_eq!(
            result(&mut d),
            [IoMode::Result as u8, 0, 0, DriverError::Timeout.code()]
        );
    }

    #[test]
    fn irq_pause_takes_time() {
        let mut d = dispatcher(NoPeer, false);
        let start = d.iec().unwrap().bus().now();
        out(&mut d, Command::IrqPause, 25, 0, &[]);
        assert_eq!(result(&mut d), [IoMode::Result as u8, 0, 0, 0]);
        assert!(d.iec().unwrap().bus().now() - start >= Duration::from_millis(25));
    }

    #[test]
    fn eeprom_and_flash() {
        let mut d = dispatcher(NoPeer, false);
        out(&mut d, Command::EepromWrite, 4, 0, &[1, 2, 3]);
        let mut reply = [0u8; 8];
        assert_eq!(
            d.control_in(Command::EepromRead.into(), 3, 5, &mut reply),
            Ok(5)
        );
        assert_eq!(&reply[..5], &[0xff, 1, 2, 3, 0xff]);
        assert_eq!(
            d.control_in(Command::EepromRead.into(), 0, 7, &mut reply),
            Err(DispatchError::BadLength)
        );

        assert_eq!(d.take_action(), None);
        out(&mut d, Command::Flash, 0, 0, &[]);
        assert_eq!(d.take_action(), Some(DeviceAction::EnterBootloader));
        assert_eq!(d.take_action(), None);
    }

    #[test]
    fn abort_reports_pending_request() {
        let mut d = dispatcher(NoPeer, false);
        out(&mut d, Command::RequestRead, 10, 0, &[]);
        d.abort();
        assert_eq!(
            result(&mut d),
            [IoMode::Result as u8, 0, 0, DriverError::Abort.code()]
        );
        assert_eq!(d.io_mode(), IoMode::Idle);
    }
}
