//! This file implements the core of the IEC protocol driver - line control,
//! bounded waits, bus reset and the low level commands (poll, wait,
//! set/release).  The byte level protocols are in `read.rs` and `write.rs`,
//! and bus session control in `session.rs`.
//!
//! Based on the xum1541 source code.
//!
//! Every wait in here is bounded.  A device that stops responding mid-byte
//! causes a timeout error, never a hang, and every wait loop feeds the
//! watchdog.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

use super::driver::{BusLines, DriverError};
use super::event::{EventLog, EventType};
use super::session::BusState;

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::types::Lines;
use crate::util::time::iec::{
    BUS_FREE_CHECK_INTERVAL, BUS_FREE_CHECKS, FAST_HANDSHAKE_TIMEOUT, HANDSHAKE_TIMEOUT,
    LISTENER_TIMEOUT, READ_CLK_START_TIMEOUT, RESET_HOLD, SETTLE_NS, WRITE_TALK_CLK_TIMEOUT,
};
use crate::util::time::{Clock, block_us};

/// The timeouts used by the engine.  The defaults are those of the real
/// hardware; tests shorten some of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IecTimeouts {
    /// Wait for a listener to acknowledge, or to respond to ATN.
    pub handshake: Duration,
    /// Wait for a listener to say it is ready for the next byte.
    pub listener: Duration,
    /// Wait for the talker to take CLK after a talk turnaround.
    pub talk_turnaround: Duration,
    /// Wait for the talker to release CLK at the start of a byte.
    pub read_start: Duration,
    /// Wait for each step of the fast protocol handshakes.
    pub fast_handshake: Duration,
    /// How long RESET is held.
    pub reset_hold: Duration,
    /// How many times, and how often, the bus is checked after a reset.
    pub bus_free_checks: u32,
    pub bus_free_interval: Duration,
}

impl Default for IecTimeouts {
    fn default() -> Self {
        Self {
            handshake: HANDSHAKE_TIMEOUT,
            listener: LISTENER_TIMEOUT,
            talk_turnaround: WRITE_TALK_CLK_TIMEOUT,
            read_start: READ_CLK_START_TIMEOUT,
            fast_handshake: FAST_HANDSHAKE_TIMEOUT,
            reset_hold: RESET_HOLD,
            bus_free_checks: BUS_FREE_CHECKS,
            bus_free_interval: BUS_FREE_CHECK_INTERVAL,
        }
    }
}

// Outcome of a single check for the bus being free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BusCheck {
    // Some device answered ATN, and then let go
    Free,
    // Something is holding DATA
    Busy,
    // Nothing answered ATN
    Silent,
}

/// The IEC protocol driver.  Owns the bus lines, the EOI flag, the bus
/// session state, and the event log.
///
/// The driver is generic over the hardware, so the same code runs against
/// the RP2040's GPIOs and against the line simulator.
pub struct IecDriver<B> {
    pub(crate) bus: B,

    // Set when the talker has signalled EOI.  Cleared by reset, and by each
    // CBM write (so each new TALK).
    pub(crate) eoi: bool,

    pub(crate) state: BusState,
    pub(crate) timeouts: IecTimeouts,
    pub(crate) events: EventLog,
}

impl<B: BusLines + Clock> IecDriver<B> {
    pub fn new(bus: B) -> Self {
        Self::with_timeouts(bus, IecTimeouts::default())
    }

    pub fn with_timeouts(mut bus: B, timeouts: IecTimeouts) -> Self {
        // Make sure we're not holding anything
        bus.release(Lines::EXTERNAL);

        Self {
            bus,
            eoi: false,
            state: BusState::Unknown,
            timeouts,
            events: EventLog::new(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    pub fn timeouts(&self) -> &IecTimeouts {
        &self.timeouts
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn get_eoi(&self) -> bool {
        self.eoi
    }

    pub fn clear_eoi(&mut self) {
        self.eoi = false;
    }

    pub(crate) fn set_eoi(&mut self) {
        self.eoi = true;
    }

    pub(crate) fn record(&mut self, event: EventType) {
        debug!("IEC event: {}", event);
        self.events.record(event);
    }

    //
    // Line control
    //

    #[inline]
    pub(crate) fn set_lines(&mut self, lines: Lines) {
        self.bus.set(lines);
    }

    #[inline]
    pub(crate) fn release_lines(&mut self, lines: Lines) {
        self.bus.release(lines);
    }

    /// Set some lines and release others, in one operation.
    #[inline]
    pub(crate) fn set_release(&mut self, set: Lines, release: Lines) {
        self.bus.set(set);
        self.bus.release(release);
    }

    /// Whether a line (or any of several lines) is asserted.
    #[inline]
    pub(crate) fn get(&mut self, lines: Lines) -> bool {
        self.bus.poll().intersects(lines)
    }

    /// Wait, feeding the watchdog, until the lines in `mask` match `state`
    /// (a set bit means asserted).  Returns false on timeout.
    pub(crate) fn wait_for(&mut self, mask: Lines, state: Lines, timeout: Duration) -> bool {
        self.wait_inner(mask, state, timeout, true)
    }

    /// Wait, feeding the watchdog, while the lines in `mask` match `state`.
    /// Returns false if they still match on timeout.
    pub(crate) fn wait_while(&mut self, mask: Lines, state: Lines, timeout: Duration) -> bool {
        self.wait_inner(mask, state, timeout, false)
    }

    /// Standard 2ms handshake wait.
    #[inline]
    pub(crate) fn wait_timeout_2ms(&mut self, mask: Lines, state: Lines) -> bool {
        let timeout = self.timeouts.handshake;
        self.wait_for(mask, state, timeout)
    }

    /// A step in one of the fast protocol handshakes.  Times out with an
    /// error, and logs the event.
    pub(crate) fn fast_wait(&mut self, mask: Lines, state: Lines) -> Result<(), DriverError> {
        let timeout = self.timeouts.fast_handshake;
        if self.wait_for(mask, state, timeout) {
            Ok(())
        } else {
            trace!("Fast handshake timeout waiting for {} == {}", mask, state);
            self.record(EventType::FastTimeout);
            Err(DriverError::Timeout)
        }
    }

    fn wait_inner(&mut self, mask: Lines, state: Lines, timeout: Duration, until: bool) -> bool {
        let deadline = self.deadline(timeout);
        loop {
            self.bus.feed_watchdog();

            let matches = (self.bus.poll() & mask) == state;
            if matches == until {
                return true;
            }

            if self.bus.now() >= deadline {
                // One final check, in case we were delayed between the
                // previous check and the deadline test
                let matches = (self.bus.poll() & mask) == state;
                return matches == until;
            }
        }
    }

    fn deadline(&self, timeout: Duration) -> Instant {
        self.bus.now() + timeout
    }

    /// Let a change to the lines settle before reading them back.
    #[inline]
    pub(crate) fn settle(&mut self) {
        self.bus.block_ns(SETTLE_NS);
    }

    /// Run `f` with interrupts disabled.  Used around single byte
    /// transfers, and by IRQ_PAUSE, which deliberately starves the USB
    /// stack.
    pub(crate) fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_enabled = self.bus.disable_interrupts();
        let result = f(self);
        self.bus.restore_interrupts(was_enabled);
        result
    }

    //
    // Bus level operations
    //

    /// Reset the bus.  Holds RESET for 20ms, then waits for a device to
    /// respond to ATN and then free the bus (drives take a while to boot).
    ///
    /// Distinguishes a bus with no devices ([`DriverError::NoDevices`]) from
    /// one where something kept the bus busy ([`DriverError::Timeout`]).
    /// Both CLK and DATA are always released on return.
    pub fn reset(&mut self) -> Result<(), DriverError> {
        debug!("Resetting IEC bus");

        self.release_lines(Lines::DATA | Lines::ATN | Lines::CLOCK | Lines::SRQ);
        self.eoi = false;
        self.state = BusState::Unknown;

        self.set_lines(Lines::RESET);
        let hold = self.timeouts.reset_hold;
        self.bus.block_for(hold);
        self.release_lines(Lines::RESET);

        let mut heard_device = false;
        for _ in 0..self.timeouts.bus_free_checks {
            self.bus.feed_watchdog();
            match self.check_if_bus_free() {
                BusCheck::Free => {
                    debug!("IEC bus free after reset");
                    self.state = BusState::Free;
                    return Ok(());
                }
                BusCheck::Busy => heard_device = true,
                BusCheck::Silent => (),
            }
            let interval = self.timeouts.bus_free_interval;
            self.bus.block_for(interval);
        }

        self.release_lines(Lines::EXTERNAL);
        if heard_device {
            warn!("IEC bus still busy after reset");
            self.record(EventType::BusFreeTimeout);
            Err(DriverError::Timeout)
        } else {
            warn!("No devices on IEC bus after reset");
            self.record(EventType::NoDevices);
            Err(DriverError::NoDevices)
        }
    }

    /// Check whether the bus is free: nothing is holding DATA, and some
    /// device responds to ATN by asserting DATA and then releases it again
    /// once ATN goes away.
    pub(crate) fn check_if_bus_free(&mut self) -> BusCheck {
        self.release_lines(Lines::ATN | Lines::CLOCK | Lines::DATA | Lines::RESET);

        // Wait for the drive to have time to react
        block_us!(self.bus, 50);

        // If DATA is held, drive is not yet ready
        if self.get(Lines::DATA) {
            return BusCheck::Busy;
        }

        // DATA is free, now make sure it is stable for 50us
        block_us!(self.bus, 50);
        if self.get(Lines::DATA) {
            return BusCheck::Busy;
        }

        // Assert ATN and wait for the drive to have time to react.  It
        // should assert DATA.
        self.set_lines(Lines::ATN);
        block_us!(self.bus, 100);
        if !self.get(Lines::DATA) {
            self.release_lines(Lines::ATN);
            return BusCheck::Silent;
        }

        // Now release ATN and wait for the drive to release DATA
        self.release_lines(Lines::ATN);
        block_us!(self.bus, 100);
        if self.get(Lines::DATA) {
            BusCheck::Busy
        } else {
            BusCheck::Free
        }
    }

    /// Read the current state of all the external lines.
    pub fn poll_lines(&mut self) -> Lines {
        self.bus.poll() & Lines::EXTERNAL
    }

    /// Wait for the given line to become asserted (`asserted` true) or
    /// released.  Returns the state of all lines once the condition is met.
    /// Bounded by the listener timeout, as a host may legitimately wait for
    /// a slow drive.
    pub fn wait_line(&mut self, line: Lines, asserted: bool) -> Result<Lines, DriverError> {
        let line = line & Lines::EXTERNAL;
        let state = if asserted { line } else { Lines::empty() };
        let timeout = self.timeouts.listener;
        if self.wait_for(line, state, timeout) {
            Ok(self.poll_lines())
        } else {
            self.record(EventType::LineWaitTimeout);
            Err(DriverError::Timeout)
        }
    }

    /// Set and release lines on behalf of the host.
    pub fn setrelease(&mut self, set: Lines, release: Lines) {
        trace!("Set {} release {}", set, release);
        self.set_release(set & Lines::EXTERNAL, release & Lines::EXTERNAL);
    }

    /// Write a byte to the parallel port.
    pub fn pp_write(&mut self, byte: u8) {
        self.bus.pp_write(byte);
    }

    /// Read a byte from the parallel port.
    pub fn pp_read(&mut self) -> u8 {
        self.bus.pp_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CbmDrive, NoPeer, SimBus};

    #[test]
    fn reset_finds_drive_and_releases_lines() {
        let mut iec = IecDriver::new(SimBus::new(CbmDrive::new(8)));
        assert_eq!(iec.reset(), Ok(()));
        assert_eq!(iec.state(), BusState::Free);

        let host = iec.bus().host_lines();
        assert!(!host.intersects(Lines::CLOCK | Lines::DATA | Lines::ATN | Lines::RESET));
        assert!(!iec.poll_lines().intersects(Lines::CLOCK | Lines::DATA));
    }

    #[test]
    fn reset_with_empty_bus_reports_no_devices() {
        let timeouts = IecTimeouts {
            bus_free_checks: 20,
            ..Default::default()
        };
        let mut iec = IecDriver::with_timeouts(SimBus::new(NoPeer), timeouts);
        assert_eq!(iec.reset(), Err(DriverError::NoDevices));
        assert!(iec.bus().host_lines().is_empty());
        assert_eq!(
            iec.events().get(0).map(|e| e.event_type),
            Some(EventType::NoDevices)
        );
    }

    #[test]
    fn reset_clears_eoi() {
        let mut iec = IecDriver::new(SimBus::new(CbmDrive::new(8)));
        iec.set_eoi();
        iec.reset().unwrap();
        assert!(!iec.get_eoi());
    }

    #[test]
    fn wait_times_out_within_bound() {
        let mut iec = IecDriver::new(SimBus::new(NoPeer));
        let start = iec.bus().now();
        assert!(!iec.wait_for(Lines::DATA, Lines::DATA, Duration::from_millis(2)));
        let elapsed = iec.bus().now() - start;
        assert!(elapsed >= Duration::from_millis(2));
        assert!(elapsed < Duration::from_millis(3));
    }

    #[test]
    fn wait_while_returns_once_condition_clears() {
        let mut iec = IecDriver::new(SimBus::new(NoPeer));
        // Nothing is asserted, so we aren't held
        assert!(iec.wait_while(Lines::ATN | Lines::RESET, Lines::ATN | Lines::RESET, HANDSHAKE_TIMEOUT));
    }

    #[test]
    fn setrelease_and_poll() {
        let mut iec = IecDriver::new(SimBus::new(NoPeer));
        iec.setrelease(Lines::ATN | Lines::CLOCK, Lines::empty());
        assert_eq!(iec.poll_lines(), Lines::ATN | Lines::CLOCK);
        iec.setrelease(Lines::empty(), Lines::ATN);
        assert_eq!(iec.poll_lines(), Lines::CLOCK);

        assert_eq!(iec.wait_line(Lines::CLOCK, true), Ok(Lines::CLOCK));
    }

    #[test]
    fn wait_line_times_out() {
        let timeouts = IecTimeouts {
            listener: Duration::from_millis(5),
            ..Default::default()
        };
        let mut iec = IecDriver::with_timeouts(SimBus::new(NoPeer), timeouts);
        assert_eq!(iec.wait_line(Lines::DATA, true), Err(DriverError::Timeout));
        assert_eq!(
            iec.events().get(0).map(|e| e.event_type),
            Some(EventType::LineWaitTimeout)
        );
    }
}
