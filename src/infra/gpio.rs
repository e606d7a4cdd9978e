//! The real bus: IEC lines and the parallel port on RP2040/RP235x GPIOs.
//!
//! The source code serves as the master list of pin assignments for the
//! hardware.  Each IEC line is a pair of pins, one input and one output,
//! driving the bus through an inverting open-collector stage.  The parallel
//! port is 8 bidirectional pins.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::gpio::{Flex, Pull};
use embassy_rp::watchdog::Watchdog;
use embassy_time::{Duration, Instant};

use crate::protocol::BusLines;
use crate::types::Lines;
use crate::util::time::{self, Clock, block_ns};

/// Pin numbers, for logging.  The pins themselves are taken from the
/// peripherals by the caller, in this order.
pub mod pins {
    pub const CLOCK_IN: u8 = 19;
    pub const CLOCK_OUT: u8 = 11;
    pub const DATA_IN: u8 = 20;
    pub const DATA_OUT: u8 = 13;
    pub const ATN_IN: u8 = 17;
    pub const ATN_OUT: u8 = 12;
    pub const RESET_IN: u8 = 18;
    pub const RESET_OUT: u8 = 10;
    pub const SRQ_IN: u8 = 16;
    pub const SRQ_OUT: u8 = 14;
    /// Parallel port, bit 0 first.
    pub const PARALLEL: [u8; 8] = [2, 3, 4, 5, 9, 8, 7, 6];
}

/// A single IEC line, using separate input and output pins.
pub struct Line {
    input: Flex<'static>,
    output: Flex<'static>,
}

impl Line {
    pub fn new(mut input: Flex<'static>, mut output: Flex<'static>) -> Self {
        // No pull-ups/downs on the input - the level shifter has pull-ups
        input.set_as_input();
        input.set_pull(Pull::None);

        // Output low is the released state, because it is inverted
        output.set_as_output();
        output.set_low();

        Self { input, output }
    }

    /// Drive the line low on the bus.
    #[inline(always)]
    pub fn set(&mut self) {
        self.output.set_high();
    }

    #[inline(always)]
    pub fn release(&mut self) {
        self.output.set_low();
    }

    /// Whether anyone is holding the line low.
    #[inline(always)]
    pub fn get(&self) -> bool {
        self.input.is_low()
    }
}

/// All of the IEC lines.
pub struct IecLines {
    pub clock: Line,
    pub data: Line,
    pub atn: Line,
    pub reset: Line,
    pub srq: Line,
}

/// The bus, as seen by the engine.  Also owns the hardware watchdog, which
/// the engine feeds from every wait loop.
pub struct RpBus {
    lines: IecLines,
    parallel: [Flex<'static>; 8],
    watchdog: Watchdog,
}

impl RpBus {
    pub fn new(lines: IecLines, parallel: [Flex<'static>; 8], watchdog: Watchdog) -> Self {
        let mut bus = Self {
            lines,
            parallel,
            watchdog,
        };
        bus.release(Lines::EXTERNAL);
        bus.parallel_input();
        debug!(
            "IEC bus on CLK {}/{} DATA {}/{} ATN {}/{}",
            pins::CLOCK_IN,
            pins::CLOCK_OUT,
            pins::DATA_IN,
            pins::DATA_OUT,
            pins::ATN_IN,
            pins::ATN_OUT
        );
        bus
    }

    fn each_line(&mut self, lines: Lines, mut f: impl FnMut(&mut Line)) {
        if lines.contains(Lines::DATA) {
            f(&mut self.lines.data);
        }
        if lines.contains(Lines::CLOCK) {
            f(&mut self.lines.clock);
        }
        if lines.contains(Lines::ATN) {
            f(&mut self.lines.atn);
        }
        if lines.contains(Lines::RESET) {
            f(&mut self.lines.reset);
        }
        if lines.contains(Lines::SRQ) {
            f(&mut self.lines.srq);
        }
    }

    fn parallel_input(&mut self) {
        for pin in self.parallel.iter_mut() {
            pin.set_as_input();
            pin.set_pull(Pull::Up);
        }
    }
}

impl BusLines for RpBus {
    #[inline(always)]
    fn set(&mut self, lines: Lines) {
        self.each_line(lines, Line::set);
    }

    #[inline(always)]
    fn release(&mut self, lines: Lines) {
        self.each_line(lines, Line::release);
    }

    #[inline(always)]
    fn poll(&mut self) -> Lines {
        let mut lines = Lines::empty();
        lines.set(Lines::DATA, self.lines.data.get());
        lines.set(Lines::CLOCK, self.lines.clock.get());
        lines.set(Lines::ATN, self.lines.atn.get());
        lines.set(Lines::RESET, self.lines.reset.get());
        lines.set(Lines::SRQ, self.lines.srq.get());
        lines
    }

    fn pp_write(&mut self, byte: u8) {
        for (bit, pin) in self.parallel.iter_mut().enumerate() {
            if byte & (1 << bit) != 0 {
                pin.set_high();
            } else {
                pin.set_low();
            }
            pin.set_as_output();
        }
    }

    fn pp_read(&mut self) -> u8 {
        self.parallel_input();
        self.parallel
            .iter()
            .enumerate()
            .fold(0, |byte, (bit, pin)| byte | ((pin.is_high() as u8) << bit))
    }
}

impl Clock for RpBus {
    #[inline(always)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline(always)]
    fn block_for(&mut self, duration: Duration) {
        time::block_for(duration);
    }

    #[inline(always)]
    fn block_ns(&mut self, ns: u32) {
        block_ns!(ns);
    }

    #[inline(always)]
    fn feed_watchdog(&mut self) {
        self.watchdog.feed();
    }

    fn disable_interrupts(&mut self) -> bool {
        let was_enabled = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        was_enabled
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        if was_enabled {
            // Safety: only re-enables interrupts which were enabled when
            // disable_interrupts() was called
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}
