//! The simulated bus lines and clock.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

use super::{BusView, Peer};
use crate::protocol::BusLines;
use crate::types::Lines;
use crate::util::time::Clock;

// How much virtual time each line operation takes.  Roughly what a GPIO
// access and the surrounding code costs on the real hardware.
const OP_NS: u64 = 250;

// Granularity used when the engine blocks.
const BLOCK_STEP_NS: u64 = 1_000;

/// Simulated bus lines, with a single peer device attached.
#[derive(Debug)]
pub struct SimBus<P> {
    peer: P,
    host: Lines,
    // Some when the adapter is driving the parallel port
    host_port: Option<u8>,
    now_ns: u64,
}

impl<P: Peer> SimBus<P> {
    pub fn new(peer: P) -> Self {
        Self {
            peer,
            host: Lines::empty(),
            host_port: None,
            now_ns: 0,
        }
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut P {
        &mut self.peer
    }

    pub fn into_peer(self) -> P {
        self.peer
    }

    /// Lines asserted by the adapter side.
    pub fn host_lines(&self) -> Lines {
        self.host
    }

    /// Lines asserted by anyone.
    pub fn lines(&self) -> Lines {
        self.host | self.peer.asserted()
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Let time pass, stepping the peer as it does.
    pub fn advance(&mut self, duration: Duration) {
        self.advance_ns(duration.as_micros() * 1_000, BLOCK_STEP_NS);
    }

    fn port_value(&self) -> u8 {
        match self.host_port {
            Some(value) => value,
            None => self.peer.port().unwrap_or(0xff),
        }
    }

    fn advance_ns(&mut self, ns: u64, step: u64) {
        let end = self.now_ns + ns;
        while self.now_ns < end {
            self.now_ns = (self.now_ns + step).min(end);
            self.step_peer();
        }
    }

    fn step_peer(&mut self) {
        let view = BusView {
            host: self.host,
            lines: self.lines(),
        };
        let port = self.port_value();
        self.peer.step(self.now_ns, &view, port);
    }
}

impl<P: Peer> BusLines for SimBus<P> {
    fn set(&mut self, lines: Lines) {
        self.host |= lines;
        self.advance_ns(OP_NS, OP_NS);
    }

    fn release(&mut self, lines: Lines) {
        self.host &= !lines;
        self.advance_ns(OP_NS, OP_NS);
    }

    fn poll(&mut self) -> Lines {
        self.advance_ns(OP_NS, OP_NS);
        self.lines()
    }

    fn pp_write(&mut self, byte: u8) {
        self.host_port = Some(byte);
        self.advance_ns(OP_NS, OP_NS);
    }

    fn pp_read(&mut self) -> u8 {
        self.host_port = None;
        self.advance_ns(OP_NS, OP_NS);
        self.port_value()
    }
}

impl<P: Peer> Clock for SimBus<P> {
    fn now(&self) -> Instant {
        Instant::from_micros(self.now_ns / 1_000)
    }

    fn block_for(&mut self, duration: Duration) {
        self.advance(duration);
    }

    fn block_ns(&mut self, ns: u32) {
        self.advance_ns(ns as u64, OP_NS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::NoPeer;

    #[test]
    fn lines_are_wired_or() {
        let mut bus = SimBus::new(NoPeer);
        bus.set(Lines::CLOCK | Lines::ATN);
        assert_eq!(bus.poll(), Lines::CLOCK | Lines::ATN);
        bus.release(Lines::ATN);
        assert_eq!(bus.poll(), Lines::CLOCK);
        assert_eq!(bus.host_lines(), Lines::CLOCK);
    }

    #[test]
    fn time_advances_with_operations() {
        let mut bus = SimBus::new(NoPeer);
        let start = bus.now();
        bus.block_for(Duration::from_millis(3));
        assert_eq!(bus.now() - start, Duration::from_millis(3));
        for _ in 0..8 {
            bus.poll();
        }
        assert_eq!(bus.now_ns(), 3_002_000);
    }

    #[test]
    fn undriven_port_floats_high() {
        let mut bus = SimBus::new(NoPeer);
        bus.pp_write(0x12);
        assert_eq!(bus.pp_read(), 0xff);
    }
}
