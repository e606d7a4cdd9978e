//! A simulated drive running a custom transfer routine in one of the fast
//! protocols.  It receives a block of a fixed size, then sends the same
//! block back, and repeats.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::collections::VecDeque;
use std::vec::Vec;

use super::{BusView, Peer, us};
use crate::protocol::ProtocolType;
use crate::types::Lines;

// Time between receiving the last byte of a block, and starting to send it
// back.
const TURNAROUND_NS: u64 = us(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receive(u8),
    Turnaround { at: u64 },
    Send(u8),
}

/// A drive which echoes back whatever it is sent, using a fast protocol.
#[derive(Debug)]
pub struct Loopback {
    protocol: ProtocolType,
    block_len: usize,
    asserted: Lines,
    port: Option<u8>,
    phase: Phase,
    prev_host: Lines,

    // Byte being received or sent, and its bit position
    byte: u8,
    bit: u8,
    // First copy of an S1 bit
    s1_bit: bool,

    rx: Vec<u8>,
    tx: VecDeque<u8>,
    received: Vec<u8>,
}

impl Loopback {
    /// `block_len` is how many bytes the adapter writes before reading them
    /// back.  PP moves bytes in pairs, so for PP it is rounded up.
    pub fn new(protocol: ProtocolType, block_len: usize) -> Self {
        let block_len = match protocol {
            ProtocolType::PP => block_len.div_ceil(2) * 2,
            _ => block_len,
        };
        let mut lb = Self {
            protocol,
            block_len,
            asserted: Lines::empty(),
            port: None,
            phase: Phase::Receive(0),
            prev_host: Lines::empty(),
            byte: 0,
            bit: 0,
            s1_bit: false,
            rx: Vec::new(),
            tx: VecDeque::new(),
            received: Vec::new(),
        };
        lb.idle();
        lb
    }

    /// Everything received so far.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    // Lines held while waiting to receive
    fn idle(&mut self) {
        self.port = None;
        self.asserted = match self.protocol {
            ProtocolType::S2 => Lines::CLOCK,
            ProtocolType::PP | ProtocolType::P2 => Lines::DATA,
            _ => Lines::empty(),
        };
        self.phase = Phase::Receive(0);
        self.byte = 0;
        self.bit = 0;
    }

    fn set(&mut self, lines: Lines) {
        self.asserted |= lines;
    }

    fn release(&mut self, lines: Lines) {
        self.asserted &= !lines;
    }

    fn put(&mut self, lines: Lines, asserted: bool) {
        if asserted {
            self.set(lines);
        } else {
            self.release(lines);
        }
    }

    // A byte has arrived.  Returns true if the block is complete, and we're
    // turning around to send it back.
    fn byte_received(&mut self, byte: u8, now: u64) -> bool {
        self.rx.push(byte);
        self.received.push(byte);
        if self.rx.len() < self.block_len {
            return false;
        }
        self.tx = self.rx.drain(..).collect();
        self.phase = Phase::Turnaround {
            at: now + TURNAROUND_NS,
        };
        true
    }

    fn next_tx(&mut self) {
        self.tx.pop_front();
        self.bit = 0;
    }

    fn start_send(&mut self) {
        self.bit = 0;
        match self.protocol {
            // Say we're about to send - the adapter waits for DATA to be
            // released before each bit
            ProtocolType::S1 => self.set(Lines::DATA),
            ProtocolType::S2 => self.set(Lines::CLOCK),
            _ => (),
        }
        self.phase = Phase::Send(0);
    }

    // Whether the adapter has just released the given line
    fn released_edge(&self, host: Lines, line: Lines) -> bool {
        !host.contains(line) && self.prev_host.contains(line)
    }

    fn tx_bit(&self, bit: u8) -> bool {
        self.tx.front().is_some_and(|b| (b >> bit) & 1 != 0)
    }

    fn step_s1(&mut self, now: u64, host: Lines) {
        let clk = host.contains(Lines::CLOCK);
        let data = host.contains(Lines::DATA);

        match self.phase {
            // Receive, MSB first: bit on DATA when CLK released, sent a
            // second time inverted
            Phase::Receive(0) => {
                if self.released_edge(host, Lines::CLOCK) {
                    self.s1_bit = data;
                    self.set(Lines::CLOCK);
                    self.phase = Phase::Receive(1);
                }
            }
            Phase::Receive(1) => {
                if data != self.s1_bit {
                    self.release(Lines::CLOCK);
                    self.phase = Phase::Receive(2);
                }
            }
            Phase::Receive(_) => {
                if clk {
                    self.byte = (self.byte << 1) | self.s1_bit as u8;
                    self.bit += 1;
                    self.phase = Phase::Receive(0);
                    if self.bit == 8 {
                        let byte = self.byte;
                        self.byte = 0;
                        self.bit = 0;
                        self.byte_received(byte, now);
                    }
                }
            }

            // Send, LSB first: bit on CLK
            Phase::Send(0) => {
                if clk {
                    let bit = self.tx_bit(self.bit);
                    self.put(Lines::CLOCK, bit);
                    self.release(Lines::DATA);
                    self.s1_bit = bit;
                    self.phase = Phase::Send(1);
                }
            }
            Phase::Send(1) => {
                if data {
                    self.put(Lines::CLOCK, !self.s1_bit);
                    self.phase = Phase::Send(2);
                }
            }
            Phase::Send(2) => {
                if !data {
                    self.set(Lines::DATA);
                    self.release(Lines::CLOCK);
                    self.phase = Phase::Send(3);
                }
            }
            Phase::Send(_) => {
                if clk {
                    self.bit += 1;
                    self.phase = Phase::Send(0);
                    if self.bit == 8 {
                        self.next_tx();
                        if self.tx.is_empty() {
                            self.idle();
                        }
                    }
                }
            }
            Phase::Turnaround { .. } => (),
        }
    }

    fn step_s2(&mut self, now: u64, host: Lines) {
        let atn = host.contains(Lines::ATN);
        let prev_atn = self.prev_host.contains(Lines::ATN);
        let data = host.contains(Lines::DATA);

        match self.phase {
            // Receive, LSB first: the first bit of each pair when ATN is
            // released, the second when it is asserted again
            Phase::Receive(0) => {
                if !atn && prev_atn {
                    self.s2_receive_bit(data, now);
                    self.release(Lines::CLOCK);
                    self.phase = Phase::Receive(1);
                }
            }
            Phase::Receive(_) => {
                if atn && !prev_atn {
                    self.phase = Phase::Receive(0);
                    self.set(Lines::CLOCK);
                    self.s2_receive_bit(data, now);
                }
            }

            // Send, LSB first: first bit of each pair with CLK released,
            // second with CLK held
            Phase::Send(0) => {
                if atn {
                    let bit = self.tx_bit(self.bit);
                    self.put(Lines::DATA, bit);
                    self.release(Lines::CLOCK);
                    self.phase = Phase::Send(1);
                }
            }
            Phase::Send(1) => {
                if !atn {
                    let bit = self.tx_bit(self.bit + 1);
                    self.put(Lines::DATA, bit);
                    self.set(Lines::CLOCK);
                    self.phase = Phase::Send(2);
                }
            }
            Phase::Send(_) => {
                if atn {
                    self.bit += 2;
                    self.phase = Phase::Send(0);
                    if self.bit == 8 {
                        self.next_tx();
                        if self.tx.is_empty() {
                            self.idle();
                        } else {
                            // Go straight into the next byte
                            self.step_s2(now, host);
                        }
                    } else {
                        self.step_s2(now, host);
                    }
                }
            }
            Phase::Turnaround { .. } => (),
        }
    }

    fn s2_receive_bit(&mut self, bit: bool, now: u64) {
        self.byte = (self.byte >> 1) | ((bit as u8) << 7);
        self.bit += 1;
        if self.bit == 8 {
            let byte = self.byte;
            self.byte = 0;
            self.bit = 0;
            self.byte_received(byte, now);
        }
    }

    fn step_pp(&mut self, now: u64, host: Lines, port: u8) {
        let clk = host.contains(Lines::CLOCK);

        match self.phase {
            // Receive a pair: DATA held says we're ready
            Phase::Receive(0) => {
                if self.released_edge(host, Lines::CLOCK) {
                    self.byte = port;
                    self.release(Lines::DATA);
                    self.phase = Phase::Receive(1);
                }
            }
            Phase::Receive(_) => {
                if clk {
                    let byte_0 = self.byte;
                    self.phase = Phase::Receive(0);
                    // Blocks are a whole number of pairs, so only the second
                    // byte can complete one
                    self.byte_received(byte_0, now);
                    if !self.byte_received(port, now) {
                        self.set(Lines::DATA);
                    }
                }
            }

            // Send a pair: first byte with DATA held, second with it released
            Phase::Send(0) => {
                if clk {
                    self.port = self.tx.pop_front();
                    self.set(Lines::DATA);
                    self.phase = Phase::Send(1);
                }
            }
            Phase::Send(1) => {
                if !clk {
                    self.port = self.tx.pop_front();
                    self.release(Lines::DATA);
                    self.phase = Phase::Send(2);
                }
            }
            Phase::Send(_) => {
                if clk {
                    if self.tx.is_empty() {
                        self.idle();
                    } else {
                        self.phase = Phase::Send(0);
                        self.step_pp(now, host, port);
                    }
                }
            }
            Phase::Turnaround { .. } => (),
        }
    }

    fn step_p2(&mut self, now: u64, host: Lines, port: u8) {
        let clk = host.contains(Lines::CLOCK);

        match self.phase {
            Phase::Receive(0) => {
                if self.released_edge(host, Lines::CLOCK) {
                    self.byte = port;
                    self.release(Lines::DATA);
                    self.phase = Phase::Receive(1);
                }
            }
            Phase::Receive(_) => {
                if clk {
                    self.set(Lines::DATA);
                    self.phase = Phase::Receive(0);
                    let byte = self.byte;
                    if self.byte_received(byte, now) {
                        // No delay needed - DATA stays held until the
                        // adapter releases CLK to ask for a byte
                        self.start_send();
                    }
                }
            }

            Phase::Send(0) => {
                if self.released_edge(host, Lines::CLOCK) {
                    self.port = self.tx.front().copied();
                    self.release(Lines::DATA);
                    self.phase = Phase::Send(1);
                }
            }
            Phase::Send(_) => {
                if clk {
                    self.set(Lines::DATA);
                    self.next_tx();
                    if self.tx.is_empty() {
                        self.idle();
                    } else {
                        self.phase = Phase::Send(0);
                    }
                }
            }
            Phase::Turnaround { .. } => (),
        }
    }
}

impl Peer for Loopback {
    fn step(&mut self, now: u64, view: &BusView, port: u8) {
        let host = view.host;

        if let Phase::Turnaround { at } = self.phase {
            if now >= at {
                self.start_send();
            }
        }

        match self.protocol {
            ProtocolType::S1 => self.step_s1(now, host),
            ProtocolType::S2 => self.step_s2(now, host),
            ProtocolType::PP => self.step_pp(now, host, port),
            ProtocolType::P2 => self.step_p2(now, host, port),
            // Not a fast protocol - nothing to do
            ProtocolType::Cbm => (),
        }

        self.prev_host = host;
    }

    fn asserted(&self) -> Lines {
        self.asserted
    }

    fn port(&self) -> Option<u8> {
        self.port
    }
}
