//! A line level simulation of the IEC bus, used to test the engine and the
//! dispatcher on the host.
//!
//! [`SimBus`] stands in for the GPIOs.  It runs on a virtual clock, which
//! advances a little with every line operation, and steps a simulated
//! [`Peer`] device every time it does.  So the peer sees every change the
//! engine makes, in order, and the engine sees the peer's responses with
//! realistic latency - but a 1 second timeout costs nothing in wall-clock
//! time.
//!
//! Two peers are provided:
//! - [`CbmDrive`] - a drive speaking the standard CBM protocol, with a small
//!   in-memory file store and a status channel.
//! - [`Loopback`] - a drive running a custom transfer routine in one of the
//!   fast protocols, which echoes back every block it receives.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod bus;
mod drive;
mod loopback;

pub use bus::SimBus;
pub use drive::CbmDrive;
pub use loopback::Loopback;

use crate::types::Lines;

/// What a peer can see of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusView {
    /// Lines asserted by the adapter.
    pub host: Lines,
    /// Lines asserted by anyone, including the peer itself.
    pub lines: Lines,
}

/// A simulated device on the bus.
pub trait Peer {
    /// Called every time simulated time advances.  `now_ns` is the current
    /// virtual time.  The peer reacts to the lines, and updates what it is
    /// asserting.
    fn step(&mut self, now_ns: u64, view: &BusView, port: u8);

    /// The lines this peer is asserting.
    fn asserted(&self) -> Lines;

    /// What this peer is driving onto the parallel port, if anything.
    fn port(&self) -> Option<u8> {
        None
    }
}

/// An empty bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeer;

impl Peer for NoPeer {
    fn step(&mut self, _now_ns: u64, _view: &BusView, _port: u8) {}

    fn asserted(&self) -> Lines {
        Lines::empty()
    }
}

pub(crate) const fn us(us: u64) -> u64 {
    us * 1_000
}
