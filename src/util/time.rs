//! Timing for the IEC engine: the [`Clock`] abstraction and the delay
//! macros built on it.
//!
//! All delays are busy waits against a free-running counter rather than
//! counted loops, so they stay roughly accurate even if an interrupt lands
//! in the middle of one.  The engine never reads the hardware timer
//! directly - it goes through [`Clock`], which the firmware implements on
//! top of embassy-time and the simulator implements with a virtual clock.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

/// A source of time, and a way to burn it precisely.
pub trait Clock {
    /// The current time.
    fn now(&self) -> Instant;

    /// Block (not yield) for the given duration.
    fn block_for(&mut self, duration: Duration);

    /// Block for a number of nanoseconds.  This won't be precise, but must
    /// never be shorter than asked for.
    fn block_ns(&mut self, ns: u32);

    /// Feed the hardware watchdog.  Called on every iteration of every wait
    /// loop, so long transfers don't trigger a spurious reset.
    fn feed_watchdog(&mut self) {}

    /// Disable interrupts, returning whether they were enabled beforehand.
    /// Used around the bit-exact parts of the handshakes, where a late
    /// response desynchronizes a whole byte.
    fn disable_interrupts(&mut self) -> bool {
        false
    }

    /// Undo [`Clock::disable_interrupts`].
    fn restore_interrupts(&mut self, _was_enabled: bool) {}
}

/// Busy wait for `duration` against the embassy time driver.  Inlined, as
/// it sits inside the handshake loops.
#[cfg(feature = "firmware")]
#[inline(always)]
pub fn block_for(duration: Duration) {
    let expires = Instant::now() + duration;
    while Instant::now() < expires {}
}

/// Burn roughly `$ns` nanoseconds in CPU cycles.  The embassy-rp tick is
/// 1us, too coarse for settle delays, so this counts cycles instead: about
/// 8ns each on the RP2040 and 6.7ns on the RP235x.
#[cfg(feature = "firmware")]
macro_rules! block_ns {
    ($ns:expr) => {{
        #[cfg(feature = "pico")]
        const CLOCK_FREQ_MHZ: u32 = 125;
        #[cfg(feature = "pico2")]
        const CLOCK_FREQ_MHZ: u32 = 150;
        const NS_PER_CYCLE: u32 = 1000 / CLOCK_FREQ_MHZ;

        cortex_m::asm::delay(($ns as u32).div_ceil(NS_PER_CYCLE));
    }};
}
#[cfg(feature = "firmware")]
pub(crate) use block_ns;

/// Block for a specific number of microseconds.
macro_rules! block_us {
    ($clock:expr, $us:expr) => {
        $crate::util::time::Clock::block_for(&mut $clock, ::embassy_time::Duration::from_micros($us))
    };
}
pub(crate) use block_us;

/// Let the bus lines settle after a change.
macro_rules! iec_delay {
    ($clock:expr) => {
        $crate::util::time::block_us!($clock, 2)
    };
}
pub(crate) use iec_delay;

pub mod iec {
    //! Defaults for [`IecTimeouts`](crate::protocol::IecTimeouts), and the
    //! fixed delays within a byte.  Delays are in us.

    use embassy_time::Duration;

    /// Settle time after changing a line, before it can be reliably read
    /// back.  Bus capacitance needs roughly this long.
    pub const SETTLE_NS: u32 = 500;

    /// Standard handshake acknowledgement timeout.
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2);

    /// How long to hold RESET asserted.
    pub const RESET_HOLD: Duration = Duration::from_millis(20);

    /// How long to wait between checks for the bus being free after a
    /// reset.
    pub const BUS_FREE_CHECK_INTERVAL: Duration = Duration::from_millis(1);

    /// How many times to check for the bus being free after a reset.
    pub const BUS_FREE_CHECKS: u32 = 2000;

    /// Time to wait for the listener to release DATA, signalling it is ready
    /// for the next byte.  A drive can take a long time to be ready (during
    /// a directory read, for example), so this is long.
    pub const LISTENER_TIMEOUT: Duration = Duration::from_secs(20);

    /// Time to wait for CLK to be pulled down by the drive after telling it
    /// to enter TALK.
    pub const WRITE_TALK_CLK_TIMEOUT: Duration = Duration::from_secs(1);

    /// Time to wait for CLK to be released at the beginning on the main CBM
    /// protocol read loop, before reading a byte.
    pub const READ_CLK_START_TIMEOUT: Duration = Duration::from_secs(1);

    /// Time to wait for drive to pull CLK low after releasing DATA when
    /// reading a byte.  If it doesn't, the talker is signalling EOI.
    pub const READ_CLK_TIMEOUT: Duration = Duration::from_micros(400);

    /// Time to wait for each handshake step of the S1, S2, PP and P2
    /// protocols.
    pub const FAST_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Typical non-EOI response to RFD time
    pub const IEC_T_NE: u64 = 40;

    /// Min talker bit setup time (70 typical)
    pub const IEC_T_S: u64 = 20;

    /// Min data valid time (20 typical)
    pub const IEC_T_V: u64 = 20;

    /// Min frame to release of ATN time
    pub const IEC_T_R: u64 = 20;

    /// Min time between bytes
    pub const IEC_T_BB: u64 = 100;

    /// How long we hold DATA to acknowledge an EOI from a talker.
    pub const IEC_T_EOI_ACK: u64 = 70;

    /// Pause after acknowledging a received byte.
    pub const IEC_T_POST_ACK: u64 = 50;
}
