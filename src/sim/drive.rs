//! A simulated disk drive speaking the standard CBM serial protocol.
//!
//! The drive responds to ATN, decodes LISTEN, TALK, UNLISTEN, UNTALK, OPEN,
//! CLOSE and secondary address commands for its device number, receives
//! data as a listener (detecting and acknowledging EOI) and sends data as a
//! talker (signalling EOI on the last byte).  It has a small file store, and
//! a status channel (15).
//!
//! Timings are comfortably inside what the adapter expects from a real
//! 1541.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::collections::BTreeMap;
use std::string::{String, ToString};
use std::vec::Vec;

use super::{BusView, Peer, us};
use crate::protocol::{CMD_LISTEN, CMD_TALK, CMD_UNLISTEN, CMD_UNTALK, DEVICE_MASK, SECONDARY_MASK};
use crate::types::Lines;

// Time from ATN being asserted to us acknowledging it by pulling DATA.
const ATN_ACK_NS: u64 = us(20);

// Time from ATN being released to an unaddressed drive letting go of DATA.
const ATN_RELEASE_NS: u64 = us(20);

// Time from the talker releasing CLK to us saying we're ready for data.
const LISTENER_READY_NS: u64 = us(40);

// If the talker hasn't pulled CLK this long after we said we're ready, it is
// signalling EOI.
const EOI_DETECT_NS: u64 = us(200);

// How long we hold DATA to acknowledge EOI.
const EOI_ACK_NS: u64 = us(60);

// Time from the last bit of a byte to acknowledging the frame.
const FRAME_ACK_NS: u64 = us(20);

// Talker timings.
const TURNAROUND_NS: u64 = us(20);
const TALK_READY_NS: u64 = us(100);
const TALK_START_NS: u64 = us(40);
const TALK_BIT_SETUP_NS: u64 = us(10);
const TALK_BIT_VALID_NS: u64 = us(20);
const TALK_ACK_TIMEOUT_NS: u64 = us(1_000);

// How long the drive holds DATA while booting after a reset.
const BOOT_NS: u64 = us(3_000);

const STATUS_OK: &str = "00, OK,00,00\r";
const STATUS_FILE_NOT_FOUND: &str = "62,FILE NOT FOUND,00,00\r";

const STATUS_CHANNEL: u8 = 15;
const CMD_SECONDARY_BASE: u8 = 0x60;
const CMD_CLOSE_BASE: u8 = 0xe0;
const CMD_OPEN_BASE: u8 = 0xf0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    None,
    Listener,
    Talker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Secondary {
    Data(u8),
    Open(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Channel {
    Closed,
    Read { data: Vec<u8>, pos: usize },
    Write { name: String, data: Vec<u8> },
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reset,
    Booting { until: u64 },
    AtnAck { at: u64 },
    Unaddressed { at: u64 },

    // Listener.  Waiting for the talker to release CLK, having first seen
    // it held.
    ListenWaitReady { armed: bool },
    ListenReadyDelay { at: u64 },
    ListenWaitClock { since: u64, eoi_acked: bool },
    ListenEoiAck { until: u64 },
    ListenBits { count: u8 },
    ListenByteEnd,
    ListenFrameAck { at: u64 },
    Nak,

    // Talker
    TalkTurnaround { at: Option<u64> },
    TalkReady { at: u64 },
    TalkWaitListener,
    TalkEoiWaitAck,
    TalkEoiWaitRelease,
    TalkDelay { at: u64 },
    TalkBits { bit: u8, stage: u8, at: u64 },
    TalkWaitAck { deadline: u64 },
    TalkDone,
}

/// A simulated CBM drive.
#[derive(Debug)]
pub struct CbmDrive {
    device: u8,
    asserted: Lines,
    phase: Phase,
    prev_host: Lines,

    under_atn: bool,
    role: Role,
    secondary: Option<Secondary>,

    // Byte being received, and whether EOI was signalled for it
    rx_byte: u8,
    rx_eoi: bool,
    // Whether the byte being sent is the last
    tx_eoi: bool,

    name: Vec<u8>,
    channels: [Channel; 16],
    status: Vec<u8>,
    status_pos: usize,
    files: BTreeMap<String, Vec<u8>>,

    // Test instrumentation
    commands: Vec<u8>,
    received: Vec<(u8, bool)>,
    open_names: BTreeMap<u8, Vec<u8>>,
    data_bytes: usize,
    nak_data_byte: Option<usize>,
    resets: usize,
}

impl CbmDrive {
    pub fn new(device: u8) -> Self {
        Self {
            device: device & DEVICE_MASK,
            asserted: Lines::empty(),
            phase: Phase::Idle,
            prev_host: Lines::empty(),
            under_atn: false,
            role: Role::None,
            secondary: None,
            rx_byte: 0,
            rx_eoi: false,
            tx_eoi: false,
            name: Vec::new(),
            channels: core::array::from_fn(|_| Channel::Closed),
            status: STATUS_OK.as_bytes().to_vec(),
            status_pos: 0,
            files: BTreeMap::new(),
            commands: Vec::new(),
            received: Vec::new(),
            open_names: BTreeMap::new(),
            data_bytes: 0,
            nak_data_byte: None,
            resets: 0,
        }
    }

    /// Refuse to acknowledge the given data byte (0 is the first) sent to a
    /// data channel.
    pub fn with_nak_on_data_byte(mut self, index: usize) -> Self {
        self.nak_data_byte = Some(index);
        self
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) {
        self.files.insert(name.to_string(), data.to_vec());
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Command bytes received under ATN, including those for other devices.
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    /// Data bytes received, with whether each was signalled with EOI.
    pub fn received(&self) -> &[(u8, bool)] {
        &self.received
    }

    pub fn received_data(&self) -> Vec<u8> {
        self.received.iter().map(|(b, _)| *b).collect()
    }

    /// The name most recently sent with OPEN on a secondary address.
    pub fn open_name(&self, secondary: u8) -> Option<&[u8]> {
        self.open_names.get(&secondary).map(Vec::as_slice)
    }

    pub fn is_listening(&self) -> bool {
        self.role == Role::Listener
    }

    pub fn is_talking(&self) -> bool {
        self.role == Role::Talker
    }

    /// How many times the drive has been reset.
    pub fn resets(&self) -> usize {
        self.resets
    }

    fn set(&mut self, lines: Lines) {
        self.asserted |= lines;
    }

    fn release(&mut self, lines: Lines) {
        self.asserted &= !lines;
    }

    fn reset(&mut self) {
        self.asserted = Lines::empty();
        self.under_atn = false;
        self.role = Role::None;
        self.secondary = None;
        self.rx_eoi = false;
        self.tx_eoi = false;
        self.name.clear();
        self.channels = core::array::from_fn(|_| Channel::Closed);
        self.status = STATUS_OK.as_bytes().to_vec();
        self.status_pos = 0;
        self.resets += 1;
    }

    fn atn_asserted(&mut self, now: u64) {
        // ATN overrides whatever we were doing
        self.asserted = Lines::empty();
        self.under_atn = true;
        self.rx_eoi = false;
        self.phase = Phase::AtnAck {
            at: now + ATN_ACK_NS,
        };
    }

    fn atn_released(&mut self, now: u64) {
        self.under_atn = false;
        self.phase = match self.role {
            Role::Listener => {
                self.set(Lines::DATA);
                Phase::ListenWaitReady { armed: false }
            }
            Role::Talker if self.has_talk_data() => Phase::TalkTurnaround { at: None },
            // Includes a TALK for a file which doesn't exist - we don't turn
            // the bus around, so the adapter times out
            _ => Phase::Unaddressed {
                at: now + ATN_RELEASE_NS,
            },
        };
    }

    fn atn_byte(&mut self, byte: u8) {
        self.commands.push(byte);

        match byte {
            CMD_UNLISTEN => {
                if self.role == Role::Listener {
                    self.finish_listen();
                    self.role = Role::None;
                }
            }
            CMD_UNTALK => {
                if self.role == Role::Talker {
                    self.role = Role::None;
                }
            }
            b if b & 0xe0 == CMD_LISTEN => {
                if b & DEVICE_MASK == self.device {
                    self.role = Role::Listener;
                    self.secondary = None;
                }
            }
            b if b & 0xe0 == CMD_TALK => {
                if b & DEVICE_MASK == self.device {
                    self.role = Role::Talker;
                    self.secondary = None;
                } else if self.role == Role::Talker {
                    self.role = Role::None;
                }
            }
            b if self.role != Role::None => {
                let sa = b & SECONDARY_MASK;
                match b & 0xf0 {
                    CMD_SECONDARY_BASE => self.secondary = Some(Secondary::Data(sa)),
                    CMD_CLOSE_BASE => {
                        self.close_channel(sa);
                        self.secondary = None;
                    }
                    CMD_OPEN_BASE => {
                        self.name.clear();
                        self.secondary = Some(Secondary::Open(sa));
                    }
                    _ => (),
                }
            }
            _ => (),
        }
    }

    // Returns false if we're refusing the byte
    fn data_byte(&mut self, byte: u8, eoi: bool) -> bool {
        match self.secondary {
            Some(Secondary::Data(sa)) => {
                let index = self.data_bytes;
                self.data_bytes += 1;
                if self.nak_data_byte == Some(index) {
                    return false;
                }
                if let Channel::Write { data, .. } = &mut self.channels[sa as usize] {
                    data.push(byte);
                }
            }
            Some(Secondary::Open(_)) => self.name.push(byte),
            None => (),
        }
        self.received.push((byte, eoi));
        true
    }

    fn finish_listen(&mut self) {
        if let Some(Secondary::Open(sa)) = self.secondary {
            let name = core::mem::take(&mut self.name);
            self.open_channel(sa, &name);
            self.open_names.insert(sa, name);
        }
        self.secondary = None;
    }

    fn open_channel(&mut self, sa: u8, name: &[u8]) {
        if sa == STATUS_CHANNEL {
            return;
        }

        let name = String::from_utf8_lossy(name).into_owned();
        let mut parts = name.split(',');
        let file = parts.next().unwrap_or_default().to_string();
        let write = sa == 1 || parts.any(|p| p.trim() == "W");

        let channel = if write {
            self.set_status(STATUS_OK);
            Channel::Write {
                name: file,
                data: Vec::new(),
            }
        } else if let Some(data) = self.files.get(&file) {
            let data = data.clone();
            self.set_status(STATUS_OK);
            Channel::Read { data, pos: 0 }
        } else {
            self.set_status(STATUS_FILE_NOT_FOUND);
            Channel::Missing
        };
        self.channels[sa as usize] = channel;
    }

    fn close_channel(&mut self, sa: u8) {
        let channel = core::mem::replace(&mut self.channels[sa as usize], Channel::Closed);
        if let Channel::Write { name, data } = channel {
            self.files.insert(name, data);
        }
    }

    fn set_status(&mut self, status: &str) {
        self.status = status.as_bytes().to_vec();
        self.status_pos = 0;
    }

    fn talk_channel(&self) -> Option<u8> {
        match self.secondary {
            Some(Secondary::Data(sa)) => Some(sa),
            _ => None,
        }
    }

    fn has_talk_data(&self) -> bool {
        match self.talk_channel() {
            Some(STATUS_CHANNEL) => true,
            Some(sa) => matches!(
                &self.channels[sa as usize],
                Channel::Read { data, pos } if *pos < data.len()
            ),
            None => false,
        }
    }

    // The next byte to send, and whether it's the last
    fn tx_byte(&self) -> Option<(u8, bool)> {
        match self.talk_channel() {
            Some(STATUS_CHANNEL) => {
                let byte = *self.status.get(self.status_pos)?;
                Some((byte, self.status_pos + 1 == self.status.len()))
            }
            Some(sa) => match &self.channels[sa as usize] {
                Channel::Read { data, pos } => {
                    let byte = *data.get(*pos)?;
                    Some((byte, *pos + 1 == data.len()))
                }
                _ => None,
            },
            None => None,
        }
    }

    fn tx_acked(&mut self) {
        match self.talk_channel() {
            Some(STATUS_CHANNEL) => {
                self.status_pos += 1;
                if self.status_pos >= self.status.len() {
                    // Reading the status clears it
                    self.set_status(STATUS_OK);
                }
            }
            Some(sa) => {
                if let Channel::Read { pos, .. } = &mut self.channels[sa as usize] {
                    *pos += 1;
                }
            }
            None => (),
        }
    }

    fn listen_step(&mut self, now: u64, host: Lines) {
        let clk = host.contains(Lines::CLOCK);
        let clk_released_edge = !clk && self.prev_host.contains(Lines::CLOCK);

        match self.phase {
            Phase::ListenWaitReady { armed } => {
                if clk {
                    self.phase = Phase::ListenWaitReady { armed: true };
                } else if armed {
                    self.phase = Phase::ListenReadyDelay {
                        at: now + LISTENER_READY_NS,
                    };
                }
            }
            Phase::ListenReadyDelay { at } => {
                if now >= at {
                    self.release(Lines::DATA);
                    self.phase = Phase::ListenWaitClock {
                        since: now,
                        eoi_acked: false,
                    };
                }
            }
            Phase::ListenWaitClock { since, eoi_acked } => {
                if clk {
                    self.rx_byte = 0;
                    self.phase = Phase::ListenBits { count: 0 };
                } else if !eoi_acked && !self.under_atn && now - since >= EOI_DETECT_NS {
                    self.rx_eoi = true;
                    self.set(Lines::DATA);
                    self.phase = Phase::ListenEoiAck {
                        until: now + EOI_ACK_NS,
                    };
                }
            }
            Phase::ListenEoiAck { until } => {
                if now >= until {
                    self.release(Lines::DATA);
                    self.phase = Phase::ListenWaitClock {
                        since: now,
                        eoi_acked: true,
                    };
                }
            }
            Phase::ListenBits { count } => {
                if clk_released_edge {
                    // Bits are sent LSB first, released meaning 1
                    let bit = !host.contains(Lines::DATA) as u8;
                    self.rx_byte = (self.rx_byte >> 1) | (bit << 7);
                    self.phase = if count == 7 {
                        Phase::ListenByteEnd
                    } else {
                        Phase::ListenBits { count: count + 1 }
                    };
                }
            }
            Phase::ListenByteEnd => {
                if clk {
                    self.phase = Phase::ListenFrameAck {
                        at: now + FRAME_ACK_NS,
                    };
                }
            }
            Phase::ListenFrameAck { at } => {
                if now >= at {
                    let byte = self.rx_byte;
                    let accepted = if self.under_atn {
                        self.atn_byte(byte);
                        true
                    } else {
                        let eoi = self.rx_eoi;
                        self.rx_eoi = false;
                        self.data_byte(byte, eoi)
                    };

                    if accepted {
                        self.set(Lines::DATA);
                        self.phase = Phase::ListenWaitReady { armed: false };
                    } else {
                        self.phase = Phase::Nak;
                    }
                }
            }
            _ => (),
        }
    }

    fn talk_step(&mut self, now: u64, host: Lines) {
        let clk = host.contains(Lines::CLOCK);
        let data = host.contains(Lines::DATA);

        match self.phase {
            Phase::TalkTurnaround { at: None } => {
                if !clk {
                    self.phase = Phase::TalkTurnaround {
                        at: Some(now + TURNAROUND_NS),
                    };
                }
            }
            Phase::TalkTurnaround { at: Some(at) } => {
                if now >= at {
                    self.release(Lines::DATA);
                    self.set(Lines::CLOCK);
                    self.phase = Phase::TalkReady {
                        at: now + TALK_READY_NS,
                    };
                }
            }
            Phase::TalkReady { at } => {
                if now >= at {
                    self.release(Lines::CLOCK);
                    self.phase = Phase::TalkWaitListener;
                }
            }
            Phase::TalkWaitListener => {
                if !data {
                    match self.tx_byte() {
                        Some((_, true)) => {
                            // Signal EOI by not pulling CLK, and wait for
                            // the listener to acknowledge
                            self.tx_eoi = true;
                            self.phase = Phase::TalkEoiWaitAck;
                        }
                        Some((_, false)) => {
                            self.tx_eoi = false;
                            self.phase = Phase::TalkDelay {
                                at: now + TALK_START_NS,
                            };
                        }
                        None => self.phase = Phase::TalkDone,
                    }
                }
            }
            Phase::TalkEoiWaitAck => {
                if data {
                    self.phase = Phase::TalkEoiWaitRelease;
                }
            }
            Phase::TalkEoiWaitRelease => {
                if !data {
                    self.phase = Phase::TalkDelay {
                        at: now + TALK_START_NS,
                    };
                }
            }
            Phase::TalkDelay { at } => {
                if now >= at {
                    self.set(Lines::CLOCK);
                    self.phase = Phase::TalkBits {
                        bit: 0,
                        stage: 0,
                        at: now + TALK_BIT_SETUP_NS,
                    };
                }
            }
            Phase::TalkBits { bit, stage, at } => {
                if now < at {
                    return;
                }
                let byte = self.tx_byte().map(|(b, _)| b).unwrap_or(0xff);
                match stage {
                    0 => {
                        // Put the bit on DATA - a 0 is pulled low
                        if (byte >> bit) & 1 == 0 {
                            self.set(Lines::DATA);
                        }
                        self.phase = Phase::TalkBits {
                            bit,
                            stage: 1,
                            at: now + TALK_BIT_SETUP_NS,
                        };
                    }
                    1 => {
                        // Bit valid
                        self.release(Lines::CLOCK);
                        self.phase = Phase::TalkBits {
                            bit,
                            stage: 2,
                            at: now + TALK_BIT_VALID_NS,
                        };
                    }
                    _ => {
                        self.set(Lines::CLOCK);
                        self.release(Lines::DATA);
                        self.phase = if bit == 7 {
                            Phase::TalkWaitAck {
                                deadline: now + TALK_ACK_TIMEOUT_NS,
                            }
                        } else {
                            Phase::TalkBits {
                                bit: bit + 1,
                                stage: 0,
                                at: now + TALK_BIT_SETUP_NS,
                            }
                        };
                    }
                }
            }
            Phase::TalkWaitAck { deadline } => {
                if data {
                    self.tx_acked();
                    if self.tx_eoi {
                        // All sent - let go of the bus
                        self.asserted = Lines::empty();
                        self.phase = Phase::TalkDone;
                    } else {
                        self.phase = Phase::TalkReady {
                            at: now + TALK_READY_NS,
                        };
                    }
                } else if now >= deadline {
                    self.asserted = Lines::empty();
                    self.phase = Phase::TalkDone;
                }
            }
            _ => (),
        }
    }
}

impl Peer for CbmDrive {
    fn step(&mut self, now: u64, view: &BusView, _port: u8) {
        let host = view.host;

        // RESET overrides everything
        if host.contains(Lines::RESET) {
            if self.phase != Phase::Reset {
                self.reset();
                self.phase = Phase::Reset;
            }
            self.prev_host = host;
            return;
        }
        match self.phase {
            Phase::Reset => {
                self.set(Lines::DATA);
                self.phase = Phase::Booting {
                    until: now + BOOT_NS,
                };
                self.prev_host = host;
                return;
            }
            Phase::Booting { until } => {
                if now >= until {
                    self.release(Lines::DATA);
                    self.phase = Phase::Idle;
                } else {
                    self.prev_host = host;
                    return;
                }
            }
            _ => (),
        }

        let atn = host.contains(Lines::ATN);
        let prev_atn = self.prev_host.contains(Lines::ATN);
        if atn && !prev_atn {
            self.atn_asserted(now);
        } else if !atn && prev_atn {
            self.atn_released(now);
        }

        match self.phase {
            Phase::AtnAck { at } => {
                if now >= at {
                    self.set(Lines::DATA);
                    self.phase = Phase::ListenWaitReady { armed: false };
                }
            }
            Phase::Unaddressed { at } => {
                if now >= at {
                    self.asserted = Lines::empty();
                    self.phase = Phase::Idle;
                }
            }
            Phase::ListenWaitReady { .. }
            | Phase::ListenReadyDelay { .. }
            | Phase::ListenWaitClock { .. }
            | Phase::ListenEoiAck { .. }
            | Phase::ListenBits { .. }
            | Phase::ListenByteEnd
            | Phase::ListenFrameAck { .. } => self.listen_step(now, host),
            Phase::TalkTurnaround { .. }
            | Phase::TalkReady { .. }
            | Phase::TalkWaitListener
            | Phase::TalkEoiWaitAck
            | Phase::TalkEoiWaitRelease
            | Phase::TalkDelay { .. }
            | Phase::TalkBits { .. }
            | Phase::TalkWaitAck { .. } => self.talk_step(now, host),
            Phase::Idle | Phase::Nak | Phase::TalkDone | Phase::Reset | Phase::Booting { .. } => {}
        }

        self.prev_host = host;
    }

    fn asserted(&self) -> Lines {
        self.asserted
    }
}
