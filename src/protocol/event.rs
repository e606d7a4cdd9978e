//! A small circular log of engine events.
//!
//! Every timeout class the engine hits is recorded here, with a count of
//! consecutive occurrences.  It is the post-mortem trail for failed
//! transfers, and can be read out by the host with GET_EVENT.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

use crate::constants::EVENT_LOG_SIZE;

/// The classes of event recorded.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventType {
    /// Listener didn't acknowledge a byte within 2ms
    AckTimeout = 1,
    /// Listener didn't release DATA to say it was ready
    ListenerTimeout = 2,
    /// Device didn't take CLK after a talk turnaround
    TalkTimeout = 3,
    /// Talker didn't release CLK to start a byte
    ReadStartTimeout = 4,
    /// Talker stopped clocking bits mid-byte
    ReadBitTimeout = 5,
    /// A fast protocol handshake timed out
    FastTimeout = 6,
    /// Bus didn't become free after a reset
    BusFreeTimeout = 7,
    /// No devices answered
    NoDevices = 8,
    /// IEC_WAIT timed out
    LineWaitTimeout = 9,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AckTimeout => "AckTimeout",
            Self::ListenerTimeout => "ListenerTimeout",
            Self::TalkTimeout => "TalkTimeout",
            Self::ReadStartTimeout => "ReadStartTimeout",
            Self::ReadBitTimeout => "ReadBitTimeout",
            Self::FastTimeout => "FastTimeout",
            Self::BusFreeTimeout => "BusFreeTimeout",
            Self::NoDevices => "NoDevices",
            Self::LineWaitTimeout => "LineWaitTimeout",
        };
        write!(f, "{s}")
    }
}

/// A single entry in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub count: u8,
}

/// The log itself.  Holds the most recent `EVENT_LOG_SIZE` events.
#[derive(Debug, Default)]
pub struct EventLog {
    events: [Option<Event>; EVENT_LOG_SIZE],
    // Index of the next slot to be written
    next: usize,
}

impl EventLog {
    pub const fn new() -> Self {
        Self {
            events: [None; EVENT_LOG_SIZE],
            next: 0,
        }
    }

    /// Record an event.  A repeat of the most recent event type bumps its
    /// count rather than using a new slot.
    pub fn record(&mut self, event_type: EventType) {
        if let Some(latest) = self.latest_mut() {
            if latest.event_type == event_type {
                latest.count = latest.count.saturating_add(1);
                return;
            }
        }

        self.events[self.next] = Some(Event {
            event_type,
            count: 1,
        });
        self.next = (self.next + 1) % EVENT_LOG_SIZE;
    }

    /// Get an event, with 0 being the most recent.
    pub fn get(&self, index: usize) -> Option<Event> {
        if index >= EVENT_LOG_SIZE {
            return None;
        }
        let slot = (self.next + EVENT_LOG_SIZE - 1 - index) % EVENT_LOG_SIZE;
        self.events[slot]
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn latest_mut(&mut self) -> Option<&mut Event> {
        let slot = (self.next + EVENT_LOG_SIZE - 1) % EVENT_LOG_SIZE;
        self.events[slot].as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_counted_in_place() {
        let mut log = EventLog::new();
        log.record(EventType::AckTimeout);
        log.record(EventType::AckTimeout);
        log.record(EventType::NoDevices);

        assert_eq!(log.len(), 2);
        assert_eq!(
            log.get(0),
            Some(Event {
                event_type: EventType::NoDevices,
                count: 1
            })
        );
        assert_eq!(log.get(1).map(|e| e.count), Some(2));
        assert_eq!(log.get(2), None);
    }

    #[test]
    fn oldest_events_are_overwritten() {
        let mut log = EventLog::new();
        let types = [EventType::AckTimeout, EventType::FastTimeout];
        for ii in 0..EVENT_LOG_SIZE + 3 {
            log.record(types[ii % 2]);
        }

        assert_eq!(log.len(), EVENT_LOG_SIZE);
        // The last one recorded was at index EVENT_LOG_SIZE + 2
        assert_eq!(
            log.get(0).map(|e| e.event_type),
            Some(types[(EVENT_LOG_SIZE + 2) % 2])
        );
        assert_eq!(log.get(EVENT_LOG_SIZE), None);
    }

    #[test]
    fn count_saturates() {
        let mut log = EventLog::new();
        for _ in 0..300 {
            log.record(EventType::BusFreeTimeout);
        }
        assert_eq!(log.get(0).map(|e| e.count), Some(u8::MAX));
    }
}
