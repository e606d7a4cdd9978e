//! The vendor control requests the adapter accepts, and their direction.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

use crate::protocol::ProtocolType;
use crate::types::Direction;

/// Commands, carried in `bRequest`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Info = 0,
    Read = 1,
    Write = 2,
    Talk = 3,
    Listen = 4,
    Untalk = 5,
    Unlisten = 6,
    Open = 7,
    Close = 8,
    Reset = 9,
    GetEoi = 10,
    ClearEoi = 11,
    RequestRead = 12,
    GetResult = 13,
    PpRead = 14,
    PpWrite = 15,
    IecPoll = 16,
    IecWait = 17,
    IecSetRelease = 18,
    ParburstParRead = 19,
    ParburstParWrite = 20,
    ParburstRead = 21,
    ParburstWrite = 22,
    EepromRead = 23,
    EepromWrite = 24,
    Flash = 25,
    S1 = 32,
    S2 = 33,
    Pp = 34,
    P2 = 35,
    IrqPause = 0xfd,
    GetEvent = 0xfe,
    Echo = 0xff,
}

/// Operation selected by `wValue` for the S1, S2, PP and P2 commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubOp {
    Info = 0,
    Read = 1,
    Write = 2,
}

impl TryFrom<u16> for SubOp {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Info),
            1 => Ok(Self::Read),
            2 => Ok(Self::Write),
            _ => Err(()),
        }
    }
}

impl Command {
    /// Direction the command must be sent in.  The sub-protocol commands
    /// are IN for INFO and OUT otherwise, so need `value` to decide.
    pub fn direction(self, value: u16) -> Direction {
        match self {
            Self::Info
            | Self::Read
            | Self::GetEoi
            | Self::GetResult
            | Self::PpRead
            | Self::IecPoll
            | Self::EepromRead
            | Self::GetEvent
            | Self::Echo => Direction::In,
            Self::S1 | Self::S2 | Self::Pp | Self::P2 => match SubOp::try_from(value) {
                Ok(SubOp::Info) => Direction::In,
                _ => Direction::Out,
            },
            _ => Direction::Out,
        }
    }

    /// The protocol a sub-protocol command selects.
    pub fn protocol(self) -> Option<ProtocolType> {
        match self {
            Self::S1 => Some(ProtocolType::S1),
            Self::S2 => Some(ProtocolType::S2),
            Self::Pp => Some(ProtocolType::PP),
            Self::P2 => Some(ProtocolType::P2),
            _ => None,
        }
    }

    /// Whether this command is handled in the dispatcher's idle loop, with
    /// the host polling GET_RESULT for the outcome.
    pub fn is_async(self) -> bool {
        matches!(
            self,
            Self::Talk
                | Self::Listen
                | Self::Untalk
                | Self::Unlisten
                | Self::Open
                | Self::Close
                | Self::Reset
                | Self::IecWait
                | Self::IrqPause
        )
    }

    pub fn is_parburst(self) -> bool {
        matches!(
            self,
            Self::ParburstParRead
                | Self::ParburstParWrite
                | Self::ParburstRead
                | Self::ParburstWrite
        )
    }
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let cmd = match value {
            0 => Self::Info,
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::Talk,
            4 => Self::Listen,
            5 => Self::Untalk,
            6 => Self::Unlisten,
            7 => Self::Open,
            8 => Self::Close,
            9 => Self::Reset,
            10 => Self::GetEoi,
            11 => Self::ClearEoi,
            12 => Self::RequestRead,
            13 => Self::GetResult,
            14 => Self::PpRead,
            15 => Self::PpWrite,
            16 => Self::IecPoll,
            17 => Self::IecWait,
            18 => Self::IecSetRelease,
            19 => Self::ParburstParRead,
            20 => Self::ParburstParWrite,
            21 => Self::ParburstRead,
            22 => Self::ParburstWrite,
            23 => Self::EepromRead,
            24 => Self::EepromWrite,
            25 => Self::Flash,
            32 => Self::S1,
            33 => Self::S2,
            34 => Self::Pp,
            35 => Self::P2,
            0xfd => Self::IrqPause,
            0xfe => Self::GetEvent,
            0xff => Self::Echo,
            _ => return Err(()),
        };
        Ok(cmd)
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        cmd as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Talk => "TALK",
            Self::Listen => "LISTEN",
            Self::Untalk => "UNTALK",
            Self::Unlisten => "UNLISTEN",
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::Reset => "RESET",
            Self::GetEoi => "GET_EOI",
            Self::ClearEoi => "CLEAR_EOI",
            Self::RequestRead => "REQUEST_READ",
            Self::GetResult => "GET_RESULT",
            Self::PpRead => "PP_READ",
            Self::PpWrite => "PP_WRITE",
            Self::IecPoll => "IEC_POLL",
            Self::IecWait => "IEC_WAIT",
            Self::IecSetRelease => "IEC_SETRELEASE",
            Self::ParburstParRead => "PARBURST_PAR_READ",
            Self::ParburstParWrite => "PARBURST_PAR_WRITE",
            Self::ParburstRead => "PARBURST_READ",
            Self::ParburstWrite => "PARBURST_WRITE",
            Self::EepromRead => "EEPROM_READ",
            Self::EepromWrite => "EEPROM_WRITE",
            Self::Flash => "FLASH",
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::Pp => "PP",
            Self::P2 => "P2",
            Self::IrqPause => "IRQ_PAUSE",
            Self::GetEvent => "GET_EVENT",
            Self::Echo => "ECHO",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=255u8 {
            if let Ok(cmd) = Command::try_from(code) {
                assert_eq!(u8::from(cmd), code);
            }
        }
        assert!(Command::try_from(26).is_err());
        assert!(Command::try_from(36).is_err());
    }

    #[test]
    fn sub_protocol_direction_follows_sub_op() {
        assert_eq!(Command::S2.direction(0), Direction::In);
        assert_eq!(Command::S2.direction(1), Direction::Out);
        assert_eq!(Command::S2.direction(2), Direction::Out);
        assert_eq!(Command::Pp.protocol(), Some(ProtocolType::PP));
        assert_eq!(Command::Talk.protocol(), None);
    }
}
