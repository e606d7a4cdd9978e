//! Settings for a session with the xu1541: which transfer mode to use, which
//! drive type is attached, and the USB timeouts.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use xu1541::protocol::ProtocolType;

use crate::constants::{
    DEFAULT_CONTROL_TIMEOUT, DEFAULT_DEVICE_NUM, DEFAULT_POLL_INTERVAL,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_RESULT_TIMEOUT, DEVICE_MAX_NUM, DEVICE_MIN_NUM,
};
use crate::error::{Result, Xu1541Error};

/// How bytes are moved once a bracket is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Standard CBM serial timing.  Works with any drive.
    Original,
    /// The S1 bit-serial protocol.
    Serial1,
    /// The S2 protocol, which uses ATN as a second clock.
    Serial2,
    /// Parallel, 2 bytes per handshake.  Needs the parallel cable.
    Parallel,
    /// Parallel, 1 byte per CLK toggle.  Needs the parallel cable, and is
    /// never chosen automatically.
    Parallel2,
    /// Pick the fastest mode that works, once per session.
    #[default]
    Auto,
}

// Abbreviations match the first entry with that prefix, so "ser" is
// serial1 and "par" is parallel.
const TRANSFER_MODE_NAMES: [(&str, TransferMode); 6] = [
    ("original", TransferMode::Original),
    ("serial1", TransferMode::Serial1),
    ("serial2", TransferMode::Serial2),
    ("parallel", TransferMode::Parallel),
    ("parallel2", TransferMode::Parallel2),
    ("auto", TransferMode::Auto),
];

impl TransferMode {
    /// The protocol the device uses for this mode.  `None` for
    /// [`TransferMode::Auto`], which has to be resolved first.
    pub fn protocol(self) -> Option<ProtocolType> {
        match self {
            TransferMode::Original => Some(ProtocolType::Cbm),
            TransferMode::Serial1 => Some(ProtocolType::S1),
            TransferMode::Serial2 => Some(ProtocolType::S2),
            TransferMode::Parallel => Some(ProtocolType::PP),
            TransferMode::Parallel2 => Some(ProtocolType::P2),
            TransferMode::Auto => None,
        }
    }

    /// Whether this mode needs the parallel cable.
    pub fn is_parallel(self) -> bool {
        matches!(self, TransferMode::Parallel | TransferMode::Parallel2)
    }
}

impl FromStr for TransferMode {
    type Err = Xu1541Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cbm" => return Ok(TransferMode::Original),
            "s1" => return Ok(TransferMode::Serial1),
            "s2" => return Ok(TransferMode::Serial2),
            "pp" => return Ok(TransferMode::Parallel),
            "p2" => return Ok(TransferMode::Parallel2),
            "" => return Err(Xu1541Error::InvalidArgument("empty transfer mode".into())),
            _ => (),
        }
        TRANSFER_MODE_NAMES
            .iter()
            .find(|(name, _)| name.starts_with(&s))
            .map(|(_, mode)| *mode)
            .ok_or_else(|| Xu1541Error::InvalidArgument(format!("unknown transfer mode {s}")))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = TRANSFER_MODE_NAMES
            .iter()
            .find(|(_, mode)| mode == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown");
        write!(f, "{name}")
    }
}

/// The type of drive attached.  All types use the same secondary address
/// and file type conventions, so this is informational for now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveType {
    #[default]
    Auto,
    D1541,
    D1570,
    D1571,
    D1581,
}

const DRIVE_TYPE_NAMES: [(&str, DriveType); 5] = [
    ("auto", DriveType::Auto),
    ("1541", DriveType::D1541),
    ("1570", DriveType::D1570),
    ("1571", DriveType::D1571),
    ("1581", DriveType::D1581),
];

impl FromStr for DriveType {
    type Err = Xu1541Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(Xu1541Error::InvalidArgument("empty drive type".into()));
        }
        DRIVE_TYPE_NAMES
            .iter()
            .find(|(name, _)| name.starts_with(&s))
            .map(|(_, drive_type)| *drive_type)
            .ok_or_else(|| Xu1541Error::InvalidArgument(format!("unknown drive type {s}")))
    }
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = DRIVE_TYPE_NAMES
            .iter()
            .find(|(_, drive_type)| drive_type == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown");
        write!(f, "{name}")
    }
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub transfer_mode: TransferMode,
    pub drive_type: DriveType,
    /// The drive's device number, 8-11.
    pub device_number: u8,
    /// How many blocks between calls to the progress callback.
    pub progress_interval: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transfer_mode: TransferMode::default(),
            drive_type: DriveType::default(),
            device_number: DEFAULT_DEVICE_NUM,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        validate_device(self.device_number)?;
        if self.progress_interval == 0 {
            return Err(Xu1541Error::InvalidArgument(
                "progress interval must be at least 1 block".into(),
            ));
        }
        Ok(())
    }
}

/// Check a drive device number.
pub fn validate_device(device: u8) -> Result<()> {
    if (DEVICE_MIN_NUM..=DEVICE_MAX_NUM).contains(&device) {
        Ok(())
    } else {
        Err(Xu1541Error::InvalidArgument(format!(
            "device {device} must be {DEVICE_MIN_NUM}-{DEVICE_MAX_NUM}"
        )))
    }
}

/// USB transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbConfig {
    /// Timeout for each control transfer.
    pub control_timeout: Duration,
    /// How long to wait between GET_RESULT polls.
    pub poll_interval: Duration,
    /// How long to wait for an asynchronous operation to complete.
    pub result_timeout: Duration,
    /// Only open the adapter with this serial number.
    pub serial: Option<String>,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            result_timeout: DEFAULT_RESULT_TIMEOUT,
            serial: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_mode_names() {
        assert_eq!("s1".parse::<TransferMode>().unwrap(), TransferMode::Serial1);
        assert_eq!("ser".parse::<TransferMode>().unwrap(), TransferMode::Serial1);
        assert_eq!("serial2".parse::<TransferMode>().unwrap(), TransferMode::Serial2);
        assert_eq!("PAR".parse::<TransferMode>().unwrap(), TransferMode::Parallel);
        assert_eq!("parallel2".parse::<TransferMode>().unwrap(), TransferMode::Parallel2);
        assert_eq!("o".parse::<TransferMode>().unwrap(), TransferMode::Original);
        assert_eq!("auto".parse::<TransferMode>().unwrap(), TransferMode::Auto);
        assert!("fast".parse::<TransferMode>().is_err());
        assert!("".parse::<TransferMode>().is_err());
        assert_eq!(TransferMode::Serial2.to_string(), "serial2");
        assert_eq!(TransferMode::Auto.protocol(), None);
        assert_eq!(TransferMode::Parallel.protocol(), Some(ProtocolType::PP));
    }

    #[test]
    fn drive_type_names() {
        assert_eq!("1541".parse::<DriveType>().unwrap(), DriveType::D1541);
        assert_eq!("157".parse::<DriveType>().unwrap(), DriveType::D1570);
        assert_eq!("1581".parse::<DriveType>().unwrap(), DriveType::D1581);
        assert_eq!("a".parse::<DriveType>().unwrap(), DriveType::Auto);
        assert!("1551".parse::<DriveType>().is_err());
        assert_eq!(DriveType::D1571.to_string(), "1571");
    }

    #[test]
    fn settings_are_validated() {
        assert!(Settings::default().validate().is_ok());
        let settings = Settings {
            device_number: 12,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Xu1541Error::InvalidArgument(_))
        ));
        let settings = Settings {
            progress_interval: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
