//! The small settings store read and written by EEPROM_READ and
//! EEPROM_WRITE.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::EEPROM_SIZE;

/// Byte addressable persistent storage.
pub trait Eeprom {
    /// Size of the store in bytes.
    fn size(&self) -> usize;

    /// Read `buf.len()` bytes from `address`.  Returns how many bytes were
    /// read, which is short if the end of the store is reached.
    fn read(&mut self, address: usize, buf: &mut [u8]) -> usize;

    /// Write `data` at `address`.  Returns how many bytes were written.
    fn write(&mut self, address: usize, data: &[u8]) -> usize;
}

/// A RAM backed store.  Erased bytes read as 0xff, as they would from a real
/// EEPROM.
#[derive(Debug, Clone)]
pub struct RamEeprom {
    data: [u8; EEPROM_SIZE],
}

impl Default for RamEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl RamEeprom {
    pub const fn new() -> Self {
        Self {
            data: [0xff; EEPROM_SIZE],
        }
    }
}

impl Eeprom for RamEeprom {
    fn size(&self) -> usize {
        EEPROM_SIZE
    }

    fn read(&mut self, address: usize, buf: &mut [u8]) -> usize {
        if address >= EEPROM_SIZE {
            return 0;
        }
        let count = buf.len().min(EEPROM_SIZE - address);
        buf[..count].copy_from_slice(&self.data[address..address + count]);
        count
    }

    fn write(&mut self, address: usize, data: &[u8]) -> usize {
        if address >= EEPROM_SIZE {
            return 0;
        }
        let count = data.len().min(EEPROM_SIZE - address);
        self.data[address..address + count].copy_from_slice(&data[..count]);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_clipped_at_the_end() {
        let mut eeprom = RamEeprom::new();
        assert_eq!(eeprom.write(EEPROM_SIZE - 2, &[1, 2, 3]), 2);
        let mut buf = [0u8; 4];
        assert_eq!(eeprom.read(EEPROM_SIZE - 3, &mut buf), 3);
        assert_eq!(&buf[..3], &[0xff, 1, 2]);
        assert_eq!(eeprom.read(EEPROM_SIZE, &mut buf), 0);
    }
}
