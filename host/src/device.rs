//! Finding the adapter, and the start of session handshake.
//!
//! The handshake reads INFO - firmware version, capabilities and, on newer
//! firmware, the bootloader version - and checks the device echoes a test
//! pattern.  The capabilities decide which transfer modes are offered, and
//! whether the parallel cable is fitted.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rusb::{Context, Device, UsbContext};
use xu1541::Command;
use xu1541::dev_info::DeviceInfo;

use crate::config::UsbConfig;
use crate::constants::{
    INFO_RESPONSE_LEN, MIN_FIRMWARE_MAJOR, XU1541_PRODUCT_ID, XU1541_VENDOR_ID,
};
use crate::error::{Result, Xu1541Error};
use crate::transport::{Transport, UsbTransport};

// Sent with ECHO during the handshake.
const ECHO_VALUE: u16 = 0x1541;
const ECHO_INDEX: u16 = 0x0c64;

/// Find all the attached USB devices with the xu1541's VID and PID.
pub fn find_devices(context: &Context) -> Result<Vec<Device<Context>>> {
    let devices = context
        .devices()?
        .iter()
        .filter(|device| match device.device_descriptor() {
            Ok(desc) => {
                desc.vendor_id() == XU1541_VENDOR_ID && desc.product_id() == XU1541_PRODUCT_ID
            }
            Err(e) => {
                trace!(
                    "Can't read descriptor for bus {} address {}: {e}",
                    device.bus_number(),
                    device.address()
                );
                false
            }
        })
        .collect::<Vec<_>>();
    debug!("Found {} xu1541 device(s)", devices.len());
    Ok(devices)
}

/// Open the first adapter found, or the one with the configured serial
/// number.
pub fn open_device(config: &UsbConfig) -> Result<UsbTransport> {
    let context = Context::new()?;

    for device in find_devices(&context)? {
        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    "Can't open xu1541 at bus {} address {}: {e}",
                    device.bus_number(),
                    device.address()
                );
                continue;
            }
        };

        if let Some(wanted) = &config.serial {
            let desc = device.device_descriptor()?;
            let serial = handle.read_serial_number_string_ascii(&desc).ok();
            if serial.as_deref() != Some(wanted.as_str()) {
                debug!("Skipping xu1541 with serial {serial:?}");
                continue;
            }
        }

        info!(
            "Using xu1541 at bus {} address {}",
            device.bus_number(),
            device.address()
        );
        return UsbTransport::new(handle, config.control_timeout);
    }

    Err(Xu1541Error::DeviceNotFound {
        vid: XU1541_VENDOR_ID,
        pid: XU1541_PRODUCT_ID,
    })
}

/// Query and check the device's INFO, then check it echoes.
pub fn identify<T: Transport>(transport: &mut T) -> Result<DeviceInfo> {
    let mut buf = [0u8; INFO_RESPONSE_LEN];
    let len = transport.control_in(Command::Info.into(), 0, 0, &mut buf)?;
    let info = DeviceInfo::decode(&buf[..len])
        .ok_or_else(|| Xu1541Error::Protocol(format!("INFO reply of {len} bytes")))?;

    let (major, minor) = info.firmware;
    if major < MIN_FIRMWARE_MAJOR {
        return Err(Xu1541Error::Unsupported(format!(
            "firmware {major}.{minor} is too old, need {MIN_FIRMWARE_MAJOR}.x"
        )));
    }
    info!("xu1541 firmware {major}.{minor}");
    match info.bootloader {
        Some((major, minor)) => debug!("Bootloader {major}.{minor}"),
        None => debug!("No bootloader information"),
    }
    debug!("Capabilities {:?}", info.capabilities);
    if !info.has_parallel_cable() {
        debug!("No parallel cable");
    }

    let echoed = echo(transport, ECHO_VALUE, ECHO_INDEX)?;
    if echoed != (ECHO_VALUE, ECHO_INDEX) {
        return Err(Xu1541Error::Protocol(format!(
            "ECHO returned {:04x}/{:04x}",
            echoed.0, echoed.1
        )));
    }

    Ok(info)
}

/// Send ECHO, returning what came back.
pub fn echo<T: Transport>(transport: &mut T, value: u16, index: u16) -> Result<(u16, u16)> {
    let mut buf = [0u8; 4];
    let len = transport.control_in(Command::Echo.into(), value, index, &mut buf)?;
    if len != buf.len() {
        return Err(Xu1541Error::Protocol(format!("ECHO reply of {len} bytes")));
    }
    Ok((
        u16::from_le_bytes([buf[0], buf[1]]),
        u16::from_le_bytes([buf[2], buf[3]]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xu1541::Capabilities;
    use xu1541::sim::NoPeer;

    use crate::transport::SimTransport;

    #[test]
    fn identify_simulated_device() {
        let mut transport = SimTransport::new(NoPeer);
        let info = identify(&mut transport).unwrap();
        assert!(info.supports(Capabilities::CBM | Capabilities::S2));
        assert!(info.has_parallel_cable());
        assert!(info.bootloader.is_some());

        let mut transport = SimTransport::with_options(NoPeer, Default::default(), false);
        let info = identify(&mut transport).unwrap();
        assert!(!info.has_parallel_cable());
        assert!(!info.supports(Capabilities::PP_PROTO));
    }

    #[test]
    fn echo_round_trip() {
        let mut transport = SimTransport::new(NoPeer);
        assert_eq!(echo(&mut transport, 1, 0xffff).unwrap(), (1, 0xffff));
    }
}
