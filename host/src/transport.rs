//! USB Transport layer abstraction.
//!
//! Everything the xu1541 does is a vendor control request, so a transport
//! only has to move those.  There are two:
//! - [`UsbTransport`] - the real adapter, via libusb.
//! - [`SimTransport`] - the device's own dispatcher and IEC engine, driving a
//!   simulated bus.  Used for testing, and for trying things out without
//!   hardware.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType};
use xu1541::dev_info::DeviceInfo;
use xu1541::dispatch::{Dispatcher, RamEeprom};
use xu1541::protocol::{IecDriver, IecTimeouts};
use xu1541::sim::{Peer, SimBus};

use crate::constants::XU1541_INTERFACE;
use crate::error::{Result, Xu1541Error};

/// Moves vendor control requests to and from the adapter.
pub trait Transport {
    /// Issue an IN request, returning how many bytes of `buf` were filled.
    fn control_in(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8])
    -> Result<usize>;

    /// Issue an OUT request, with `data` as the data stage.
    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()>;

    /// Wait between polls of an asynchronous operation.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The real adapter.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    timeout: Duration,
}

impl UsbTransport {
    /// Wrap an opened device, claiming its interface.
    pub fn new(mut handle: DeviceHandle<Context>, timeout: Duration) -> Result<Self> {
        // Not supported on all platforms
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            trace!("Can't auto-detach kernel driver: {e}");
        }
        handle.claim_interface(XU1541_INTERFACE)?;
        debug!("Claimed interface {XU1541_INTERFACE}");
        Ok(Self { handle, timeout })
    }

    pub fn handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(XU1541_INTERFACE) {
            debug!("Failed to release interface: {e}");
        }
    }
}

impl Transport for UsbTransport {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        trace!("Control IN {request} value {value} index {index} len {}", buf.len());
        self.handle
            .read_control(request_type, request, value, index, buf, self.timeout)
            .map_err(|e| {
                debug!("Control IN {request} failed: {e}");
                Xu1541Error::Usb(e)
            })
    }

    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        trace!("Control OUT {request} value {value} index {index} len {}", data.len());
        let written = self
            .handle
            .write_control(request_type, request, value, index, data, self.timeout)
            .map_err(|e| {
                debug!("Control OUT {request} failed: {e}");
                Xu1541Error::Usb(e)
            })?;
        if written != data.len() {
            return Err(Xu1541Error::Protocol(format!(
                "control OUT {request} wrote {written} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }
}

/// Simulated time that passes for each request.  Enough for a drive-side
/// routine to turn the bus around between a write and the following read.
const SIM_REQUEST_TIME: Duration = Duration::from_micros(200);

/// The device side, running in-process against a simulated bus.
///
/// Before each request the dispatcher gets to run any queued bus operation,
/// which is what the firmware's main loop does between USB requests.  A
/// rejected request becomes a STALL (`rusb::Error::Pipe`), as it would on
/// the wire.
pub struct SimTransport<P: Peer> {
    dispatcher: Dispatcher<SimBus<P>, RamEeprom>,
}

impl<P: Peer> SimTransport<P> {
    /// A simulated adapter with the parallel cable fitted, and the real
    /// hardware's timeouts.
    pub fn new(peer: P) -> Self {
        Self::with_options(peer, IecTimeouts::default(), true)
    }

    pub fn with_options(peer: P, timeouts: IecTimeouts, parallel_cable: bool) -> Self {
        let iec = IecDriver::with_timeouts(SimBus::new(peer), timeouts);
        let info = DeviceInfo::for_hardware(parallel_cable);
        Self {
            dispatcher: Dispatcher::new(iec, RamEeprom::new(), info),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<SimBus<P>, RamEeprom> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<SimBus<P>, RamEeprom> {
        &mut self.dispatcher
    }

    /// The simulated drive.  Requests are serviced to completion, so this
    /// is only None if the dispatcher has been given a job directly.
    pub fn peer(&self) -> Option<&P> {
        self.dispatcher.iec().map(|iec| iec.bus().peer())
    }

    pub fn peer_mut(&mut self) -> Option<&mut P> {
        self.dispatcher.iec_mut().map(|iec| iec.bus_mut().peer_mut())
    }

    /// Simulated time, in nanoseconds.
    pub fn now_ns(&self) -> Option<u64> {
        self.dispatcher.iec().map(|iec| iec.bus().now_ns())
    }

    fn service(&mut self) {
        self.dispatcher.handle();
        self.advance(SIM_REQUEST_TIME);
    }

    fn advance(&mut self, duration: Duration) {
        if let Some(iec) = self.dispatcher.iec_mut() {
            iec.bus_mut().advance(embassy_duration(duration));
        }
    }
}

impl<P: Peer> Transport for SimTransport<P> {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.service();
        self.dispatcher
            .control_in(request, value, index, buf)
            .map_err(|e| {
                debug!("Simulated device rejected IN {request}: {e}");
                Xu1541Error::Usb(rusb::Error::Pipe)
            })
    }

    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        self.service();
        self.dispatcher
            .control_out(request, value, index, data)
            .map_err(|e| {
                debug!("Simulated device rejected OUT {request}: {e}");
                Xu1541Error::Usb(rusb::Error::Pipe)
            })
    }

    // Simulated time, so no need to actually sleep
    fn pause(&mut self, duration: Duration) {
        self.advance(duration);
    }
}

fn embassy_duration(duration: Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(duration.as_micros() as u64)
}
