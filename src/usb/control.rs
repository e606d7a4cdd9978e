//! This module implements the USB Control handler.
//!
//! This includes
//! * USB lifecycle events (enabled, disabled, reset, addressed, configured,
//!   suspended and resumed)
//! * Vendor control requests (IN and OUT) from the host, which carry every
//!   xu1541 command.  These are passed to the [`Dispatcher`].
//!
//! IN Control requests are those where the host is expecting data from the
//! device.  OUT Control requests are those where the host may send data to
//! the device.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_usb::Handler;
use embassy_usb::control::{InResponse, OutResponse, Recipient, Request, RequestType};
use static_cell::StaticCell;

use crate::dispatch::{DispatchError, Dispatcher, RamEeprom};
use crate::infra::gpio::RpBus;
use crate::types::Direction;

/// The dispatcher as used by the firmware.
pub type FirmwareDispatcher = Dispatcher<RpBus, RamEeprom>;

/// The `DISPATCHER` static is shared between the control handler on core 0,
/// which decodes requests, and the dispatcher task on core 1, which runs the
/// bus operations.  Neither holds the lock across an await or a bus
/// operation, so a blocking `CriticalSectionRawMutex` is enough.
pub static DISPATCHER: Mutex<CriticalSectionRawMutex, RefCell<Option<FirmwareDispatcher>>> =
    Mutex::new(RefCell::new(None));

// We pass ownership of the handler to the UsbDevice, so only need a
// StaticCell.
static CONTROL: StaticCell<Control> = StaticCell::new();

/// Handle USB events.
pub struct Control {}

// How to respond to a Control message we won't handle.
enum ControlError {
    // Not for us - return None
    Ignore,

    // For us, but bad - STALL
    Invalid,
}

impl From<DispatchError> for ControlError {
    fn from(e: DispatchError) -> Self {
        debug!("Rejecting request: {}", e);
        ControlError::Invalid
    }
}

impl Handler for Control {
    fn enabled(&mut self, enabled: bool) {
        match enabled {
            true => debug!("USB device enabled"),
            false => {
                info!("USB device disabled");
                abort_request();
            }
        }
    }

    fn reset(&mut self) {
        debug!("USB device reset complete");
        abort_request();
    }

    fn addressed(&mut self, addr: u8) {
        debug!("USB device addressed: {}", addr);
    }

    fn configured(&mut self, configured: bool) {
        match configured {
            true => debug!("USB device configuration enabled"),
            false => debug!("USB device configuration disabled"),
        }
    }

    fn suspended(&mut self, suspended: bool) {
        match suspended {
            true => debug!("USB device suspended"),
            false => debug!("USB device resumed"),
        }
    }

    fn control_out<'a>(&'a mut self, req: Request, buf: &'a [u8]) -> Option<OutResponse> {
        let result = Self::check_request(req, Direction::Out).and_then(|_| {
            with_dispatcher(|d| {
                d.control_out(req.request, req.value, req.index, buf)
                    .map_err(ControlError::from)
            })
        });

        match result {
            Err(ControlError::Ignore) => None,
            Err(ControlError::Invalid) => Some(OutResponse::Rejected),
            Ok(()) => Some(OutResponse::Accepted),
        }
    }

    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        let len = (req.length as usize).min(buf.len());
        let result = Self::check_request(req, Direction::In).and_then(|_| {
            with_dispatcher(|d| {
                d.control_in(req.request, req.value, req.index, &mut buf[..len])
                    .map_err(ControlError::from)
            })
        });

        match result {
            Err(ControlError::Ignore) => None,
            Err(ControlError::Invalid) => Some(InResponse::Rejected),
            Ok(len) => Some(InResponse::Accepted(&buf[..len])),
        }
    }
}

impl Control {
    /// Create the handler.  Will panic if called more than once.
    pub fn create_static() -> &'static mut Self {
        CONTROL.init(Self {})
    }

    // We only handle Vendor requests to the device.
    fn check_request(req: Request, dir: Direction) -> Result<(), ControlError> {
        trace!(
            "Control request: {}, value: {}, index: {}, length: {}, direction: {}",
            req.request, req.value, req.index, req.length, dir
        );

        if req.request_type != RequestType::Vendor || req.recipient != Recipient::Device {
            trace!(
                "Ignoring Control request type: {}, recipient: {}",
                req.request_type, req.recipient
            );
            return Err(ControlError::Ignore);
        }

        Ok(())
    }
}

// Run `f` against the dispatcher.  Requests arriving before it exists are
// rejected.
fn with_dispatcher<R>(
    f: impl FnOnce(&mut FirmwareDispatcher) -> Result<R, ControlError>,
) -> Result<R, ControlError> {
    DISPATCHER.lock(|d| match d.borrow_mut().as_mut() {
        Some(dispatcher) => f(dispatcher),
        None => {
            warn!("Control request before dispatcher created");
            Err(ControlError::Invalid)
        }
    })
}

fn abort_request() {
    DISPATCHER.lock(|d| {
        if let Some(dispatcher) = d.borrow_mut().as_mut() {
            dispatcher.abort();
        }
    });
}
