//! Handles creation of the embassy USB stack.
//!
//! The xu1541 protocol runs entirely over vendor control requests on
//! endpoint 0, so there is a single vendor interface with no further
//! endpoints.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub(crate) mod control;

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver as RpUsbDriver, InterruptHandler};
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::{ConstStaticCell, StaticCell};

use control::Control;

use crate::constants::{
    MANUFACTURER, MAX_PACKET_SIZE_0, PRODUCT, SERIAL, USB_CLASS, USB_POWER_MA, USB_PROTOCOL,
    USB_SUB_CLASS, XU1541_PRODUCT_ID, XU1541_VENDOR_ID,
};

// Bind the hardware USB interrupt to the USB stack.
bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

// The UsbDevice isn't Send, so is stored in a StaticCell and the reference
// handed to usb_task().
static USB_DEVICE: StaticCell<UsbDevice<'static, RpUsbDriver<'static, USB>>> = StaticCell::new();

// Descriptor and control buffers, owned by the USB builder.  The control
// buffer must hold a full WRITE data stage.
static CONFIG_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static BOS_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static MSOS_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static CONTROL_BUF: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);

/// Used to create the embassy USB stack.
pub struct UsbStack {}

impl UsbStack {
    /// Creates the USB stack, with our control handler installed.
    pub fn create_static(p_usb: USB) -> &'static mut UsbDevice<'static, RpUsbDriver<'static, USB>> {
        let driver = RpUsbDriver::new(p_usb, Irqs);

        // The VID/PID are the xu1541's, so existing host software finds us
        let mut config = Config::new(XU1541_VENDOR_ID, XU1541_PRODUCT_ID);
        config.manufacturer = Some(MANUFACTURER);
        config.product = Some(PRODUCT);
        config.serial_number = Some(SERIAL);
        config.max_power = USB_POWER_MA;
        config.max_packet_size_0 = MAX_PACKET_SIZE_0;
        config.device_class = USB_CLASS;
        config.device_sub_class = USB_SUB_CLASS;
        config.device_protocol = USB_PROTOCOL;
        config.composite_with_iads = false;

        let mut builder = Builder::new(
            driver,
            config,
            CONFIG_DESC.take(),
            BOS_DESC.take(),
            MSOS_DESC.take(),
            CONTROL_BUF.take(),
        );

        // A single vendor interface, with no endpoints of its own
        let mut func = builder.function(USB_CLASS, USB_SUB_CLASS, USB_PROTOCOL);
        let mut interface = func.interface();
        let _alt = interface.alt_setting(USB_CLASS, USB_SUB_CLASS, USB_PROTOCOL, None);
        drop(func);

        builder.handler(Control::create_static());

        USB_DEVICE.init(builder.build())
    }
}

/// Runs the USB stack.
#[embassy_executor::task]
pub async fn usb_task(usb: &'static mut UsbDevice<'static, RpUsbDriver<'static, USB>>) -> ! {
    info!("USB task started");

    loop {
        // Not cancel safe - if cancelled, disable() must be called before
        // anything else
        usb.run_until_suspend().await;

        usb.wait_resume().await;
    }
}
