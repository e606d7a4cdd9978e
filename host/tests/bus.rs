//! Bus operations against the device's dispatcher, with the simulated bus.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use xu1541::dispatch::DeviceAction;
use xu1541::protocol::{EventType, IecTimeouts, ProtocolFlags, ProtocolType};
use xu1541::sim::{CbmDrive, NoPeer, Peer};
use xu1541::{Command, IoMode, Lines};
use xu1541_host::{Bus, Result, SimTransport, Transport, UsbConfig, Xu1541Error};

fn sim<P: Peer>(peer: P, cable: bool) -> SimTransport<P> {
    let _ = env_logger::builder().is_test(true).try_init();
    let timeouts = IecTimeouts {
        listener: Duration::from_millis(20),
        read_start: Duration::from_millis(5),
        bus_free_checks: 10,
        ..Default::default()
    };
    SimTransport::with_options(peer, timeouts, cable)
}

fn bus<P: Peer>(peer: P, cable: bool) -> Bus<SimTransport<P>> {
    Bus::new(sim(peer, cable), &UsbConfig::default()).unwrap()
}

// A device which is slow to answer GET_RESULT while it works on the bus,
// or which misreports how much it read.
struct Awkward<P: Peer> {
    inner: SimTransport<P>,
    result_timeouts: usize,
    read_count: Option<u8>,
}

impl<P: Peer> Awkward<P> {
    fn bus(peer: P) -> Bus<Self> {
        let transport = Self {
            inner: sim(peer, false),
            result_timeouts: 0,
            read_count: None,
        };
        Bus::new(transport, &UsbConfig::default()).unwrap()
    }
}

impl<P: Peer> Transport for Awkward<P> {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        let get_result = request == u8::from(Command::GetResult);
        if get_result && self.result_timeouts > 0 {
            self.result_timeouts -= 1;
            return Err(Xu1541Error::Usb(rusb::Error::Timeout));
        }
        let len = self.inner.control_in(request, value, index, buf)?;
        if let Some(count) = self.read_count {
            if get_result && buf[0] == IoMode::ReadDone as u8 {
                buf[1] = count;
                buf[2] = 0;
            }
        }
        Ok(len)
    }

    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        self.inner.control_out(request, value, index, data)
    }

    fn pause(&mut self, duration: std::time::Duration) {
        self.inner.pause(duration);
    }
}

#[test]
fn handshake_reports_capabilities() {
    let b = bus(NoPeer, true);
    assert!(b.info().has_parallel_cable());
    assert!(b.info().bootloader.is_some());

    let mut b = bus(NoPeer, false);
    assert!(!b.info().has_parallel_cable());
    assert_eq!(b.echo(0xbeef, 0x0008).unwrap(), (0xbeef, 0x0008));
    assert_eq!(b.protocol_info(ProtocolType::S1).unwrap(), 128);
}

#[test]
fn empty_bus() {
    let mut b = bus(NoPeer, false);
    assert!(matches!(
        b.listen(8, 0),
        Err(Xu1541Error::NoDevice { device: 8 })
    ));
    assert_eq!(
        b.get_event(0).unwrap(),
        Some((EventType::NoDevices as u8, 1))
    );
    assert_eq!(b.get_event(1).unwrap(), None);

    // Not tied to a device, so reported as a bus error
    assert!(matches!(b.reset(), Err(Xu1541Error::Bus { .. })));
}

#[test]
fn line_control() {
    let mut b = bus(NoPeer, false);
    b.iec_setrelease(Lines::ATN | Lines::CLOCK, Lines::empty())
        .unwrap();
    assert_eq!(b.iec_poll().unwrap(), Lines::ATN | Lines::CLOCK);
    assert_eq!(b.iec_wait(Lines::ATN, true).unwrap(), Lines::ATN | Lines::CLOCK);

    b.iec_setrelease(Lines::empty(), Lines::ATN | Lines::CLOCK)
        .unwrap();
    assert_eq!(b.iec_poll().unwrap(), Lines::empty());
    assert!(matches!(
        b.iec_wait(Lines::DATA, true),
        Err(Xu1541Error::Bus { .. })
    ));
}

#[test]
fn parallel_port_needs_the_cable() {
    let mut b = bus(NoPeer, false);
    assert!(matches!(b.pp_read(), Err(Xu1541Error::Usb(rusb::Error::Pipe))));
    assert!(matches!(
        b.raw_write(b"ab", ProtocolType::PP, ProtocolFlags::NONE),
        Err(Xu1541Error::Unsupported(_))
    ));

    let mut b = bus(NoPeer, true);
    b.pp_write(0x5a).unwrap();
    b.pp_read().unwrap();
}

#[test]
fn eeprom_round_trip() {
    let mut b = bus(NoPeer, false);
    b.eeprom_write(4, &[1, 2, 3]).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(b.eeprom_read(3, &mut buf).unwrap(), 5);
    assert_eq!(buf, [0xff, 1, 2, 3, 0xff]);
}

#[test]
fn irq_pause_is_polled() {
    let mut b = bus(NoPeer, false);
    let start = b.transport().now_ns().unwrap();
    b.irq_pause(30).unwrap();
    let elapsed = b.transport().now_ns().unwrap() - start;
    assert!(elapsed >= 30_000_000);
}

#[test]
fn second_request_is_busy() {
    let mut b = bus(CbmDrive::new(8), false);
    b.transport_mut()
        .control_out(Command::RequestRead.into(), 10, 0, &[])
        .unwrap();

    let mut buf = [0u8; 10];
    assert!(matches!(
        b.raw_read(&mut buf, ProtocolType::Cbm),
        Err(Xu1541Error::Busy)
    ));
}

#[test]
fn status_channel_via_bus() {
    let mut b = bus(CbmDrive::new(8), false);
    b.reset().unwrap();
    b.talk(8, 15).unwrap();
    let mut buf = [0u8; 64];
    let len = b.raw_read(&mut buf, ProtocolType::Cbm).unwrap();
    assert_eq!(&buf[..len], b"00, OK,00,00\r");
    assert!(b.get_eoi().unwrap());
    b.untalk().unwrap();
    b.clear_eoi().unwrap();
    assert!(!b.get_eoi().unwrap());
}

#[test]
fn flash_requests_bootloader() {
    let b = bus(NoPeer, false);
    let mut transport = b.flash().unwrap();
    assert_eq!(
        transport.dispatcher_mut().take_action(),
        Some(DeviceAction::EnterBootloader)
    );
}

#[test]
fn get_result_timeout_keeps_polling() {
    let mut b = Awkward::bus(CbmDrive::new(8));
    b.reset().unwrap();
    b.listen(8, 2).unwrap();

    b.transport_mut().result_timeouts = 2;
    assert_eq!(
        b.raw_write(b"abc", ProtocolType::Cbm, ProtocolFlags::NONE)
            .unwrap(),
        3
    );
    assert_eq!(b.transport().result_timeouts, 0);
    b.unlisten().unwrap();

    let inner = &b.transport().inner;
    assert_eq!(inner.dispatcher().io_mode(), IoMode::Idle);
    assert_eq!(inner.peer().unwrap().received_data(), b"abc");
}

#[test]
fn read_count_beyond_request_is_rejected() {
    let mut b = Awkward::bus(CbmDrive::new(8));
    b.reset().unwrap();
    b.talk(8, 15).unwrap();

    b.transport_mut().read_count = Some(200);
    let mut buf = [0u8; 4];
    assert!(matches!(
        b.raw_read(&mut buf, ProtocolType::Cbm),
        Err(Xu1541Error::Protocol(_))
    ));
}
