//! File and block transfers against the device's dispatcher and IEC engine,
//! driving a simulated drive.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use xu1541::protocol::{DriverError, IecTimeouts, ProtocolType};
use xu1541::sim::{CbmDrive, Loopback, NoPeer, Peer};
use xu1541_host::{
    Severity, Settings, SimTransport, TransferMode, UsbConfig, Xu1541, Xu1541Error,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Short enough that a drive which isn't going to answer doesn't cost
// millions of simulated steps.
fn quick_timeouts() -> IecTimeouts {
    IecTimeouts {
        listener: Duration::from_millis(50),
        talk_turnaround: Duration::from_millis(10),
        read_start: Duration::from_millis(50),
        fast_handshake: Duration::from_millis(5),
        ..Default::default()
    }
}

fn session<P: Peer>(peer: P, mode: TransferMode, cable: bool) -> Xu1541<SimTransport<P>> {
    init_logging();
    let transport = SimTransport::with_options(peer, quick_timeouts(), cable);
    let settings = Settings {
        transfer_mode: mode,
        ..Default::default()
    };
    Xu1541::new(transport, settings, &UsbConfig::default()).unwrap()
}

fn drive_file(xu: &Xu1541<SimTransport<CbmDrive>>, name: &str) -> Option<Vec<u8>> {
    xu.with_bus(|bus| Ok(bus.transport().peer().unwrap().file(name).map(<[u8]>::to_vec)))
        .unwrap()
}

#[test]
fn write_then_read_file() {
    let xu = session(CbmDrive::new(8), TransferMode::Original, false);
    xu.reset_bus().unwrap();

    // Several blocks, ending part way through one
    let payload: Vec<u8> = (0..700u32).map(|i| (i * 13) as u8).collect();
    let mut calls = Vec::new();
    let status = xu
        .write_file_with_progress("PROGRAM", &payload, |done, total| calls.push((done, total)))
        .unwrap();
    assert!(status.is_ok(), "{status}");
    assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
    assert_eq!(drive_file(&xu, "PROGRAM"), Some(payload.clone()));

    let (data, status) = xu.read_file("PROGRAM").unwrap();
    assert!(status.is_ok());
    assert_eq!(data, payload);
}

#[test]
fn read_file_of_whole_blocks() {
    let mut drive = CbmDrive::new(8);
    let payload: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
    drive.add_file("BLOCKS", &payload);
    let xu = session(drive, TransferMode::Original, false);
    xu.reset_bus().unwrap();

    let mut blocks = Vec::new();
    let (data, _) = xu
        .read_file_with_progress("BLOCKS", |n| blocks.push(n))
        .unwrap();
    assert_eq!(data, payload);
    assert_eq!(blocks, vec![1, 2]);
}

#[test]
fn nak_reports_bytes_written() {
    let xu = session(
        CbmDrive::new(8).with_nak_on_data_byte(2),
        TransferMode::Original,
        false,
    );
    xu.reset_bus().unwrap();

    let e = xu.write_file("TEN", b"0123456789").unwrap_err();
    assert!(
        matches!(
            e,
            Xu1541Error::Bus {
                error: DriverError::Io,
                count: 2
            }
        ),
        "{e}"
    );
    assert_eq!(e.count(), Some(2));
    assert_eq!(e.severity(), Severity::Warning);

    // The session is still usable
    assert!(xu.device_status().unwrap().is_ok());
}

#[test]
fn missing_file_reports_drive_status() {
    let xu = session(CbmDrive::new(8), TransferMode::Original, false);
    xu.reset_bus().unwrap();

    let e = xu.read_file("NOTHERE").unwrap_err();
    match &e {
        Xu1541Error::Status { device, status } => {
            assert_eq!(*device, 8);
            assert!(status.starts_with("62,FILE NOT FOUND"), "{status}");
        }
        e => panic!("unexpected error {e}"),
    }
    assert!(e.report().starts_with("[Warning]"));

    // Reading the status cleared it
    assert!(xu.device_status().unwrap().is_ok());
}

#[test]
fn auto_falls_back_to_original() {
    let xu = session(CbmDrive::new(8), TransferMode::Auto, true);
    xu.reset_bus().unwrap();

    assert_eq!(xu.transfer_mode().unwrap(), TransferMode::Original);
    let resets = xu
        .with_bus(|bus| Ok(bus.transport().peer().unwrap().resets()))
        .unwrap();
    // One for the session, and one after each failed probe
    assert_eq!(resets, 3);

    // The drive is usable afterwards
    let status = xu.write_file("AFTER", b"probe").unwrap();
    assert!(status.is_ok());
    assert_eq!(drive_file(&xu, "AFTER"), Some(b"probe".to_vec()));
}

#[test]
fn auto_picks_serial2() {
    let xu = session(Loopback::new(ProtocolType::S2, 1), TransferMode::Auto, false);
    assert_eq!(xu.transfer_mode().unwrap(), TransferMode::Serial2);
    // Cached - no second probe
    assert_eq!(xu.transfer_mode().unwrap(), TransferMode::Serial2);

    let received = xu
        .with_bus(|bus| Ok(bus.transport().peer().unwrap().received().to_vec()))
        .unwrap();
    assert_eq!(received, vec![0x55]);
}

#[test]
fn parallel_needs_the_cable() {
    let xu = session(NoPeer, TransferMode::Parallel, false);
    let e = xu.transfer_mode().unwrap_err();
    assert!(matches!(e, Xu1541Error::Unsupported(_)), "{e}");
    assert_eq!(e.severity(), Severity::Fatal);

    let xu = session(NoPeer, TransferMode::Parallel2, false);
    assert!(matches!(
        xu.read_block(),
        Err(Xu1541Error::Unsupported(_))
    ));
}

#[test]
fn block_round_trip() {
    for (mode, protocol) in [
        (TransferMode::Serial2, ProtocolType::S2),
        (TransferMode::Parallel, ProtocolType::PP),
    ] {
        let xu = session(Loopback::new(protocol, 256), mode, true);
        let block: [u8; 256] = std::array::from_fn(|i| (255 - i) as u8);
        xu.write_block(&block).unwrap();
        assert_eq!(xu.read_block().unwrap(), block, "{mode}");
    }
}

#[test]
fn abort_invalidates_session() {
    let xu = session(CbmDrive::new(8), TransferMode::Original, false);
    xu.reset_bus().unwrap();

    let transport = xu.abort().unwrap();
    assert!(xu.is_aborted());
    assert_eq!(transport.peer().unwrap().resets(), 2);

    assert!(matches!(xu.read_file("ANY"), Err(Xu1541Error::Aborted)));
    assert!(matches!(xu.device_status(), Err(Xu1541Error::Aborted)));
    assert!(xu.abort().is_none());
}

#[test]
fn settings_are_checked() {
    init_logging();
    let transport = SimTransport::with_options(NoPeer, quick_timeouts(), false);
    let settings = Settings {
        device_number: 4,
        ..Default::default()
    };
    assert!(matches!(
        Xu1541::new(transport, settings, &UsbConfig::default()),
        Err(Xu1541Error::InvalidArgument(_))
    ));
}
