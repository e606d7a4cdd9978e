//! Choosing a transfer mode.
//!
//! An explicit mode is checked against the adapter's capabilities and used
//! as is.  [`TransferMode::Auto`] is resolved once per session by probing:
//! ORIGINAL always works, so each faster mode is tried in turn by writing a
//! marker and reading it back.  The first one which echoes correctly wins.
//!
//! Parallel is only probed if the adapter reports the parallel cable.
//! PARALLEL2 and SERIAL1 are never chosen automatically.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use xu1541::protocol::{ProtocolFlags, ProtocolType};

use crate::bus::Bus;
use crate::config::TransferMode;
use crate::constants::{PROBE_MARKER, PROBE_TIMEOUT};
use crate::error::{Result, Severity, Xu1541Error};
use crate::transport::Transport;

// Modes probed by auto negotiation, slowest first
const AUTO_LADDER: [TransferMode; 2] = [TransferMode::Serial2, TransferMode::Parallel];

/// Turn the configured mode into one the session can use.
pub fn resolve<T: Transport>(bus: &mut Bus<T>, mode: TransferMode) -> Result<TransferMode> {
    if mode == TransferMode::Auto {
        return negotiate(bus);
    }

    if mode.is_parallel() && !bus.info().has_parallel_cable() {
        return Err(Xu1541Error::Unsupported(format!(
            "{mode} transfer mode needs the parallel cable"
        )));
    }
    check_supported(bus, mode)?;
    debug!("Using {mode} transfer mode");
    Ok(mode)
}

/// Find the fastest transfer mode which works with the attached drive.
pub fn negotiate<T: Transport>(bus: &mut Bus<T>) -> Result<TransferMode> {
    let mut chosen = TransferMode::Original;

    for mode in AUTO_LADDER {
        if mode.is_parallel() && !bus.info().has_parallel_cable() {
            debug!("No parallel cable, not trying {mode}");
            continue;
        }
        if check_supported(bus, mode).is_err() {
            continue;
        }

        if probe(bus, mode)? {
            chosen = mode;
            break;
        }

        // The drive may have been left part way through a byte
        if let Err(e) = bus.reset() {
            debug!("Reset after failed {mode} probe: {e}");
        }
    }

    info!("Auto selected {chosen} transfer mode");
    Ok(chosen)
}

// Write the marker in this mode and check it comes back.  Only USB level
// failures are errors - anything else just means the mode doesn't work.
fn probe<T: Transport>(bus: &mut Bus<T>, mode: TransferMode) -> Result<bool> {
    let Some(protocol) = mode.protocol() else {
        return Ok(false);
    };
    debug!("Probing {mode} transfer mode");

    let previous = bus.set_result_timeout(PROBE_TIMEOUT);
    let outcome = echo_marker(bus, protocol);
    bus.set_result_timeout(previous);

    match outcome {
        Ok(true) => Ok(true),
        Ok(false) => {
            debug!("{mode} probe echoed the wrong data");
            Ok(false)
        }
        Err(e) if e.severity() == Severity::Fatal => Err(e),
        Err(e) => {
            debug!("{mode} probe failed: {e}");
            Ok(false)
        }
    }
}

fn echo_marker<T: Transport>(bus: &mut Bus<T>, protocol: ProtocolType) -> Result<bool> {
    let marker = vec![PROBE_MARKER; protocol.bytes_per_handshake()];
    bus.raw_write(&marker, protocol, ProtocolFlags::NONE)?;

    let mut echo = vec![0u8; marker.len()];
    let len = bus.raw_read(&mut echo, protocol)?;
    Ok(len == marker.len() && echo == marker)
}

fn check_supported<T: Transport>(bus: &mut Bus<T>, mode: TransferMode) -> Result<()> {
    match mode.protocol() {
        Some(protocol) => bus.protocol_info(protocol).map(|max| {
            trace!("{mode} transfers up to {max} bytes per request");
        }),
        None => Ok(()),
    }
    .map_err(|e| match e {
        Xu1541Error::Usb(rusb::Error::Pipe) => {
            Xu1541Error::Unsupported(format!("{mode} transfer mode not supported by this adapter"))
        }
        e => e,
    })
}
