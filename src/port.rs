//! Local TCP port allocation.
//!
//! Ports are probed, not reserved: another process can bind a returned port
//! before the instance starts. The launcher re-checks with
//! [`check_port_available`] right before spawning and reports `PortOccupied`.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{AppError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Whether something accepts TCP connections on `127.0.0.1:port`.
pub fn is_listening(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
}

/// Return the lowest port in `range` with no local listener.
pub fn find_free_port(range: RangeInclusive<u16>) -> Result<u16> {
    find_free_port_excluding(range, &HashSet::new())
}

/// Like [`find_free_port`], also skipping ports in `taken` (ports assigned
/// to registered instances that may simply be stopped right now).
pub fn find_free_port_excluding(range: RangeInclusive<u16>, taken: &HashSet<u16>) -> Result<u16> {
    let (start, end) = (*range.start(), *range.end());
    range
        .filter(|port| !taken.contains(port))
        .find(|&port| !is_listening(port))
        .ok_or_else(|| AppError::no_port_available(start, end))
}

/// Bind test used right before launching an instance.
pub fn check_port_available(port: u16) -> Result<()> {
    if portpicker::is_free_tcp(port) {
        Ok(())
    } else {
        Err(AppError::port_occupied(port))
    }
}
