//! Host environment utilities: ports, temp paths, process identity.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener},
    path::PathBuf,
};

use crate::BridgeConfig;

/// Find a port in `start..end` that a loopback listener can bind.
///
/// At most `max_tries` ports are probed. Returns `None` when every probe
/// fails. The probe listener is released before returning, so the port is
/// free for the engine to take.
#[must_use]
pub fn find_free_port(max_tries: u32, start: u16, end: u16) -> Option<u16> {
    (start..end)
        .take(max_tries as usize)
        .find(|&port| TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).is_ok())
}

/// Temp root for logs and dumped cells.
#[must_use]
pub fn temp_directory_path(config: &BridgeConfig) -> PathBuf {
    config.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
}

/// Identifier of the current process.
#[must_use]
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Stable per-process name of a logical channel.
#[must_use]
pub fn endpoint_name(channel: &str) -> String {
    format!("inproc://nbdebug-{}-{channel}", current_pid())
}
