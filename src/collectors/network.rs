//! Network counters and listening-socket inventory. Counters come from
//! sysinfo; sockets from `/proc/net/tcp{,6}` on Linux and `netstat` on Windows.

use super::{ListeningSocket, NetworkCounters, ProbeError};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use sysinfo::Networks;

/// TCP state code for LISTEN in /proc/net/tcp
const TCP_LISTEN: &str = "0A";

pub struct NetworkCollector {
    networks: Mutex<Networks>,
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self {
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }
}

impl NetworkCollector {
    /// Cumulative bytes since boot, summed over every interface
    pub fn counters(&self) -> Result<NetworkCounters, ProbeError> {
        let mut networks = self.networks.lock();
        networks.refresh_list();
        networks.refresh();
        if networks.iter().next().is_none() {
            return Err(ProbeError::unavailable("network_counters", "no interfaces"));
        }
        let mut out = NetworkCounters::default();
        for (_iface, data) in networks.iter() {
            out.bytes_sent = out.bytes_sent.saturating_add(data.total_transmitted());
            out.bytes_recv = out.bytes_recv.saturating_add(data.total_received());
        }
        Ok(out)
    }

    pub fn listening_sockets(&self) -> Result<Vec<ListeningSocket>, ProbeError> {
        listening_sockets_impl()
    }
}

#[cfg(target_os = "linux")]
fn listening_sockets_impl() -> Result<Vec<ListeningSocket>, ProbeError> {
    let mut out = Vec::new();
    let mut read_any = false;
    for (path, v6) in [("/proc/net/tcp", false), ("/proc/net/tcp6", true)] {
        match std::fs::read_to_string(path) {
            Ok(table) => {
                read_any = true;
                out.extend(parse_proc_net_tcp(&table, v6));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ProbeError::unavailable("listening_sockets", e)),
        }
    }
    if !read_any {
        return Err(ProbeError::unavailable("listening_sockets", "no /proc/net tables"));
    }
    Ok(out)
}

#[cfg(target_os = "windows")]
fn listening_sockets_impl() -> Result<Vec<ListeningSocket>, ProbeError> {
    let output = std::process::Command::new("netstat")
        .args(["-an", "-p", "TCP"])
        .output()
        .map_err(|e| ProbeError::unavailable("listening_sockets", e))?;
    if !output.status.success() {
        return Err(ProbeError::unavailable(
            "listening_sockets",
            format!("netstat exited with {}", output.status),
        ));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_netstat(&text))
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn listening_sockets_impl() -> Result<Vec<ListeningSocket>, ProbeError> {
    Err(ProbeError::Unsupported("listening_sockets"))
}

/// Parse the LISTEN rows of a `/proc/net/tcp` or `/proc/net/tcp6` table.
pub fn parse_proc_net_tcp(table: &str, v6: bool) -> Vec<ListeningSocket> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let local = cols.nth(1)?;
            let state = cols.nth(1)?;
            if state != TCP_LISTEN {
                return None;
            }
            let (addr_hex, port_hex) = local.split_once(':')?;
            let port = u16::from_str_radix(port_hex, 16).ok()?;
            let addr = if v6 {
                IpAddr::V6(parse_ipv6_hex(addr_hex)?)
            } else {
                let raw = u32::from_str_radix(addr_hex, 16).ok()?;
                IpAddr::V4(Ipv4Addr::from(raw.to_le_bytes()))
            };
            Some(ListeningSocket { addr, port })
        })
        .collect()
}

fn parse_ipv6_hex(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, chunk) in bytes.chunks_mut(4).enumerate() {
        let word = u32::from_str_radix(hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Some(Ipv6Addr::from(bytes))
}

/// Parse `netstat -an` output, keeping LISTENING rows.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub fn parse_netstat(text: &str) -> Vec<ListeningSocket> {
    text.lines()
        .filter(|l| l.contains("LISTENING"))
        .filter_map(|line| {
            let local = line.split_whitespace().nth(1)?;
            let sock: std::net::SocketAddr = local.parse().ok()?;
            Some(ListeningSocket {
                addr: sock.ip(),
                port: sock.port(),
            })
        })
        .collect()
}
