//! Connectivity gate: a short TCP connect to well-known endpoints, tried in
//! order. The first success means online.

use crate::config::ConnectivityConfig;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, warn};

pub trait ConnectivityCheck: Send + Sync {
    fn is_online(&self) -> bool;
}

pub struct TcpConnectivity {
    endpoints: Vec<SocketAddr>,
    timeout: Duration,
}

impl TcpConnectivity {
    pub fn new(endpoints: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    /// Endpoints that do not parse as `ip:port` are skipped with a warning.
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        let endpoints = config
            .endpoints
            .iter()
            .filter_map(|e| match e.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(err) => {
                    warn!(endpoint = %e, error = %err, "ignoring connectivity endpoint");
                    None
                }
            })
            .collect();
        Self::new(endpoints, Duration::from_secs(config.timeout_secs))
    }
}

impl ConnectivityCheck for TcpConnectivity {
    fn is_online(&self) -> bool {
        for addr in &self.endpoints {
            match TcpStream::connect_timeout(addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => debug!(endpoint = %addr, error = %e, "connectivity probe failed"),
            }
        }
        false
    }
}
