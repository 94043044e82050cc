//! Host fact collection. [`HostProbe`] is the only seam through which the scan
//! engine and the snapshot collector see the operating system; [`SysinfoProbe`]
//! is the cross-platform implementation, tests substitute scripted probes.

mod defender;
mod host;
mod network;
mod process;

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

pub use defender::DefenderCollector;
pub use host::SysinfoProbe;
pub use network::NetworkCollector;
pub use process::ProcessCollector;

/// Why a host fact could not be read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The fact does not exist on this platform (e.g. Defender on Linux)
    #[error("{0} is not supported on this host")]
    Unsupported(&'static str),
    /// The fact exists but reading it failed this time
    #[error("{fact} unavailable: {reason}")]
    Unavailable { fact: &'static str, reason: String },
}

impl ProbeError {
    pub fn unavailable(fact: &'static str, reason: impl ToString) -> Self {
        ProbeError::Unavailable {
            fact,
            reason: reason.to_string(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProbeError::Unsupported(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
}

/// Cumulative interface counters summed over all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListeningSocket {
    pub addr: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryInfo {
    pub percent: f32,
    pub plugged: bool,
    pub secs_left: Option<u64>,
}

/// Raw antivirus facts as reported by the platform security center.
/// `None` means the platform answered but did not carry that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntivirusFacts {
    pub antivirus_enabled: Option<bool>,
    pub real_time_protection: Option<bool>,
    pub quick_scan_age_days: Option<u32>,
    pub full_scan_age_days: Option<u32>,
    pub signature_age_days: Option<u32>,
}

/// Raw OS / process / network facts on demand. Implementations hold no
/// scoring state; each call reflects the host at call time.
pub trait HostProbe: Send + Sync {
    fn hostname(&self) -> Result<String, ProbeError>;
    fn os_name(&self) -> String;

    fn antivirus(&self) -> Result<AntivirusFacts, ProbeError>;
    fn pending_updates(&self) -> Result<u32, ProbeError>;

    fn processes(&self) -> Result<Vec<ProcessInfo>, ProbeError>;
    fn network_counters(&self) -> Result<NetworkCounters, ProbeError>;
    fn listening_sockets(&self) -> Result<Vec<ListeningSocket>, ProbeError>;
    fn uptime(&self) -> Result<Duration, ProbeError>;

    fn cpu_percent(&self) -> Result<f32, ProbeError>;
    fn memory(&self) -> Result<MemoryUsage, ProbeError>;
    fn disk(&self) -> Result<DiskUsage, ProbeError>;
    fn temperature(&self) -> Result<Option<f32>, ProbeError>;
    fn battery(&self) -> Result<Option<BatteryInfo>, ProbeError>;
}
