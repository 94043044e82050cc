//! Default [`HostProbe`]: sysinfo for resources, platform helpers for the rest.

use super::{
    AntivirusFacts, BatteryInfo, DefenderCollector, DiskUsage, HostProbe, ListeningSocket,
    MemoryUsage, NetworkCollector, NetworkCounters, ProbeError, ProcessCollector, ProcessInfo,
};
use std::path::Path;
use std::time::Duration;
use sysinfo::{Components, Disks, System};

#[derive(Default)]
pub struct SysinfoProbe {
    process: ProcessCollector,
    network: NetworkCollector,
    defender: DefenderCollector,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

fn system_mount() -> &'static Path {
    if cfg!(target_os = "windows") {
        Path::new("C:\\")
    } else {
        Path::new("/")
    }
}

impl HostProbe for SysinfoProbe {
    fn hostname(&self) -> Result<String, ProbeError> {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .map_err(|e| ProbeError::unavailable("hostname", e))
    }

    fn os_name(&self) -> String {
        System::name().unwrap_or_else(|| std::env::consts::OS.to_string())
    }

    fn antivirus(&self) -> Result<AntivirusFacts, ProbeError> {
        self.defender.antivirus()
    }

    fn pending_updates(&self) -> Result<u32, ProbeError> {
        self.defender.pending_updates()
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>, ProbeError> {
        self.process.processes()
    }

    fn network_counters(&self) -> Result<NetworkCounters, ProbeError> {
        self.network.counters()
    }

    fn listening_sockets(&self) -> Result<Vec<ListeningSocket>, ProbeError> {
        self.network.listening_sockets()
    }

    fn uptime(&self) -> Result<Duration, ProbeError> {
        match System::uptime() {
            0 => Err(ProbeError::unavailable("uptime", "reported as 0")),
            secs => Ok(Duration::from_secs(secs)),
        }
    }

    fn cpu_percent(&self) -> Result<f32, ProbeError> {
        self.process.cpu_percent()
    }

    fn memory(&self) -> Result<MemoryUsage, ProbeError> {
        self.process.memory()
    }

    fn disk(&self) -> Result<DiskUsage, ProbeError> {
        let disks = Disks::new_with_refreshed_list();
        let root = system_mount();
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == root)
            .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()))
            .ok_or_else(|| ProbeError::unavailable("disk", "no disks reported"))?;
        let total = disk.total_space();
        if total == 0 {
            return Err(ProbeError::unavailable("disk", "total space reported as 0"));
        }
        let free = disk.available_space();
        Ok(DiskUsage {
            used_bytes: total.saturating_sub(free),
            free_bytes: free,
            total_bytes: total,
        })
    }

    fn temperature(&self) -> Result<Option<f32>, ProbeError> {
        let components = Components::new_with_refreshed_list();
        Ok(components
            .list()
            .iter()
            .map(|c| c.temperature())
            .find(|t| t.is_finite() && *t > 0.0))
    }

    fn battery(&self) -> Result<Option<BatteryInfo>, ProbeError> {
        battery_impl()
    }
}

#[cfg(target_os = "linux")]
fn battery_impl() -> Result<Option<BatteryInfo>, ProbeError> {
    let supply = Path::new("/sys/class/power_supply");
    let Ok(entries) = std::fs::read_dir(supply) else {
        return Ok(None);
    };
    for entry in entries.flatten() {
        let dir = entry.path();
        let is_battery = std::fs::read_to_string(dir.join("type"))
            .map(|t| t.trim() == "Battery")
            .unwrap_or(false);
        if !is_battery {
            continue;
        }
        let capacity = std::fs::read_to_string(dir.join("capacity"))
            .map_err(|e| ProbeError::unavailable("battery", e))?;
        let percent: f32 = capacity
            .trim()
            .parse()
            .map_err(|e| ProbeError::unavailable("battery", e))?;
        let status = std::fs::read_to_string(dir.join("status")).unwrap_or_default();
        return Ok(Some(BatteryInfo {
            percent,
            plugged: status.trim() != "Discharging",
            secs_left: None,
        }));
    }
    Ok(None)
}

#[cfg(not(target_os = "linux"))]
fn battery_impl() -> Result<Option<BatteryInfo>, ProbeError> {
    Err(ProbeError::Unsupported("battery"))
}
