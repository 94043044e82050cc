//! Scripted host, transport and connectivity doubles shared by the integration tests.
#![allow(dead_code)]

use parking_lot::Mutex;
use secmon_agent::collectors::{
    AntivirusFacts, BatteryInfo, DiskUsage, HostProbe, ListeningSocket, MemoryUsage,
    NetworkCounters, ProbeError, ProcessInfo,
};
use secmon_agent::config::{AgentConfig, ConfigStore};
use secmon_agent::snapshot::SystemSnapshot;
use secmon_agent::sync::{ConnectivityCheck, SyncPackage};
use secmon_agent::uplink::{Ack, Transport, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Host with every fact scripted. Defaults describe a healthy machine:
/// antivirus on, fresh signatures, nothing suspicious.
pub struct FakeProbe {
    pub hostname: Result<String, ProbeError>,
    pub antivirus: Result<AntivirusFacts, ProbeError>,
    pub pending_updates: Result<u32, ProbeError>,
    pub processes: Mutex<Vec<ProcessInfo>>,
    pub network: Mutex<NetworkCounters>,
    pub sockets: Vec<ListeningSocket>,
    pub uptime: Duration,
    pub disk: Result<DiskUsage, ProbeError>,
    pub calls: AtomicUsize,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            hostname: Ok("test-host.local".to_string()),
            antivirus: Ok(healthy_antivirus()),
            pending_updates: Ok(0),
            processes: Mutex::new(vec![process(1, "init", 0.1)]),
            network: Mutex::new(NetworkCounters::default()),
            sockets: Vec::new(),
            uptime: Duration::from_secs(3600),
            disk: Ok(DiskUsage {
                used_bytes: 40 * GIB,
                free_bytes: 60 * GIB,
                total_bytes: 100 * GIB,
            }),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn healthy_antivirus() -> AntivirusFacts {
    AntivirusFacts {
        antivirus_enabled: Some(true),
        real_time_protection: Some(true),
        quick_scan_age_days: Some(1),
        full_scan_age_days: Some(5),
        signature_age_days: Some(0),
    }
}

pub fn process(pid: u32, name: &str, cpu_percent: f32) -> ProcessInfo {
    ProcessInfo {
        pid,
        name: name.to_string(),
        cpu_percent,
    }
}

impl HostProbe for FakeProbe {
    fn hostname(&self) -> Result<String, ProbeError> {
        self.hostname.clone()
    }

    fn os_name(&self) -> String {
        "TestOS".to_string()
    }

    fn antivirus(&self) -> Result<AntivirusFacts, ProbeError> {
        self.hit();
        self.antivirus.clone()
    }

    fn pending_updates(&self) -> Result<u32, ProbeError> {
        self.hit();
        self.pending_updates.clone()
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>, ProbeError> {
        self.hit();
        Ok(self.processes.lock().clone())
    }

    fn network_counters(&self) -> Result<NetworkCounters, ProbeError> {
        self.hit();
        Ok(*self.network.lock())
    }

    fn listening_sockets(&self) -> Result<Vec<ListeningSocket>, ProbeError> {
        self.hit();
        Ok(self.sockets.clone())
    }

    fn uptime(&self) -> Result<Duration, ProbeError> {
        self.hit();
        Ok(self.uptime)
    }

    fn cpu_percent(&self) -> Result<f32, ProbeError> {
        Ok(12.5)
    }

    fn memory(&self) -> Result<MemoryUsage, ProbeError> {
        Ok(MemoryUsage {
            used_bytes: 4 * GIB,
            total_bytes: 16 * GIB,
        })
    }

    fn disk(&self) -> Result<DiskUsage, ProbeError> {
        self.disk.clone()
    }

    fn temperature(&self) -> Result<Option<f32>, ProbeError> {
        Err(ProbeError::Unsupported("temperature"))
    }

    fn battery(&self) -> Result<Option<BatteryInfo>, ProbeError> {
        Ok(None)
    }
}

/// Records every package it is handed; answers with the scripted result.
pub struct FakeTransport {
    pub sent: Arc<Mutex<Vec<SyncPackage>>>,
    pub reply: Arc<Mutex<Result<(), TransportError>>>,
}

impl FakeTransport {
    pub fn accepting() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            reply: Arc::new(Mutex::new(Ok(()))),
        }
    }

    pub fn failing(err: TransportError) -> Self {
        let t = Self::accepting();
        *t.reply.lock() = Err(err);
        t
    }
}

impl Transport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn send(&self, package: &SyncPackage) -> Result<Ack, TransportError> {
        self.sent.lock().push(package.clone());
        self.reply.lock().clone().map(|()| Ack {
            transport: "fake",
            detail: "ok".to_string(),
        })
    }
}

/// Connectivity gate driven by a shared flag; counts probes.
pub struct FakeConnectivity {
    pub online: Arc<AtomicBool>,
    pub probes: Arc<AtomicUsize>,
}

impl FakeConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ConnectivityCheck for FakeConnectivity {
    fn is_online(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}

/// Snapshot collected from a default [`FakeProbe`].
pub fn sample_snapshot() -> SystemSnapshot {
    use secmon_agent::scan::ScanEngine;
    use secmon_agent::snapshot::SnapshotCollector;

    let probe = Arc::new(FakeProbe::default());
    let scan = Arc::new(ScanEngine::new(
        probe.clone(),
        Duration::from_secs(300),
        Default::default(),
    ));
    SnapshotCollector::new(probe, scan)
        .collect()
        .expect("fake probe provides mandatory metrics")
}

pub fn store_with(config: AgentConfig) -> Arc<ConfigStore> {
    Arc::new(ConfigStore::new(config))
}
