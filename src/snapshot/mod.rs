//! Point-in-time system observations: resource metrics plus the latest
//! security scan, merged into one immutable [`SystemSnapshot`].

pub mod record;

use crate::collectors::{BatteryInfo, DiskUsage, HostProbe, MemoryUsage, NetworkCounters, ProbeError};
use crate::scan::{ScanEngine, SecurityScanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub use record::SnapshotRecord;

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds on the monotonic clock since the agent process started
pub fn monotonic_ms() -> u64 {
    PROCESS_EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("mandatory metric {metric} unavailable: {source}")]
    ProbeUnavailable {
        metric: &'static str,
        #[source]
        source: ProbeError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f32,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub process_count: Option<u32>,
    pub temperature_c: Option<f32>,
    pub battery: Option<BatteryInfo>,
    pub network: Option<NetworkCounters>,
    pub uptime_secs: Option<u64>,
}

impl ResourceMetrics {
    pub fn memory_percent(&self) -> f64 {
        percent(self.memory.used_bytes, self.memory.total_bytes)
    }

    pub fn disk_percent(&self) -> f64 {
        percent(self.disk.used_bytes, self.disk.total_bytes)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub monotonic_ms: u64,
    pub host_id: String,
    pub os_name: String,
    pub resources: ResourceMetrics,
    pub security: SecurityScanResult,
    /// The embedded scan was reused from the engine cache, not run for this sample
    pub scan_reused: bool,
}

/// Reduce a hostname to `[A-Za-z0-9_]`.
pub fn sanitize_host_id(hostname: &str) -> String {
    hostname
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Stable host identifier; falls back to a dated placeholder when the
/// hostname cannot be read.
pub fn host_identifier(probe: &dyn HostProbe) -> String {
    match probe.hostname() {
        Ok(name) if !name.trim().is_empty() => sanitize_host_id(&name),
        _ => format!("Unknown_Computer_{}", Utc::now().format("%Y%m%d")),
    }
}

pub struct SnapshotCollector {
    probe: Arc<dyn HostProbe>,
    scan: Arc<ScanEngine>,
    host_id: String,
    os_name: String,
}

impl SnapshotCollector {
    pub fn new(probe: Arc<dyn HostProbe>, scan: Arc<ScanEngine>) -> Self {
        let host_id = host_identifier(probe.as_ref());
        let os_name = probe.os_name();
        Self {
            probe,
            scan,
            host_id,
            os_name,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn os_name(&self) -> &str {
        &self.os_name
    }

    /// Sample resources and the (possibly cached) security scan. Fails only when
    /// CPU, memory, or disk cannot be read.
    pub fn collect(&self) -> Result<SystemSnapshot, CollectError> {
        let cpu_percent = self.probe.cpu_percent().map_err(mandatory("cpu"))?;
        let memory = self.probe.memory().map_err(mandatory("memory"))?;
        let disk = self.probe.disk().map_err(mandatory("disk"))?;

        let resources = ResourceMetrics {
            cpu_percent,
            memory,
            disk,
            process_count: optional("process_count", self.probe.processes())
                .map(|p| p.len() as u32),
            temperature_c: optional("temperature", self.probe.temperature()).flatten(),
            battery: optional("battery", self.probe.battery()).flatten(),
            network: optional("network_counters", self.probe.network_counters()),
            uptime_secs: optional("uptime", self.probe.uptime()).map(|d| d.as_secs()),
        };

        let outcome = self.scan.scan(false);
        Ok(SystemSnapshot {
            id: Uuid::new_v4().to_string(),
            captured_at: Utc::now(),
            monotonic_ms: monotonic_ms(),
            host_id: self.host_id.clone(),
            os_name: self.os_name.clone(),
            resources,
            security: outcome.result().as_ref().clone(),
            scan_reused: outcome.is_cached(),
        })
    }
}

fn mandatory(metric: &'static str) -> impl FnOnce(ProbeError) -> CollectError {
    move |source| CollectError::ProbeUnavailable { metric, source }
}

fn optional<T>(metric: &'static str, value: Result<T, ProbeError>) -> Option<T> {
    match value {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(metric, error = %e, "optional metric absent");
            None
        }
    }
}
