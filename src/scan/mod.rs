//! Security-posture scanning: turns [`HostProbe`] facts into a
//! [`SecurityScanResult`] with a bounded score.
//!
//! - [`signatures`] — static process-name tables
//! - [`score`] — deduction policy and risk level

pub mod score;
pub mod signatures;

use crate::collectors::{
    AntivirusFacts, HostProbe, NetworkCounters, ProbeError, ProcessInfo,
};
use crate::config::ScoringConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use score::RiskLevel;

/// Per-process CPU above this is flagged
pub const HIGH_CPU_PERCENT: f32 = 80.0;
/// Sustained throughput above this (either direction) is flagged
pub const HIGH_NETWORK_BYTES_PER_SEC: f64 = 10.0 * 1024.0 * 1024.0;
/// More listening sockets on all interfaces than this is flagged
pub const MAX_OPEN_PORTS: usize = 10;
/// Uptime beyond this is flagged
pub const LONG_UPTIME: Duration = Duration::from_secs(30 * 24 * 3600);
/// Pending OS updates at or above this count are high severity
pub const MANY_PENDING_UPDATES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    HighCpuUsage,
    SuspiciousProcessName,
    HighNetworkActivity,
}

impl IndicatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::HighCpuUsage => "high_cpu_usage",
            IndicatorKind::SuspiciousProcessName => "suspicious_process_name",
            IndicatorKind::HighNetworkActivity => "high_network_activity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityKind {
    ManyOpenPorts,
    LongUptime,
    PendingOsUpdates,
}

impl VulnerabilityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VulnerabilityKind::ManyOpenPorts => "many_open_ports",
            VulnerabilityKind::LongUptime => "long_uptime",
            VulnerabilityKind::PendingOsUpdates => "pending_os_updates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousIndicator {
    pub kind: IndicatorKind,
    pub severity: Severity,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub kind: VulnerabilityKind,
    pub severity: Severity,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecuritySoftwareEntry {
    pub process_name: String,
    pub vendor: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterState {
    Active,
    Unsupported,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastScanKind {
    Quick,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastScan {
    pub kind: LastScanKind,
    pub date: DateTime<Utc>,
}

/// Antivirus posture. `None` flags mean the probe could not tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntivirusStatus {
    pub antivirus_enabled: Option<bool>,
    pub real_time_protection: Option<bool>,
    pub last_scan: Option<LastScan>,
    pub signature_age_days: Option<u32>,
    pub center_state: CenterState,
}

impl AntivirusStatus {
    pub fn unknown(center_state: CenterState) -> Self {
        Self {
            antivirus_enabled: None,
            real_time_protection: None,
            last_scan: None,
            signature_age_days: None,
            center_state,
        }
    }

    fn from_facts(facts: AntivirusFacts, now: DateTime<Utc>) -> Self {
        let last_scan = match (facts.quick_scan_age_days, facts.full_scan_age_days) {
            (Some(q), Some(f)) if q <= f => Some((LastScanKind::Quick, q)),
            (Some(_), Some(f)) => Some((LastScanKind::Full, f)),
            (Some(q), None) => Some((LastScanKind::Quick, q)),
            (None, Some(f)) => Some((LastScanKind::Full, f)),
            (None, None) => None,
        }
        .map(|(kind, age)| LastScan {
            kind,
            date: now - ChronoDuration::days(i64::from(age)),
        });
        Self {
            antivirus_enabled: facts.antivirus_enabled,
            real_time_protection: facts.real_time_protection,
            last_scan,
            signature_age_days: facts.signature_age_days,
            center_state: CenterState::Active,
        }
    }
}

/// Sub-checks of one scan, as named in degraded reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCheck {
    Antivirus,
    Processes,
    NetworkActivity,
    OpenPorts,
    Uptime,
    PendingUpdates,
}

/// A sub-check that could not run; its status is reported as unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedCheck {
    pub check: ScanCheck,
    /// The fact does not exist on this platform, as opposed to a failed read
    pub unsupported: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityScanResult {
    pub scan_id: String,
    pub scanned_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub antivirus: AntivirusStatus,
    pub security_software: Vec<SecuritySoftwareEntry>,
    pub suspicious_activity: Vec<SuspiciousIndicator>,
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedCheck>,
    pub score: u8,
}

impl SecurityScanResult {
    pub fn risk_level(&self, config: &ScoringConfig) -> RiskLevel {
        RiskLevel::from_score(self.score, config)
    }
}

/// Result of [`ScanEngine::scan`]: a new evaluation, or the still-valid cached one
/// (no probe calls were made).
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Fresh(Arc<SecurityScanResult>),
    Cached(Arc<SecurityScanResult>),
}

impl ScanOutcome {
    pub fn result(&self) -> &Arc<SecurityScanResult> {
        match self {
            ScanOutcome::Fresh(r) | ScanOutcome::Cached(r) => r,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ScanOutcome::Cached(_))
    }
}

/// Last scan result and when it was taken; owned by the engine only.
struct ScanCache {
    result: Arc<SecurityScanResult>,
    taken_at: Instant,
}

#[derive(Default)]
struct ScanState {
    cache: Option<ScanCache>,
    previous_network: Option<(NetworkCounters, Instant)>,
}

struct ScanPolicy {
    scan_interval: Duration,
    scoring: ScoringConfig,
}

pub struct ScanEngine {
    probe: Arc<dyn HostProbe>,
    policy: Mutex<ScanPolicy>,
    state: Mutex<ScanState>,
}

impl ScanEngine {
    pub fn new(probe: Arc<dyn HostProbe>, scan_interval: Duration, scoring: ScoringConfig) -> Self {
        Self {
            probe,
            policy: Mutex::new(ScanPolicy {
                scan_interval,
                scoring,
            }),
            state: Mutex::new(ScanState::default()),
        }
    }

    /// Replace cache window and scoring policy (config reload).
    pub fn set_policy(&self, scan_interval: Duration, scoring: ScoringConfig) {
        *self.policy.lock() = ScanPolicy {
            scan_interval,
            scoring,
        };
    }

    pub fn scan(&self, force: bool) -> ScanOutcome {
        self.scan_at(force, Instant::now())
    }

    /// As [`ScanEngine::scan`] with an explicit monotonic "now".
    pub fn scan_at(&self, force: bool, now: Instant) -> ScanOutcome {
        let (scan_interval, scoring) = {
            let p = self.policy.lock();
            (p.scan_interval, p.scoring.clone())
        };
        let mut state = self.state.lock();
        if !force {
            if let Some(cache) = &state.cache {
                if now.saturating_duration_since(cache.taken_at) < scan_interval {
                    debug!("reusing cached security scan");
                    return ScanOutcome::Cached(cache.result.clone());
                }
            }
        }

        let started = Instant::now();
        let scanned_at = Utc::now();
        let mut degraded = Vec::new();

        let antivirus = match self.probe.antivirus() {
            Ok(facts) => AntivirusStatus::from_facts(facts, scanned_at),
            Err(e) => {
                let center = if e.is_unsupported() {
                    CenterState::Unsupported
                } else {
                    CenterState::Error
                };
                record_degraded(&mut degraded, ScanCheck::Antivirus, &e);
                AntivirusStatus::unknown(center)
            }
        };

        let mut suspicious = Vec::new();
        let mut security_software = Vec::new();
        match self.probe.processes() {
            Ok(procs) => {
                security_software = match_security_software(&procs);
                suspicious.extend(high_cpu_indicator(&procs));
                suspicious.extend(suspicious_name_indicators(&procs));
            }
            Err(e) => record_degraded(&mut degraded, ScanCheck::Processes, &e),
        }

        match self.probe.network_counters() {
            Ok(current) => {
                if let Some((prev, at)) = state.previous_network {
                    suspicious.extend(network_indicator(prev, current, now.saturating_duration_since(at)));
                }
                state.previous_network = Some((current, now));
            }
            Err(e) => record_degraded(&mut degraded, ScanCheck::NetworkActivity, &e),
        }

        let mut vulnerabilities = Vec::new();
        match self.probe.pending_updates() {
            Ok(count) => vulnerabilities.extend(pending_updates_vulnerability(count)),
            Err(e) => record_degraded(&mut degraded, ScanCheck::PendingUpdates, &e),
        }
        match self.probe.listening_sockets() {
            Ok(sockets) => {
                let ports: BTreeSet<u16> = sockets
                    .iter()
                    .filter(|s| s.addr.is_unspecified())
                    .map(|s| s.port)
                    .collect();
                vulnerabilities.extend(open_ports_vulnerability(&ports));
            }
            Err(e) => record_degraded(&mut degraded, ScanCheck::OpenPorts, &e),
        }
        match self.probe.uptime() {
            Ok(uptime) => vulnerabilities.extend(uptime_vulnerability(uptime)),
            Err(e) => record_degraded(&mut degraded, ScanCheck::Uptime, &e),
        }

        let score = score::security_score(&antivirus, &suspicious, &vulnerabilities, &scoring);
        let result = Arc::new(SecurityScanResult {
            scan_id: Uuid::new_v4().to_string(),
            scanned_at,
            duration_ms: started.elapsed().as_millis() as u64,
            antivirus,
            security_software,
            suspicious_activity: suspicious,
            vulnerabilities,
            degraded,
            score,
        });
        info!(
            score = result.score,
            level = ?result.risk_level(&scoring),
            suspicious = result.suspicious_activity.len(),
            vulnerabilities = result.vulnerabilities.len(),
            degraded = result.degraded.len(),
            "security scan complete"
        );
        state.cache = Some(ScanCache {
            result: result.clone(),
            taken_at: now,
        });
        ScanOutcome::Fresh(result)
    }
}

fn record_degraded(out: &mut Vec<DegradedCheck>, check: ScanCheck, err: &ProbeError) {
    if err.is_unsupported() {
        debug!(check = ?check, error = %err, "scan check unsupported");
    } else {
        warn!(check = ?check, error = %err, "scan check degraded");
    }
    out.push(DegradedCheck {
        check,
        unsupported: err.is_unsupported(),
        reason: err.to_string(),
    });
}

fn match_security_software(procs: &[ProcessInfo]) -> Vec<SecuritySoftwareEntry> {
    let set: BTreeSet<SecuritySoftwareEntry> = procs
        .iter()
        .filter_map(|p| {
            signatures::vendor_for(&p.name).map(|vendor| SecuritySoftwareEntry {
                process_name: p.name.clone(),
                vendor: vendor.to_string(),
                pid: p.pid,
            })
        })
        .collect();
    set.into_iter().collect()
}

fn high_cpu_indicator(procs: &[ProcessInfo]) -> Option<SuspiciousIndicator> {
    let hot: Vec<_> = procs
        .iter()
        .filter(|p| p.cpu_percent > HIGH_CPU_PERCENT)
        .map(|p| json!({ "name": p.name, "pid": p.pid, "cpu_percent": p.cpu_percent }))
        .collect();
    if hot.is_empty() {
        return None;
    }
    Some(SuspiciousIndicator {
        kind: IndicatorKind::HighCpuUsage,
        severity: Severity::Medium,
        detail: json!({ "processes": hot }),
    })
}

/// One indicator per (process, matched token) pair.
fn suspicious_name_indicators(procs: &[ProcessInfo]) -> Vec<SuspiciousIndicator> {
    procs
        .iter()
        .flat_map(|p| {
            signatures::suspicious_tokens_in(&p.name).map(move |token| SuspiciousIndicator {
                kind: IndicatorKind::SuspiciousProcessName,
                severity: Severity::High,
                detail: json!({ "process": p.name, "pid": p.pid, "token": token }),
            })
        })
        .collect()
}

fn network_indicator(
    prev: NetworkCounters,
    current: NetworkCounters,
    elapsed: Duration,
) -> Option<SuspiciousIndicator> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    let sent_rate = current.bytes_sent.saturating_sub(prev.bytes_sent) as f64 / secs;
    let recv_rate = current.bytes_recv.saturating_sub(prev.bytes_recv) as f64 / secs;
    if sent_rate <= HIGH_NETWORK_BYTES_PER_SEC && recv_rate <= HIGH_NETWORK_BYTES_PER_SEC {
        return None;
    }
    const MB: f64 = 1024.0 * 1024.0;
    Some(SuspiciousIndicator {
        kind: IndicatorKind::HighNetworkActivity,
        severity: Severity::Low,
        detail: json!({ "sent_rate_mb": sent_rate / MB, "recv_rate_mb": recv_rate / MB }),
    })
}

fn open_ports_vulnerability(ports: &BTreeSet<u16>) -> Option<Vulnerability> {
    if ports.len() <= MAX_OPEN_PORTS {
        return None;
    }
    let sample: Vec<u16> = ports.iter().copied().take(10).collect();
    Some(Vulnerability {
        kind: VulnerabilityKind::ManyOpenPorts,
        severity: Severity::Low,
        detail: json!({ "port_count": ports.len(), "sample_ports": sample }),
    })
}

fn uptime_vulnerability(uptime: Duration) -> Option<Vulnerability> {
    if uptime <= LONG_UPTIME {
        return None;
    }
    let days = uptime.as_secs_f64() / 86_400.0;
    Some(Vulnerability {
        kind: VulnerabilityKind::LongUptime,
        severity: Severity::Low,
        detail: json!({ "uptime_days": (days * 10.0).round() / 10.0 }),
    })
}

fn pending_updates_vulnerability(count: u32) -> Option<Vulnerability> {
    if count == 0 {
        return None;
    }
    let severity = if count < MANY_PENDING_UPDATES {
        Severity::Medium
    } else {
        Severity::High
    };
    Some(Vulnerability {
        kind: VulnerabilityKind::PendingOsUpdates,
        severity,
        detail: json!({ "count": count }),
    })
}
