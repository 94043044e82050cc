//! Persisted snapshot record: one CSV row per sample. Column order is fixed
//! and must not change; downstream collectors read these files positionally.

use super::SystemSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Header row, in persisted order
pub const COLUMNS: [&str; 22] = [
    "timestamp",
    "host_id",
    "os_name",
    "cpu_percent",
    "memory_percent",
    "memory_used_gb",
    "memory_total_gb",
    "disk_percent",
    "disk_free_gb",
    "disk_total_gb",
    "process_count",
    "temperature_c",
    "uptime_hours",
    "network_sent_mb",
    "network_recv_mb",
    "security_score",
    "antivirus_enabled",
    "real_time_protection",
    "definition_age_days",
    "suspicious_activity_count",
    "vulnerability_count",
    "security_software_count",
];

/// Field declaration order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: DateTime<Utc>,
    pub host_id: String,
    pub os_name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub disk_percent: f64,
    pub disk_free_gb: f64,
    pub disk_total_gb: f64,
    pub process_count: Option<u32>,
    pub temperature_c: Option<f64>,
    pub uptime_hours: Option<f64>,
    pub network_sent_mb: Option<f64>,
    pub network_recv_mb: Option<f64>,
    pub security_score: u8,
    /// Empty when the antivirus state was unknown
    pub antivirus_enabled: Option<bool>,
    pub real_time_protection: Option<bool>,
    pub definition_age_days: Option<u32>,
    pub suspicious_activity_count: u32,
    pub vulnerability_count: u32,
    pub security_software_count: u32,
}

impl From<&SystemSnapshot> for SnapshotRecord {
    fn from(s: &SystemSnapshot) -> Self {
        let r = &s.resources;
        let av = &s.security.antivirus;
        Self {
            timestamp: s.captured_at,
            host_id: s.host_id.clone(),
            os_name: s.os_name.clone(),
            cpu_percent: f64::from(r.cpu_percent),
            memory_percent: r.memory_percent(),
            memory_used_gb: r.memory.used_bytes as f64 / BYTES_PER_GB,
            memory_total_gb: r.memory.total_bytes as f64 / BYTES_PER_GB,
            disk_percent: r.disk_percent(),
            disk_free_gb: r.disk.free_bytes as f64 / BYTES_PER_GB,
            disk_total_gb: r.disk.total_bytes as f64 / BYTES_PER_GB,
            process_count: r.process_count,
            temperature_c: r.temperature_c.map(f64::from),
            uptime_hours: r.uptime_secs.map(|s| s as f64 / 3600.0),
            network_sent_mb: r.network.map(|n| n.bytes_sent as f64 / BYTES_PER_MB),
            network_recv_mb: r.network.map(|n| n.bytes_recv as f64 / BYTES_PER_MB),
            security_score: s.security.score,
            antivirus_enabled: av.antivirus_enabled,
            real_time_protection: av.real_time_protection,
            definition_age_days: av.signature_age_days,
            suspicious_activity_count: s.security.suspicious_activity.len() as u32,
            vulnerability_count: s.security.vulnerabilities.len() as u32,
            security_software_count: s.security.security_software.len() as u32,
        }
    }
}

/// Write a header plus one row per record.
pub fn write_records<W: Write>(out: W, records: &[SnapshotRecord]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read records written by [`write_records`].
pub fn read_records<R: Read>(input: R) -> Result<Vec<SnapshotRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
    reader.deserialize().collect()
}
