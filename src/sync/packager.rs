//! Sync artifact: one deflated zip holding the CSV batch of journal entries,
//! tail excerpts of recent log files, and `manifest.json`.

use crate::snapshot::record::{self, SnapshotRecord};
use crate::storage::{EntryId, JournalEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_NAME: &str = "manifest.json";
/// Log files modified within this window are attached
const LOG_WINDOW: Duration = Duration::from_secs(24 * 3600);
/// Per-file tail size for attached logs
const MAX_LOG_EXCERPT_BYTES: u64 = 256 * 1024;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("csv encoding: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip container: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("manifest encoding: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("package has no {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub host_id: String,
    pub entry_count: usize,
    pub built_at: DateTime<Utc>,
    pub os_name: String,
    pub agent_version: String,
    /// SHA-256 of the CSV batch member
    pub batch_sha256: String,
}

/// One transmissible artifact. Lives only for the duration of a sync attempt.
#[derive(Debug, Clone)]
pub struct SyncPackage {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub manifest: Manifest,
    /// Journal entries carried by this package, in journal order
    pub entry_ids: Vec<EntryId>,
}

impl SyncPackage {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub struct Packager {
    host_id: String,
    os_name: String,
    log_dir: Option<PathBuf>,
    max_package_bytes: u64,
}

impl Packager {
    pub fn new(host_id: impl Into<String>, os_name: impl Into<String>, max_package_bytes: u64) -> Self {
        Self {
            host_id: host_id.into(),
            os_name: os_name.into(),
            log_dir: None,
            max_package_bytes,
        }
    }

    /// Attach recent `*.log` files from `dir` to every package.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn max_package_bytes(&self) -> u64 {
        self.max_package_bytes
    }

    pub fn set_max_package_bytes(&mut self, limit: u64) {
        self.max_package_bytes = limit;
    }

    fn batch_name(&self) -> String {
        format!("system_security_{}_combined.csv", self.host_id)
    }

    /// Package exactly `entries`, or fail with `TooLarge`; never truncates.
    pub fn build(&self, entries: &[JournalEntry]) -> Result<SyncPackage, PackageError> {
        self.assemble(entries, true)
    }

    fn assemble(&self, entries: &[JournalEntry], with_logs: bool) -> Result<SyncPackage, PackageError> {
        let records: Vec<SnapshotRecord> =
            entries.iter().map(|e| SnapshotRecord::from(&e.snapshot)).collect();
        let mut csv_bytes = Vec::new();
        record::write_records(&mut csv_bytes, &records)?;

        let built_at = Utc::now();
        let manifest = Manifest {
            host_id: self.host_id.clone(),
            entry_count: entries.len(),
            built_at,
            os_name: self.os_name.clone(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            batch_sha256: format!("{:x}", Sha256::digest(&csv_bytes)),
        };

        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(self.batch_name(), options)?;
        zip.write_all(&csv_bytes)?;
        let excerpts = if with_logs { self.log_excerpts() } else { Vec::new() };
        for (name, excerpt) in excerpts {
            zip.start_file(format!("logs/{}", name), options)?;
            zip.write_all(&excerpt)?;
        }
        zip.start_file(MANIFEST_NAME, options)?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
        let bytes = zip.finish()?.into_inner();

        let size = bytes.len() as u64;
        if size > self.max_package_bytes {
            return Err(PackageError::TooLarge {
                size,
                limit: self.max_package_bytes,
            });
        }

        Ok(SyncPackage {
            file_name: format!(
                "system_security_{}_{}_{}.zip",
                self.host_id,
                self.os_name,
                built_at.format("%Y%m%d_%H%M%S")
            ),
            bytes,
            manifest,
            entry_ids: entries.iter().map(|e| e.id).collect(),
        })
    }

    /// Package the longest prefix of `entries` that fits, halving on `TooLarge`.
    /// When a single entry does not fit next to the log excerpts, the batch is
    /// rebuilt without them. Fails with `TooLarge` only when one bare entry
    /// exceeds the ceiling.
    pub fn build_bounded(&self, entries: &[JournalEntry]) -> Result<SyncPackage, PackageError> {
        match self.halving(entries, true) {
            Err(PackageError::TooLarge { size, limit }) if self.log_dir.is_some() => {
                warn!(size, limit, "log excerpts do not fit, packaging entries only");
                self.halving(entries, false)
            }
            other => other,
        }
    }

    fn halving(&self, entries: &[JournalEntry], with_logs: bool) -> Result<SyncPackage, PackageError> {
        let mut take = entries.len();
        loop {
            match self.assemble(&entries[..take], with_logs) {
                Err(PackageError::TooLarge { size, limit }) if take > 1 => {
                    debug!(entries = take, size, limit, with_logs, "package too large, halving");
                    take /= 2;
                }
                other => return other,
            }
        }
    }

    fn log_excerpts(&self) -> Vec<(String, Vec<u8>)> {
        let Some(dir) = &self.log_dir else {
            return Vec::new();
        };
        let now = SystemTime::now();
        let mut out = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "log") {
                continue;
            }
            let recent = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| now.duration_since(m).ok())
                .map_or(true, |age| age <= LOG_WINDOW);
            if !recent {
                continue;
            }
            match read_tail(path, MAX_LOG_EXCERPT_BYTES) {
                Ok(bytes) => out.push((entry.file_name().to_string_lossy().to_string(), bytes)),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot read log excerpt"),
            }
        }
        out
    }
}

fn read_tail(path: &Path, max: u64) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len > max {
        file.seek(SeekFrom::Start(len - max))?;
    }
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Collector-side view of an artifact: its manifest and snapshot rows.
pub fn unpack(bytes: &[u8]) -> Result<(Manifest, Vec<SnapshotRecord>), PackageError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let manifest: Manifest = {
        let member = archive.by_name(MANIFEST_NAME)?;
        serde_json::from_reader(member)?
    };
    let batch_name = archive
        .file_names()
        .find(|n| n.ends_with(".csv") && !n.starts_with("logs/"))
        .map(str::to_string)
        .ok_or(PackageError::Missing("snapshot batch"))?;
    let records = record::read_records(archive.by_name(&batch_name)?)?;
    Ok((manifest, records))
}
