//! Structured logging: JSON lines (or human format) to stdout, plus an
//! append-only daily file `<log_dir>/agent_YYYYMMDD.log` that the packager
//! attaches excerpts of. The file rolls over at local midnight.

use crate::config::LogConfig;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber; level from RUST_LOG or `config.level`.
    /// Returns the log file path when file output is active. A second call
    /// (e.g. from tests) leaves the first subscriber in place.
    pub fn init(config: &LogConfig, log_dir: Option<&Path>) -> Option<PathBuf> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

        let file = match log_dir.filter(|_| config.file) {
            Some(dir) => match DailyFile::open(dir) {
                Ok(opened) => Some(opened),
                Err(e) => {
                    eprintln!("cannot open log file in {}: {}", dir.display(), e);
                    None
                }
            },
            None => None,
        };
        let path = file.as_ref().map(|f| f.path());

        let json = config.json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stdout)
        });
        let plain = (!config.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stdout));
        let file_layer = file.map(|f| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(f))
        });

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(json)
            .with(plain)
            .with(file_layer)
            .try_init();
        path
    }
}

/// `agent_YYYYMMDD.log` for the local date.
pub fn daily_file_name() -> String {
    format!("agent_{}.log", chrono::Local::now().format("%Y%m%d"))
}

/// Append-only log file that reopens under a new name whenever the
/// name source (by default [`daily_file_name`]) changes.
pub struct DailyFile {
    dir: PathBuf,
    name_for: Box<dyn Fn() -> String + Send>,
    name: String,
    file: File,
}

impl DailyFile {
    pub fn open(dir: &Path) -> io::Result<Self> {
        Self::open_with(dir, daily_file_name)
    }

    pub fn open_with(dir: &Path, name_for: impl Fn() -> String + Send + 'static) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let name = name_for();
        let file = append_to(&dir.join(&name))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name_for: Box::new(name_for),
            name,
            file,
        })
    }

    /// Path of the file currently written to.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    fn roll(&mut self) -> io::Result<()> {
        let name = (self.name_for)();
        if name != self.name {
            self.file.flush()?;
            self.file = append_to(&self.dir.join(&name))?;
            self.name = name;
        }
        Ok(())
    }
}

impl Write for DailyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.roll()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Delete `*.log` files in `dir` (not recursive) last modified more than
/// `older_than` ago. Returns how many were removed.
pub fn prune_logs(dir: &Path, older_than: Duration) -> usize {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "log") {
            continue;
        }
        let stale = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|m| now.duration_since(m).ok())
            .map_or(false, |age| age > older_than);
        if stale {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot remove old log"),
            }
        }
    }
    removed
}
