//! Agent configuration. Loaded once at startup; replaced only through [`ConfigStore`]
//! at a point where no sync attempt is in flight.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{info, warn};

/// Placeholder shown instead of secrets in any human-readable dump.
pub const REDACTED: &str = "*** CONFIGURED ***";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Data directory (journal database, journal key)
    pub data_dir: PathBuf,
    /// Directory for the daily append-only log files
    pub log_dir: PathBuf,
    pub collection: CollectionConfig,
    pub scoring: ScoringConfig,
    pub sync: SyncConfig,
    pub transport: TransportConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Foreground sample period (seconds). 0 runs a single cycle and exits.
    pub interval_secs: u64,
    /// Minimum time between full security scans (seconds)
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Score an antivirus / real-time flag that could not be read as if it were off
    pub unknown_as_disabled: bool,
    /// Scores below this are medium risk
    pub medium_risk_below: u8,
    /// Scores below this are high risk
    pub high_risk_below: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Minimum time between two successful syncs (seconds)
    pub interval_secs: u64,
    /// Scheduler poll tick (seconds)
    pub poll_secs: u64,
    /// Ceiling for one packaged artifact
    pub max_package_bytes: u64,
    /// Sent journal entries older than this are evicted (seconds)
    pub retention_secs: u64,
    /// Upper bound for a single transport delivery (seconds)
    pub transport_timeout_secs: u64,
    pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Well-known endpoints tried in order; any successful connect means online
    pub endpoints: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Email(EmailSettings),
    Webhook(WebhookSettings),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub recipient_email: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_method")]
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    /// Also append to `<log_dir>/agent_YYYYMMDD.log`
    pub file: bool,
}

fn default_subject_prefix() -> String {
    "[Security Monitor Data]".to_string()
}

fn default_method() -> String {
    "POST".to_string()
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("sender_email", &self.sender_email)
            .field("sender_password", &REDACTED)
            .field("recipient_email", &self.recipient_email)
            .field("subject_prefix", &self.subject_prefix)
            .finish()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .map(|d| d.join("secmon"))
            .unwrap_or_else(|| PathBuf::from(".secmon"));
        Self {
            data_dir: base.join("data"),
            log_dir: base.join("logs"),
            collection: CollectionConfig::default(),
            scoring: ScoringConfig::default(),
            sync: SyncConfig::default(),
            transport: TransportConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            scan_interval_secs: 300,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            unknown_as_disabled: true,
            medium_risk_below: 80,
            high_risk_below: 50,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30 * 60,
            poll_secs: 60,
            max_package_bytes: 10 * 1024 * 1024,
            retention_secs: 7 * 24 * 3600,
            transport_timeout_secs: 30,
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            timeout_secs: 3,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Webhook(WebhookSettings {
            url: String::new(),
            headers: BTreeMap::new(),
            method: default_method(),
        })
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            file: true,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }
}

impl AgentConfig {
    /// Load from JSON file if present; otherwise return default. An unreadable
    /// or invalid file also yields the default, together with the error so the
    /// caller can report it once logging is up.
    pub fn load(path: &Path) -> (Self, Option<ConfigError>) {
        match Self::try_load(path) {
            Ok(Some(c)) => (c, None),
            Ok(None) => (Self::default(), None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Strict variant used by reload: `Ok(None)` when the file does not exist.
    pub fn try_load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig =
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("sync.poll_secs", self.sync.poll_secs),
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.max_package_bytes", self.sync.max_package_bytes),
            ("sync.transport_timeout_secs", self.sync.transport_timeout_secs),
            ("sync.connectivity.timeout_secs", self.sync.connectivity.timeout_secs),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.scoring.high_risk_below > self.scoring.medium_risk_below {
            return Err(ConfigError::Invalid {
                field: "scoring.high_risk_below",
                reason: "must not exceed scoring.medium_risk_below".to_string(),
            });
        }
        Ok(())
    }

    /// Human-readable dump with transport secrets replaced by [`REDACTED`].
    pub fn redacted(&self) -> serde_json::Value {
        let mut copy = self.clone();
        match &mut copy.transport {
            TransportConfig::Email(e) => {
                if !e.sender_password.is_empty() {
                    e.sender_password = REDACTED.to_string();
                }
            }
            TransportConfig::Webhook(w) => {
                for value in w.headers.values_mut() {
                    *value = REDACTED.to_string();
                }
            }
        }
        serde_json::to_value(&copy).unwrap_or(serde_json::Value::Null)
    }
}

/// Read-mostly holder of the active configuration. A reload is parked until
/// [`ConfigStore::apply_pending`] is called from an idle point; consumers
/// notice an applied reload through [`ConfigStore::version`].
pub struct ConfigStore {
    current: RwLock<(u64, Arc<AgentConfig>)>,
    pending: Mutex<Option<AgentConfig>>,
}

impl ConfigStore {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            current: RwLock::new((0, Arc::new(config))),
            pending: Mutex::new(None),
        }
    }

    /// Snapshot of the active configuration
    pub fn current(&self) -> Arc<AgentConfig> {
        self.current.read().1.clone()
    }

    /// Active configuration with its version; the version grows by one per applied reload.
    pub fn versioned(&self) -> (u64, Arc<AgentConfig>) {
        let guard = self.current.read();
        (guard.0, guard.1.clone())
    }

    pub fn version(&self) -> u64 {
        self.current.read().0
    }

    /// Park a new configuration; replaces any earlier parked one.
    pub fn request_reload(&self, config: AgentConfig) {
        *self.pending.lock() = Some(config);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Swap in the parked configuration, returning it when one was applied.
    pub fn apply_pending(&self) -> Option<Arc<AgentConfig>> {
        let next = Arc::new(self.pending.lock().take()?);
        let mut guard = self.current.write();
        *guard = (guard.0 + 1, next.clone());
        Some(next)
    }
}

/// Watches the config file's modification time and parks valid new
/// contents in a [`ConfigStore`].
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }

    /// Returns true when a reload was requested.
    pub fn poll(&mut self, store: &ConfigStore) -> bool {
        let now = modified(&self.path);
        if now.is_none() || now == self.last_modified {
            return false;
        }
        self.last_modified = now;
        match AgentConfig::try_load(&self.path) {
            Ok(Some(config)) => {
                info!(path = %self.path.display(), "config changed, reload requested");
                store.request_reload(config);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "ignoring invalid config change");
                false
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
