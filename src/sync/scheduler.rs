//! Background sync loop: `Idle -> Probing -> Syncing -> Cooling`.
//!
//! One [`SyncScheduler::cycle`] is one poll tick. The loop started by
//! [`SyncScheduler::spawn`] sleeps between ticks, applies parked config
//! reloads and checks the stop flag only there, so neither a reload nor a
//! stop can land in the middle of a delivery.

use super::connectivity::{ConnectivityCheck, TcpConnectivity};
use super::packager::{PackageError, Packager};
use crate::config::{AgentConfig, ConfigError, ConfigStore};
use crate::logging;
use crate::storage::{Journal, JournalEntry, JournalError};
use crate::uplink::{self, Transport, TransportError};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Granularity of the stop-flag check while sleeping between ticks
const STOP_CHECK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Probing,
    Syncing,
    Cooling,
}

#[derive(Debug, Error)]
pub enum SyncFailure {
    #[error("journal: {0}")]
    Journal(#[from] JournalError),
    #[error("packaging: {0}")]
    Package(#[from] PackageError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// What one tick did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// `sync.enabled` is off
    Disabled,
    /// The last successful sync is more recent than `sync.interval_secs`
    Cooling { remaining: Duration },
    Offline,
    NothingToSend,
    Synced {
        entries: usize,
        evicted: usize,
        bytes: u64,
    },
    Failed(SyncFailure),
}

pub struct SyncScheduler {
    journal: Arc<Journal>,
    packager: Packager,
    transport: Box<dyn Transport>,
    connectivity: Box<dyn ConnectivityCheck>,
    config: Arc<ConfigStore>,
    config_version: u64,
    log_dir: Option<PathBuf>,
    state: SchedulerState,
    last_sync: Option<Instant>,
}

impl SyncScheduler {
    pub fn new(
        journal: Arc<Journal>,
        packager: Packager,
        transport: Box<dyn Transport>,
        connectivity: Box<dyn ConnectivityCheck>,
        config: Arc<ConfigStore>,
    ) -> Self {
        let config_version = config.version();
        Self {
            journal,
            packager,
            transport,
            connectivity,
            config,
            config_version,
            log_dir: None,
            state: SchedulerState::Idle,
            last_sync: None,
        }
    }

    /// Wire a scheduler from `config`: its transport, TCP connectivity, and a
    /// packager attaching recent logs from `config.log_dir`. Fails when the
    /// transport settings are unusable.
    pub fn from_config(
        config: &AgentConfig,
        store: Arc<ConfigStore>,
        journal: Arc<Journal>,
        host_id: &str,
        os_name: &str,
    ) -> Result<Self, ConfigError> {
        let transport = uplink::build(&config.transport, config.sync.transport_timeout())?;
        let packager = Packager::new(host_id, os_name, config.sync.max_package_bytes)
            .with_log_dir(&config.log_dir);
        let connectivity = Box::new(TcpConnectivity::from_config(&config.sync.connectivity));
        Ok(Self::new(journal, packager, transport, connectivity, store).with_log_dir(&config.log_dir))
    }

    /// Prune `*.log` files older than the retention window from `dir` after
    /// each successful sync.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    /// Run one tick as of `now`.
    pub fn cycle(&mut self, now: Instant) -> CycleOutcome {
        let config = self.current_config();
        if !config.sync.enabled {
            self.state = SchedulerState::Idle;
            return CycleOutcome::Disabled;
        }

        if let Some(last) = self.last_sync {
            let elapsed = now.saturating_duration_since(last);
            let interval = config.sync.interval();
            if elapsed < interval {
                self.state = SchedulerState::Cooling;
                return CycleOutcome::Cooling {
                    remaining: interval - elapsed,
                };
            }
        }

        self.state = SchedulerState::Probing;
        if !self.connectivity.is_online() {
            debug!("offline, sync skipped");
            self.state = SchedulerState::Idle;
            return CycleOutcome::Offline;
        }
        let unsent = match self.journal.unsent_entries() {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "cannot read unsent journal entries");
                self.state = SchedulerState::Idle;
                return CycleOutcome::Failed(e.into());
            }
        };
        if unsent.is_empty() {
            self.state = SchedulerState::Idle;
            return CycleOutcome::NothingToSend;
        }

        self.state = SchedulerState::Syncing;
        let outcome = self.sync(&unsent, now, &config);
        // Any delivered package starts the cooling window.
        self.state = if self.last_sync == Some(now) {
            SchedulerState::Cooling
        } else {
            SchedulerState::Idle
        };
        outcome
    }

    fn sync(
        &mut self,
        unsent: &[JournalEntry],
        now: Instant,
        config: &AgentConfig,
    ) -> CycleOutcome {
        let package = match self.packager.build_bounded(unsent) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, entries = unsent.len(), "cannot build sync package");
                return CycleOutcome::Failed(e.into());
            }
        };
        info!(
            entries = package.entry_ids.len(),
            pending = unsent.len(),
            bytes = package.size(),
            file = %package.file_name,
            transport = self.transport.name(),
            "sending sync package"
        );

        let ack = match self.transport.send(&package) {
            Ok(ack) => ack,
            Err(e) => {
                if e.is_rejected() {
                    error!(error = %e, transport = self.transport.name(), "sync rejected");
                } else {
                    warn!(error = %e, transport = self.transport.name(), "sync failed, will retry");
                }
                return CycleOutcome::Failed(e.into());
            }
        };

        // The collector has the data from here on; never resend it on a
        // local bookkeeping failure.
        self.last_sync = Some(now);
        let marked = match self.journal.mark_sent(&package.entry_ids) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "delivered package but could not mark entries sent");
                return CycleOutcome::Failed(e.into());
            }
        };

        let retention = config.sync.retention();
        let evicted = match chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| Utc::now().checked_sub_signed(r))
        {
            Some(cutoff) => self.journal.evict(cutoff, true).unwrap_or_else(|e| {
                warn!(error = %e, "journal eviction failed");
                0
            }),
            None => 0,
        };
        if let Some(dir) = &self.log_dir {
            let pruned = logging::prune_logs(dir, retention);
            if pruned > 0 {
                debug!(pruned, "old log files removed");
            }
        }

        info!(
            entries = marked,
            evicted,
            ack = %ack.detail,
            transport = ack.transport,
            "sync complete"
        );
        CycleOutcome::Synced {
            entries: marked,
            evicted,
            bytes: package.size(),
        }
    }

    /// Current configuration; rebuilds the delivery side when a reload was
    /// applied since the last tick.
    fn current_config(&mut self) -> Arc<AgentConfig> {
        let (version, config) = self.config.versioned();
        if version != self.config_version {
            self.config_version = version;
            self.reconfigure(&config);
        }
        config
    }

    fn reconfigure(&mut self, config: &AgentConfig) {
        match uplink::build(&config.transport, config.sync.transport_timeout()) {
            Ok(t) => self.transport = t,
            Err(e) => warn!(error = %e, "keeping previous transport, new one is invalid"),
        }
        self.connectivity = Box::new(TcpConnectivity::from_config(&config.sync.connectivity));
        self.packager.set_max_package_bytes(config.sync.max_package_bytes);
        info!(
            transport = self.transport.name(),
            interval_secs = config.sync.interval_secs,
            "sync scheduler reconfigured"
        );
    }

    /// Run the loop on a dedicated thread until `stop` is set.
    pub fn spawn(mut self, stop: Arc<AtomicBool>) -> std::io::Result<SchedulerHandle> {
        let flag = stop.clone();
        let thread = thread::Builder::new()
            .name("sync-scheduler".to_string())
            .spawn(move || {
                info!("sync scheduler started");
                while !flag.load(Ordering::Relaxed) {
                    if self.config.apply_pending().is_some() {
                        info!("config reload applied");
                    }
                    let outcome = self.cycle(Instant::now());
                    debug!(?outcome, state = ?self.state, "sync tick");
                    let poll = self.config.current().sync.poll();
                    sleep_unless_stopped(&flag, poll);
                }
                info!("sync scheduler stopped");
            })?;
        Ok(SchedulerHandle {
            stop,
            thread: Some(thread),
        })
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(STOP_CHECK));
    }
}

pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Set the stop flag and wait up to `timeout` for the loop to exit.
    /// Returns false when the thread was still busy (it is left detached).
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(?timeout, "sync scheduler did not stop in time");
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        if thread.join().is_err() {
            error!("sync scheduler thread panicked");
        }
        true
    }
}
