//! Agent entrypoint: samples the host into the local journal on a fixed
//! interval while a background scheduler delivers unsent entries whenever the
//! network allows. An interval of 0 runs one sample plus one sync attempt.

use secmon_agent::{
    collectors::SysinfoProbe,
    config::{AgentConfig, ConfigStore, ConfigWatcher},
    logging::StructuredLogger,
    scan::ScanEngine,
    snapshot::SnapshotCollector,
    storage::{encrypted, Journal},
    sync::{SchedulerHandle, SyncScheduler},
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

fn run_one_cycle(
    collector: &SnapshotCollector,
    journal: &Journal,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let snapshot = collector.collect()?;
    let score = snapshot.security.score;
    let cpu = snapshot.resources.cpu_percent;
    let reused = snapshot.scan_reused;
    let id = journal.append(snapshot)?;
    info!(entry = id.0, score, cpu, scan_reused = reused, "snapshot journaled");
    Ok(())
}

/// `None` when no transport can be built from the configuration.
fn build_scheduler(
    config: &AgentConfig,
    store: Arc<ConfigStore>,
    journal: Arc<Journal>,
    collector: &SnapshotCollector,
) -> Option<SyncScheduler> {
    match SyncScheduler::from_config(config, store, journal, collector.host_id(), collector.os_name()) {
        Ok(scheduler) => {
            if !config.sync.enabled {
                info!("sync disabled by configuration");
            }
            Some(scheduler)
        }
        Err(e) => {
            warn!(error = %e, "transport not usable, sync waits for a config reload");
            None
        }
    }
}

fn start_scheduler(scheduler: Option<SyncScheduler>, stop: &Arc<AtomicBool>) -> Option<SchedulerHandle> {
    match scheduler.map(|s| s.spawn(stop.clone())) {
        Some(Ok(h)) => Some(h),
        Some(Err(e)) => {
            error!(error = %e, "cannot start sync scheduler");
            None
        }
        None => None,
    }
}

fn sleep_secs(stop: &AtomicBool, secs: u64) {
    for _ in 0..secs {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("SECMON_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let (config, load_error) = AgentConfig::load(&config_path);

    let log_file = StructuredLogger::init(&config.log, Some(&config.log_dir));
    if let Some(e) = load_error {
        warn!(error = %e, "config file rejected, running with defaults");
    }
    info!(
        config = %config.redacted(),
        log_file = ?log_file,
        "security monitor agent starting"
    );

    // Without a journal there is nowhere to put samples: fatal.
    std::fs::create_dir_all(&config.data_dir)?;
    let secret = encrypted::load_or_create_secret(&config.data_dir)?;
    let journal = Arc::new(Journal::open(&config.data_dir.join("journal.db"), &secret)?);
    info!(
        entries = journal.len()?,
        unsent = journal.unsent_count()?,
        "journal opened"
    );

    let probe = Arc::new(SysinfoProbe::new());
    let scan = Arc::new(ScanEngine::new(
        probe.clone(),
        Duration::from_secs(config.collection.scan_interval_secs),
        config.scoring.clone(),
    ));
    let collector = SnapshotCollector::new(probe, scan.clone());
    info!(host_id = collector.host_id(), os = collector.os_name(), "host identified");

    let store = Arc::new(ConfigStore::new(config.clone()));
    let scheduler = build_scheduler(&config, store.clone(), journal.clone(), &collector);

    let interval_secs = config.collection.interval_secs;
    if interval_secs == 0 {
        run_one_cycle(&collector, &journal)?;
        if let Some(mut scheduler) = scheduler {
            let outcome = scheduler.cycle(Instant::now());
            info!(?outcome, "sync attempt finished");
        }
        info!("security monitor cycle complete");
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)) {
            warn!(error = %e, "cannot install Ctrl+C handler");
        }
    }

    let mut handle = start_scheduler(scheduler, &stop);

    info!(interval_secs, "daemon mode (Ctrl+C to stop)");
    let mut watcher = ConfigWatcher::new(&config_path);
    let mut seen_version = store.version();
    let mut cycle: u64 = 0;
    while !stop.load(Ordering::Relaxed) {
        cycle += 1;
        if let Err(e) = run_one_cycle(&collector, &journal) {
            warn!(cycle, error = %e, "cycle failed");
        }

        watcher.poll(&store);
        // With a scheduler running, reloads are applied at its idle boundary.
        if handle.is_none() {
            store.apply_pending();
        }
        let (version, current) = store.versioned();
        if version != seen_version {
            seen_version = version;
            scan.set_policy(
                Duration::from_secs(current.collection.scan_interval_secs),
                current.scoring.clone(),
            );
            info!(version, "collection policy updated");
            // A reload may have supplied the transport missing at startup.
            if handle.is_none() {
                let scheduler = build_scheduler(&current, store.clone(), journal.clone(), &collector);
                handle = start_scheduler(scheduler, &stop);
            }
        }
        sleep_secs(&stop, current.collection.interval_secs.max(1));
    }

    info!("security monitor agent stopping");
    if let Some(h) = handle {
        h.stop(Duration::from_secs(5));
    }
    Ok(())
}
