//! Integration test: config handling, log retention, and one sample flowing
//! from collection through the journal to a delivered package.

mod common;

use common::{store_with, FakeConnectivity, FakeProbe, FakeTransport};
use secmon_agent::config::{
    AgentConfig, ConfigError, ConfigStore, ConfigWatcher, EmailSettings, TransportConfig, REDACTED,
};
use secmon_agent::logging;
use secmon_agent::scan::ScanEngine;
use secmon_agent::snapshot::SnapshotCollector;
use secmon_agent::storage::{encrypted, Journal};
use secmon_agent::sync::{packager, CycleOutcome, Packager, SyncScheduler};
use secmon_agent::uplink;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

fn email_config() -> AgentConfig {
    AgentConfig {
        transport: TransportConfig::Email(EmailSettings {
            smtp_server: "smtp.example.com".into(),
            smtp_port: 587,
            sender_email: "agent@example.com".into(),
            sender_password: "hunter2".into(),
            recipient_email: "soc@example.com".into(),
            subject_prefix: "[Security Monitor Data]".into(),
        }),
        ..AgentConfig::default()
    }
}

#[test]
fn config_load_default() {
    let (c, err) = AgentConfig::load(Path::new("nonexistent.json"));
    assert!(err.is_none());
    assert_eq!(c.collection.interval_secs, 60);
    assert_eq!(c.collection.scan_interval_secs, 300);
    assert_eq!(c.sync.interval_secs, 1800);
    assert_eq!(c.sync.max_package_bytes, 10 * 1024 * 1024);
    assert_eq!(c.sync.connectivity.endpoints.len(), 2);
    assert!(c.scoring.unknown_as_disabled);
    assert!(c.validate().is_ok());
}

#[test]
fn config_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "sync": { "interval_secs": 120 },
            "transport": { "kind": "webhook", "url": "https://collector.example.com/upload" }
        }"#,
    )
    .unwrap();
    let c = AgentConfig::try_load(&path).unwrap().unwrap();
    assert_eq!(c.sync.interval_secs, 120);
    assert_eq!(c.sync.poll_secs, 60);
    match &c.transport {
        TransportConfig::Webhook(w) => {
            assert_eq!(w.method, "POST");
            assert!(w.headers.is_empty());
        }
        other => panic!("unexpected transport {:?}", other),
    }
}

#[test]
fn config_rejects_invalid_values() {
    let mut c = AgentConfig::default();
    c.sync.poll_secs = 0;
    assert!(matches!(
        c.validate(),
        Err(ConfigError::Invalid { field: "sync.poll_secs", .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(AgentConfig::try_load(&path), Err(ConfigError::Parse { .. })));
    // The lenient loader falls back to defaults but hands the error back
    let (c, err) = AgentConfig::load(&path);
    assert_eq!(c, AgentConfig::default());
    assert!(matches!(err, Some(ConfigError::Parse { .. })));

    std::fs::write(&path, r#"{ "sync": { "max_package_bytes": 0 } }"#).unwrap();
    let (c, err) = AgentConfig::load(&path);
    assert_eq!(c, AgentConfig::default());
    assert!(matches!(
        err,
        Some(ConfigError::Invalid { field: "sync.max_package_bytes", .. })
    ));
}

#[test]
fn secrets_are_redacted() {
    let c = email_config();
    let dump = c.redacted();
    assert_eq!(dump["transport"]["sender_password"], REDACTED);
    assert_eq!(dump["transport"]["smtp_server"], "smtp.example.com");
    assert!(!dump.to_string().contains("hunter2"));
    assert!(!format!("{:?}", c).contains("hunter2"));

    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer abc123".to_string());
    let c = AgentConfig {
        transport: TransportConfig::Webhook(secmon_agent::config::WebhookSettings {
            url: "https://collector.example.com".into(),
            headers,
            method: "POST".into(),
        }),
        ..AgentConfig::default()
    };
    let dump = c.redacted();
    assert_eq!(dump["transport"]["headers"]["Authorization"], REDACTED);
}

#[test]
fn transports_validate_their_settings() {
    let timeout = Duration::from_secs(5);
    assert!(uplink::build(&TransportConfig::default(), timeout).is_err());

    let mut c = email_config();
    if let TransportConfig::Email(e) = &mut c.transport {
        e.sender_password.clear();
    }
    assert!(uplink::build(&c.transport, timeout).is_err());

    let ok = uplink::build(&email_config().transport, timeout).unwrap();
    assert_eq!(ok.name(), "email");

    let webhook = TransportConfig::Webhook(secmon_agent::config::WebhookSettings {
        url: "https://collector.example.com/upload".into(),
        headers: BTreeMap::new(),
        method: "put".into(),
    });
    assert_eq!(uplink::build(&webhook, timeout).unwrap().name(), "webhook");
}

#[test]
fn reload_is_parked_until_applied() {
    let store = ConfigStore::new(AgentConfig::default());
    assert_eq!(store.version(), 0);
    assert!(store.apply_pending().is_none());

    let mut next = AgentConfig::default();
    next.sync.interval_secs = 42;
    store.request_reload(next);
    assert!(store.has_pending());
    assert_eq!(store.current().sync.interval_secs, 1800);

    let applied = store.apply_pending().unwrap();
    assert_eq!(applied.sync.interval_secs, 42);
    let (version, current) = store.versioned();
    assert_eq!(version, 1);
    assert_eq!(current.sync.interval_secs, 42);
    assert!(!store.has_pending());
}

#[test]
fn watcher_requests_reload_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "sync": { "interval_secs": 100 } }"#).unwrap();
    let store = ConfigStore::new(AgentConfig::load(&path).0);
    let mut watcher = ConfigWatcher::new(&path);
    assert!(!watcher.poll(&store));

    std::fs::write(&path, r#"{ "sync": { "interval_secs": 200 } }"#).unwrap();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    assert!(watcher.poll(&store));
    assert_eq!(store.apply_pending().unwrap().sync.interval_secs, 200);

    // An invalid edit is ignored
    std::fs::write(&path, r#"{ "sync": { "poll_secs": 0 } }"#).unwrap();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
    assert!(!watcher.poll(&store));
    assert!(!store.has_pending());
}

#[test]
fn old_logs_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("agent_20200101.log");
    let fresh = dir.path().join(logging::daily_file_name());
    let other = dir.path().join("keep.txt");
    for p in [&old, &fresh, &other] {
        std::fs::write(p, b"x").unwrap();
    }
    let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 24 * 3600);
    for p in [&old, &other] {
        let f = std::fs::OpenOptions::new().write(true).open(p).unwrap();
        f.set_modified(ten_days_ago).unwrap();
    }

    let removed = logging::prune_logs(dir.path(), Duration::from_secs(7 * 24 * 3600));
    assert_eq!(removed, 1);
    assert!(!old.exists());
    assert!(fresh.exists());
    assert!(other.exists());
}

#[test]
fn log_file_rolls_over_when_the_day_changes() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let day = Arc::new(parking_lot::Mutex::new("agent_20260101.log".to_string()));
    let mut file = {
        let day = day.clone();
        logging::DailyFile::open_with(dir.path(), move || day.lock().clone()).unwrap()
    };

    writeln!(file, "first day").unwrap();
    *day.lock() = "agent_20260102.log".to_string();
    writeln!(file, "second day").unwrap();
    file.flush().unwrap();

    assert_eq!(file.path(), dir.path().join("agent_20260102.log"));
    let first = std::fs::read_to_string(dir.path().join("agent_20260101.log")).unwrap();
    let second = std::fs::read_to_string(dir.path().join("agent_20260102.log")).unwrap();
    assert_eq!(first, "first day\n");
    assert_eq!(second, "second day\n");

    // The closed file ages out while the active one is kept.
    let f = std::fs::OpenOptions::new()
        .write(true)
        .open(dir.path().join("agent_20260101.log"))
        .unwrap();
    f.set_modified(SystemTime::now() - Duration::from_secs(10 * 24 * 3600)).unwrap();
    assert_eq!(logging::prune_logs(dir.path(), Duration::from_secs(7 * 24 * 3600)), 1);
    assert!(file.path().exists());
}

#[test]
fn scheduler_can_be_built_once_a_reload_supplies_a_transport() {
    let journal = Arc::new(Journal::open_in_memory(b"wiring").unwrap());
    let store = store_with(AgentConfig::default());
    let initial = store.current();
    assert!(SyncScheduler::from_config(&initial, store.clone(), journal.clone(), "host", "TestOS").is_err());

    let mut reloaded = AgentConfig::default();
    reloaded.transport = TransportConfig::Webhook(secmon_agent::config::WebhookSettings {
        url: "https://collector.example.com/upload".into(),
        headers: BTreeMap::new(),
        method: "post".into(),
    });
    store.request_reload(reloaded);
    store.apply_pending();
    let current = store.current();
    assert!(SyncScheduler::from_config(&current, store.clone(), journal, "host", "TestOS").is_ok());
}

#[test]
fn sample_flows_from_probe_to_delivered_package() {
    let dir = tempfile::tempdir().unwrap();
    let secret = encrypted::load_or_create_secret(dir.path()).unwrap();
    let journal = Arc::new(Journal::open(&dir.path().join("journal.db"), &secret).unwrap());

    let probe = Arc::new(FakeProbe::default());
    let scan = Arc::new(ScanEngine::new(
        probe.clone(),
        Duration::from_secs(300),
        Default::default(),
    ));
    let collector = SnapshotCollector::new(probe, scan);
    for _ in 0..3 {
        journal.append(collector.collect().unwrap()).unwrap();
    }

    let transport = FakeTransport::accepting();
    let sent = transport.sent.clone();
    let mut scheduler = SyncScheduler::new(
        journal.clone(),
        Packager::new(collector.host_id(), collector.os_name(), 10 * 1024 * 1024),
        Box::new(transport),
        Box::new(FakeConnectivity::new(true)),
        store_with(AgentConfig::default()),
    );
    assert!(matches!(
        scheduler.cycle(Instant::now()),
        CycleOutcome::Synced { entries: 3, .. }
    ));

    let delivered = sent.lock()[0].clone();
    let (manifest, records) = packager::unpack(&delivered.bytes).unwrap();
    assert_eq!(manifest.host_id, "test_host_local");
    assert_eq!(manifest.os_name, "TestOS");
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.security_score == 100));
    assert_eq!(journal.unsent_count().unwrap(), 0);
}
