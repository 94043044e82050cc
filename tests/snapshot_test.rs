//! Snapshot collection and the persisted CSV record.

mod common;

use common::{sample_snapshot, FakeProbe};
use secmon_agent::collectors::ProbeError;
use secmon_agent::scan::ScanEngine;
use secmon_agent::snapshot::record::{self, SnapshotRecord, COLUMNS};
use secmon_agent::snapshot::{sanitize_host_id, CollectError, SnapshotCollector};
use std::sync::Arc;
use std::time::Duration;

fn collector(probe: FakeProbe) -> SnapshotCollector {
    let probe = Arc::new(probe);
    let scan = Arc::new(ScanEngine::new(
        probe.clone(),
        Duration::from_secs(300),
        Default::default(),
    ));
    SnapshotCollector::new(probe, scan)
}

#[test]
fn host_id_is_sanitized_hostname() {
    assert_eq!(sanitize_host_id("test-host.local"), "test_host_local");
    let c = collector(FakeProbe::default());
    assert_eq!(c.host_id(), "test_host_local");
    assert_eq!(c.os_name(), "TestOS");
}

#[test]
fn unreadable_hostname_falls_back_to_dated_placeholder() {
    let c = collector(FakeProbe {
        hostname: Err(ProbeError::unavailable("hostname", "no name")),
        ..FakeProbe::default()
    });
    assert!(c.host_id().starts_with("Unknown_Computer_"));
    assert_eq!(c.host_id().len(), "Unknown_Computer_".len() + 8);
}

#[test]
fn collect_fills_metrics_and_scan() {
    let c = collector(FakeProbe::default());
    let snap = c.collect().unwrap();
    assert_eq!(snap.host_id, "test_host_local");
    assert_eq!(snap.resources.cpu_percent, 12.5);
    assert_eq!(snap.resources.process_count, Some(1));
    assert_eq!(snap.resources.temperature_c, None);
    assert_eq!(snap.resources.uptime_secs, Some(3600));
    assert!((snap.resources.memory_percent() - 25.0).abs() < 1e-9);
    assert!((snap.resources.disk_percent() - 40.0).abs() < 1e-9);
    assert_eq!(snap.security.score, 100);
    assert!(!snap.scan_reused);
}

#[test]
fn second_sample_reuses_cached_scan() {
    let c = collector(FakeProbe::default());
    let first = c.collect().unwrap();
    let second = c.collect().unwrap();
    assert!(second.scan_reused);
    assert_eq!(first.security.scan_id, second.security.scan_id);
    assert_ne!(first.id, second.id);
    assert!(second.monotonic_ms >= first.monotonic_ms);
}

#[test]
fn missing_mandatory_metric_fails_collection() {
    let c = collector(FakeProbe {
        disk: Err(ProbeError::unavailable("disk", "no mounted volume")),
        ..FakeProbe::default()
    });
    match c.collect() {
        Err(CollectError::ProbeUnavailable { metric, .. }) => assert_eq!(metric, "disk"),
        Ok(_) => panic!("collection should fail without disk usage"),
    }
}

#[test]
fn record_has_fixed_column_order() {
    let mut out = Vec::new();
    record::write_records(&mut out, &[SnapshotRecord::from(&sample_snapshot())]).unwrap();
    let text = String::from_utf8(out).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(header, COLUMNS.join(","));
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn record_round_trips_through_csv() {
    let records = vec![
        SnapshotRecord::from(&sample_snapshot()),
        SnapshotRecord::from(&sample_snapshot()),
    ];
    let mut out = Vec::new();
    record::write_records(&mut out, &records).unwrap();
    let back = record::read_records(out.as_slice()).unwrap();
    assert_eq!(back, records);
    assert_eq!(back[0].temperature_c, None);
    assert_eq!(back[0].antivirus_enabled, Some(true));
    assert_eq!(back[0].definition_age_days, Some(0));
}

#[cfg(target_os = "linux")]
#[test]
fn busy_process_keeps_its_cpu_when_scan_follows_collect() {
    use secmon_agent::collectors::{HostProbe, SysinfoProbe};
    use std::sync::atomic::{AtomicBool, Ordering};

    let stop = Arc::new(AtomicBool::new(false));
    let spinner = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut n: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                n = std::hint::black_box(n.wrapping_add(1));
            }
        })
    };
    std::thread::sleep(Duration::from_millis(50));

    let probe = SysinfoProbe::new();
    let own = std::process::id();
    let cpu_of_self = |procs: Vec<secmon_agent::collectors::ProcessInfo>| {
        procs
            .into_iter()
            .find(|p| p.pid == own)
            .map(|p| p.cpu_percent)
            .unwrap_or(0.0)
    };

    // Same call order as collect() followed by a fresh scan.
    let sampled = cpu_of_self(probe.processes().unwrap());
    let _ = probe.temperature();
    let _ = probe.battery();
    let _ = probe.network_counters();
    let scanned = cpu_of_self(probe.processes().unwrap());

    stop.store(true, Ordering::Relaxed);
    spinner.join().unwrap();

    assert!(sampled > 50.0, "collect saw {sampled}%");
    assert!(scanned > 50.0, "scan saw {scanned}%");
}
