//! Encrypted journal: ordering, sent marking, eviction, persistence.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::sample_snapshot;
use secmon_agent::storage::{encrypted, Journal};
use std::sync::Arc;
use std::thread;

const SECRET: &[u8] = b"test-secret";

#[test]
fn append_mark_sent_evict_keeps_only_unsent() {
    let journal = Journal::open_in_memory(SECRET).unwrap();
    let a = journal.append(sample_snapshot()).unwrap();
    let b = journal.append(sample_snapshot()).unwrap();
    assert!(a < b);

    assert_eq!(journal.mark_sent(&[a]).unwrap(), 1);
    assert_eq!(journal.evict(Utc::now(), true).unwrap(), 1);

    let left = journal.entries().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, b);
    assert!(!left[0].sent);
    assert_eq!(journal.unsent_entries().unwrap().len(), 1);
}

#[test]
fn entries_come_back_in_insertion_order() {
    let journal = Journal::open_in_memory(SECRET).unwrap();
    let snaps: Vec<_> = (0..5).map(|_| sample_snapshot()).collect();
    for s in &snaps {
        journal.append(s.clone()).unwrap();
    }
    let ids: Vec<_> = journal
        .unsent_entries()
        .unwrap()
        .into_iter()
        .map(|e| e.snapshot.id)
        .collect();
    let expected: Vec<_> = snaps.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, expected);
}

#[test]
fn mark_sent_is_idempotent() {
    let journal = Journal::open_in_memory(SECRET).unwrap();
    let a = journal.append(sample_snapshot()).unwrap();
    assert_eq!(journal.mark_sent(&[a]).unwrap(), 1);
    assert_eq!(journal.mark_sent(&[a]).unwrap(), 0);
    assert_eq!(journal.unsent_count().unwrap(), 0);
    assert_eq!(journal.len().unwrap(), 1);
}

#[test]
fn evict_respects_cutoff_and_unsent_entries() {
    let journal = Journal::open_in_memory(SECRET).unwrap();
    let a = journal.append(sample_snapshot()).unwrap();
    journal.append(sample_snapshot()).unwrap();
    journal.mark_sent(&[a]).unwrap();

    // Nothing is that old yet
    let past = Utc::now() - ChronoDuration::days(1);
    assert_eq!(journal.evict(past, true).unwrap(), 0);
    assert_eq!(journal.len().unwrap(), 2);

    // Explicit discard drops unsent entries too
    assert_eq!(journal.evict(Utc::now(), false).unwrap(), 2);
    assert!(journal.is_empty().unwrap());
}

#[test]
fn journal_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let secret = encrypted::load_or_create_secret(dir.path()).unwrap();
    let snap = sample_snapshot();
    {
        let journal = Journal::open(&path, &secret).unwrap();
        journal.append(snap.clone()).unwrap();
    }
    let secret_again = encrypted::load_or_create_secret(dir.path()).unwrap();
    assert_eq!(secret, secret_again);

    let journal = Journal::open(&path, &secret_again).unwrap();
    let entries = journal.unsent_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].snapshot, snap);
}

#[test]
fn payload_is_not_stored_in_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let snap = sample_snapshot();
    {
        let journal = Journal::open(&path, SECRET).unwrap();
        journal.append(snap.clone()).unwrap();
    }
    let conn = rusqlite::Connection::open(&path).unwrap();
    let payload: String = conn
        .query_row("SELECT payload_enc FROM journal", [], |r| r.get(0))
        .unwrap();
    assert!(!payload.contains(&snap.os_name));
}

#[test]
fn wrong_key_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    {
        let journal = Journal::open(&path, SECRET).unwrap();
        journal.append(sample_snapshot()).unwrap();
    }
    let journal = Journal::open(&path, b"another-secret").unwrap();
    assert!(journal.unsent_entries().unwrap().is_empty());
    assert_eq!(journal.len().unwrap(), 1);
}

#[test]
fn concurrent_appends_are_all_kept() {
    let journal = Arc::new(Journal::open_in_memory(SECRET).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let journal = journal.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    journal.append(sample_snapshot()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let entries = journal.unsent_entries().unwrap();
    assert_eq!(entries.len(), 20);
    assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn tampered_payload_fails_to_decrypt() {
    use encrypted::{CryptoError, PayloadCipher};

    let cipher = PayloadCipher::from_secret(SECRET);
    let sealed = cipher.seal("snap-1", b"payload").unwrap();
    assert_eq!(cipher.open("snap-1", &sealed).unwrap(), b"payload");

    let mut raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &sealed).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xff;
    let tampered = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &raw);
    assert!(matches!(cipher.open("snap-1", &tampered), Err(CryptoError::Decrypt)));
    assert!(matches!(cipher.open("snap-1", "AAAA"), Err(CryptoError::Truncated)));

    // Sealed under another snapshot id, or another installation's secret
    assert!(matches!(cipher.open("snap-2", &sealed), Err(CryptoError::Decrypt)));
    let other = PayloadCipher::from_secret(b"other-secret");
    assert!(matches!(other.open("snap-1", &sealed), Err(CryptoError::Decrypt)));
}

#[test]
fn payload_moved_to_another_row_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    {
        let journal = Journal::open(&path, SECRET).unwrap();
        journal.append(sample_snapshot()).unwrap();
        journal.append(sample_snapshot()).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE journal SET payload_enc = (SELECT payload_enc FROM journal WHERE seq = 1) WHERE seq = 2",
            [],
        )
        .unwrap();
    }
    let journal = Journal::open(&path, SECRET).unwrap();
    let entries = journal.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id.0, 1);
}
