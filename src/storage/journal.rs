//! Append-only snapshot journal on SQLite. Snapshot payloads are stored
//! encrypted; the insertion sequence is the only ordering readers observe.

use super::encrypted::{CryptoError, PayloadCipher};
use crate::snapshot::SystemSnapshot;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("journal payload encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("journal payload crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Position of an entry in the journal; increases with every append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub i64);

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: EntryId,
    pub appended_at: DateTime<Utc>,
    pub sent: bool,
    pub snapshot: SystemSnapshot,
}

pub struct Journal {
    conn: Mutex<Connection>,
    cipher: PayloadCipher,
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl Journal {
    /// Open or create the journal at `path`. Payload key is derived from `secret`.
    pub fn open(path: &Path, secret: &[u8]) -> Result<Self, JournalError> {
        let conn = Connection::open(path)?;
        Self::init(conn, secret)
    }

    /// Non-durable journal, for tests and dry runs.
    pub fn open_in_memory(secret: &[u8]) -> Result<Self, JournalError> {
        Self::init(Connection::open_in_memory()?, secret)
    }

    fn init(conn: Connection, secret: &[u8]) -> Result<Self, JournalError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS journal (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id TEXT NOT NULL,
                appended_at INTEGER NOT NULL,
                payload_enc TEXT NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                sent_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_journal_sent ON journal(sent, seq);
            CREATE INDEX IF NOT EXISTS idx_journal_appended ON journal(appended_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher: PayloadCipher::from_secret(secret),
        })
    }

    /// Append a snapshot; the journal owns it from here on.
    pub fn append(&self, snapshot: SystemSnapshot) -> Result<EntryId, JournalError> {
        let payload = serde_json::to_vec(&snapshot)?;
        let enc = self.cipher.seal(&snapshot.id, &payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO journal (snapshot_id, appended_at, payload_enc, sent) VALUES (?1, ?2, ?3, 0)",
            params![snapshot.id, Utc::now().timestamp_millis(), enc],
        )?;
        Ok(EntryId(conn.last_insert_rowid()))
    }

    /// Unsent entries in insertion order, read under the writer lock so an
    /// in-progress append is either fully visible or not at all.
    pub fn unsent_entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        self.select("WHERE sent = 0")
    }

    /// Every entry, sent or not, in insertion order.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        self.select("")
    }

    fn select(&self, filter: &str) -> Result<Vec<JournalEntry>, JournalError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT seq, appended_at, sent, snapshot_id, payload_enc FROM journal {} ORDER BY seq ASC",
            filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (seq, appended_at, sent, snapshot_id, enc) = row?;
            match self.decode(&snapshot_id, &enc) {
                Ok(snapshot) => out.push(JournalEntry {
                    id: EntryId(seq),
                    appended_at: ts_from_millis(appended_at),
                    sent,
                    snapshot,
                }),
                Err(e) => warn!(seq, error = %e, "skipping unreadable journal entry"),
            }
        }
        Ok(out)
    }

    fn decode(&self, snapshot_id: &str, enc: &str) -> Result<SystemSnapshot, JournalError> {
        let plain = self.cipher.open(snapshot_id, enc)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    /// Mark the given entries sent. Returns how many rows changed state.
    pub fn mark_sent(&self, ids: &[EntryId]) -> Result<usize, JournalError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp_millis();
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE journal SET sent = 1, sent_at = ?1 WHERE seq = ?2 AND sent = 0")?;
            for id in ids {
                changed += stmt.execute(params![now, id.0])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Remove entries appended at or before `older_than`. Unsent entries are
    /// kept unless `only_sent` is false, which is an explicit discard.
    pub fn evict(&self, older_than: DateTime<Utc>, only_sent: bool) -> Result<usize, JournalError> {
        let cutoff = older_than.timestamp_millis();
        let conn = self.conn.lock();
        let n = if only_sent {
            conn.execute(
                "DELETE FROM journal WHERE appended_at <= ?1 AND sent = 1",
                params![cutoff],
            )?
        } else {
            conn.execute("DELETE FROM journal WHERE appended_at <= ?1", params![cutoff])?
        };
        Ok(n)
    }

    pub fn len(&self) -> Result<usize, JournalError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM journal", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, JournalError> {
        Ok(self.len()? == 0)
    }

    pub fn unsent_count(&self) -> Result<usize, JournalError> {
        let conn = self.conn.lock();
        let n: i64 =
            conn.query_row("SELECT COUNT(*) FROM journal WHERE sent = 0", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
