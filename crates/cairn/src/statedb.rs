//! Anchor state DB.
//!
//! A small ordered key/value store tracking the anchoring pipeline:
//! - `unconfirmed` - merkle roots submitted but not yet confirmed on chain
//! - `last` - the most recently dropped anchor; the next delta range starts
//!   after the commit digest it names
//! - `anchor/<hex merkle>` - one record per dropped anchor
//!
//! Writes happen only while the store-wide filesystem lock is held; the
//! connection mutex below guards process-internal sharing, not cross-process
//! access.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use cairn_core::error::{CairnError, Result};
use cairn_core::types::{AnchorRecord, LastAnchor, UnconfirmedAnchors};

const KEY_UNCONFIRMED: &str = "unconfirmed";
const KEY_LAST: &str = "last";

fn anchor_key(merkle: &[u8; 32]) -> String {
    format!("anchor/{}", hex::encode(merkle))
}

fn db_err(e: rusqlite::Error) -> CairnError {
    CairnError::Database(e.to_string())
}

/// SQLite-backed key/value store for anchor state.
pub struct AnchorStateDb {
    conn: Mutex<Connection>,
}

impl AnchorStateDb {
    /// Open (or create) the state DB at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(db_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        match value {
            None => Ok(None),
            Some(v) => serde_json::from_str(&v)
                .map(Some)
                .map_err(|e| CairnError::Serialization(e.to_string())),
        }
    }

    fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json =
            serde_json::to_string(value).map_err(|e| CairnError::Serialization(e.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, json.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// The set of merkle roots awaiting chain confirmation.
    pub fn unconfirmed(&self) -> Result<UnconfirmedAnchors> {
        Ok(self.get_json(KEY_UNCONFIRMED)?.unwrap_or_default())
    }

    pub fn put_unconfirmed(&self, ua: &UnconfirmedAnchors) -> Result<()> {
        self.put_json(KEY_UNCONFIRMED, ua)
    }

    /// The most recently dropped anchor, if any.
    pub fn last_anchor(&self) -> Result<Option<LastAnchor>> {
        self.get_json(KEY_LAST)
    }

    pub fn put_last(&self, last: &LastAnchor) -> Result<()> {
        self.put_json(KEY_LAST, last)
    }

    /// Look up an anchor record by its merkle root.
    pub fn anchor(&self, merkle: &[u8; 32]) -> Result<Option<AnchorRecord>> {
        self.get_json(&anchor_key(merkle))
    }

    pub fn put_anchor(&self, record: &AnchorRecord) -> Result<()> {
        self.put_json(&anchor_key(&record.merkle), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::types::AnchorState;

    fn open_db() -> (AnchorStateDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AnchorStateDb::open(dir.path().join("state.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_unconfirmed_defaults_empty() {
        let (db, _dir) = open_db();
        assert!(db.unconfirmed().unwrap().merkles.is_empty());
    }

    #[test]
    fn test_unconfirmed_roundtrip() {
        let (db, _dir) = open_db();
        let ua = UnconfirmedAnchors {
            merkles: vec![[0x01; 32], [0x02; 32]],
        };
        db.put_unconfirmed(&ua).unwrap();
        assert_eq!(db.unconfirmed().unwrap(), ua);
    }

    #[test]
    fn test_last_anchor_roundtrip() {
        let (db, _dir) = open_db();
        assert!(db.last_anchor().unwrap().is_none());

        let last = LastAnchor {
            last: [0x03; 32],
            merkle: [0x04; 32],
            time: 1700000000,
        };
        db.put_last(&last).unwrap();
        assert_eq!(db.last_anchor().unwrap(), Some(last));
    }

    #[test]
    fn test_anchor_record_update_in_place() {
        let (db, _dir) = open_db();
        let mut record = AnchorRecord {
            time: 1700000000,
            digests: vec![[0x05; 32]],
            messages: vec!["Add record ff".into()],
            merkle: [0x06; 32],
            state: AnchorState::Unverified,
        };
        db.put_anchor(&record).unwrap();

        record.state = AnchorState::Verified;
        db.put_anchor(&record).unwrap();

        let loaded = db.anchor(&[0x06; 32]).unwrap().unwrap();
        assert_eq!(loaded.state, AnchorState::Verified);
        assert!(db.anchor(&[0x07; 32]).unwrap().is_none());
    }
}
