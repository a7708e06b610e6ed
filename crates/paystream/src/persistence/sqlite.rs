//! SQLite implementation of the submission and cursor stores.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use paystream_client::relay::CursorStore;
use paystream_client::scheduler::SubmissionStore;
use paystream_client::ClientError;
use paystream_types::{RelayCursor, SubmissionRecord, SubmissionStatus};

/// SQLite-backed store for pipeline resume state.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let conn = Connection::open(path).map_err(store_err)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, ClientError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ClientError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS submissions (
                descriptor_hash BLOB PRIMARY KEY,
                tx_hash BLOB NOT NULL,
                voting_round INTEGER,
                status TEXT NOT NULL,
                submitted_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relay_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_block INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ClientError> {
        self.conn.lock().map_err(|e| ClientError::Store(format!("lock poisoned: {e}")))
    }
}

fn store_err(e: rusqlite::Error) -> ClientError {
    ClientError::Store(e.to_string())
}

fn status_str(status: SubmissionStatus) -> &'static str {
    match status {
        SubmissionStatus::Broadcast => "broadcast",
        SubmissionStatus::Confirmed => "confirmed",
        SubmissionStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> SubmissionStatus {
    match s {
        "confirmed" => SubmissionStatus::Confirmed,
        "failed" => SubmissionStatus::Failed,
        _ => SubmissionStatus::Broadcast,
    }
}

impl SubmissionStore for SqliteDb {
    fn record(&self, record: &SubmissionRecord) -> Result<(), ClientError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO submissions
             (descriptor_hash, tx_hash, voting_round, status, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.descriptor_hash.as_slice(),
                record.tx_hash.as_slice(),
                record.voting_round.map(|r| r as i64),
                status_str(record.status),
                record.submitted_at as i64,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn update_status(
        &self,
        descriptor_hash: &[u8; 32],
        status: SubmissionStatus,
        round: Option<u64>,
    ) -> Result<(), ClientError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE submissions SET status = ?2, voting_round = COALESCE(?3, voting_round)
             WHERE descriptor_hash = ?1",
            params![descriptor_hash.as_slice(), status_str(status), round.map(|r| r as i64)],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn load(&self, descriptor_hash: &[u8; 32]) -> Result<Option<SubmissionRecord>, ClientError> {
        let conn = self.lock()?;
        let row: Option<(Vec<u8>, Option<i64>, String, i64)> = conn
            .query_row(
                "SELECT tx_hash, voting_round, status, submitted_at
                 FROM submissions WHERE descriptor_hash = ?1",
                params![descriptor_hash.as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(store_err)?;

        Ok(row.map(|(tx_bytes, round, status, submitted_at)| {
            let mut tx_hash = [0u8; 32];
            if tx_bytes.len() == 32 {
                tx_hash.copy_from_slice(&tx_bytes);
            }
            SubmissionRecord {
                descriptor_hash: *descriptor_hash,
                tx_hash,
                voting_round: round.map(|r| r as u64),
                status: status_from_str(&status),
                submitted_at: submitted_at as u64,
            }
        }))
    }
}

impl CursorStore for SqliteDb {
    fn load_cursor(&self) -> Result<Option<RelayCursor>, ClientError> {
        let conn = self.lock()?;
        let row: Option<(i64, i64)> = conn
            .query_row("SELECT last_block, updated_at FROM relay_cursor WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .map_err(store_err)?;

        Ok(row.map(|(last_block, updated_at)| RelayCursor {
            last_block: last_block as u64,
            updated_at: updated_at as u64,
        }))
    }

    fn save_cursor(&self, cursor: &RelayCursor) -> Result<(), ClientError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO relay_cursor (id, last_block, updated_at) VALUES (1, ?1, ?2)",
            params![cursor.last_block as i64, cursor.updated_at as i64],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_roundtrip() {
        let db = SqliteDb::in_memory().unwrap();
        let hash = [0xaa; 32];

        assert!(db.load(&hash).unwrap().is_none());

        let record = SubmissionRecord::new(hash, [0xbb; 32]);
        db.record(&record).unwrap();

        let loaded = db.load(&hash).unwrap().unwrap();
        assert_eq!(loaded.tx_hash, [0xbb; 32]);
        assert_eq!(loaded.status, SubmissionStatus::Broadcast);
        assert_eq!(loaded.voting_round, None);

        db.update_status(&hash, SubmissionStatus::Confirmed, Some(912_345)).unwrap();
        let loaded = db.load(&hash).unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::Confirmed);
        assert_eq!(loaded.voting_round, Some(912_345));
    }

    #[test]
    fn test_update_keeps_round_when_absent() {
        let db = SqliteDb::in_memory().unwrap();
        let hash = [0x01; 32];
        db.record(&SubmissionRecord::new(hash, [0x02; 32])).unwrap();

        db.update_status(&hash, SubmissionStatus::Confirmed, Some(7)).unwrap();
        db.update_status(&hash, SubmissionStatus::Failed, None).unwrap();

        let loaded = db.load(&hash).unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::Failed);
        assert_eq!(loaded.voting_round, Some(7));
    }

    #[test]
    fn test_cursor_roundtrip() {
        let db = SqliteDb::in_memory().unwrap();
        assert!(db.load_cursor().unwrap().is_none());

        db.save_cursor(&RelayCursor { last_block: 123, updated_at: 456 }).unwrap();
        let cursor = db.load_cursor().unwrap().unwrap();
        assert_eq!(cursor.last_block, 123);
        assert_eq!(cursor.updated_at, 456);

        db.save_cursor(&RelayCursor { last_block: 200, updated_at: 789 }).unwrap();
        assert_eq!(db.load_cursor().unwrap().unwrap().last_block, 200);
    }
}
