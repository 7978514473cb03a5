//! # SQLite Record Store
//!
//! [`SqliteRecordStore`] implements [`RecordStore`] on the `topics` and
//! `records` tables (see [`crate::schema`]).
//!
//! Appends run in a single transaction that bumps the topic head and inserts
//! the record, so a crash can never leave an assigned offset without its
//! record. Reads are range scans over the `(topic, pos)` primary key.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::schema::Database;
use crate::storage::RecordStore;
use crate::types::{now_ms, Offset, Record, Topic};

/// Record store backed by one SQLite connection.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self {
            conn: Mutex::new(db.into_connection()),
        }
    }

    /// Store over a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Task("record store connection poisoned".to_string()))
    }
}

impl RecordStore for SqliteRecordStore {
    fn append(&self, topic: &Topic, body: &[u8]) -> Result<Offset> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO topics (topic, last_offset) VALUES (?1, 1)
             ON CONFLICT(topic) DO UPDATE SET last_offset = last_offset + 1",
            params![topic.as_str()],
        )?;
        let offset: i64 = tx.query_row(
            "SELECT last_offset FROM topics WHERE topic = ?1",
            params![topic.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO records (topic, pos, created_ms, body) VALUES (?1, ?2, ?3, ?4)",
            params![topic.as_str(), offset, now_ms() as i64, body],
        )?;

        tx.commit()?;
        Offset::from_stored(offset)
    }

    fn read_range(
        &self,
        topic: &Topic,
        from: Offset,
        to: Offset,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT pos, created_ms, body FROM records
             WHERE topic = ?1 AND pos >= ?2 AND pos <= ?3
             ORDER BY pos
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![topic.as_str(), from.as_sql(), to.as_sql(), limit as i64],
            |row| {
                let pos: i64 = row.get(0)?;
                let created_ms: i64 = row.get(1)?;
                let body: Vec<u8> = row.get(2)?;
                Ok((pos, created_ms, body))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (pos, created_ms, body) = row?;
            records.push(Record {
                offset: Offset::from_stored(pos)?,
                timestamp_ms: created_ms.max(0) as u64,
                body,
            });
        }
        Ok(records)
    }

    fn last_offset(&self, topic: &Topic) -> Result<Option<Offset>> {
        let conn = self.conn()?;
        match conn.query_row(
            "SELECT last_offset FROM topics WHERE topic = ?1",
            params![topic.as_str()],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(v) => Ok(Some(Offset::from_stored(v)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn topics(&self) -> Result<Vec<Topic>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT topic FROM topics ORDER BY topic")?;
        let topics = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|name| name.map(Topic::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(topics)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_dense_offsets_per_topic() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let orders = Topic::new("orders");
        let audit = Topic::new("audit");

        assert_eq!(store.append(&orders, b"a").unwrap().as_raw(), 1);
        assert_eq!(store.append(&orders, b"b").unwrap().as_raw(), 2);
        assert_eq!(store.append(&audit, b"x").unwrap().as_raw(), 1);
        assert_eq!(store.append(&orders, b"c").unwrap().as_raw(), 3);

        assert_eq!(store.last_offset(&orders).unwrap(), Some(Offset::from_raw(3)));
        assert_eq!(store.last_offset(&audit).unwrap(), Some(Offset::FIRST));
        assert_eq!(store.last_offset(&Topic::new("none")).unwrap(), None);
    }

    #[test]
    fn test_read_range_bounds_and_limit() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let topic = Topic::new("orders");
        for i in 0..10 {
            store.append(&topic, format!("msg-{i}").as_bytes()).unwrap();
        }

        let records = store
            .read_range(&topic, Offset::from_raw(3), Offset::from_raw(8), 4)
            .unwrap();
        let offsets: Vec<u64> = records.iter().map(|r| r.offset.as_raw()).collect();
        assert_eq!(offsets, vec![3, 4, 5, 6]);
        assert_eq!(records[0].body, b"msg-2");

        let tail = store
            .read_range(&topic, Offset::from_raw(9), Offset::from_raw(100), 100)
            .unwrap();
        assert_eq!(tail.len(), 2);

        let other = store
            .read_range(&Topic::new("other"), Offset::FIRST, Offset::from_raw(100), 100)
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_topics_listed_in_order() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.append(&Topic::new("zeta"), b"1").unwrap();
        store.append(&Topic::new("alpha"), b"1").unwrap();
        store.append(&Topic::new("zeta"), b"2").unwrap();

        assert_eq!(
            store.topics().unwrap(),
            vec![Topic::new("alpha"), Topic::new("zeta")]
        );
    }

    #[test]
    fn test_offsets_survive_reopen() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("records.db");
        let topic = Topic::new("orders");

        {
            let store = SqliteRecordStore::new(Database::open(&path).unwrap());
            store.append(&topic, b"a").unwrap();
            store.append(&topic, b"b").unwrap();
        }

        let store = SqliteRecordStore::new(Database::open(&path).unwrap());
        assert_eq!(store.append(&topic, b"c").unwrap().as_raw(), 3);
        let all = store
            .read_range(&topic, Offset::FIRST, Offset::from_raw(3), 10)
            .unwrap();
        let bodies: Vec<&[u8]> = all.iter().map(|r| r.body.as_slice()).collect();
        assert_eq!(bodies, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }
}
