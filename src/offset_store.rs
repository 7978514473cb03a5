//! # SQLite Offset Store
//!
//! [`SqliteOffsetStore`] implements [`OffsetStore`] on the `offsets` and
//! `subscriber_groups` tables.
//!
//! A committed offset never moves backwards: the upsert only applies when the
//! new value is greater than the stored one, so a stale writer (for example a
//! second session of the same group that started from an older position)
//! cannot rewind the checkpoint.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::schema::Database;
use crate::storage::OffsetStore;
use crate::types::{now_ms, GroupName, Offset, SubscriberGroup, Topic};

/// Offset store backed by one SQLite connection.
pub struct SqliteOffsetStore {
    conn: Mutex<Connection>,
}

impl SqliteOffsetStore {
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
            .map_err(|_| Error::Task("offset store connection poisoned".to_string()))
    }
}

impl OffsetStore for SqliteOffsetStore {
    fn register(&self, group: &SubscriberGroup) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO subscriber_groups (topic, group_name, created_ms)
             VALUES (?1, ?2, ?3)",
            params![group.topic.as_str(), group.group.as_str(), now_ms() as i64],
        )?;
        Ok(())
    }

    fn get(&self, group: &SubscriberGroup) -> Result<Option<Offset>> {
        let conn = self.conn()?;
        match conn.query_row(
            "SELECT committed FROM offsets WHERE topic = ?1 AND group_name = ?2",
            params![group.topic.as_str(), group.group.as_str()],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(v) => Ok(Some(Offset::from_stored(v)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, group: &SubscriberGroup, offset: Offset) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO offsets (topic, group_name, committed, updated_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(topic, group_name) DO UPDATE
                SET committed = excluded.committed, updated_ms = excluded.updated_ms
                WHERE excluded.committed > offsets.committed",
            params![
                group.topic.as_str(),
                group.group.as_str(),
                offset.as_sql(),
                now_ms() as i64
            ],
        )?;
        Ok(())
    }

    fn groups(&self, topic: &Topic) -> Result<Vec<GroupName>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT group_name FROM subscriber_groups WHERE topic = ?1 ORDER BY group_name",
        )?;
        let groups = stmt
            .query_map(params![topic.as_str()], |row| row.get::<_, String>(0))?
            .map(|name| name.map(GroupName::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(groups)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn group(topic: &str, group: &str) -> SubscriberGroup {
        SubscriberGroup::new(topic, group).unwrap()
    }

    #[test]
    fn test_get_absent_is_none() {
        let store = SqliteOffsetStore::open_in_memory().unwrap();
        assert_eq!(store.get(&group("orders", "g1")).unwrap(), None);
    }

    #[test]
    fn test_update_then_get() {
        let store = SqliteOffsetStore::open_in_memory().unwrap();
        let g1 = group("orders", "g1");
        let g2 = group("orders", "g2");

        store.update(&g1, Offset::from_raw(5)).unwrap();
        assert_eq!(store.get(&g1).unwrap(), Some(Offset::from_raw(5)));
        // groups are independent
        assert_eq!(store.get(&g2).unwrap(), None);

        store.update(&g1, Offset::from_raw(6)).unwrap();
        assert_eq!(store.get(&g1).unwrap(), Some(Offset::from_raw(6)));
    }

    #[test]
    fn test_update_never_decrements() {
        let store = SqliteOffsetStore::open_in_memory().unwrap();
        let g1 = group("orders", "g1");

        store.update(&g1, Offset::from_raw(10)).unwrap();
        store.update(&g1, Offset::from_raw(4)).unwrap();
        assert_eq!(store.get(&g1).unwrap(), Some(Offset::from_raw(10)));
    }

    #[test]
    fn test_register_is_idempotent_and_listed() {
        let store = SqliteOffsetStore::open_in_memory().unwrap();
        store.register(&group("orders", "shipping")).unwrap();
        store.register(&group("orders", "billing")).unwrap();
        store.register(&group("orders", "billing")).unwrap();
        store.register(&group("audit", "archiver")).unwrap();

        assert_eq!(
            store.groups(&Topic::new("orders")).unwrap(),
            vec![GroupName::new("billing"), GroupName::new("shipping")]
        );
        assert!(store.groups(&Topic::new("none")).unwrap().is_empty());
    }
}
