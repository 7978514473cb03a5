//! # SQLite Schema for lightmq
//!
//! One database file holds the durable state of the broker:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  topics              records                 subscriber_groups          │
//! │  ┌──────────────┐    ┌──────────────────┐    ┌──────────────────┐       │
//! │  │ topic (PK)   │◄───│ topic      ┐ PK  │    │ topic      ┐ PK  │       │
//! │  │ last_offset  │    │ pos        ┘     │    │ group_name ┘     │       │
//! │  └──────────────┘    │ created_ms       │    │ created_ms       │       │
//! │                      │ body BLOB        │    └──────────────────┘       │
//! │                      └──────────────────┘                               │
//! │                                                                         │
//! │  offsets                                                                │
//! │  ┌──────────────────┐                                                   │
//! │  │ topic      ┐ PK  │                                                   │
//! │  │ group_name ┘     │                                                   │
//! │  │ committed        │                                                   │
//! │  │ updated_ms       │                                                   │
//! │  └──────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `records` is a `WITHOUT ROWID` table clustered on `(topic, pos)`, so the
//! primary key B-tree doubles as the position index: "all records of topic T
//! from offset P" is a single range scan.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Opening a database with another version fails.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// Head of each topic's log.
///
/// `last_offset` is bumped in the same transaction that inserts the record,
/// which makes offset assignment dense and monotonic without scanning
/// `records`.
const CREATE_TOPICS: &str = r#"
CREATE TABLE IF NOT EXISTS topics (
    topic       TEXT PRIMARY KEY,
    last_offset INTEGER NOT NULL
)
"#;

/// The append-only log of every topic.
const CREATE_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    topic      TEXT NOT NULL,
    pos        INTEGER NOT NULL,
    created_ms INTEGER NOT NULL,
    body       BLOB NOT NULL,
    PRIMARY KEY (topic, pos)
) WITHOUT ROWID
"#;

/// Groups that have ever subscribed to a topic.
const CREATE_SUBSCRIBER_GROUPS: &str = r#"
CREATE TABLE IF NOT EXISTS subscriber_groups (
    topic      TEXT NOT NULL,
    group_name TEXT NOT NULL,
    created_ms INTEGER NOT NULL,
    PRIMARY KEY (topic, group_name)
)
"#;

/// Committed checkpoint per `(topic, group)`.
///
/// `committed` is the offset of the last record the group handled
/// successfully. A missing row means nothing was committed yet.
const CREATE_OFFSETS: &str = r#"
CREATE TABLE IF NOT EXISTS offsets (
    topic      TEXT NOT NULL,
    group_name TEXT NOT NULL,
    committed  INTEGER NOT NULL,
    updated_ms INTEGER NOT NULL,
    PRIMARY KEY (topic, group_name)
)
"#;

/// Key-value metadata, currently only the schema version.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS lightmq_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the lightmq schema applied.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database. Contents vanish with the connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&mut self) -> Result<()> {
        // Two connections share the file; wait for the lock instead of failing.
        self.conn.busy_timeout(std::time::Duration::from_secs(5))?;

        // WAL lets the record store's reads proceed while another connection
        // appends or commits offsets.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_TOPICS)?;
        self.conn.execute_batch(CREATE_RECORDS)?;
        self.conn.execute_batch(CREATE_SUBSCRIBER_GROUPS)?;
        self.conn.execute_batch(CREATE_OFFSETS)?;

        self.verify_or_set_version()
    }

    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = match self.conn.query_row(
            "SELECT value FROM lightmq_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            None => {
                self.conn.execute(
                    "INSERT OR IGNORE INTO lightmq_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this lightmq version requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Consumes the wrapper, handing the connection to a store.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
