//! # Broker
//!
//! [`Broker`] wires the stores, the gate registry and the publisher together
//! and is the main entry point of the crate.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Broker                             │
//! │                                                              │
//! │   publish ──► Publisher ──► RecordStore (SQLite, records)    │
//! │                   │                                          │
//! │                   ▼                                          │
//! │              GateRegistry ──► live channel per group         │
//! │                                     │                        │
//! │   subscriber ──► Subscriber ◄───────┘                        │
//! │                      │                                       │
//! │                      └──► OffsetStore (SQLite, offsets)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both stores live in the same database file but hold separate connections,
//! so a publisher appending and a subscriber committing never wait on one
//! connection lock. WAL mode lets them run side by side.
//!
//! ## Thread Safety
//!
//! `Broker` is `Clone`, `Send` and `Sync`. All clones share the same stores
//! and gates, so a broker can be handed to any number of tasks.

use std::sync::Arc;

use tracing::info;

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::gate::GateRegistry;
use crate::offset_store::SqliteOffsetStore;
use crate::publisher::Publisher;
use crate::record_store::SqliteRecordStore;
use crate::schema::Database;
use crate::storage::{run_blocking, OffsetStore, RecordStore};
use crate::subscriber::Subscriber;
use crate::types::{GroupName, Offset, SubscriberGroup, Topic};

/// Handle to a running broker.
#[derive(Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    records: Arc<dyn RecordStore>,
    offsets: Arc<dyn OffsetStore>,
    gates: Arc<GateRegistry>,
    publisher: Arc<Publisher>,
}

impl Broker {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Opens (or creates) the database under `config.data_dir`.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the configuration is invalid
    /// - `Error::Io` if the data directory can't be created
    /// - SQLite or schema errors from opening the database
    pub fn open(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        config.ensure_data_dir()?;

        let path = config.database_path();
        let records = SqliteRecordStore::new(Database::open(&path)?);
        let offsets = SqliteOffsetStore::new(Database::open(&path)?);

        info!(path = %path.display(), gate_capacity = config.gate_capacity, "broker opened");
        Ok(Self::with_stores(config, Arc::new(records), Arc::new(offsets)))
    }

    /// Broker over in-memory stores. Nothing survives a drop.
    ///
    /// `config.data_dir` is ignored.
    pub fn open_in_memory(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        let records = SqliteRecordStore::open_in_memory()?;
        let offsets = SqliteOffsetStore::open_in_memory()?;
        Ok(Self::with_stores(config, Arc::new(records), Arc::new(offsets)))
    }

    /// Broker over caller-supplied stores.
    pub fn with_stores(
        config: BrokerConfig,
        records: Arc<dyn RecordStore>,
        offsets: Arc<dyn OffsetStore>,
    ) -> Self {
        let gates = Arc::new(GateRegistry::new(config.gate_capacity));
        let publisher = Arc::new(Publisher::new(Arc::clone(&records), Arc::clone(&gates)));
        Self {
            config: Arc::new(config),
            records,
            offsets,
            gates,
            publisher,
        }
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Stores `body` on `topic` and delivers it to every open group.
    ///
    /// See [`Publisher::publish`].
    pub async fn publish(&self, topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Result<Offset> {
        self.publisher.publish(topic, body).await
    }

    /// Creates a subscriber session for `(topic, group)`.
    ///
    /// See [`Subscriber::new`].
    pub async fn subscriber(&self, topic: impl Into<String>, group: impl Into<String>) -> Result<Subscriber> {
        let sub = Subscriber::new(
            topic,
            group,
            Arc::clone(&self.records),
            Arc::clone(&self.offsets),
            Arc::clone(&self.gates),
        )
        .await?;
        Ok(sub.with_catchup_batch_size(self.config.catchup_batch_size))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Last offset committed by `group` on `topic`, if any.
    pub async fn committed_offset(
        &self,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Result<Option<Offset>> {
        let id = SubscriberGroup::new(topic, group)?;
        let offsets = Arc::clone(&self.offsets);
        run_blocking(move || offsets.get(&id)).await
    }

    /// Offset of the newest record on `topic`, if any.
    pub async fn last_offset(&self, topic: impl Into<String>) -> Result<Option<Offset>> {
        let topic = Topic::parse(topic)?;
        let records = Arc::clone(&self.records);
        run_blocking(move || records.last_offset(&topic)).await
    }

    /// Every topic with at least one record.
    pub async fn topics(&self) -> Result<Vec<Topic>> {
        let records = Arc::clone(&self.records);
        run_blocking(move || records.topics()).await
    }

    /// Every group ever registered on `topic`.
    pub async fn groups(&self, topic: impl Into<String>) -> Result<Vec<GroupName>> {
        let topic = Topic::parse(topic)?;
        let offsets = Arc::clone(&self.offsets);
        run_blocking(move || offsets.groups(&topic)).await
    }

    pub fn gates(&self) -> &Arc<GateRegistry> {
        &self.gates
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

// =============================================================================
// Tests
// =============================================================================
