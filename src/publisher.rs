//! # Publisher
//!
//! Durably appends a message, then makes it visible to live subscribers.
//!
//! ## Ordering
//!
//! Subscribers drop live messages whose offset is not above the last one they
//! handled. That filter is only lossless if every group channel receives a
//! topic's messages in offset order, so append and broadcast for a topic run
//! under one async lock per topic. Publishers to different topics never wait
//! on each other.
//!
//! ## Cancellation
//!
//! Dropping a `publish` future after the append but before the broadcast
//! completes leaves the record stored but not delivered live. Subscribers
//! pick it up on their next session through catch-up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::error::Result;
use crate::gate::GateRegistry;
use crate::storage::{run_blocking, RecordStore};
use crate::types::{Message, Offset, Topic};

/// Appends to the record store and fans out through the gate registry.
pub struct Publisher {
    records: Arc<dyn RecordStore>,
    gates: Arc<GateRegistry>,
    topic_locks: Mutex<HashMap<Topic, Arc<tokio::sync::Mutex<()>>>>,
}

impl Publisher {
    pub fn new(records: Arc<dyn RecordStore>, gates: Arc<GateRegistry>) -> Self {
        Self {
            records,
            gates,
            topic_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes `body` to `topic` and returns the offset it was stored at.
    ///
    /// Waits while any open group channel of the topic is full.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if `topic` is empty
    /// - storage errors from the append; nothing is broadcast in that case
    pub async fn publish(&self, topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Result<Offset> {
        let topic = Topic::parse(topic)?;
        let body = body.into();

        let lock = self.topic_lock(&topic);
        let _ordered = lock.lock().await;

        let (offset, body) = {
            let records = Arc::clone(&self.records);
            let topic = topic.clone();
            run_blocking(move || {
                let offset = records.append(&topic, &body)?;
                Ok((offset, body))
            })
            .await?
        };

        let delivered = self.gates.send(&topic, Message::new(offset, body)).await;
        trace!(%topic, %offset, delivered, "published");
        Ok(offset)
    }

    fn topic_lock(&self, topic: &Topic) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .topic_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(topic.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
