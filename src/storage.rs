//! # Storage Contracts
//!
//! The subscriber engine and the publisher never talk to SQLite directly. They
//! go through two traits:
//!
//! - [`RecordStore`]: the append-only log of each topic
//! - [`OffsetStore`]: the committed checkpoint of each `(topic, group)`
//!
//! The SQLite implementations live in [`crate::record_store`] and
//! [`crate::offset_store`]; tests swap in fakes to inject failures.
//!
//! ## Blocking Calls
//!
//! Both traits are synchronous, matching rusqlite. Async callers reach them
//! through [`run_blocking`], which moves the call onto tokio's blocking pool so
//! a slow disk never stalls the async workers.
//!
//! ## Lazy Catch-Up Reads
//!
//! [`read_from`] turns ranged reads into a `Stream` of records. The upper
//! bound is the topic's last offset at the time of the call, so the stream is
//! always finite even while publishers keep appending; anything appended
//! later reaches a subscriber through its live gate channel instead.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{Error, Result};
use crate::types::{GroupName, Offset, Record, SubscriberGroup, Topic};

// =============================================================================
// Contracts
// =============================================================================

/// Durable, append-only storage of records per topic.
pub trait RecordStore: Send + Sync {
    /// Durably stores `body` at the end of `topic` and returns its offset.
    ///
    /// Offsets start at [`Offset::FIRST`], are dense, and are never reused.
    fn append(&self, topic: &Topic, body: &[u8]) -> Result<Offset>;

    /// Returns up to `limit` records with `from <= offset <= to`, ascending.
    fn read_range(&self, topic: &Topic, from: Offset, to: Offset, limit: usize)
        -> Result<Vec<Record>>;

    /// Offset of the newest record of `topic`, `None` if it has none.
    fn last_offset(&self, topic: &Topic) -> Result<Option<Offset>>;

    /// Every topic that has at least one record.
    fn topics(&self) -> Result<Vec<Topic>>;
}

/// Durable committed positions per subscriber group.
pub trait OffsetStore: Send + Sync {
    /// Records that `group` exists. Idempotent.
    fn register(&self, group: &SubscriberGroup) -> Result<()>;

    /// Last committed offset, `None` if the group never committed.
    fn get(&self, group: &SubscriberGroup) -> Result<Option<Offset>>;

    /// Sets the committed offset of `group`.
    fn update(&self, group: &SubscriberGroup, offset: Offset) -> Result<()>;

    /// Groups registered under `topic`.
    fn groups(&self, topic: &Topic) -> Result<Vec<GroupName>>;
}

// =============================================================================
// Blocking Bridge
// =============================================================================

/// Runs a synchronous storage call on tokio's blocking thread pool.
///
/// # Errors
///
/// Whatever `f` returns, or `Error::Task` if the blocking task panicked.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

// =============================================================================
// Catch-Up Cursor
// =============================================================================

/// A lazy, ordered, finite sequence of records.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Opens a lazy read of every record of `topic` from `from` (inclusive) up to
/// the topic's current last offset.
///
/// Records are fetched `batch_size` at a time. The stream ends after the
/// bound is reached or after yielding the first error.
///
/// # Errors
///
/// Returns an error right away if the current last offset can't be read.
pub async fn read_from(
    store: Arc<dyn RecordStore>,
    topic: Topic,
    from: Offset,
    batch_size: usize,
) -> Result<RecordStream> {
    let end = {
        let store = Arc::clone(&store);
        let topic = topic.clone();
        run_blocking(move || store.last_offset(&topic)).await?
    };

    let end = match end {
        Some(end) if end >= from => end,
        _ => return Ok(stream::empty().boxed()),
    };

    let cursor = Cursor {
        store,
        topic,
        next: from,
        end,
        batch_size: batch_size.max(1),
        buffer: VecDeque::new(),
        finished: false,
    };

    Ok(stream::unfold(cursor, |mut cursor| async move {
        let item = cursor.advance().await?;
        Some((item, cursor))
    })
    .boxed())
}

struct Cursor {
    store: Arc<dyn RecordStore>,
    topic: Topic,
    /// Offset the next yielded record must carry.
    next: Offset,
    /// Inclusive upper bound captured when the cursor was opened.
    end: Offset,
    batch_size: usize,
    buffer: VecDeque<Record>,
    finished: bool,
}

impl Cursor {
    async fn advance(&mut self) -> Option<Result<Record>> {
        if self.finished {
            return None;
        }

        if self.buffer.is_empty() {
            if self.next > self.end {
                return None;
            }
            match self.fetch().await {
                Ok(batch) if batch.is_empty() => {
                    // rows below the bound captured at open must exist
                    self.finished = true;
                    return Some(Err(Error::Schema(format!(
                        "gap in topic '{}': expected offset {}, found nothing up to {}",
                        self.topic, self.next, self.end
                    ))));
                }
                Ok(batch) => self.buffer.extend(batch),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        let record = self.buffer.pop_front()?;
        if record.offset != self.next {
            self.finished = true;
            return Some(Err(Error::Schema(format!(
                "gap in topic '{}': expected offset {}, found {}",
                self.topic, self.next, record.offset
            ))));
        }
        self.next = record.offset.next();
        Some(Ok(record))
    }

    async fn fetch(&self) -> Result<Vec<Record>> {
        let store = Arc::clone(&self.store);
        let topic = self.topic.clone();
        let (from, to, limit) = (self.next, self.end, self.batch_size);
        run_blocking(move || store.read_range(&topic, from, to, limit)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
