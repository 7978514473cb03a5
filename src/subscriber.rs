//! # Subscriber Engine
//!
//! A [`Subscriber`] is a session bound to one `(topic, group)`. It delivers
//! every record of the topic to a handler, resuming after the group's last
//! committed offset.
//!
//! ## Replay, Then Tail
//!
//! ```text
//!   committed = 100            head at subscribe time = 500
//!        │                              │
//!        ▼                              ▼
//!   ┌──────────────────────────────────┐┌─────────────────────────────────┐
//!   │  Replay: records 101..=500 read  ││  Tail: gate channel, 501+       │
//!   │  from the record store           ││  (buffered since the gate       │
//!   │                                  ││   opened, before replay began)  │
//!   └──────────────────────────────────┘└─────────────────────────────────┘
//! ```
//!
//! The gate opens *before* replay starts. Anything published from that
//! instant on is buffered in the live channel even though nobody reads it
//! yet, so nothing published during replay is lost. Such messages may also
//! be picked up by replay itself; the tail phase drops every live message
//! whose offset is not above the last one handled. Offsets are strictly
//! ordered and replay always covers a contiguous prefix, so this lower-bound
//! filter is exact.
//!
//! ## Commit Protocol
//!
//! For each record: call the handler; on success commit the record's offset.
//! A failed commit is logged and delivery continues, so the durable
//! checkpoint may lag and a restart may redeliver (at-least-once). A failed
//! handler leaves the record uncommitted and delivery moves on to the next
//! record; retrying is up to the handler.
//!
//! ## Cancellation
//!
//! Checked only while waiting in the tail phase. Replay and handler calls
//! run to completion. Cancelling returns `Ok(())` and leaves the gate open;
//! releasing it is [`Subscriber::close`]'s job, which also runs on drop. A
//! session only ever releases the gate entry it opened itself, so an orphaned
//! session going away never tears down its replacement's channel.
//!
//! ## Handlers
//!
//! Handlers are plain synchronous closures. On the multi-threaded runtime
//! each call runs inside `block_in_place`, so a handler that blocks (waits
//! on a downstream system, retries with sleeps) hands the worker's other
//! tasks to another thread instead of stalling them. On the current-thread
//! runtime the call runs inline and a blocking handler stalls the runtime.

use std::sync::Arc;

use futures::StreamExt;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::DEFAULT_CATCHUP_BATCH_SIZE;
use crate::error::Result;
use crate::gate::{GateId, GateReceiver, GateRegistry};
use crate::storage::{read_from, run_blocking, OffsetStore, RecordStore};
use crate::types::{Offset, SubscriberGroup};

/// A subscriber session for one `(topic, group)`.
pub struct Subscriber {
    id: SubscriberGroup,
    records: Arc<dyn RecordStore>,
    offsets: Arc<dyn OffsetStore>,
    gates: Arc<GateRegistry>,
    catchup_batch_size: usize,
    /// Gate entry opened by this session, present between `subscribe` and
    /// `close`.
    gate: Option<GateId>,
    receiver: Option<GateReceiver>,
}

impl Subscriber {
    /// Creates a session and registers its group with the offset store.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if `topic` or `group` is empty
    /// - storage errors from registering the group
    pub async fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        records: Arc<dyn RecordStore>,
        offsets: Arc<dyn OffsetStore>,
        gates: Arc<GateRegistry>,
    ) -> Result<Self> {
        let id = SubscriberGroup::new(topic, group)?;

        {
            let offsets = Arc::clone(&offsets);
            let id = id.clone();
            run_blocking(move || offsets.register(&id)).await?;
        }

        debug!(topic = %id.topic, group = %id.group, "new subscriber");

        Ok(Self {
            id,
            records,
            offsets,
            gates,
            catchup_batch_size: DEFAULT_CATCHUP_BATCH_SIZE,
            gate: None,
            receiver: None,
        })
    }

    /// Sets how many records each catch-up read fetches.
    pub fn with_catchup_batch_size(mut self, size: usize) -> Self {
        self.catchup_batch_size = size.max(1);
        self
    }

    pub fn id(&self) -> &SubscriberGroup {
        &self.id
    }

    /// Invokes `handler` on every message of the topic after the group's
    /// committed offset, then on every newly published one, until `cancel`
    /// fires.
    ///
    /// Returns `Ok(())` on cancellation, or when the session's gate was closed
    /// or taken over by another session of the same group.
    ///
    /// # Errors
    ///
    /// Storage errors from reading the committed offset or the records.
    /// Handler errors never end the session.
    pub async fn subscribe<H, E>(&mut self, cancel: CancellationToken, mut handler: H) -> Result<()>
    where
        H: FnMut(&[u8]) -> std::result::Result<(), E> + Send,
        E: std::fmt::Display,
    {
        // Two sessions of one group both start from the same committed
        // offset here; see the gate module's hazards.
        let committed = {
            let offsets = Arc::clone(&self.offsets);
            let id = self.id.clone();
            run_blocking(move || offsets.get(&id)).await?
        };

        self.gate = Some(self.gates.open(&self.id.topic, &self.id.group));
        self.receiver = Some(self.gates.channel(&self.id.topic, &self.id.group));

        // ---------------------------------------------------------------------
        // Replay
        // ---------------------------------------------------------------------

        let from = Offset::resume_from(committed);
        let mut records = read_from(
            Arc::clone(&self.records),
            self.id.topic.clone(),
            from,
            self.catchup_batch_size,
        )
        .await?;

        let mut last_offset: Option<Offset> = None;
        let mut replayed = 0usize;
        while let Some(record) = records.next().await {
            let record = record?;
            handle_message(&self.id, &self.offsets, record.offset, &record.body, &mut handler).await;
            last_offset = Some(record.offset);
            replayed += 1;
        }
        drop(records);

        debug!(sub = %self.id, replayed, from = %from, "replayed records from storage");
        match last_offset {
            Some(offset) => debug!(sub = %self.id, last_offset = %offset, "last message offset from storage"),
            None => debug!(sub = %self.id, "no stored records to replay"),
        }

        // ---------------------------------------------------------------------
        // Tail
        // ---------------------------------------------------------------------

        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(());
        };

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(sub = %self.id, "subscription cancelled");
                    return Ok(());
                }

                message = receiver.recv() => {
                    let Some(message) = message else {
                        debug!(sub = %self.id, "gate closed, ending subscription");
                        return Ok(());
                    };

                    trace!(sub = %self.id, %message, "received live message");
                    if last_offset.map_or(true, |last| message.offset > last) {
                        handle_message(&self.id, &self.offsets, message.offset, &message.body, &mut handler).await;
                        last_offset = Some(message.offset);
                    } else {
                        debug!(sub = %self.id, offset = %message.offset, "skipping message already replayed");
                    }
                }
            }
        }
    }

    /// Releases the session's gate entry and live channel.
    ///
    /// Idempotent. Publishers blocked on this group's full channel are
    /// released. An entry that a newer session of the same group opened is
    /// left in place.
    pub fn close(&mut self) {
        self.receiver = None;
        let Some(gate) = self.gate.take() else {
            return;
        };
        debug!(sub = %self.id, %gate, "closing subscriber");
        self.gates.close_gate(&self.id.topic, &self.id.group, gate);
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}

/// Calls the handler, off the async worker when the runtime allows it.
fn call_handler<H, E>(handler: &mut H, body: &[u8]) -> std::result::Result<(), String>
where
    H: FnMut(&[u8]) -> std::result::Result<(), E>,
    E: std::fmt::Display,
{
    let mut call = || handler(body).map_err(|e| e.to_string());
    match Handle::try_current() {
        // block_in_place panics on the current-thread scheduler
        Ok(runtime) if matches!(runtime.runtime_flavor(), RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(call)
        }
        _ => call(),
    }
}

/// Runs the handler on one message and commits its offset on success.
async fn handle_message<H, E>(
    id: &SubscriberGroup,
    offsets: &Arc<dyn OffsetStore>,
    offset: Offset,
    body: &[u8],
    handler: &mut H,
) where
    H: FnMut(&[u8]) -> std::result::Result<(), E>,
    E: std::fmt::Display,
{
    if let Err(reason) = call_handler(handler, body) {
        warn!(sub = %id, %offset, error = %reason, "handler failed, offset not committed");
        return;
    }

    let commit = {
        let offsets = Arc::clone(offsets);
        let id = id.clone();
        run_blocking(move || offsets.update(&id, offset)).await
    };
    if let Err(e) = commit {
        error!(sub = %id, %offset, error = %e, "couldn't commit offset");
    }
}

// =============================================================================
// Tests
// =============================================================================
