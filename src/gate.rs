//! # Gate Registry
//!
//! In-memory fan-out of freshly published messages to every subscriber group
//! of a topic, independent of durable storage.
//!
//! ```text
//!                        GateRegistry
//!              ┌────────────────────────────────┐
//!  publish ──► │ "orders" ─┬─ "billing"  [████░░░░] ──► session A
//!              │           └─ "shipping" [██░░░░░░] ──► session B
//!              │ "audit"  ─── "archiver" [░░░░░░░░] ──► session C
//!              └────────────────────────────────┘
//!                   one bounded mpsc channel per open group
//! ```
//!
//! ## Backpressure
//!
//! Every group channel is bounded (see `BrokerConfig::gate_capacity`).
//! [`GateRegistry::send`] waits for room in each target channel in turn, so
//! a slow subscriber stalls the publisher and, for that publish call, every
//! group after it. Nothing is ever dropped. A session that stops consuming
//! must be closed to release publishers waiting on it.
//!
//! ## Locking
//!
//! The topic → group map sits behind one `std::sync::Mutex`. It is held only
//! to mutate the map or to snapshot the senders of a topic, never across an
//! `.await`; `send` delivers after releasing it.
//!
//! ## Known Hazards
//!
//! - Opening a group that is already open replaces its channel. The previous
//!   receiver sees its channel close, which ends that session's tail phase.
//! - [`GateRegistry::close`] removes whatever entry is registered for
//!   `(topic, group)`, even one a newer session opened. Sessions release
//!   their gate through [`GateRegistry::close_gate`] instead, which only
//!   removes the entry their own `open` created.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::types::{GroupName, Message, Topic};

/// Receive side of a group's live channel.
pub type GateReceiver = mpsc::Receiver<Message>;

/// Identifies one `open` call, so a session can release only its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateId(u64);

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gate#{}", self.0)
    }
}

struct GateEntry {
    id: GateId,
    sender: mpsc::Sender<Message>,
    /// Handed out once by [`GateRegistry::channel`].
    receiver: Option<GateReceiver>,
}

/// Registry of live delivery channels, keyed by topic then group.
pub struct GateRegistry {
    capacity: usize,
    next_id: AtomicU64,
    gates: Mutex<HashMap<Topic, HashMap<GroupName, GateEntry>>>,
}

impl GateRegistry {
    /// Creates an empty registry whose channels hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<Topic, HashMap<GroupName, GateEntry>>> {
        // Critical sections never panic while mutating, so a poisoned map is
        // still consistent.
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Subscriber Side
    // =========================================================================

    /// Registers a fresh channel for `group` under `topic`.
    ///
    /// Overwrites any previous entry for the same group without error.
    /// Returns the id of the new entry for [`close_gate`](Self::close_gate).
    pub fn open(&self, topic: &Topic, group: &GroupName) -> GateId {
        let id = GateId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);
        let previous = self.gates().entry(topic.clone()).or_default().insert(
            group.clone(),
            GateEntry {
                id,
                sender,
                receiver: Some(receiver),
            },
        );

        if previous.is_some() {
            warn!(%topic, %group, %id, "gate was already open, previous channel orphaned");
        } else {
            debug!(%topic, %group, %id, capacity = self.capacity, "gate opened");
        }
        id
    }

    /// Hands out the receive side of `group`'s channel.
    ///
    /// # Panics
    ///
    /// Reading before opening is an ordering bug in the caller, not a runtime
    /// condition, so this panics if the topic was never opened, if the group
    /// has no open gate, or if its receiver was already taken.
    pub fn channel(&self, topic: &Topic, group: &GroupName) -> GateReceiver {
        let taken = {
            let mut gates = self.gates();
            match gates.get_mut(topic) {
                None => Err(format!(
                    "couldn't find topic, open gate before obtaining message channel, topic={topic}"
                )),
                Some(groups) => match groups.get_mut(group) {
                    None => Err(format!(
                        "couldn't find group, open gate before obtaining message channel, topic={topic}, group={group}"
                    )),
                    Some(entry) => entry.receiver.take().ok_or_else(|| {
                        format!("message channel already taken, topic={topic}, group={group}")
                    }),
                },
            }
        };

        match taken {
            Ok(receiver) => receiver,
            Err(msg) => panic!("{msg}"),
        }
    }

    /// Removes `group`'s entry and drops its sender.
    ///
    /// The receiver observes the channel closing once in-flight sends finish.
    /// Returns false (and logs a warning) if no entry existed.
    pub fn close(&self, topic: &Topic, group: &GroupName) -> bool {
        match self.remove_where(topic, group, |_| true) {
            Some(_) => {
                debug!(%topic, %group, "gate closed");
                true
            }
            None => {
                warn!(%topic, %group, "didn't find subscriber group in topic");
                false
            }
        }
    }

    /// Removes `group`'s entry only if it is still the one `open` returned
    /// `id` for. An entry replaced by a later `open` is left alone.
    pub fn close_gate(&self, topic: &Topic, group: &GroupName, id: GateId) -> bool {
        match self.remove_where(topic, group, |entry| entry.id == id) {
            Some(_) => {
                debug!(%topic, %group, %id, "gate closed");
                true
            }
            None => {
                debug!(%topic, %group, %id, "gate already replaced or closed");
                false
            }
        }
    }

    fn remove_where(
        &self,
        topic: &Topic,
        group: &GroupName,
        owned: impl FnOnce(&GateEntry) -> bool,
    ) -> Option<GateEntry> {
        let mut gates = self.gates();
        let groups = gates.get_mut(topic)?;
        if !groups.get(group).is_some_and(owned) {
            return None;
        }
        let removed = groups.remove(group);
        if groups.is_empty() {
            gates.remove(topic);
        }
        removed
    }

    // =========================================================================
    // Publisher Side
    // =========================================================================

    /// Delivers `message` to every group currently open under `topic`.
    ///
    /// Groups are served one at a time in unspecified order, each send waiting
    /// while that group's channel is full. Groups whose receiver is gone are
    /// skipped. Returns the number of groups the message reached.
    pub async fn send(&self, topic: &Topic, message: Message) -> usize {
        let targets: Vec<(GroupName, mpsc::Sender<Message>)> = {
            let gates = self.gates();
            match gates.get(topic) {
                Some(groups) => groups
                    .iter()
                    .map(|(group, entry)| (group.clone(), entry.sender.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for (group, sender) in targets {
            if sender.capacity() == 0 {
                debug!(%topic, %group, offset = %message.offset, "gate full, waiting for subscriber");
            }
            match sender.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    trace!(%topic, %group, offset = %message.offset, "gate receiver dropped, skipping")
                }
            }
        }
        delivered
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Groups with an open gate under `topic`, sorted.
    pub fn groups(&self, topic: &Topic) -> Vec<GroupName> {
        let mut groups: Vec<GroupName> = self
            .gates()
            .get(topic)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    pub fn is_open(&self, topic: &Topic, group: &GroupName) -> bool {
        self.gates()
            .get(topic)
            .is_some_and(|groups| groups.contains_key(group))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::types::Offset;

    fn msg(offset: u64, body: &str) -> Message {
        Message::new(Offset::from_raw(offset), body.as_bytes().to_vec())
    }

    fn names() -> (Topic, GroupName, GroupName) {
        (
            Topic::new("orders"),
            GroupName::new("billing"),
            GroupName::new("shipping"),
        )
    }

    #[tokio::test]
    async fn test_send_reaches_every_open_group() {
        let registry = GateRegistry::new(16);
        let (topic, billing, shipping) = names();

        registry.open(&topic, &billing);
        registry.open(&topic, &shipping);
        let mut rx_billing = registry.channel(&topic, &billing);
        let mut rx_shipping = registry.channel(&topic, &shipping);

        assert_eq!(registry.send(&topic, msg(1, "hello")).await, 2);

        assert_eq!(rx_billing.recv().await.unwrap().offset.as_raw(), 1);
        let received = rx_shipping.recv().await.unwrap();
        assert_eq!(received.body.as_slice(), b"hello");
        assert_eq!(registry.groups(&topic), vec![billing, shipping]);
    }

    #[tokio::test]
    async fn test_send_without_gates_is_noop() {
        let registry = GateRegistry::new(16);
        assert_eq!(registry.send(&Topic::new("empty"), msg(1, "x")).await, 0);
    }

    #[tokio::test]
    async fn test_reopen_orphans_previous_channel() {
        let registry = GateRegistry::new(16);
        let (topic, billing, _) = names();

        registry.open(&topic, &billing);
        let mut first = registry.channel(&topic, &billing);
        registry.open(&topic, &billing);
        let mut second = registry.channel(&topic, &billing);

        assert_eq!(registry.send(&topic, msg(7, "x")).await, 1);
        assert!(first.recv().await.is_none(), "orphaned channel should be closed");
        assert_eq!(second.recv().await.unwrap().offset.as_raw(), 7);
    }

    #[tokio::test]
    async fn test_close_releases_receiver() {
        let registry = GateRegistry::new(16);
        let (topic, billing, _) = names();

        registry.open(&topic, &billing);
        let mut rx = registry.channel(&topic, &billing);
        assert!(registry.is_open(&topic, &billing));

        assert!(registry.close(&topic, &billing));
        assert!(!registry.is_open(&topic, &billing));
        assert!(rx.recv().await.is_none());
        assert_eq!(registry.send(&topic, msg(1, "x")).await, 0);
    }

    #[test]
    fn test_close_drops_empty_topic() {
        let registry = GateRegistry::new(16);
        let (topic, billing, shipping) = names();

        registry.open(&topic, &billing);
        registry.open(&topic, &shipping);
        assert!(registry.close(&topic, &billing));
        assert!(registry.gates().contains_key(&topic));

        assert!(registry.close(&topic, &shipping));
        assert!(!registry.gates().contains_key(&topic));
        assert!(registry.groups(&topic).is_empty());
    }

    #[tokio::test]
    async fn test_close_gate_leaves_newer_entry() {
        let registry = GateRegistry::new(16);
        let (topic, billing, _) = names();

        let old = registry.open(&topic, &billing);
        let new = registry.open(&topic, &billing);
        assert_ne!(old, new);
        let mut rx = registry.channel(&topic, &billing);

        assert!(!registry.close_gate(&topic, &billing, old));
        assert!(registry.is_open(&topic, &billing));
        assert_eq!(registry.send(&topic, msg(1, "x")).await, 1);
        assert_eq!(rx.recv().await.unwrap().offset.as_raw(), 1);

        assert!(registry.close_gate(&topic, &billing, new));
        assert!(!registry.is_open(&topic, &billing));
        assert!(!registry.gates().contains_key(&topic));
    }

    #[test]
    fn test_close_unknown_is_noop() {
        let registry = GateRegistry::new(16);
        let (topic, billing, shipping) = names();
        assert!(!registry.close(&topic, &billing));

        registry.open(&topic, &billing);
        assert!(!registry.close(&topic, &shipping));
        assert!(registry.is_open(&topic, &billing));
    }

    #[test]
    #[should_panic(expected = "open gate before obtaining message channel")]
    fn test_channel_before_open_panics() {
        let registry = GateRegistry::new(16);
        let (topic, billing, _) = names();
        let _ = registry.channel(&topic, &billing);
    }

    #[test]
    #[should_panic(expected = "message channel already taken")]
    fn test_channel_taken_twice_panics() {
        let registry = GateRegistry::new(16);
        let (topic, billing, _) = names();
        registry.open(&topic, &billing);
        let _first = registry.channel(&topic, &billing);
        let _second = registry.channel(&topic, &billing);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_skipped() {
        let registry = GateRegistry::new(1);
        let (topic, billing, shipping) = names();

        registry.open(&topic, &billing);
        registry.open(&topic, &shipping);
        drop(registry.channel(&topic, &billing));
        let mut rx = registry.channel(&topic, &shipping);

        assert_eq!(registry.send(&topic, msg(1, "a")).await, 1);
        assert_eq!(rx.recv().await.unwrap().offset.as_raw(), 1);
    }

    #[tokio::test]
    async fn test_full_channel_blocks_publisher() {
        let registry = Arc::new(GateRegistry::new(1));
        let (topic, billing, _) = names();

        registry.open(&topic, &billing);
        let mut rx = registry.channel(&topic, &billing);

        assert_eq!(registry.send(&topic, msg(1, "a")).await, 1);

        // second message has no room until the subscriber drains one
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), registry.send(&topic, msg(2, "b"))).await;
        assert!(blocked.is_err(), "send should wait on a full channel");

        let sender = {
            let registry = Arc::clone(&registry);
            let topic = topic.clone();
            tokio::spawn(async move { registry.send(&topic, msg(2, "b")).await })
        };

        assert_eq!(rx.recv().await.unwrap().offset.as_raw(), 1);
        assert_eq!(sender.await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().offset.as_raw(), 2);
    }
}
