//! # Domain Types for lightmq
//!
//! Newtypes for the broker's vocabulary: topics, groups, offsets, stored
//! records and in-flight messages.
//!
//! ## Invariants
//!
//! - [`Offset`]: strictly increasing and dense per topic, starts at 1, never zero
//! - [`Topic`] / [`GroupName`]: non-empty once validated through
//!   [`SubscriberGroup::new`] or the publisher
//! - [`Record`]: immutable once appended

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

// =============================================================================
// Names
// =============================================================================

/// Name of an independent, totally ordered append log.
///
/// Topics have no entity of their own; the name is the key into the record
/// store and the gate registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(String);

impl Topic {
    /// Creates a topic name without validating it.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a topic name, rejecting the empty string.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let topic = Self::new(name);
        if topic.0.is_empty() {
            return Err(Error::Validation("topic can't be empty".to_string()));
        }
        Ok(topic)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of a logical consumer within a topic.
///
/// Every session opened with the same group name on the same topic shares one
/// committed offset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupName(String);

impl GroupName {
    /// Creates a group name without validating it.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a group name, rejecting the empty string.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let group = Self::new(name);
        if group.0.is_empty() {
            return Err(Error::Validation("group can't be empty".to_string()));
        }
        Ok(group)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The identity of a subscriber group: `(topic, group)`.
///
/// This is the key of the offset store. Two sessions with equal
/// `SubscriberGroup`s resume from the same committed offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberGroup {
    pub topic: Topic,
    pub group: GroupName,
}

impl SubscriberGroup {
    /// Validates both names and builds the identity.
    ///
    /// # Errors
    ///
    /// `Error::Validation` if either the topic or the group is empty.
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Result<Self> {
        Ok(Self {
            topic: Topic::parse(topic)?,
            group: GroupName::parse(group)?,
        })
    }
}

impl fmt::Display for SubscriberGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub{{{} {}}}", self.topic, self.group)
    }
}

// =============================================================================
// Offset
// =============================================================================

/// Position of a record within its topic.
///
/// Assigned by the record store at append time. Offsets are dense and
/// monotonic per topic, starting at [`Offset::FIRST`]. A subscriber's progress
/// is always "the offset of the last record fully handled".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(u64);

impl Offset {
    /// The first offset assigned in every topic (1, not 0).
    pub const FIRST: Offset = Offset(1);

    /// Creates an offset from a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is 0.
    pub fn from_raw(value: u64) -> Self {
        assert!(value > 0, "Offset cannot be zero");
        Self(value)
    }

    /// Creates an offset from a value read back from storage.
    ///
    /// # Errors
    ///
    /// `Error::Schema` if the stored value is not a valid offset.
    pub fn from_stored(value: i64) -> Result<Self> {
        if value <= 0 {
            return Err(Error::Schema(format!("invalid stored offset {value}")));
        }
        Ok(Self(value as u64))
    }

    /// Returns the raw u64 value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the value in SQLite's INTEGER representation.
    pub(crate) fn as_sql(&self) -> i64 {
        self.0 as i64
    }

    /// Returns the next offset.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the first offset a group has not yet handled.
    ///
    /// `None` (nothing committed) resumes from the start of the topic.
    pub fn resume_from(committed: Option<Offset>) -> Self {
        committed.map_or(Self::FIRST, |c| c.next())
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Records and Messages
// =============================================================================

/// An immutable durable unit of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Position within the topic.
    pub offset: Offset,

    /// When the record was appended (Unix milliseconds).
    pub timestamp_ms: u64,

    /// Opaque message body.
    pub body: Vec<u8>,
}

/// A freshly published message routed through the gate registry.
///
/// Carries the offset assigned at append time so that a subscriber can
/// compare it with what it already replayed. The body sits behind an `Arc`
/// so fan-out to many groups only clones a pointer.
#[derive(Debug, Clone)]
pub struct Message {
    pub offset: Offset,
    pub body: Arc<Vec<u8>>,
}

impl Message {
    pub fn new(offset: Offset, body: Vec<u8>) -> Self {
        Self {
            offset,
            body: Arc::new(body),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg{{offset={} len={}}}", self.offset, self.body.len())
    }
}

// =============================================================================
// Time
// =============================================================================

/// Current wall clock time in Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
