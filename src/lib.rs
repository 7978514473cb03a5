//! # LightMQ - Persistent Pub/Sub Broker
//!
//! LightMQ is a small message broker built on SQLite. It provides:
//!
//! - **Durable topics**: every published message is stored under a dense,
//!   per-topic offset before anyone sees it
//! - **Subscriber groups**: each group keeps its own committed offset and
//!   resumes from it after a restart
//! - **Seamless catch-up**: a subscriber replays what it missed, then switches
//!   to live delivery without losing or repeating messages
//! - **At-least-once delivery**: an offset is committed only after the handler
//!   succeeds
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Broker (async API)                       │
//! │                 publish, subscriber, inspection                 │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │                                 │
//!                 ▼                                 ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────────┐
//! │           Publisher           │ │          Subscriber           │
//! │  append, then fan out live    │ │  open gate, replay, tail,     │
//! │  (one lock per topic)         │ │  commit after handler         │
//! └───────┬───────────────┬───────┘ └───────┬───────────────┬───────┘
//!         │               │                 │               │
//!         ▼               ▼                 │               ▼
//! ┌───────────────┐ ┌─────────────────┐     │     ┌─────────────────┐
//! │ Record Store  │ │  Gate Registry  │◄────┘     │  Offset Store   │
//! │ (SQLite)      │ │  (in memory)    │           │  (SQLite)       │
//! └───────────────┘ └─────────────────┘           └─────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Dense offsets**: a topic's offsets start at 1 and never skip or repeat
//! 2. **Store before deliver**: a message is broadcast only after its append
//!    committed
//! 3. **Gate before replay**: a subscriber's live channel exists before its
//!    replay snapshot is taken, so nothing falls between the two
//! 4. **Monotonic commits**: a group's committed offset never moves backwards
//!
//! ## Example
//!
//! ```no_run
//! use lightmq::{Broker, BrokerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> lightmq::Result<()> {
//! let broker = Broker::open(BrokerConfig::with_data_dir("./data"))?;
//! broker.publish("orders", "order #1").await?;
//!
//! let mut sub = broker.subscriber("orders", "billing").await?;
//! let cancel = CancellationToken::new();
//! sub.subscribe(cancel, |body: &[u8]| {
//!     println!("{}", String::from_utf8_lossy(body));
//!     Ok::<(), std::convert::Infallible>(())
//! })
//! .await?;
//! sub.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`error`]: Error type shared by every module
//! - [`config`]: Broker and logging configuration
//! - [`telemetry`]: `tracing` subscriber setup
//! - [`schema`]: SQLite DDL and database initialization
//! - [`types`]: Domain types (Topic, GroupName, Offset, Message, ...)
//! - [`storage`]: Store traits and the catch-up cursor
//! - [`record_store`] / [`offset_store`]: SQLite store implementations
//! - [`gate`]: Live fan-out registry
//! - [`publisher`] / [`subscriber`]: The two sides of a topic
//! - [`api`]: The [`Broker`] façade (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for broker operations.
pub mod error;

/// Broker configuration, with environment overrides.
pub mod config;

/// Logging initialization.
pub mod telemetry;

/// SQLite schema definitions and database initialization.
///
/// Contains the DDL for all tables and the logic to initialize a new database
/// or verify an existing one.
pub mod schema;

/// Domain types.
///
/// Newtypes for topics, groups and offsets, plus the stored and delivered
/// message shapes.
pub mod types;

/// Storage traits and the bounded catch-up cursor.
pub mod storage;

/// SQLite-backed [`RecordStore`](storage::RecordStore).
pub mod record_store;

/// SQLite-backed [`OffsetStore`](storage::OffsetStore).
pub mod offset_store;

/// In-memory fan-out of live messages to subscriber groups.
pub mod gate;

/// Publishing: durable append followed by live fan-out.
pub mod publisher;

/// Subscriber sessions: replay, tail and commit.
pub mod subscriber;

/// The broker façade.
///
/// The main entry point is [`Broker`](api::Broker).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::Broker;
pub use config::{BrokerConfig, LogConfig, LogFormat};
pub use error::{Error, Result};
pub use gate::{GateId, GateRegistry};
pub use publisher::Publisher;
pub use schema::Database;
pub use subscriber::Subscriber;
pub use telemetry::init_logging;

pub use types::{GroupName, Message, Offset, Record, SubscriberGroup, Topic};
