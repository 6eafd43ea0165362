//! LineWatch Core - Live sports market ingestion and line movement tracking.
//!
//! This crate provides:
//! - Persistent per-channel streaming connections with heartbeats and
//!   bounded backoff reconnection
//! - Idempotent, capacity-capped subscription bookkeeping with replay
//!   after reconnect
//! - Rate-limited inbound frame dispatch with two-stage parsing and a
//!   short-TTL live-data cache
//! - Per-game odds tracking on an adaptive refresh cadence with
//!   per-(bookmaker, market, side) movement detection
//! - Threshold-based alerting with severity escalation and a bounded,
//!   time-pruned alert history
//! - A typed broadcast event bus tying the pieces together

pub mod alerts;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod monitoring;
pub mod service;
pub mod stream;
pub mod tracker;

pub use alerts::AlertEngine;
pub use cache::{MemoryTtlStore, TtlStore};
pub use config::{AlertConfig, LiveDataConfig, ReconnectConfig, StreamConfig, TrackerConfig};
pub use error::{LiveDataError, Result};
pub use events::{DomainEvent, EventBus};
pub use models::*;
pub use monitoring::{monitor_from_env, ErrorMonitor, LogMonitor, WebhookMonitor};
pub use service::LiveDataService;
pub use stream::{
    ConnectionManager, MessageDispatcher, StreamConnection, StreamTransport, SubscriptionRegistry,
};
pub use tracker::{LineTracker, OddsProvider};
