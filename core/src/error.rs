//! Error taxonomy for the streaming and tracking engine.
//!
//! Connection errors drive bounded reconnection; parse and provider errors
//! degrade locally (drop the frame, skip the market) and are reported to the
//! monitoring collaborator; capacity and configuration errors surface
//! synchronously at call time.

use crate::models::MarketKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveDataError {
    /// Transport-level failure on a streaming connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound frame; the frame is dropped.
    #[error("parse error: {0}")]
    Parse(String),

    /// Subscription or tracking limit reached.
    #[error("capacity exceeded: {kind} limit of {limit} reached")]
    CapacityExceeded { kind: &'static str, limit: usize },

    /// Odds fetch failed for one market; other markets proceed.
    #[error("provider error for {market} on {game_id}: {reason}")]
    Provider {
        game_id: String,
        market: MarketKind,
        reason: String,
    },

    /// Missing or invalid startup configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, LiveDataError>;
