//! Per-game odds tracking: pull snapshots on an adaptive cadence, diff them
//! against the previous observation and record the movements.

pub mod detector;
pub mod diff;
pub mod provider;

pub use detector::LineTracker;
pub use diff::{diff_snapshots, merge_quotes};
pub use provider::OddsProvider;
