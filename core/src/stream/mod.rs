//! Streaming ingestion: transport seam, per-channel connections,
//! subscription bookkeeping and inbound frame dispatch.

pub mod connection;
pub mod dispatch;
pub mod subscriptions;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionStats, SubscriptionSnapshot};
pub use dispatch::MessageDispatcher;
pub use subscriptions::SubscriptionRegistry;
pub use transport::{StreamConnection, StreamTransport};
