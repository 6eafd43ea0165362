//! Provider transport abstraction.
//!
//! Modeling the real provider protocol is out of scope here; the engine only
//! needs to open a long-lived connection per channel, push text frames out
//! and pull text frames in. Deployments supply a concrete transport,
//! tests use channel-backed mocks.

use crate::error::LiveDataError;
use crate::models::ChannelKind;
use async_trait::async_trait;

#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Open a fresh connection for the given channel.
    async fn connect(
        &self,
        channel: ChannelKind,
    ) -> Result<Box<dyn StreamConnection>, LiveDataError>;
}

#[async_trait]
pub trait StreamConnection: Send {
    /// Send an outbound control or keepalive frame.
    async fn send(&mut self, frame: String) -> Result<(), LiveDataError>;

    /// Next inbound text frame. `None` means the stream has closed.
    async fn next_frame(&mut self) -> Option<Result<String, LiveDataError>>;
}
