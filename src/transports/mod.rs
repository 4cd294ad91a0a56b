//! Transport contract (spec.md §6 "Transports"): `connect`/`disconnect`/
//! `receive_event`/`send_message`, with one adapter per platform. Only the
//! contract is core to this spec (spec.md §1 "OUT OF SCOPE"); each adapter
//! here is a real, compiling client wired to its platform's crate, kept
//! proportionate rather than protocol-complete.

pub mod discord;
pub mod irc;
pub mod slack;

use async_trait::async_trait;

use crate::error::BotError;
use crate::types::RoomMessage;

/// An event a transport surfaces to the Coordinator.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message { message: RoomMessage, is_direct: bool },
    Connected,
    Disconnected { reason: String },
}

/// What every platform adapter must provide (spec.md §6 point 4).
#[async_trait]
pub trait Transport: Send + Sync {
    fn platform(&self) -> &'static str;

    async fn connect(&self) -> Result<(), BotError>;

    async fn disconnect(&self) -> Result<(), BotError>;

    /// Blocks until the next inbound event. Adapters typically bridge their
    /// platform client's own event loop into an internal `AsyncQueue`/mpsc
    /// channel and `take()`/`recv()` from it here.
    async fn receive_event(&self) -> Result<TransportEvent, BotError>;

    /// Send `text` to `destination` (a platform-specific channel/room id).
    /// Callers wrap this in [`crate::send_retry::send_with_rate_limit_retry`]
    /// rather than retrying here (spec.md §4.11).
    async fn send_message(&self, destination: &str, text: &str) -> Result<(), BotError>;
}
