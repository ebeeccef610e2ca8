//! Transport seams.
//!
//! The session consumes two collaborators:
//!
//! - [`PubSub`]: a duplex publish/subscribe connection with named topics.
//! - [`MatchServer`]: a request/response channel for one-shot commands.
//!
//! Both are traits so the runtime can be driven by a real network client or
//! by the in-process [`memory`] implementations used in tests.

pub mod memory;

use async_trait::async_trait;

use crate::error::{ServerError, TransportError};
use crate::state::lobby::{JoinCommand, StartCommand};
use crate::state::topic::Topic;

/// A raw message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic string as named by the broker
    pub topic: String,
    pub body: String,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

/// Publish/subscribe connection owned by exactly one session.
///
/// `recv` must be cancel-safe: the runtime polls it inside `tokio::select!`.
#[async_trait]
pub trait PubSub: Send + 'static {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &Topic) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, topic: &Topic) -> Result<(), TransportError>;

    async fn publish(&mut self, topic: &Topic, body: String) -> Result<(), TransportError>;

    /// Next delivery. `None` means the connection closed.
    async fn recv(&mut self) -> Option<Result<Delivery, TransportError>>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Request/response commands handled by the match server.
#[async_trait]
pub trait MatchServer: Send + Sync + 'static {
    /// Ask the server to broadcast `start/{lobbyCode}`.
    async fn start_match(&self, command: StartCommand) -> Result<(), ServerError>;

    /// Seat a joiner in a lobby. Issued before any session exists.
    async fn join_lobby(&self, command: JoinCommand) -> Result<(), ServerError>;
}
