//! Error types.
//!
//! - [`SessionError`] is what the presentation layer sees.
//! - [`ProtocolError`] covers inbound messages that fail to decode or
//!   validate. These are logged and dropped inside the session boundary.
//! - [`TransportError`] covers the publish/subscribe connection.
//! - [`ServerError`] covers the request/response commands (start, join).

use thiserror::Error;

use crate::state::board::BoardError;
use crate::state::lifecycle::{InvalidTransition, MatchPhase};

/// Errors surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The lobby handed to the session is not the one the route names.
    /// Fatal: indicates a wiring bug, the session is never created.
    #[error("lobby code mismatch: route expects {expected}, lobby is {actual}")]
    LobbyMismatch { expected: String, actual: String },

    /// The local user holds no seat in the lobby.
    #[error("user {0} is not a participant of this lobby")]
    NotAParticipant(String),

    #[error("only the host may start the match")]
    NotHost,

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error("ship placement is closed in phase {0}")]
    PlacementClosed(MatchPhase),

    #[error("{remaining} ship(s) still to place")]
    FleetIncomplete { remaining: usize },

    /// Seats are expected to be assigned before the local commit.
    #[error("player roles have not been negotiated")]
    RolesUnassigned,

    #[error("start command failed: {0}")]
    StartFailed(#[from] ServerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("could not encode board: {0}")]
    Encode(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session aborted")]
    Aborted,

    #[error("session closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,
}

/// Inbound message errors. Never cross the session boundary.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),

    #[error("malformed payload on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message for lobby {actual}, session is {expected}")]
    StaleMatch { expected: String, actual: String },

    #[error("unexpected sender {0}")]
    UnexpectedSender(String),

    #[error("message addressed to {0}, not to this player")]
    Misaddressed(String),

    #[error("incomplete start payload")]
    IncompleteStart,

    #[error("start payload does not seat local user {0} as expected")]
    SeatMismatch(String),

    #[error("invalid board: {0}")]
    Board(#[from] BoardError),
}

/// Publish/subscribe transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,
}

/// Request/response command errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// The server refused the command (unknown lobby, wrong host, ...)
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network or server-side failure
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ServerError {
    /// Whether the host may retry the command as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Invalid session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("grid size must be between 1 and {max}, got {size}")]
    GridSize { size: usize, max: usize },

    #[error("fleet is empty")]
    EmptyFleet,

    #[error("{kind} of length {length} does not fit a {size}x{size} grid")]
    ShipTooLong {
        kind: &'static str,
        length: usize,
        size: usize,
    },
}
