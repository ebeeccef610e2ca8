//! Wire messages.
//!
//! Inbound deliveries are decoded exactly once, at the transport boundary,
//! into the [`Inbound`] tagged union. The session only ever sees typed
//! messages.

use serde::{Deserialize, Serialize};

use super::topic::Topic;
use crate::error::ProtocolError;

/// Payload of `start/{lobbyCode}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBroadcast {
    pub player1_id: String,
    pub player1_name: String,
    pub player2_id: String,
    pub player2_name: String,
}

impl StartBroadcast {
    /// Check every field is populated.
    pub fn is_complete(&self) -> bool {
        [
            &self.player1_id,
            &self.player1_name,
            &self.player2_id,
            &self.player2_name,
        ]
        .iter()
        .all(|s| !s.is_empty())
    }
}

/// Payload of `ready/{recipientName}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyNotice {
    /// Lobby code of the match this notice belongs to
    pub game_id: String,
    pub player_id: String,
    pub player_name: String,
    /// Board in its wire encoding
    pub player_board: String,
    pub player_avatar: Option<String>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Start {
        lobby_code: String,
        payload: StartBroadcast,
    },
    Ready {
        recipient: String,
        payload: ReadyNotice,
    },
    /// Presence alone is significant
    Leave { lobby_code: String },
}

impl Inbound {
    /// Decode a raw delivery by topic.
    pub fn decode(topic: &str, body: &str) -> Result<Self, ProtocolError> {
        let parsed = Topic::parse(topic).ok_or_else(|| ProtocolError::UnknownTopic(topic.to_string()))?;

        let malformed = |source: serde_json::Error| ProtocolError::Malformed {
            topic: topic.to_string(),
            source,
        };

        match parsed {
            Topic::Start(lobby_code) => Ok(Self::Start {
                lobby_code,
                payload: serde_json::from_str(body).map_err(malformed)?,
            }),
            Topic::Ready(recipient) => Ok(Self::Ready {
                recipient,
                payload: serde_json::from_str(body).map_err(malformed)?,
            }),
            Topic::Leave(lobby_code) => Ok(Self::Leave { lobby_code }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Ready { .. } => "ready",
            Self::Leave { .. } => "leave",
        }
    }
}

/// A message the session wants published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Ready(ReadyNotice),
    Leave,
}

impl Outbound {
    /// Encode the message body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Ready(notice) => serde_json::to_string(notice),
            Self::Leave => Ok(String::from("{}")),
        }
    }
}
