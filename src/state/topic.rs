//! Topic naming scheme.
//!
//! Both peers derive channel names from data they already hold (the lobby
//! code and, after role negotiation, the player names). No registry is
//! involved, so the mapping must stay a pure function of its inputs.
//!
//! ```text
//! start/{lobbyCode}      one-shot "match is starting" broadcast
//! ready/{recipientName}  readiness + board, addressed to the recipient
//! leave/{lobbyCode}      disconnect / abort broadcast
//! ```

use std::fmt;

const START_PREFIX: &str = "start";
const READY_PREFIX: &str = "ready";
const LEAVE_PREFIX: &str = "leave";

/// A publish/subscribe channel used by a match session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `start/{lobbyCode}`
    Start(String),
    /// `ready/{recipientName}`
    Ready(String),
    /// `leave/{lobbyCode}`
    Leave(String),
}

impl Topic {
    pub fn start(lobby_code: &str) -> Self {
        Self::Start(lobby_code.to_string())
    }

    pub fn ready_for(recipient_name: &str) -> Self {
        Self::Ready(recipient_name.to_string())
    }

    pub fn leave(lobby_code: &str) -> Self {
        Self::Leave(lobby_code.to_string())
    }

    /// Topics that only need the lobby code, available before negotiation.
    pub fn lobby_scoped(lobby_code: &str) -> [Self; 2] {
        [Self::start(lobby_code), Self::leave(lobby_code)]
    }

    /// Whether this topic depends on a negotiated player name.
    pub fn is_name_scoped(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The lobby code or player name this topic is keyed on.
    pub fn key(&self) -> &str {
        match self {
            Self::Start(key) | Self::Ready(key) | Self::Leave(key) => key,
        }
    }

    /// Parse a wire topic name back into a [`Topic`].
    ///
    /// Everything after the first `/` is the key, so player names may
    /// themselves contain slashes.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, key) = raw.split_once('/')?;
        if key.is_empty() {
            return None;
        }
        match prefix {
            START_PREFIX => Some(Self::Start(key.to_string())),
            READY_PREFIX => Some(Self::Ready(key.to_string())),
            LEAVE_PREFIX => Some(Self::Leave(key.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(code) => write!(f, "{}/{}", START_PREFIX, code),
            Self::Ready(name) => write!(f, "{}/{}", READY_PREFIX, name),
            Self::Leave(code) => write!(f, "{}/{}", LEAVE_PREFIX, code),
        }
    }
}
