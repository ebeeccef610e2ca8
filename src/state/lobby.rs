//! Lobby state.
//!
//! The lobby is allocated by the lobby service before a session exists and
//! is read-only to the session. It correlates both peers through its code and
//! records who hosts and who joined.

use serde::{Deserialize, Serialize};

use super::player::Role;

/// Two-seat lobby record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    /// Shareable code, immutable for the session lifetime
    pub lobby_code: String,

    pub host_id: String,

    pub host_name: String,

    /// Set once someone has joined
    pub joiner_id: Option<String>,

    pub joiner_name: Option<String>,
}

impl Lobby {
    /// Create a lobby with only the host seated.
    pub fn new(
        lobby_code: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            lobby_code: lobby_code.into(),
            host_id: host_id.into(),
            host_name: host_name.into(),
            joiner_id: None,
            joiner_name: None,
        }
    }

    /// Seat the joiner.
    #[must_use]
    pub fn with_joiner(mut self, joiner_id: impl Into<String>, joiner_name: impl Into<String>) -> Self {
        self.joiner_id = Some(joiner_id.into());
        self.joiner_name = Some(joiner_name.into());
        self
    }

    /// Check if user is the host.
    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }

    pub fn has_joiner(&self) -> bool {
        self.joiner_id.is_some()
    }

    /// Role of a user in this lobby, or `None` if they hold no seat.
    ///
    /// A user who is not the host is treated as the joiner while the joiner
    /// seat is still open, since the lobby record may predate the join.
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if self.is_host(user_id) {
            return Some(Role::Host);
        }
        match &self.joiner_id {
            Some(joiner) if joiner != user_id => None,
            _ => Some(Role::Joiner),
        }
    }

    /// Command the host sends to start the match.
    pub fn start_command(&self) -> StartCommand {
        StartCommand {
            lobby_code: self.lobby_code.clone(),
            host_id: self.host_id.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "lobby_code": self.lobby_code,
            "host_id": self.host_id,
            "host_name": self.host_name,
            "joiner_id": self.joiner_id,
            "joiner_name": self.joiner_name
        })
    }
}

/// One-shot start request, sent over the request/response channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    pub lobby_code: String,
    pub host_id: String,
}

/// Pre-session join request. The session never interprets the response; it
/// only observes the resulting start broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCommand {
    pub joiner_id: String,
    pub lobby_code: String,
}
