//! Match lifecycle state machine.
//!
//! Tracks where a match session is and validates transitions.
//!
//! # State Diagram
//!
//! ```text
//! ┌───────────────┐
//! │ AwaitingStart │──────────────────────────────────┐
//! └───────┬───────┘                                  │
//!         │ start broadcast                          │
//!         ▼                                          │
//! ┌─────────────────┐                                │
//! │ SetupInProgress │────────────────────────────────┤
//! └───────┬─────────┘                                │
//!         │ local ready                              │ abort
//!         ▼                                          │ (leave / connection
//! ┌───────────────────┐                              │  lost / local exit)
//! │ AwaitingBothReady │──────────────────────────────┤
//! └───────┬───────────┘                              │
//!         │ opponent ready                           │
//!         ▼                                          │
//! ┌───────────┐                                      │
//! │  InGame   │──────────────────────────────────────┤
//! └───────────┘                                      ▼
//!                                              ┌───────────┐
//!                                              │  Aborted  │ (sink)
//!                                              └───────────┘
//! ```

use serde::Serialize;
use std::fmt;

/// Lifecycle phase of a match session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MatchPhase {
    /// Connected, waiting for the host's start command to be broadcast
    #[default]
    AwaitingStart,

    /// Roles assigned, local player placing ships
    SetupInProgress,

    /// Local player committed, waiting for the opponent's board
    AwaitingBothReady,

    /// Both boards exchanged
    InGame,

    /// Terminal: opponent left, connection lost, or local exit
    Aborted,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingStart => "awaiting_start",
            Self::SetupInProgress => "setup_in_progress",
            Self::AwaitingBothReady => "awaiting_both_ready",
            Self::InGame => "in_game",
            Self::Aborted => "aborted",
        }
    }

    /// Check if the phase is terminal (cannot change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Check if roles have been negotiated.
    pub fn is_started(&self) -> bool {
        !matches!(self, Self::AwaitingStart | Self::Aborted)
    }
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    StartReceived,
    LocalReady,
    BothReady,
    Abort,
}

/// Error when a state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: MatchPhase,
    pub event: PhaseEvent,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid transition from {} via {:?}: {}",
            self.from, self.event, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Lifecycle state machine.
///
/// Transitions only move forward, except that any non-terminal phase may
/// abort. Once aborted every event is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lifecycle {
    phase: MatchPhase,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lifecycle at a specific phase (for restoring state).
    pub fn at(phase: MatchPhase) -> Self {
        Self { phase }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Apply an event, returning the new state or an error.
    pub fn apply(&self, event: PhaseEvent) -> Result<Self, InvalidTransition> {
        Ok(Self {
            phase: self.transition(event)?,
        })
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: PhaseEvent) -> Result<(), InvalidTransition> {
        self.phase = self.transition(event)?;
        Ok(())
    }

    fn transition(&self, event: PhaseEvent) -> Result<MatchPhase, InvalidTransition> {
        use MatchPhase::*;
        use PhaseEvent::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.phase,
            event,
            reason,
        };

        match (self.phase, event) {
            (Aborted, _) => Err(invalid("Session already aborted")),

            // Abort: any non-terminal -> Aborted
            (_, Abort) => Ok(Aborted),

            (AwaitingStart, StartReceived) => Ok(SetupInProgress),
            (_, StartReceived) => Err(invalid("Match already started")),

            (SetupInProgress, LocalReady) => Ok(AwaitingBothReady),
            (AwaitingStart, LocalReady) => Err(invalid("Match not started")),
            (_, LocalReady) => Err(invalid("Already ready")),

            (AwaitingBothReady, BothReady) => Ok(InGame),
            (InGame, BothReady) => Err(invalid("Already in game")),
            (_, BothReady) => Err(invalid("Local player not ready")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
