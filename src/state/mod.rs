//! Pure match state for SeaBattle sessions.
//!
//! Nothing in this module performs I/O. The session consumes typed inbound
//! messages and local intents and returns the actions the runtime executes.
//!
//! - `topic` - Topic naming scheme (start / ready / leave)
//! - `board` - Grid, ships and placement rules
//! - `player` - Roles, seats and per-player state
//! - `lobby` - Lobby record and one-shot commands
//! - `lifecycle` - Match phase state machine
//! - `message` - Wire payloads and the inbound tagged union
//! - `session` - The aggregate root tying it all together
//! - `connection` - Transport status and owned subscriptions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            MatchSession                              │
//! │                                                                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐    │
//! │  │    Lobby     │  │  Lifecycle   │  │  pending ready notice    │    │
//! │  │ (read-only)  │  │  MatchPhase  │  │  (buffered until commit) │    │
//! │  └──────────────┘  └──────────────┘  └──────────────────────────┘    │
//! │                                                                      │
//! │  ┌────────────────────────────┐  ┌────────────────────────────┐      │
//! │  │        local Player        │  │      opponent Player       │      │
//! │  │  Role, Seat, ships, Board  │  │  Board replaced wholesale  │      │
//! │  │  edited ship by ship       │  │  from the ready notice     │      │
//! │  └────────────────────────────┘  └────────────────────────────┘      │
//! │                                                                      │
//! │   Inbound ──apply──▶ Vec<SessionAction> ◀──intent── presentation     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use seabattle_state::config::SessionConfig;
//! use seabattle_state::state::{Inbound, Lobby, LocalUser, MatchPhase, MatchSession, StartBroadcast};
//!
//! let lobby = Lobby::new("AB12", "h1", "Ann").with_joiner("j1", "Bo");
//! let mut session =
//!     MatchSession::open("AB12", lobby, LocalUser::new("h1"), SessionConfig::default())?;
//!
//! let actions = session.apply(Inbound::Start {
//!     lobby_code: "AB12".into(),
//!     payload: StartBroadcast {
//!         player1_id: "h1".into(),
//!         player1_name: "Ann".into(),
//!         player2_id: "j1".into(),
//!         player2_name: "Bo".into(),
//!     },
//! });
//! assert!(!actions.is_empty());
//! assert_eq!(session.phase(), MatchPhase::SetupInProgress);
//! assert!(session.local().is_my_turn);
//! # Ok::<(), seabattle_state::error::SessionError>(())
//! ```

pub mod board;
pub mod connection;
pub mod lifecycle;
pub mod lobby;
pub mod message;
pub mod player;
pub mod session;
pub mod topic;

// Re-export commonly used types
pub use board::{
    Board, BoardError, Cell, Orientation, Placement, Position, Ship, ShipId, ShipKind,
    DEFAULT_GRID_SIZE, MAX_GRID_SIZE, STANDARD_FLEET,
};
pub use connection::{Connection, ConnectionStatus};
pub use lifecycle::{InvalidTransition, Lifecycle, MatchPhase, PhaseEvent};
pub use lobby::{JoinCommand, Lobby, StartCommand};
pub use message::{Inbound, Outbound, ReadyNotice, StartBroadcast};
pub use player::{LocalUser, Player, Role, Seat};
pub use session::{AbortReason, MatchSession, SessionAction, SessionNotice, SessionSnapshot};
pub use topic::Topic;
