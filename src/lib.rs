//! SeaBattle State Library
//!
//! This crate drives the lifecycle of a two-player SeaBattle match between
//! two clients that only talk through a publish/subscribe transport.
//!
//! # Overview
//!
//! - **Match Session State Machine** - `AwaitingStart → SetupInProgress →
//!   AwaitingBothReady → InGame`, with `Aborted` reachable from any phase and
//!   absorbing once entered.
//!
//! - **Role/Turn Negotiation** - The host always becomes player 1 and moves
//!   first, derived purely from the start broadcast.
//!
//! - **Readiness Handshake** - Boards are exchanged on directed `ready`
//!   topics; early notices are buffered so arrival order does not matter.
//!
//! - **Disconnect Monitor** - `leave` broadcasts and dropped transports
//!   abort the session and release every subscription.
//!
//! - **Runtime** - One tokio task per session owns the transport and
//!   serializes every mutation.
//!
//! # Design Principles
//!
//! 1. **State machines validate transitions** - Invalid phase changes are
//!    rejected with clear errors.
//!
//! 2. **Sans-IO core** - `state` never touches the network; it returns
//!    actions for the runtime to execute.
//!
//! 3. **Decode once** - Raw deliveries become typed messages at the transport
//!    boundary; protocol errors are logged and dropped there.
//!
//! 4. **Serialization-ready** - Snapshots convert to JSON for clients.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use seabattle_state::config::SessionConfig;
//! use seabattle_state::runtime::SessionRuntime;
//! use seabattle_state::state::{Lobby, LocalUser, MatchPhase, MatchSession};
//! use seabattle_state::transport::memory::{MemoryBroker, MemoryMatchServer};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), seabattle_state::error::SessionError> {
//! let broker = MemoryBroker::new();
//! let server = Arc::new(MemoryMatchServer::new(broker.clone()));
//! let lobby = Lobby::new("AB12", "h1", "Ann").with_joiner("j1", "Bo");
//! server.register_lobby(lobby.clone());
//!
//! let session = MatchSession::open("AB12", lobby, LocalUser::new("h1"), SessionConfig::default())?;
//! let (mut handle, _notices) = SessionRuntime::spawn(session, broker.client(), server);
//!
//! handle.request_start().await?;
//! let mut watch = handle.watch();
//! watch
//!     .wait_for(|s| s.phase == MatchPhase::SetupInProgress)
//!     .await
//!     .map_err(|_| seabattle_state::error::SessionError::Closed)?;
//!
//! handle.exit().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod runtime;
pub mod state;
pub mod transport;

// Re-export everything from state module at crate root
pub use state::*;

pub use config::SessionConfig;
pub use error::{ConfigError, ProtocolError, ServerError, SessionError, TransportError};
pub use runtime::{SessionHandle, SessionRuntime};
