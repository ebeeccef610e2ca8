//! Match session state machine.
//!
//! [`MatchSession`] is the aggregate root for one match view. It owns both
//! players, the lifecycle, and the buffered early ready notice. It does no
//! I/O: inbound messages and local intents go in, [`SessionAction`]s come
//! out, and the runtime executes them in order.
//!
//! ```text
//! AwaitingStart ──start──▶ SetupInProgress ──mark_ready──▶ AwaitingBothReady ──opponent ready──▶ InGame
//!       │                        │                               │                                  │
//!       └────────────────────────┴───────── leave / lost / exit ─┴──────────────────────────────────┴──▶ Aborted
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::board::{Board, BoardError, Orientation, Position, ShipId};
use super::lifecycle::{Lifecycle, MatchPhase, PhaseEvent};
use super::lobby::{Lobby, StartCommand};
use super::message::{Inbound, Outbound, ReadyNotice, StartBroadcast};
use super::player::{LocalUser, Player, Role, Seat};
use super::topic::Topic;
use crate::config::SessionConfig;
use crate::error::{ProtocolError, SessionError};

/// Why a session ended in [`MatchPhase::Aborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A `leave` broadcast arrived for this lobby
    OpponentLeft,
    /// The established transport dropped
    ConnectionLost,
    /// The local user left the match view
    LocalExit,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpponentLeft => "opponent_left",
            Self::ConnectionLost => "connection_lost",
            Self::LocalExit => "local_exit",
        }
    }
}

/// Notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    PhaseChanged { from: MatchPhase, to: MatchPhase },
    /// Negotiation finished; the local player holds `seat`
    RolesAssigned { seat: Seat, my_turn: bool },
    /// The opponent's board has been received
    OpponentReady,
    /// The host's start command failed; the session stays in AwaitingStart
    StartFailed { reason: String, retryable: bool },
    /// Non-fatal transport problem
    TransportError { reason: String },
    /// Terminal interrupt that needs explicit dismissal
    Aborted { reason: AbortReason },
}

/// Side effect requested by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Subscribe(Topic),
    Publish { topic: Topic, message: Outbound },
    /// Unsubscribe everything and drop the transport
    ReleaseAll,
    Notify(SessionNotice),
}

/// Aggregate root for one match.
#[derive(Debug, Clone)]
pub struct MatchSession {
    lobby: Lobby,
    user: LocalUser,
    config: SessionConfig,
    lifecycle: Lifecycle,
    local: Player,
    opponent: Player,
    orientation: Orientation,
    /// First ready notice that arrived before the local commit
    pending_ready: Option<ReadyNotice>,
    abort_reason: Option<AbortReason>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ready_at: Option<DateTime<Utc>>,
    in_game_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl MatchSession {
    /// Open a session for the lobby named by the route.
    ///
    /// Fails when the lobby does not match the route, the local user holds no
    /// seat, or the configuration is invalid. None of these are recoverable.
    pub fn open(
        route_code: &str,
        lobby: Lobby,
        user: LocalUser,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        if lobby.lobby_code != route_code {
            return Err(SessionError::LobbyMismatch {
                expected: route_code.to_string(),
                actual: lobby.lobby_code,
            });
        }

        let role = lobby
            .role_of(&user.id)
            .ok_or_else(|| SessionError::NotAParticipant(user.id.clone()))?;

        let local = Player::local(role, config.grid_size, &config.fleet, user.avatar.clone());
        let opponent = Player::opponent(role.opposite(), config.grid_size);

        debug!(lobby = %lobby.lobby_code, user = %user.id, ?role, "session opened");

        Ok(Self {
            lobby,
            user,
            config,
            lifecycle: Lifecycle::new(),
            local,
            opponent,
            orientation: Orientation::default(),
            pending_ready: None,
            abort_reason: None,
            created_at: Utc::now(),
            started_at: None,
            ready_at: None,
            in_game_at: None,
            ended_at: None,
        })
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn lobby_code(&self) -> &str {
        &self.lobby.lobby_code
    }

    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> MatchPhase {
        self.lifecycle.phase()
    }

    pub fn role(&self) -> Role {
        self.local.role()
    }

    pub fn is_host(&self) -> bool {
        self.local.is_host()
    }

    pub fn local(&self) -> &Player {
        &self.local
    }

    pub fn opponent(&self) -> &Player {
        &self.opponent
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn is_terminal(&self) -> bool {
        self.lifecycle.is_terminal()
    }

    /// Check if an early ready notice is waiting for the local commit.
    pub fn has_pending_ready(&self) -> bool {
        self.pending_ready.is_some()
    }

    /// True between the local commit and the opponent's board arriving.
    pub fn awaiting_opponent(&self) -> bool {
        self.phase() == MatchPhase::AwaitingBothReady && !self.opponent.is_ready
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.ready_at
    }

    pub fn in_game_at(&self) -> Option<DateTime<Utc>> {
        self.in_game_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Topics this session must be subscribed to right now.
    ///
    /// Lobby-scoped topics are needed from the start. The name-scoped ready
    /// topic is only known once negotiation has assigned the local name.
    pub fn subscriptions(&self) -> Vec<Topic> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut topics = Topic::lobby_scoped(&self.lobby.lobby_code).to_vec();
        if let Some(name) = &self.local.name {
            topics.push(Topic::ready_for(name));
        }
        topics
    }

    /// Subscribe actions for a fresh (or re-established) connection.
    pub fn connect(&self) -> Vec<SessionAction> {
        self.subscriptions()
            .into_iter()
            .map(SessionAction::Subscribe)
            .collect()
    }

    /// Build the start command. Only the host may start, and only once the
    /// session is still waiting for the start broadcast.
    pub fn start_command(&self) -> Result<StartCommand, SessionError> {
        self.ensure_live()?;
        if !self.is_host() {
            return Err(SessionError::NotHost);
        }
        self.lifecycle.apply(PhaseEvent::StartReceived)?;
        Ok(self.lobby.start_command())
    }

    /// Apply a decoded inbound message.
    ///
    /// Protocol errors are logged and dropped here; they never reach the
    /// caller. Once aborted, every message is ignored.
    pub fn apply(&mut self, inbound: Inbound) -> Vec<SessionAction> {
        if self.is_terminal() {
            debug!(
                lobby = %self.lobby.lobby_code,
                kind = inbound.kind(),
                "message after abort ignored"
            );
            return Vec::new();
        }

        let kind = inbound.kind();
        let result = match inbound {
            Inbound::Start {
                lobby_code,
                payload,
            } => self.handle_start(&lobby_code, payload),
            Inbound::Ready { recipient, payload } => self.handle_ready(&recipient, payload),
            Inbound::Leave { lobby_code } => self.handle_leave(&lobby_code),
        };

        match result {
            Ok(actions) => actions,
            Err(err) => {
                warn!(lobby = %self.lobby.lobby_code, kind, error = %err, "dropping inbound message");
                Vec::new()
            }
        }
    }

    // ---- Role/turn negotiation ----

    fn handle_start(
        &mut self,
        lobby_code: &str,
        payload: StartBroadcast,
    ) -> Result<Vec<SessionAction>, ProtocolError> {
        self.check_lobby(lobby_code)?;

        if self.phase() != MatchPhase::AwaitingStart {
            debug!(lobby = %self.lobby.lobby_code, "duplicate start broadcast ignored");
            return Ok(Vec::new());
        }
        if !payload.is_complete() {
            return Err(ProtocolError::IncompleteStart);
        }

        let seat = self.role().seat();
        let StartBroadcast {
            player1_id,
            player1_name,
            player2_id,
            player2_name,
        } = payload;
        let ((own_id, own_name), (their_id, their_name), their_seat) = match seat {
            Seat::Player1 => ((player1_id, player1_name), (player2_id, player2_name), Seat::Player2),
            Seat::Player2 => ((player2_id, player2_name), (player1_id, player1_name), Seat::Player1),
        };

        if own_id != self.user.id {
            return Err(ProtocolError::SeatMismatch(self.user.id.clone()));
        }

        let ready_topic = Topic::ready_for(&own_name);
        self.local.assign_seat(seat, own_id, own_name);
        self.opponent.assign_seat(their_seat, their_id, their_name);

        let mut actions = vec![SessionAction::Subscribe(ready_topic)];
        self.transition(PhaseEvent::StartReceived, &mut actions);
        self.started_at = Some(Utc::now());

        info!(
            lobby = %self.lobby.lobby_code,
            %seat,
            my_turn = self.local.is_my_turn,
            "roles assigned"
        );
        actions.push(SessionAction::Notify(SessionNotice::RolesAssigned {
            seat,
            my_turn: self.local.is_my_turn,
        }));

        Ok(actions)
    }

    // ---- Readiness handshake ----

    fn handle_ready(
        &mut self,
        recipient: &str,
        notice: ReadyNotice,
    ) -> Result<Vec<SessionAction>, ProtocolError> {
        self.check_lobby(&notice.game_id)?;

        if let Some(name) = &self.local.name {
            if name != recipient {
                return Err(ProtocolError::Misaddressed(recipient.to_string()));
            }
        }

        match self.phase() {
            MatchPhase::AwaitingStart | MatchPhase::SetupInProgress => {
                if self.pending_ready.is_some() {
                    debug!(lobby = %self.lobby.lobby_code, "duplicate early ready notice dropped");
                } else {
                    debug!(
                        lobby = %self.lobby.lobby_code,
                        sender = %notice.player_id,
                        "ready notice buffered until local commit"
                    );
                    self.pending_ready = Some(notice);
                }
                Ok(Vec::new())
            }
            MatchPhase::AwaitingBothReady => self.commit_opponent(notice),
            MatchPhase::InGame | MatchPhase::Aborted => {
                debug!(lobby = %self.lobby.lobby_code, "redundant ready notice ignored");
                Ok(Vec::new())
            }
        }
    }

    fn commit_opponent(&mut self, notice: ReadyNotice) -> Result<Vec<SessionAction>, ProtocolError> {
        if self.opponent.is_ready {
            debug!(lobby = %self.lobby.lobby_code, "opponent already committed");
            return Ok(Vec::new());
        }
        // Display names may collide; only the id identifies the sender
        if self.opponent.id.as_deref() != Some(notice.player_id.as_str()) {
            return Err(ProtocolError::UnexpectedSender(notice.player_id));
        }

        let board = Board::from_wire(&notice.player_board)?;
        if board.size() != self.config.grid_size {
            return Err(BoardError::InvalidSize(board.size()).into());
        }

        info!(
            lobby = %self.lobby.lobby_code,
            sender = %notice.player_id,
            ships = board.ship_count(),
            "opponent committed board"
        );
        self.opponent.commit_remote(board, notice.player_avatar);

        let mut actions = vec![SessionAction::Notify(SessionNotice::OpponentReady)];
        self.try_enter_game(&mut actions);
        Ok(actions)
    }

    fn try_enter_game(&mut self, actions: &mut Vec<SessionAction>) {
        if self.local.is_ready
            && self.opponent.is_ready
            && self.phase() == MatchPhase::AwaitingBothReady
        {
            self.transition(PhaseEvent::BothReady, actions);
            self.in_game_at = Some(Utc::now());
        }
    }

    /// Commit the local board and notify the opponent.
    ///
    /// Replays a buffered early ready notice, so the session may reach
    /// InGame within this call.
    pub fn mark_ready(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.ensure_live()?;
        self.lifecycle.apply(PhaseEvent::LocalReady)?;

        let remaining = self.local.ships_remaining();
        if remaining > 0 {
            return Err(SessionError::FleetIncomplete { remaining });
        }

        let (Some(player_id), Some(player_name), Some(opponent_name)) = (
            self.local.id.clone(),
            self.local.name.clone(),
            self.opponent.name.clone(),
        ) else {
            return Err(SessionError::RolesUnassigned);
        };

        let player_board = self
            .local
            .board
            .to_wire()
            .map_err(|e| SessionError::Encode(e.to_string()))?;

        let notice = ReadyNotice {
            game_id: self.lobby.lobby_code.clone(),
            player_id,
            player_name,
            player_board,
            player_avatar: self.local.avatar.clone(),
        };

        self.local.is_ready = true;
        for ship in &mut self.local.ships {
            ship.is_held = false;
        }

        let mut actions = vec![SessionAction::Publish {
            topic: Topic::ready_for(&opponent_name),
            message: Outbound::Ready(notice),
        }];
        self.transition(PhaseEvent::LocalReady, &mut actions);
        self.ready_at = Some(Utc::now());

        if let Some(early) = self.pending_ready.take() {
            debug!(lobby = %self.lobby.lobby_code, "replaying buffered ready notice");
            match self.commit_opponent(early) {
                Ok(more) => actions.extend(more),
                Err(err) => {
                    warn!(lobby = %self.lobby.lobby_code, error = %err, "buffered ready notice rejected")
                }
            }
        }

        Ok(actions)
    }

    // ---- Ship placement ----

    /// Pick up an unplaced ship with the current orientation.
    pub fn select_ship(&mut self, ship_id: ShipId) -> Result<(), SessionError> {
        self.ensure_setup()?;
        self.local.select_ship(ship_id, self.orientation)?;
        Ok(())
    }

    /// Flip the placement direction and the held ship with it.
    pub fn toggle_orientation(&mut self) -> Result<Orientation, SessionError> {
        self.ensure_setup()?;
        self.orientation = self.orientation.toggled();
        self.local.orient_held(self.orientation);
        Ok(self.orientation)
    }

    /// Place the held ship anchored at `(row, col)`.
    ///
    /// An invalid placement leaves the board untouched and the ship held.
    pub fn place_ship(&mut self, row: usize, col: usize) -> Result<ShipId, SessionError> {
        self.ensure_setup()?;
        let id = self
            .local
            .place_held(Position::new(row, col), self.orientation)?;
        debug!(
            lobby = %self.lobby.lobby_code,
            ship = id,
            row,
            col,
            remaining = self.local.ships_remaining(),
            "ship placed"
        );
        Ok(id)
    }

    // ---- Disconnect monitor ----

    fn handle_leave(&mut self, lobby_code: &str) -> Result<Vec<SessionAction>, ProtocolError> {
        self.check_lobby(lobby_code)?;
        Ok(self.abort(AbortReason::OpponentLeft))
    }

    /// The established transport dropped.
    pub fn transport_lost(&mut self) -> Vec<SessionAction> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.abort(AbortReason::ConnectionLost)
    }

    /// Intentional exit: announce the departure, then release everything.
    pub fn exit(&mut self) -> Vec<SessionAction> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut actions = vec![SessionAction::Publish {
            topic: Topic::leave(&self.lobby.lobby_code),
            message: Outbound::Leave,
        }];
        actions.extend(self.abort(AbortReason::LocalExit));
        actions
    }

    fn abort(&mut self, reason: AbortReason) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::ReleaseAll];
        self.transition(PhaseEvent::Abort, &mut actions);
        self.abort_reason = Some(reason);
        self.ended_at = Some(Utc::now());
        self.pending_ready = None;
        for ship in &mut self.local.ships {
            ship.is_held = false;
        }

        actions.push(SessionAction::Notify(SessionNotice::Aborted { reason }));
        actions
    }

    // ---- Helpers ----

    fn transition(&mut self, event: PhaseEvent, actions: &mut Vec<SessionAction>) {
        let from = self.phase();
        match self.lifecycle.apply_mut(event) {
            Ok(()) => {
                let to = self.phase();
                info!(lobby = %self.lobby.lobby_code, %from, %to, "phase changed");
                actions.push(SessionAction::Notify(SessionNotice::PhaseChanged { from, to }));
            }
            Err(err) => {
                warn!(lobby = %self.lobby.lobby_code, error = %err, "transition rejected");
            }
        }
    }

    fn check_lobby(&self, lobby_code: &str) -> Result<(), ProtocolError> {
        if lobby_code == self.lobby.lobby_code {
            Ok(())
        } else {
            Err(ProtocolError::StaleMatch {
                expected: self.lobby.lobby_code.clone(),
                actual: lobby_code.to_string(),
            })
        }
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_terminal() {
            Err(SessionError::Aborted)
        } else {
            Ok(())
        }
    }

    fn ensure_setup(&self) -> Result<(), SessionError> {
        self.ensure_live()?;
        match self.phase() {
            MatchPhase::SetupInProgress => Ok(()),
            phase => Err(SessionError::PlacementClosed(phase)),
        }
    }

    /// Observable view for the presentation layer.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            lobby_code: self.lobby.lobby_code.clone(),
            phase: self.phase(),
            abort_reason: self.abort_reason,
            local: self.local.clone(),
            opponent: self.opponent.clone(),
            orientation: self.orientation,
            ships_remaining: self.local.ships_remaining(),
            awaiting_opponent: self.awaiting_opponent(),
            can_mark_ready: self.phase() == MatchPhase::SetupInProgress
                && self.local.fleet_placed(),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub lobby_code: String,
    pub phase: MatchPhase,
    pub abort_reason: Option<AbortReason>,
    pub local: Player,
    pub opponent: Player,
    pub orientation: Orientation,
    pub ships_remaining: usize,
    /// Waiting indicator after the local commit
    pub awaiting_opponent: bool,
    /// Gate for the ready affordance
    pub can_mark_ready: bool,
}

impl SessionSnapshot {
    pub fn is_in_game(&self) -> bool {
        self.phase == MatchPhase::InGame
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "lobby_code": self.lobby_code,
            "phase": self.phase.as_str(),
            "abort_reason": self.abort_reason.map(|r| r.as_str()),
            "orientation": self.orientation.as_str(),
            "ships_remaining": self.ships_remaining,
            "awaiting_opponent": self.awaiting_opponent,
            "can_mark_ready": self.can_mark_ready,
            "self": self.local.to_json(),
            "opponent": self.opponent.to_json()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::board::{ShipKind, STANDARD_FLEET};
    use pretty_assertions::assert_eq;

    fn lobby() -> Lobby {
        Lobby::new("AB12", "h1", "Ann").with_joiner("j1", "Bo")
    }

    fn host() -> MatchSession {
        MatchSession::open("AB12", lobby(), LocalUser::new("h1"), SessionConfig::default()).unwrap()
    }

    fn joiner() -> MatchSession {
        MatchSession::open(
            "AB12",
            lobby(),
            LocalUser::new("j1").with_avatar("bo.png"),
            SessionConfig::default(),
        )
        .unwrap()
    }

    fn start_msg() -> Inbound {
        Inbound::Start {
            lobby_code: "AB12".into(),
            payload: StartBroadcast {
                player1_id: "h1".into(),
                player1_name: "Ann".into(),
                player2_id: "j1".into(),
                player2_name: "Bo".into(),
            },
        }
    }

    /// Place the standard fleet, one ship per row.
    fn place_fleet(session: &mut MatchSession) {
        for id in 1..=STANDARD_FLEET.len() as ShipId {
            session.select_ship(id).unwrap();
            session.place_ship(id as usize - 1, 0).unwrap();
        }
    }

    fn ready_notice_from(actions: &[SessionAction]) -> (Topic, ReadyNotice) {
        actions
            .iter()
            .find_map(|a| match a {
                SessionAction::Publish {
                    topic,
                    message: Outbound::Ready(notice),
                } => Some((topic.clone(), notice.clone())),
                _ => None,
            })
            .expect("ready publish")
    }

    fn deliver(session: &mut MatchSession, topic: &Topic, notice: ReadyNotice) -> Vec<SessionAction> {
        session.apply(Inbound::Ready {
            recipient: topic.key().to_string(),
            payload: notice,
        })
    }

    fn set_up(session: &mut MatchSession) {
        session.apply(start_msg());
        place_fleet(session);
    }

    #[test]
    fn test_open_rejects_lobby_mismatch() {
        let err = MatchSession::open("ZZ99", lobby(), LocalUser::new("h1"), SessionConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::LobbyMismatch {
                expected: "ZZ99".into(),
                actual: "AB12".into()
            }
        );
    }

    #[test]
    fn test_open_rejects_stranger_and_bad_config() {
        let err = MatchSession::open("AB12", lobby(), LocalUser::new("x9"), SessionConfig::default())
            .unwrap_err();
        assert_eq!(err, SessionError::NotAParticipant("x9".into()));

        let err = MatchSession::open(
            "AB12",
            lobby(),
            LocalUser::new("h1"),
            SessionConfig::default().with_fleet(Vec::new()),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_initial_subscriptions_are_lobby_scoped() {
        let session = host();
        assert_eq!(session.phase(), MatchPhase::AwaitingStart);
        assert_eq!(
            session.connect(),
            vec![
                SessionAction::Subscribe(Topic::start("AB12")),
                SessionAction::Subscribe(Topic::leave("AB12")),
            ]
        );
    }

    #[test]
    fn test_start_command_host_only() {
        assert_eq!(
            host().start_command().unwrap(),
            StartCommand {
                lobby_code: "AB12".into(),
                host_id: "h1".into()
            }
        );
        assert_eq!(joiner().start_command(), Err(SessionError::NotHost));

        let mut started = host();
        started.apply(start_msg());
        assert!(matches!(
            started.start_command(),
            Err(SessionError::Transition(_))
        ));
    }

    #[test]
    fn test_negotiation_host_scenario() {
        let mut session = host();
        let actions = session.apply(start_msg());

        assert_eq!(session.phase(), MatchPhase::SetupInProgress);
        assert_eq!(session.local().id.as_deref(), Some("h1"));
        assert_eq!(session.local().name.as_deref(), Some("Ann"));
        assert!(session.local().is_my_turn);
        assert_eq!(session.opponent().name.as_deref(), Some("Bo"));
        assert!(!session.opponent().is_my_turn);
        assert!(session.started_at().is_some());

        assert_eq!(
            actions,
            vec![
                SessionAction::Subscribe(Topic::ready_for("Ann")),
                SessionAction::Notify(SessionNotice::PhaseChanged {
                    from: MatchPhase::AwaitingStart,
                    to: MatchPhase::SetupInProgress
                }),
                SessionAction::Notify(SessionNotice::RolesAssigned {
                    seat: Seat::Player1,
                    my_turn: true
                }),
            ]
        );
        assert!(session.subscriptions().contains(&Topic::ready_for("Ann")));
    }

    #[test]
    fn test_negotiation_joiner_scenario() {
        let mut session = joiner();
        session.apply(start_msg());

        assert_eq!(session.local().id.as_deref(), Some("j1"));
        assert_eq!(session.local().name.as_deref(), Some("Bo"));
        assert!(!session.local().is_my_turn);
        assert_eq!(session.local().seat(), Some(Seat::Player2));
        assert!(session.opponent().is_my_turn);
    }

    #[test]
    fn test_start_rejections() {
        let mut session = host();
        let stale = Inbound::Start {
            lobby_code: "OLD1".into(),
            payload: StartBroadcast {
                player1_id: "h1".into(),
                player1_name: "Ann".into(),
                player2_id: "j1".into(),
                player2_name: "Bo".into(),
            },
        };
        assert!(session.apply(stale).is_empty());

        let swapped = Inbound::Start {
            lobby_code: "AB12".into(),
            payload: StartBroadcast {
                player1_id: "j1".into(),
                player1_name: "Bo".into(),
                player2_id: "h1".into(),
                player2_name: "Ann".into(),
            },
        };
        assert!(session.apply(swapped).is_empty());
        assert_eq!(session.phase(), MatchPhase::AwaitingStart);
        assert!(session.local().seat().is_none());
    }

    #[test]
    fn test_duplicate_start_is_noop() {
        let mut session = host();
        session.apply(start_msg());
        let before = session.snapshot();
        assert!(session.apply(start_msg()).is_empty());
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn test_placement_requires_setup_phase() {
        let mut session = host();
        assert_eq!(
            session.select_ship(1),
            Err(SessionError::PlacementClosed(MatchPhase::AwaitingStart))
        );

        session.apply(start_msg());
        session.select_ship(1).unwrap();
        assert_eq!(session.toggle_orientation().unwrap(), Orientation::Vertical);
        assert_eq!(session.place_ship(0, 0).unwrap(), 1);
        assert_eq!(session.local().ships[0].orientation, Orientation::Vertical);

        // Ship 2 vertical at (0, 0) overlaps ship 1
        session.select_ship(2).unwrap();
        let board_before = session.local().board.clone();
        assert!(matches!(
            session.place_ship(0, 0),
            Err(SessionError::Board(BoardError::Overlap { .. }))
        ));
        assert_eq!(session.local().board, board_before);
        assert_eq!(session.local().held_ship().map(|s| s.id), Some(2));
    }

    #[test]
    fn test_mark_ready_requires_full_fleet() {
        let mut session = host();
        assert!(matches!(
            session.mark_ready(),
            Err(SessionError::Transition(_))
        ));

        session.apply(start_msg());
        session.select_ship(1).unwrap();
        session.place_ship(0, 0).unwrap();
        assert_eq!(
            session.mark_ready(),
            Err(SessionError::FleetIncomplete { remaining: 4 })
        );
        assert!(!session.snapshot().can_mark_ready);
    }

    #[test]
    fn test_mark_ready_publishes_to_opponent() {
        let mut session = host();
        set_up(&mut session);
        assert!(session.snapshot().can_mark_ready);

        let actions = session.mark_ready().unwrap();
        let (topic, notice) = ready_notice_from(&actions);
        assert_eq!(topic, Topic::ready_for("Bo"));
        assert_eq!(notice.game_id, "AB12");
        assert_eq!(notice.player_id, "h1");
        assert_eq!(notice.player_name, "Ann");
        assert_eq!(Board::from_wire(&notice.player_board).unwrap(), session.local().board);

        assert_eq!(session.phase(), MatchPhase::AwaitingBothReady);
        assert!(session.local().is_ready);
        assert!(session.awaiting_opponent());
        assert!(session.snapshot().awaiting_opponent);

        assert_eq!(session.mark_ready(), Err(SessionError::Transition(
            crate::state::lifecycle::InvalidTransition {
                from: MatchPhase::AwaitingBothReady,
                event: PhaseEvent::LocalReady,
                reason: "Already ready",
            }
        )));
    }

    #[test]
    fn test_ready_exchange_reaches_in_game() {
        let mut ann = host();
        let mut bo = joiner();
        set_up(&mut ann);
        set_up(&mut bo);

        let (to_bo, ann_notice) = ready_notice_from(&ann.mark_ready().unwrap());
        let (to_ann, bo_notice) = ready_notice_from(&bo.mark_ready().unwrap());

        let actions = deliver(&mut bo, &to_bo, ann_notice);
        assert!(actions.contains(&SessionAction::Notify(SessionNotice::OpponentReady)));
        deliver(&mut ann, &to_ann, bo_notice);

        assert_eq!(ann.phase(), MatchPhase::InGame);
        assert_eq!(bo.phase(), MatchPhase::InGame);
        assert_eq!(bo.opponent().board, ann.local().board);
        assert_eq!(ann.opponent().avatar.as_deref(), Some("bo.png"));
        assert!(ann.local().is_my_turn ^ ann.opponent().is_my_turn);
        assert!(!ann.awaiting_opponent());
        assert!(ann.in_game_at().is_some());
    }

    #[test]
    fn test_early_ready_is_buffered_and_replayed() {
        let mut ann = host();
        let mut bo = joiner();
        set_up(&mut ann);
        set_up(&mut bo);

        let (to_ann, bo_notice) = ready_notice_from(&bo.mark_ready().unwrap());
        assert!(deliver(&mut ann, &to_ann, bo_notice.clone()).is_empty());
        assert!(ann.has_pending_ready());
        assert!(!ann.opponent().is_ready);

        // A duplicate does not displace the first buffered notice
        let mut dup = bo_notice;
        dup.player_avatar = Some("other.png".into());
        deliver(&mut ann, &to_ann, dup);

        let actions = ann.mark_ready().unwrap();
        assert_eq!(ann.phase(), MatchPhase::InGame);
        assert!(!ann.has_pending_ready());
        assert_eq!(ann.opponent().avatar.as_deref(), Some("bo.png"));
        assert!(actions.contains(&SessionAction::Notify(SessionNotice::PhaseChanged {
            from: MatchPhase::AwaitingBothReady,
            to: MatchPhase::InGame
        })));
    }

    #[test]
    fn test_ready_before_start_is_buffered() {
        let mut ann = host();
        let mut bo = joiner();
        set_up(&mut bo);
        let (to_ann, bo_notice) = ready_notice_from(&bo.mark_ready().unwrap());

        deliver(&mut ann, &to_ann, bo_notice);
        assert!(ann.has_pending_ready());

        set_up(&mut ann);
        ann.mark_ready().unwrap();
        assert_eq!(ann.phase(), MatchPhase::InGame);
    }

    #[test]
    fn test_ready_rejections() {
        let mut ann = host();
        let mut bo = joiner();
        set_up(&mut ann);
        set_up(&mut bo);
        ann.mark_ready().unwrap();
        let (to_ann, bo_notice) = ready_notice_from(&bo.mark_ready().unwrap());

        let mut stale = bo_notice.clone();
        stale.game_id = "OLD1".into();
        assert!(deliver(&mut ann, &to_ann, stale).is_empty());

        let mut impostor = bo_notice.clone();
        impostor.player_id = "x9".into();
        assert!(deliver(&mut ann, &to_ann, impostor).is_empty());

        // Own notice echoed back on a shared topic
        let mut echo = bo_notice.clone();
        echo.player_id = "h1".into();
        echo.player_name = "Ann".into();
        assert!(deliver(&mut ann, &to_ann, echo).is_empty());

        assert!(deliver(&mut ann, &Topic::ready_for("Bo"), bo_notice.clone()).is_empty());

        let mut garbage = bo_notice.clone();
        garbage.player_board = "not a board".into();
        assert!(deliver(&mut ann, &to_ann, garbage).is_empty());

        assert!(!ann.opponent().is_ready);
        assert_eq!(ann.phase(), MatchPhase::AwaitingBothReady);

        deliver(&mut ann, &to_ann, bo_notice.clone());
        assert_eq!(ann.phase(), MatchPhase::InGame);

        // Redundant after InGame
        let before = ann.snapshot();
        assert!(deliver(&mut ann, &to_ann, bo_notice).is_empty());
        assert_eq!(ann.snapshot(), before);
    }

    #[test]
    fn test_same_display_names_reach_in_game() {
        let lobby = Lobby::new("AB12", "h1", "Sam").with_joiner("j1", "Sam");
        let start = Inbound::Start {
            lobby_code: "AB12".into(),
            payload: StartBroadcast {
                player1_id: "h1".into(),
                player1_name: "Sam".into(),
                player2_id: "j1".into(),
                player2_name: "Sam".into(),
            },
        };
        let open = |user: &str| {
            let mut session =
                MatchSession::open("AB12", lobby.clone(), LocalUser::new(user), SessionConfig::default())
                    .unwrap();
            session.apply(start.clone());
            place_fleet(&mut session);
            session
        };
        let mut host = open("h1");
        let mut joiner = open("j1");

        let (to_joiner, host_notice) = ready_notice_from(&host.mark_ready().unwrap());
        let (to_host, joiner_notice) = ready_notice_from(&joiner.mark_ready().unwrap());
        assert_eq!(to_joiner, to_host);

        // Both subscribe to ready/Sam, so each also sees its own notice
        assert!(deliver(&mut host, &to_host, host_notice.clone()).is_empty());
        assert!(deliver(&mut joiner, &to_joiner, joiner_notice.clone()).is_empty());
        assert_eq!(host.phase(), MatchPhase::AwaitingBothReady);

        deliver(&mut host, &to_host, joiner_notice);
        deliver(&mut joiner, &to_joiner, host_notice);
        assert_eq!(host.phase(), MatchPhase::InGame);
        assert_eq!(joiner.phase(), MatchPhase::InGame);
        assert!(host.local().is_my_turn);
        assert!(!joiner.local().is_my_turn);
    }

    #[test]
    fn test_wrong_grid_size_rejected() {
        let mut ann = host();
        set_up(&mut ann);
        ann.mark_ready().unwrap();

        let mut small = Board::new(8);
        small
            .place(crate::state::board::Placement {
                ship_id: 1,
                kind: ShipKind::Destroyer,
                anchor: Position::new(0, 0),
                orientation: Orientation::Horizontal,
            })
            .unwrap();
        let notice = ReadyNotice {
            game_id: "AB12".into(),
            player_id: "j1".into(),
            player_name: "Bo".into(),
            player_board: small.to_wire().unwrap(),
            player_avatar: None,
        };
        assert!(deliver(&mut ann, &Topic::ready_for("Ann"), notice).is_empty());
        assert!(!ann.opponent().is_ready);
    }

    #[test]
    fn test_leave_aborts_and_absorbs() {
        let mut session = host();
        session.apply(start_msg());

        let actions = session.apply(Inbound::Leave {
            lobby_code: "AB12".into(),
        });
        assert_eq!(
            actions,
            vec![
                SessionAction::ReleaseAll,
                SessionAction::Notify(SessionNotice::PhaseChanged {
                    from: MatchPhase::SetupInProgress,
                    to: MatchPhase::Aborted
                }),
                SessionAction::Notify(SessionNotice::Aborted {
                    reason: AbortReason::OpponentLeft
                }),
            ]
        );
        assert_eq!(session.abort_reason(), Some(AbortReason::OpponentLeft));
        assert!(session.subscriptions().is_empty());

        let before = session.snapshot();
        assert!(session.apply(start_msg()).is_empty());
        assert!(session
            .apply(Inbound::Leave {
                lobby_code: "AB12".into()
            })
            .is_empty());
        assert!(session.transport_lost().is_empty());
        assert!(session.exit().is_empty());
        assert_eq!(session.snapshot(), before);

        assert_eq!(session.select_ship(1), Err(SessionError::Aborted));
        assert_eq!(session.mark_ready(), Err(SessionError::Aborted));
        assert_eq!(session.start_command(), Err(SessionError::Aborted));
    }

    #[test]
    fn test_leave_for_other_lobby_ignored() {
        let mut session = host();
        assert!(session
            .apply(Inbound::Leave {
                lobby_code: "OLD1".into()
            })
            .is_empty());
        assert_eq!(session.phase(), MatchPhase::AwaitingStart);
    }

    #[test]
    fn test_exit_publishes_leave_before_release() {
        let mut session = joiner();
        session.apply(start_msg());
        let actions = session.exit();

        assert_eq!(
            actions[0],
            SessionAction::Publish {
                topic: Topic::leave("AB12"),
                message: Outbound::Leave
            }
        );
        assert_eq!(actions[1], SessionAction::ReleaseAll);
        assert_eq!(session.abort_reason(), Some(AbortReason::LocalExit));
        assert!(session.ended_at().is_some());
    }

    #[test]
    fn test_transport_lost() {
        let mut session = host();
        let actions = session.transport_lost();
        assert!(actions.contains(&SessionAction::Notify(SessionNotice::Aborted {
            reason: AbortReason::ConnectionLost
        })));
        assert_eq!(session.phase(), MatchPhase::Aborted);
    }

    #[test]
    fn test_snapshot_json() {
        let mut session = host();
        session.apply(start_msg());
        let json = session.snapshot().to_json();

        assert_eq!(json["phase"], "setup_in_progress");
        assert_eq!(json["ships_remaining"], 5);
        assert_eq!(json["self"]["name"], "Ann");
        assert_eq!(json["self"]["is_my_turn"], true);
        assert_eq!(json["opponent"]["name"], "Bo");
        assert_eq!(json["abort_reason"], serde_json::Value::Null);
    }
}
