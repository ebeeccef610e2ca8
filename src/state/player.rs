//! Player state.
//!
//! Each session holds two players: the local one ("self") and the opponent.
//! The pre-match [`Role`] is fixed when the session is opened; the canonical
//! [`Seat`] is assigned exactly once, during role negotiation, and is
//! read-only afterwards.
//!
//! The local player edits its own board ship by ship during setup. The
//! opponent's board is only ever replaced wholesale by the snapshot carried
//! in the ready notice.

use serde::Serialize;
use std::fmt;

use super::board::{build_fleet, Board, BoardError, Orientation, Placement, Position, Ship, ShipId, ShipKind};

/// Pre-match role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Issues the start command
    Host,
    /// Waits for the host
    Joiner,
}

impl Role {
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Host => Self::Joiner,
            Self::Joiner => Self::Host,
        }
    }

    /// Canonical seat for this role: the host always plays as player 1.
    pub fn seat(&self) -> Seat {
        match self {
            Self::Host => Seat::Player1,
            Self::Joiner => Seat::Player2,
        }
    }
}

/// Canonical match seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Seat {
    Player1,
    Player2,
}

impl Seat {
    /// Player 1 takes the first turn.
    pub fn moves_first(&self) -> bool {
        matches!(self, Self::Player1)
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player1 => write!(f, "player1"),
            Self::Player2 => write!(f, "player2"),
        }
    }
}

/// The authenticated user on this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub avatar: Option<String>,
}

impl LocalUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            avatar: None,
        }
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// One side of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Match player id, unset until negotiation
    pub id: Option<String>,

    /// Display name, unset until negotiation
    pub name: Option<String>,

    role: Role,

    seat: Option<Seat>,

    /// Flips false -> true once per match
    pub is_ready: bool,

    pub is_my_turn: bool,

    pub board: Board,

    /// Fleet in order; placed ships carry an anchor
    pub ships: Vec<Ship>,

    pub avatar: Option<String>,
}

impl Player {
    /// Create the local player with an unplaced fleet.
    pub fn local(role: Role, grid_size: usize, fleet: &[ShipKind], avatar: Option<String>) -> Self {
        Self {
            id: None,
            name: None,
            role,
            seat: None,
            is_ready: false,
            is_my_turn: false,
            board: Board::new(grid_size),
            ships: build_fleet(fleet),
            avatar,
        }
    }

    /// Create the opponent placeholder; its board arrives later.
    pub fn opponent(role: Role, grid_size: usize) -> Self {
        Self {
            id: None,
            name: None,
            role,
            seat: None,
            is_ready: false,
            is_my_turn: false,
            board: Board::new(grid_size),
            ships: Vec::new(),
            avatar: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }

    pub fn seat(&self) -> Option<Seat> {
        self.seat
    }

    /// Assign identity and seat. Returns false if already assigned.
    pub(crate) fn assign_seat(&mut self, seat: Seat, id: String, name: String) -> bool {
        if self.seat.is_some() {
            return false;
        }
        self.seat = Some(seat);
        self.id = Some(id);
        self.name = Some(name);
        self.is_my_turn = seat.moves_first();
        true
    }

    /// Number of ships still to place.
    pub fn ships_remaining(&self) -> usize {
        self.ships.iter().filter(|s| !s.is_placed()).count()
    }

    pub fn fleet_placed(&self) -> bool {
        self.ships_remaining() == 0
    }

    /// Currently selected ship, if any.
    pub fn held_ship(&self) -> Option<&Ship> {
        self.ships.iter().find(|s| s.is_held)
    }

    /// Select an unplaced ship, releasing any other selection.
    pub fn select_ship(&mut self, ship_id: ShipId, orientation: Orientation) -> Result<(), BoardError> {
        let ship = self
            .ships
            .iter()
            .find(|s| s.id == ship_id)
            .ok_or(BoardError::UnknownShip(ship_id))?;
        if ship.is_placed() {
            return Err(BoardError::AlreadyPlaced(ship_id));
        }

        for ship in &mut self.ships {
            ship.is_held = ship.id == ship_id;
            if ship.is_held {
                ship.orientation = orientation;
            }
        }
        Ok(())
    }

    /// Re-orient the held ship (preview only).
    pub fn orient_held(&mut self, orientation: Orientation) {
        if let Some(ship) = self.ships.iter_mut().find(|s| s.is_held) {
            ship.orientation = orientation;
        }
    }

    /// Commit the held ship at an anchor cell.
    ///
    /// An invalid placement leaves both the board and the fleet unchanged.
    pub fn place_held(&mut self, anchor: Position, orientation: Orientation) -> Result<ShipId, BoardError> {
        let ship = self
            .ships
            .iter_mut()
            .find(|s| s.is_held)
            .ok_or(BoardError::NoShipHeld)?;

        self.board.place(Placement {
            ship_id: ship.id,
            kind: ship.kind,
            anchor,
            orientation,
        })?;

        ship.anchor = Some(anchor);
        ship.orientation = orientation;
        ship.is_held = false;
        Ok(ship.id)
    }

    /// Install the opponent's committed board.
    pub(crate) fn commit_remote(&mut self, board: Board, avatar: Option<String>) {
        self.ships = board.ships();
        self.board = board;
        self.avatar = avatar;
        self.is_ready = true;
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "is_host": self.is_host(),
            "seat": self.seat.map(|s| s.to_string()),
            "is_ready": self.is_ready,
            "is_my_turn": self.is_my_turn,
            "avatar": self.avatar,
            "ships": self.ships.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
            "ships_remaining": self.ships_remaining(),
            "board": self.board.grid_to_json()
        })
    }
}
