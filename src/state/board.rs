//! Board and fleet state.
//!
//! A board is a square grid of cells, each either empty or occupied by a
//! single ship. Ships are placed whole, by anchor cell and orientation, and a
//! placement is never retracted.
//!
//! The wire encoding only carries the grid size and the placement list; the
//! cells are rebuilt on decode by replaying the placements, so a decoded
//! board passes the same overlap and bounds checks as a locally built one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default grid dimension.
pub const DEFAULT_GRID_SIZE: usize = 10;

/// Largest grid accepted from the wire.
pub const MAX_GRID_SIZE: usize = 26;

/// Ship identifier, unique within one player's fleet.
pub type ShipId = u32;

/// Grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Check if position lies inside a grid of the given size.
    pub fn is_within(&self, size: usize) -> bool {
        self.row < size && self.col < size
    }

    /// Position `step` cells away along an orientation.
    pub fn step(&self, orientation: Orientation, step: usize) -> Self {
        match orientation {
            Orientation::Horizontal => Self::new(self.row, self.col.saturating_add(step)),
            Orientation::Vertical => Self::new(self.row.saturating_add(step), self.col),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Placement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

impl Orientation {
    pub fn toggled(self) -> Self {
        match self {
            Self::Horizontal => Self::Vertical,
            Self::Vertical => Self::Horizontal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }
}

/// Ship classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipKind {
    Carrier,
    Battleship,
    Cruiser,
    Submarine,
    Destroyer,
}

impl ShipKind {
    /// Number of cells the ship covers.
    pub fn length(&self) -> usize {
        match self {
            Self::Carrier => 5,
            Self::Battleship => 4,
            Self::Cruiser | Self::Submarine => 3,
            Self::Destroyer => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Carrier => "carrier",
            Self::Battleship => "battleship",
            Self::Cruiser => "cruiser",
            Self::Submarine => "submarine",
            Self::Destroyer => "destroyer",
        }
    }
}

/// Standard five-ship fleet.
pub const STANDARD_FLEET: [ShipKind; 5] = [
    ShipKind::Carrier,
    ShipKind::Battleship,
    ShipKind::Cruiser,
    ShipKind::Submarine,
    ShipKind::Destroyer,
];

/// A ship in a player's fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ship {
    pub id: ShipId,
    pub kind: ShipKind,
    pub length: usize,
    pub orientation: Orientation,
    /// Selected for placement
    pub is_held: bool,
    /// Set once the ship is committed to the board
    pub anchor: Option<Position>,
}

impl Ship {
    pub fn new(id: ShipId, kind: ShipKind) -> Self {
        Self {
            id,
            kind,
            length: kind.length(),
            orientation: Orientation::Horizontal,
            is_held: false,
            anchor: None,
        }
    }

    pub fn is_placed(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": self.kind.as_str(),
            "length": self.length,
            "orientation": self.orientation.as_str(),
            "is_held": self.is_held,
            "anchor": self.anchor.map(|p| serde_json::json!({"row": p.row, "col": p.col}))
        })
    }
}

/// Build an unplaced fleet with ids numbered from 1.
pub fn build_fleet(kinds: &[ShipKind]) -> Vec<Ship> {
    kinds
        .iter()
        .zip(1..)
        .map(|(kind, id)| Ship::new(id, *kind))
        .collect()
}

/// A committed ship placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub ship_id: ShipId,
    pub kind: ShipKind,
    pub anchor: Position,
    pub orientation: Orientation,
}

impl Placement {
    /// Cells covered by this placement.
    pub fn cells(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.kind.length()).map(move |i| self.anchor.step(self.orientation, i))
    }
}

/// A single grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Occupied(ShipId),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Square game board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    size: usize,
    /// Row-major cells
    cells: Vec<Cell>,
    /// Placements in the order they were made
    placements: Vec<Placement>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}

/// Wire shape of a board.
#[derive(Debug, Serialize, Deserialize)]
struct WireBoard {
    size: usize,
    ships: Vec<Placement>,
}

impl Board {
    /// Create an empty board.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![Cell::Empty; size * size],
            placements: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Get cell at position.
    pub fn cell(&self, pos: Position) -> Option<Cell> {
        if pos.is_within(self.size) {
            Some(self.cells[pos.row * self.size + pos.col])
        } else {
            None
        }
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn ship_count(&self) -> usize {
        self.placements.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Check a placement without applying it.
    pub fn check(&self, placement: &Placement) -> Result<(), BoardError> {
        if self.placements.iter().any(|p| p.ship_id == placement.ship_id) {
            return Err(BoardError::AlreadyPlaced(placement.ship_id));
        }

        for pos in placement.cells() {
            match self.cell(pos) {
                None => {
                    return Err(BoardError::OutOfBounds {
                        anchor: placement.anchor,
                        length: placement.kind.length(),
                        orientation: placement.orientation,
                    })
                }
                Some(Cell::Occupied(occupant)) => {
                    return Err(BoardError::Overlap { at: pos, occupant })
                }
                Some(Cell::Empty) => {}
            }
        }

        Ok(())
    }

    /// Commit a ship to the board. On error the board is left unchanged.
    pub fn place(&mut self, placement: Placement) -> Result<(), BoardError> {
        self.check(&placement)?;

        let size = self.size;
        for pos in placement.cells() {
            self.cells[pos.row * size + pos.col] = Cell::Occupied(placement.ship_id);
        }
        self.placements.push(placement);

        Ok(())
    }

    /// Ships reconstructed from the placements, all marked placed.
    pub fn ships(&self) -> Vec<Ship> {
        self.placements
            .iter()
            .map(|p| Ship {
                id: p.ship_id,
                kind: p.kind,
                length: p.kind.length(),
                orientation: p.orientation,
                is_held: false,
                anchor: Some(p.anchor),
            })
            .collect()
    }

    /// Encode for the ready notice.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireBoard {
            size: self.size,
            ships: self.placements.clone(),
        })
    }

    /// Decode a board received from the opponent, replaying every placement.
    pub fn from_wire(raw: &str) -> Result<Self, BoardError> {
        let wire: WireBoard =
            serde_json::from_str(raw).map_err(|e| BoardError::Malformed(e.to_string()))?;

        if wire.size == 0 || wire.size > MAX_GRID_SIZE {
            return Err(BoardError::InvalidSize(wire.size));
        }

        let mut board = Self::new(wire.size);
        for placement in wire.ships {
            board.place(placement)?;
        }
        Ok(board)
    }

    /// Convert grid to JSON rows (`null` for empty, ship id otherwise).
    pub fn grid_to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .cells
            .chunks(self.size.max(1))
            .map(|row| {
                let cells: Vec<serde_json::Value> = row
                    .iter()
                    .map(|c| match c {
                        Cell::Empty => serde_json::Value::Null,
                        Cell::Occupied(id) => serde_json::json!(id),
                    })
                    .collect();
                serde_json::Value::Array(cells)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

/// Board errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    OutOfBounds {
        anchor: Position,
        length: usize,
        orientation: Orientation,
    },
    Overlap {
        at: Position,
        occupant: ShipId,
    },
    AlreadyPlaced(ShipId),
    UnknownShip(ShipId),
    NoShipHeld,
    InvalidSize(usize),
    Malformed(String),
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds {
                anchor,
                length,
                orientation,
            } => write!(
                f,
                "Ship of length {} at {} ({}) leaves the grid",
                length,
                anchor,
                orientation.as_str()
            ),
            Self::Overlap { at, occupant } => {
                write!(f, "Cell {} is already occupied by ship {}", at, occupant)
            }
            Self::AlreadyPlaced(id) => write!(f, "Ship {} is already placed", id),
            Self::UnknownShip(id) => write!(f, "No ship with id {}", id),
            Self::NoShipHeld => write!(f, "No ship selected for placement"),
            Self::InvalidSize(size) => write!(f, "Invalid board size {}", size),
            Self::Malformed(reason) => write!(f, "Malformed board encoding: {}", reason),
        }
    }
}

impl std::error::Error for BoardError {}
