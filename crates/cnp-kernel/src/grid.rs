//! Grid model: positions, the bounded board, and the worker action set.
//!
//! Coordinates grow east (`x`) and south (`y`). The board is clamped, not
//! toroidal: a move that would leave the board is invalid.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A cell on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Position reached by applying `action`, or `None` if the action is not
    /// a move or the result falls outside `size`.
    pub fn apply_move(self, action: WorkerAction, size: GridSize) -> Option<Position> {
        let (dx, dy) = action.delta()?;
        let next = Position::new(self.x + dx, self.y + dy);
        size.contains(next).then_some(next)
    }

    /// Manhattan (L1) distance.
    pub fn manhattan(self, other: Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Chebyshev (L∞) distance: the hop count on an empty 8-connected board.
    pub fn chebyshev(self, other: Position) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// In-bounds 8-connected neighbours with the move that reaches each.
    pub fn neighbors(self, size: GridSize) -> impl Iterator<Item = (WorkerAction, Position)> {
        WorkerAction::DIRECTIONS
            .into_iter()
            .filter_map(move |action| self.apply_move(action, size).map(|p| (action, p)))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Board dimensions. Valid cells are `0..width` × `0..height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub width: i32,
    pub height: i32,
}

impl GridSize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn contains(self, p: Position) -> bool {
        (0..self.width).contains(&p.x) && (0..self.height).contains(&p.y)
    }

    /// Every cell on the board, row by row.
    pub fn cells(self) -> impl Iterator<Item = Position> {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Position::new(x, y)))
    }
}

/// The closed set of actions a worker may ask the server to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerAction {
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
    Take,
    Drop,
}

impl WorkerAction {
    /// The eight directional moves.
    pub const DIRECTIONS: [WorkerAction; 8] = [
        WorkerAction::North,
        WorkerAction::South,
        WorkerAction::East,
        WorkerAction::West,
        WorkerAction::NorthEast,
        WorkerAction::NorthWest,
        WorkerAction::SouthEast,
        WorkerAction::SouthWest,
    ];

    /// `(dx, dy)` for directional moves, `None` for TAKE and DROP.
    pub const fn delta(self) -> Option<(i32, i32)> {
        match self {
            WorkerAction::North => Some((0, -1)),
            WorkerAction::South => Some((0, 1)),
            WorkerAction::East => Some((1, 0)),
            WorkerAction::West => Some((-1, 0)),
            WorkerAction::NorthEast => Some((1, -1)),
            WorkerAction::NorthWest => Some((-1, -1)),
            WorkerAction::SouthEast => Some((1, 1)),
            WorkerAction::SouthWest => Some((-1, 1)),
            WorkerAction::Take | WorkerAction::Drop => None,
        }
    }

    /// The single move that goes from `from` to `to`, if they are adjacent.
    pub fn between(from: Position, to: Position) -> Option<WorkerAction> {
        let delta = (to.x - from.x, to.y - from.y);
        Self::DIRECTIONS
            .into_iter()
            .find(|action| action.delta() == Some(delta))
    }

    pub const fn is_move(self) -> bool {
        self.delta().is_some()
    }
}

impl fmt::Display for WorkerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerAction::North => "NORTH",
            WorkerAction::South => "SOUTH",
            WorkerAction::East => "EAST",
            WorkerAction::West => "WEST",
            WorkerAction::NorthEast => "NORTHEAST",
            WorkerAction::NorthWest => "NORTHWEST",
            WorkerAction::SouthEast => "SOUTHEAST",
            WorkerAction::SouthWest => "SOUTHWEST",
            WorkerAction::Take => "TAKE",
            WorkerAction::Drop => "DROP",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_move_stays_in_bounds() {
        let size = GridSize::new(3, 3);
        let corner = Position::new(0, 0);
        assert_eq!(corner.apply_move(WorkerAction::North, size), None);
        assert_eq!(corner.apply_move(WorkerAction::West, size), None);
        assert_eq!(
            corner.apply_move(WorkerAction::SouthEast, size),
            Some(Position::new(1, 1))
        );
        assert_eq!(
            Position::new(2, 2).apply_move(WorkerAction::SouthEast, size),
            None
        );
    }

    #[test]
    fn test_take_and_drop_are_not_moves() {
        let size = GridSize::new(3, 3);
        let p = Position::new(1, 1);
        assert_eq!(p.apply_move(WorkerAction::Take, size), None);
        assert_eq!(p.apply_move(WorkerAction::Drop, size), None);
        assert!(!WorkerAction::Take.is_move());
        assert!(WorkerAction::NorthWest.is_move());
    }

    #[test]
    fn test_between_inverts_delta() {
        let origin = Position::new(5, 5);
        for action in WorkerAction::DIRECTIONS {
            let next = origin.apply_move(action, GridSize::new(10, 10)).unwrap();
            assert_eq!(WorkerAction::between(origin, next), Some(action));
        }
        assert_eq!(WorkerAction::between(origin, Position::new(7, 5)), None);
        assert_eq!(WorkerAction::between(origin, origin), None);
    }

    #[test]
    fn test_distances() {
        let a = Position::new(0, 0);
        let b = Position::new(3, -2);
        assert_eq!(a.manhattan(b), 5);
        assert_eq!(a.chebyshev(b), 3);
    }

    #[test]
    fn test_neighbors_at_edge() {
        let size = GridSize::new(4, 4);
        assert_eq!(Position::new(0, 0).neighbors(size).count(), 3);
        assert_eq!(Position::new(0, 2).neighbors(size).count(), 5);
        assert_eq!(Position::new(2, 2).neighbors(size).count(), 8);
    }

    #[test]
    fn test_cells_cover_board() {
        let size = GridSize::new(3, 2);
        let cells: Vec<_> = size.cells().collect();
        assert_eq!(cells.len(), 6);
        assert!(cells.iter().all(|c| size.contains(*c)));
    }
}
