use serde::{Deserialize, Serialize};

pub mod agent;
pub mod brain;
pub mod config;
pub mod generator;
pub mod map;
pub mod stats;
pub mod storage;
pub mod terrain;
pub mod training;
pub mod world;

/// Represents a 2D coordinate on the grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Position { x, y }
    }

    /// Returns the neighbouring position in the direction of `action`,
    /// or `None` if it would leave a `size` x `size` grid.
    pub fn step(self, action: Action, size: usize) -> Option<Position> {
        let (dx, dy) = action.delta();
        let x = self.x.checked_add_signed(dx)?;
        let y = self.y.checked_add_signed(dy)?;
        if x < size && y < size {
            Some(Position { x, y })
        } else {
            None
        }
    }
}

/// The four cardinal moves available to the agent.
///
/// The discriminant doubles as the column index into a value-table row,
/// so the order matches the persisted `Q_UP, Q_DOWN, Q_LEFT, Q_RIGHT` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Up, Action::Down, Action::Left, Action::Right];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }

    /// Grid offset `(dx, dy)`; y grows downwards.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Action::Up => (0, -1),
            Action::Down => (0, 1),
            Action::Left => (-1, 0),
            Action::Right => (1, 0),
        }
    }
}
