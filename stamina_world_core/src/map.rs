use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::Position;

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Grid has no rows")]
    Empty,
}

/// A generic 2D grid stored row-major in a flat vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a `size` x `size` grid with every cell set to `value`.
    ///
    /// # Panics
    ///
    /// Panics if `size * size` overflows `usize`.
    pub fn square(size: usize, value: T) -> Self
    where
        T: Clone,
    {
        let len = size.checked_mul(size).expect("Grid size overflow");
        Grid {
            width: size,
            height: size,
            cells: vec![value; len],
        }
    }

    /// Builds a grid from nested rows (`rows[y][x]`), rejecting ragged input.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, GridError> {
        let height = rows.len();
        let width = rows.first().map(Vec::len).ok_or(GridError::Empty)?;
        let mut cells = Vec::with_capacity(width * height);
        for (row, cols) in rows.into_iter().enumerate() {
            if cols.len() != width {
                return Err(GridError::RaggedRow {
                    row,
                    expected: width,
                    found: cols.len(),
                });
            }
            cells.extend(cols);
        }
        Ok(Grid {
            width,
            height,
            cells,
        })
    }

    /// Copies the grid out as nested rows (`rows[y][x]`).
    pub fn to_rows(&self) -> Vec<Vec<T>>
    where
        T: Clone,
    {
        self.cells
            .chunks(self.width.max(1))
            .map(<[T]>::to_vec)
            .collect()
    }

    /// Returns a grid of the same shape with `f` applied to every cell.
    pub fn map<U, F>(&self, f: F) -> Grid<U>
    where
        F: FnMut(&T) -> U,
    {
        Grid {
            width: self.width,
            height: self.height,
            cells: self.cells.iter().map(f).collect(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Converts (x, y) coordinates to a flat vector index.
    #[inline]
    pub fn coords_to_index(&self, x: usize, y: usize) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(y * self.width + x)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    #[inline]
    pub fn contains(&self, position: Position) -> bool {
        self.is_valid(position.x, position.y)
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        let index = self.coords_to_index(x, y)?;
        self.cells.get(index)
    }

    /// Returns an iterator over the cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }

    /// Returns an iterator that yields `(Position, &T)` for each cell.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (Position::new(index % width, index / width), cell))
    }

    /// Positions of every cell matching `predicate`, in row-major order.
    pub fn positions_where<P>(&self, mut predicate: P) -> Vec<Position>
    where
        P: FnMut(&T) -> bool,
    {
        self.enumerate()
            .filter(|(_, cell)| predicate(cell))
            .map(|(pos, _)| pos)
            .collect()
    }

    /// In-bounds 4-neighbours of `position` (right, left, down, up).
    pub fn neighbors(&self, position: Position) -> impl Iterator<Item = Position> + '_ {
        [(1isize, 0isize), (-1, 0), (0, 1), (0, -1)]
            .into_iter()
            .filter_map(move |(dx, dy)| {
                let x = position.x.checked_add_signed(dx)?;
                let y = position.y.checked_add_signed(dy)?;
                self.is_valid(x, y).then_some(Position::new(x, y))
            })
    }
}

impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Position) -> &Self::Output {
        match self.coords_to_index(index.x, index.y) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                index.x, index.y, self.width, self.height
            ),
        }
    }
}

impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, index: Position) -> &mut Self::Output {
        let (width, height) = (self.width, self.height);
        match self.coords_to_index(index.x, index.y) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                index.x, index.y, width, height
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_round_trip_and_reject_ragged_input() {
        let rows = vec![vec![0, 1, 2], vec![10, 11, 12]];
        let grid = Grid::from_rows(rows.clone()).unwrap();
        assert_eq!((grid.width(), grid.height()), (3, 2));
        assert_eq!(grid[Position::new(2, 1)], 12);
        assert_eq!(grid.to_rows(), rows);

        let err = Grid::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert_eq!(
            err,
            GridError::RaggedRow {
                row: 1,
                expected: 2,
                found: 1
            }
        );
        assert_eq!(Grid::<u8>::from_rows(vec![]).unwrap_err(), GridError::Empty);
    }

    #[test]
    fn neighbors_are_clipped_at_borders() {
        let grid = Grid::square(3, ());
        let corner: Vec<_> = grid.neighbors(Position::new(0, 0)).collect();
        assert_eq!(corner, vec![Position::new(1, 0), Position::new(0, 1)]);
        assert_eq!(grid.neighbors(Position::new(1, 1)).count(), 4);
    }
}
