use std::{collections::VecDeque, ops::RangeInclusive};

use rand::{
    Rng, SeedableRng,
    rngs::StdRng,
    seq::{IndexedRandom, SliceRandom},
};

use crate::{
    Position,
    map::Grid,
    terrain::{Effect, TerrainCatalog, TerrainKind},
};

/// Smallest grid for which every placement step is well defined.
pub const MIN_GRID_SIZE: usize = 5;

const OBSTACLE_ATTEMPTS: RangeInclusive<usize> = 3..=6;
const HEAVY_ATTEMPTS: RangeInclusive<usize> = 8..=12;
const BONUS_ATTEMPTS: RangeInclusive<usize> = 1..=3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("Grid size {size} is too small, maps need at least {MIN_GRID_SIZE}x{MIN_GRID_SIZE}")]
    GridTooSmall { size: usize },
    #[error("No grass cell left to place {kind:?}")]
    NoGrassLeft { kind: TerrainKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiverOrientation {
    /// The river fills one row.
    Horizontal,
    /// The river fills one column.
    Vertical,
}

/// A freshly generated map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLayout {
    pub terrain: Grid<TerrainKind>,
    pub effects: Grid<Effect>,
    pub spawn: Position,
    pub goal: Position,
    pub orientation: RiverOrientation,
}

/// Procedural map generator driven by an explicit, seedable random source.
#[derive(Debug)]
pub struct MapGenerator {
    size: usize,
    catalog: TerrainCatalog,
    rng: StdRng,
}

impl MapGenerator {
    /// Creates a generator for `size` x `size` maps.
    ///
    /// Without a seed the random source is seeded from the OS.
    pub fn new(
        size: usize,
        catalog: TerrainCatalog,
        seed: Option<u64>,
    ) -> Result<Self, GenerationError> {
        if size < MIN_GRID_SIZE {
            return Err(GenerationError::GridTooSmall { size });
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(MapGenerator { size, catalog, rng })
    }

    /// Generates a new map.
    ///
    /// With `preferred_spawn` the spawn is snapped to the grass cell nearest
    /// to it; otherwise it is picked on the border opposite the goal.
    pub fn generate(
        &mut self,
        preferred_spawn: Option<Position>,
    ) -> Result<MapLayout, GenerationError> {
        let size = self.size;
        let mut terrain = Grid::square(size, TerrainKind::Grass);

        let orientation = if self.rng.random_bool(0.5) {
            RiverOrientation::Horizontal
        } else {
            RiverOrientation::Vertical
        };
        let offset = self.rng.random_range(2..=size - 3);
        let river = lay_river(&mut terrain, orientation, offset);
        self.place_bridges(&mut terrain, &river, orientation);

        self.scatter(&mut terrain, TerrainKind::Obstacle, OBSTACLE_ATTEMPTS);
        self.scatter(&mut terrain, TerrainKind::Heavy, HEAVY_ATTEMPTS);
        for kind in [TerrainKind::Reward, TerrainKind::Trap] {
            if self.scatter(&mut terrain, kind, BONUS_ATTEMPTS) == 0 {
                let cell = self
                    .random_grass(&terrain, None)
                    .ok_or(GenerationError::NoGrassLeft { kind })?;
                terrain[cell] = kind;
            }
        }

        let spawn_hint = match preferred_spawn {
            Some(pos) => Position::new(pos.x.min(size - 1), pos.y.min(size - 1)),
            None => match orientation {
                RiverOrientation::Horizontal => Position::new(0, self.rng.random_range(0..size)),
                RiverOrientation::Vertical => Position::new(self.rng.random_range(0..size), 0),
            },
        };
        let spawn = self
            .nearest_grass(&terrain, spawn_hint, None)
            .ok_or(GenerationError::NoGrassLeft {
                kind: TerrainKind::Grass,
            })?;

        let goal_hint = match orientation {
            RiverOrientation::Horizontal => Position::new(size - 1, self.rng.random_range(0..size)),
            RiverOrientation::Vertical => Position::new(self.rng.random_range(0..size), size - 1),
        };
        let goal = self
            .nearest_grass(&terrain, goal_hint, Some(spawn))
            .ok_or(GenerationError::NoGrassLeft {
                kind: TerrainKind::Goal,
            })?;
        terrain[goal] = TerrainKind::Goal;

        repair_connectivity(&mut terrain, &self.catalog, spawn, goal);
        let effects = self.catalog.effect_grid(&terrain);

        Ok(MapLayout {
            terrain,
            effects,
            spawn,
            goal,
            orientation,
        })
    }

    /// A uniformly random grass cell other than `exclude`.
    pub fn random_grass(
        &mut self,
        terrain: &Grid<TerrainKind>,
        exclude: Option<Position>,
    ) -> Option<Position> {
        let cells: Vec<Position> = terrain
            .enumerate()
            .filter(|(pos, _)| is_free_grass(terrain, *pos, exclude))
            .map(|(pos, _)| pos)
            .collect();
        cells.choose(&mut self.rng).copied()
    }

    /// Expands a square search window around `from` until a grass cell is
    /// found, scanning each window row by row. Falls back to a random grass
    /// cell when the window covers the grid without a hit.
    fn nearest_grass(
        &mut self,
        terrain: &Grid<TerrainKind>,
        from: Position,
        exclude: Option<Position>,
    ) -> Option<Position> {
        if is_free_grass(terrain, from, exclude) {
            return Some(from);
        }
        for radius in 1..self.size as isize {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (Some(x), Some(y)) =
                        (from.x.checked_add_signed(dx), from.y.checked_add_signed(dy))
                    else {
                        continue;
                    };
                    let candidate = Position::new(x, y);
                    if terrain.contains(candidate) && is_free_grass(terrain, candidate, exclude) {
                        return Some(candidate);
                    }
                }
            }
        }
        self.random_grass(terrain, exclude)
    }

    /// Turns up to a fifth of the interior river cells into bridges, never
    /// two side by side.
    fn place_bridges(
        &mut self,
        terrain: &mut Grid<TerrainKind>,
        river: &[Position],
        orientation: RiverOrientation,
    ) {
        let size = self.size;
        let mut candidates: Vec<Position> = river
            .iter()
            .copied()
            .filter(|p| p.x > 0 && p.y > 0 && p.x < size - 1 && p.y < size - 1)
            .filter(|p| {
                let (a, b) = match orientation {
                    RiverOrientation::Horizontal => {
                        (Position::new(p.x - 1, p.y), Position::new(p.x + 1, p.y))
                    }
                    RiverOrientation::Vertical => {
                        (Position::new(p.x, p.y - 1), Position::new(p.x, p.y + 1))
                    }
                };
                terrain[a] == TerrainKind::River && terrain[b] == TerrainKind::River
            })
            .collect();
        candidates.shuffle(&mut self.rng);

        let quota = (candidates.len() / 5).max(1);
        let mut placed = 0;
        for candidate in candidates {
            if placed >= quota {
                break;
            }
            let crowded = terrain
                .neighbors(candidate)
                .any(|n| terrain[n] == TerrainKind::Bridge);
            if crowded {
                continue;
            }
            terrain[candidate] = TerrainKind::Bridge;
            placed += 1;
        }
    }

    /// Makes a random number of placement attempts on uniformly random cells,
    /// converting the cell only if it is still grass. Returns how many landed.
    fn scatter(
        &mut self,
        terrain: &mut Grid<TerrainKind>,
        kind: TerrainKind,
        attempts: RangeInclusive<usize>,
    ) -> usize {
        let attempts = self.rng.random_range(attempts);
        let mut placed = 0;
        for _ in 0..attempts {
            let cell = Position::new(
                self.rng.random_range(0..self.size),
                self.rng.random_range(0..self.size),
            );
            if terrain[cell] == TerrainKind::Grass {
                terrain[cell] = kind;
                placed += 1;
            }
        }
        placed
    }
}

fn is_free_grass(terrain: &Grid<TerrainKind>, pos: Position, exclude: Option<Position>) -> bool {
    terrain[pos] == TerrainKind::Grass && Some(pos) != exclude
}

fn lay_river(
    terrain: &mut Grid<TerrainKind>,
    orientation: RiverOrientation,
    offset: usize,
) -> Vec<Position> {
    let river: Vec<Position> = (0..terrain.width())
        .map(|i| match orientation {
            RiverOrientation::Horizontal => Position::new(i, offset),
            RiverOrientation::Vertical => Position::new(offset, i),
        })
        .collect();
    for cell in &river {
        terrain[*cell] = TerrainKind::River;
    }
    river
}

/// Breadth-first search over passable cells.
pub fn has_path(
    terrain: &Grid<TerrainKind>,
    catalog: &TerrainCatalog,
    start: Position,
    goal: Position,
) -> bool {
    if !terrain.contains(start) || !terrain.contains(goal) {
        return false;
    }
    let mut seen = Grid::square(terrain.width().max(terrain.height()), false);
    let mut queue = VecDeque::from([start]);
    seen[start] = true;
    while let Some(current) = queue.pop_front() {
        if current == goal {
            return true;
        }
        for next in terrain.neighbors(current) {
            if !seen[next] && catalog.is_passable(terrain[next]) {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    false
}

/// Ensures `goal` is reachable from `start`, carving an L-shaped corridor
/// (along the start row, then the goal column) through impassable cells if
/// it is not. Returns `true` when a corridor had to be carved.
pub fn repair_connectivity(
    terrain: &mut Grid<TerrainKind>,
    catalog: &TerrainCatalog,
    start: Position,
    goal: Position,
) -> bool {
    if has_path(terrain, catalog, start, goal) {
        return false;
    }
    let mut cursor = start;
    let clear = |cell: Position, terrain: &mut Grid<TerrainKind>| {
        if !catalog.is_passable(terrain[cell]) {
            terrain[cell] = TerrainKind::Grass;
        }
    };
    while cursor.x != goal.x {
        cursor.x = if goal.x > cursor.x {
            cursor.x + 1
        } else {
            cursor.x - 1
        };
        clear(cursor, terrain);
    }
    while cursor.y != goal.y {
        cursor.y = if goal.y > cursor.y {
            cursor.y + 1
        } else {
            cursor.y - 1
        };
        clear(cursor, terrain);
    }
    true
}
