use serde::{Deserialize, Serialize};

use crate::map::Grid;

/// The closed set of cell categories a map is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainKind {
    #[default]
    Grass,
    Heavy,
    River,
    Bridge,
    Reward,
    Trap,
    Obstacle,
    Goal,
}

impl TerrainKind {
    pub const ALL: [TerrainKind; 8] = [
        TerrainKind::Grass,
        TerrainKind::Heavy,
        TerrainKind::River,
        TerrainKind::Bridge,
        TerrainKind::Reward,
        TerrainKind::Trap,
        TerrainKind::Obstacle,
        TerrainKind::Goal,
    ];

    /// Reward and trap cells revert to grass once the agent leaves them.
    #[inline]
    pub fn is_consumable(self) -> bool {
        matches!(self, TerrainKind::Reward | TerrainKind::Trap)
    }
}

/// What entering a cell does to the agent's stamina.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Passable(i32),
    Impassable,
}

impl Effect {
    #[inline]
    pub fn is_passable(self) -> bool {
        matches!(self, Effect::Passable(_))
    }
}

/// Stamina delta per terrain kind.
///
/// Obstacles are always impassable and therefore have no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainCatalog {
    pub grass: i32,
    pub heavy: i32,
    pub river: i32,
    pub bridge: i32,
    pub reward: i32,
    pub trap: i32,
    pub goal: i32,
}

impl Default for TerrainCatalog {
    fn default() -> Self {
        TerrainCatalog {
            grass: -1,
            heavy: -3,
            river: -5,
            bridge: -1,
            reward: 20,
            trap: -50,
            goal: 0,
        }
    }
}

impl TerrainCatalog {
    pub fn effect(&self, kind: TerrainKind) -> Effect {
        match kind {
            TerrainKind::Grass => Effect::Passable(self.grass),
            TerrainKind::Heavy => Effect::Passable(self.heavy),
            TerrainKind::River => Effect::Passable(self.river),
            TerrainKind::Bridge => Effect::Passable(self.bridge),
            TerrainKind::Reward => Effect::Passable(self.reward),
            TerrainKind::Trap => Effect::Passable(self.trap),
            TerrainKind::Obstacle => Effect::Impassable,
            TerrainKind::Goal => Effect::Passable(self.goal),
        }
    }

    #[inline]
    pub fn is_passable(&self, kind: TerrainKind) -> bool {
        self.effect(kind).is_passable()
    }

    /// Derives the parallel effect grid for a terrain grid.
    pub fn effect_grid(&self, terrain: &Grid<TerrainKind>) -> Grid<Effect> {
        terrain.map(|kind| self.effect(*kind))
    }
}
