use std::collections::VecDeque;

use crate::{
    Action, Position,
    config::WorldConfig,
    generator::{GenerationError, MapGenerator},
    map::Grid,
    storage::SpawnPreference,
    terrain::{Effect, TerrainCatalog, TerrainKind},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("Layout is {width}x{height}, expected {expected}x{expected}")]
    SizeMismatch {
        expected: usize,
        width: usize,
        height: usize,
    },
    #[error("{role} position {position:?} is outside the grid or impassable")]
    InvalidPosition {
        role: &'static str,
        position: Position,
    },
    #[error("Goal position {position:?} is not a goal cell")]
    GoalNotMarked { position: Position },
    #[error("Layout has no grass cell to spawn on")]
    NoSpawnCell,
}

/// Immutable starting point of an episode: the terrain before anything was
/// consumed, the goal, and where the agent starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeTemplate {
    terrain: Grid<TerrainKind>,
    goal: Position,
    spawn: Option<Position>,
}

impl EpisodeTemplate {
    /// Without a spawn, loading the template drops the agent on a random grass cell.
    pub fn new(terrain: Grid<TerrainKind>, goal: Position, spawn: Option<Position>) -> Self {
        EpisodeTemplate {
            terrain,
            goal,
            spawn,
        }
    }

    pub fn terrain(&self) -> &Grid<TerrainKind> {
        &self.terrain
    }

    pub fn goal(&self) -> Position {
        self.goal
    }

    pub fn spawn(&self) -> Option<Position> {
        self.spawn
    }
}

/// Result of one call to [`World::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub position: Position,
    /// Raw stamina change applied by this step; zero when the move was blocked.
    pub delta: i32,
    /// `false` when the move left the grid, hit an obstacle, or the episode
    /// was already waiting for a reset.
    pub moved: bool,
    pub reached_goal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    /// The goal was reached; the caller decides how to reset.
    TerminalPending,
}

/// The single live grid world.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    catalog: TerrainCatalog,
    generator: MapGenerator,
    terrain: Grid<TerrainKind>,
    effects: Grid<Effect>,
    agent: Position,
    goal: Position,
    stamina: i32,
    phase: Phase,
    template: EpisodeTemplate,
    selected_layout: Option<EpisodeTemplate>,
    spawn_preference: SpawnPreference,
    goal_history: VecDeque<i32>,
}

impl World {
    /// Builds a world on a freshly generated map.
    pub fn new(
        config: WorldConfig,
        catalog: TerrainCatalog,
        spawn_preference: SpawnPreference,
    ) -> Result<Self, WorldError> {
        let mut generator = MapGenerator::new(config.size, catalog, config.seed)?;
        let layout = generator.generate(spawn_preference.preferred())?;
        let template = EpisodeTemplate::new(layout.terrain.clone(), layout.goal, Some(layout.spawn));
        let mut world = World {
            stamina: config.start_stamina,
            goal_history: VecDeque::with_capacity(config.goal_history),
            config,
            catalog,
            generator,
            terrain: layout.terrain,
            effects: layout.effects,
            agent: layout.spawn,
            goal: layout.goal,
            phase: Phase::Active,
            template,
            selected_layout: None,
            spawn_preference,
        };
        world.remember_spawn();
        Ok(world)
    }

    /// Starts a new episode with full stamina.
    ///
    /// Replays the selected saved layout when `use_saved_layout` is set and
    /// one is selected; otherwise generates a new map.
    pub fn reset(&mut self, use_saved_layout: bool) -> Result<(), WorldError> {
        if use_saved_layout {
            if let Some(layout) = self.selected_layout.clone() {
                return self.load_layout(layout);
            }
        }
        let layout = self.generator.generate(self.spawn_preference.preferred())?;
        self.template = EpisodeTemplate::new(layout.terrain.clone(), layout.goal, Some(layout.spawn));
        self.terrain = layout.terrain;
        self.effects = layout.effects;
        self.agent = layout.spawn;
        self.goal = layout.goal;
        self.begin_episode();
        self.remember_spawn();
        Ok(())
    }

    /// Installs `template` exactly and makes it the layout that
    /// [`World::retry`] returns to.
    pub fn load_layout(&mut self, template: EpisodeTemplate) -> Result<(), WorldError> {
        let size = self.config.size;
        let terrain = &template.terrain;
        if terrain.width() != size || terrain.height() != size {
            return Err(WorldError::SizeMismatch {
                expected: size,
                width: terrain.width(),
                height: terrain.height(),
            });
        }
        self.check_passable("goal", terrain, template.goal)?;
        if terrain[template.goal] != TerrainKind::Goal {
            return Err(WorldError::GoalNotMarked {
                position: template.goal,
            });
        }
        let spawn = match template.spawn {
            Some(spawn) => {
                self.check_passable("spawn", terrain, spawn)?;
                spawn
            }
            None => self
                .generator
                .random_grass(terrain, None)
                .ok_or(WorldError::NoSpawnCell)?,
        };

        self.terrain = template.terrain.clone();
        self.effects = self.catalog.effect_grid(&self.terrain);
        self.goal = template.goal;
        self.agent = spawn;
        self.template = EpisodeTemplate {
            spawn: Some(spawn),
            ..template
        };
        self.begin_episode();
        Ok(())
    }

    /// Restarts the current map from its captured starting state.
    pub fn retry(&mut self) -> Result<(), WorldError> {
        self.load_layout(self.template.clone())
    }

    /// Chooses the saved layout that `reset(true)` replays.
    pub fn select_layout(&mut self, layout: Option<EpisodeTemplate>) {
        self.selected_layout = layout;
    }

    pub fn selected_layout(&self) -> Option<&EpisodeTemplate> {
        self.selected_layout.as_ref()
    }

    /// Switches "keep spawn" on (remembering the agent's current cell) or
    /// off (forgetting it). Returns the preference to persist.
    pub fn set_keep_spawn(&mut self, keep: bool) -> SpawnPreference {
        self.spawn_preference = SpawnPreference {
            keep_spawn: keep,
            spawn: keep.then_some(self.agent),
        };
        self.spawn_preference
    }

    /// Applies one move.
    ///
    /// Blocked moves change nothing. A successful move adds the target's
    /// effect to stamina; a reward or trap cell turns into grass only once
    /// the agent steps off it.
    pub fn step(&mut self, action: Action) -> StepOutcome {
        let blocked = StepOutcome {
            position: self.agent,
            delta: 0,
            moved: false,
            reached_goal: self.phase == Phase::TerminalPending,
        };
        if self.phase == Phase::TerminalPending {
            return blocked;
        }
        let Some(target) = self.agent.step(action, self.config.size) else {
            return blocked;
        };
        let Effect::Passable(delta) = self.effects[target] else {
            return blocked;
        };

        let previous = self.agent;
        self.agent = target;
        self.stamina += delta;

        if self.terrain[previous].is_consumable() {
            self.terrain[previous] = TerrainKind::Grass;
            self.effects[previous] = self.catalog.effect(TerrainKind::Grass);
        }

        let reached_goal = self.terrain[target] == TerrainKind::Goal;
        if reached_goal {
            self.record_goal();
            self.phase = Phase::TerminalPending;
        }

        StepOutcome {
            position: target,
            delta,
            moved: true,
            reached_goal,
        }
    }

    pub fn terrain(&self) -> &Grid<TerrainKind> {
        &self.terrain
    }

    pub fn effects(&self) -> &Grid<Effect> {
        &self.effects
    }

    pub fn agent(&self) -> Position {
        self.agent
    }

    pub fn goal(&self) -> Position {
        self.goal
    }

    pub fn stamina(&self) -> i32 {
        self.stamina
    }

    pub fn is_exhausted(&self) -> bool {
        self.stamina <= 0
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn template(&self) -> &EpisodeTemplate {
        &self.template
    }

    pub fn spawn_preference(&self) -> SpawnPreference {
        self.spawn_preference
    }

    /// Stamina left at each goal-reached event, oldest first.
    pub fn goal_history(&self) -> &VecDeque<i32> {
        &self.goal_history
    }

    fn begin_episode(&mut self) {
        self.stamina = self.config.start_stamina;
        self.phase = Phase::Active;
    }

    fn remember_spawn(&mut self) {
        if self.spawn_preference.keep_spawn {
            self.spawn_preference.spawn = Some(self.agent);
        }
    }

    fn record_goal(&mut self) {
        if self.config.goal_history == 0 {
            return;
        }
        if self.goal_history.len() == self.config.goal_history {
            self.goal_history.pop_front();
        }
        self.goal_history.push_back(self.stamina);
    }

    fn check_passable(
        &self,
        role: &'static str,
        terrain: &Grid<TerrainKind>,
        position: Position,
    ) -> Result<(), WorldError> {
        let passable = terrain
            .get(position.x, position.y)
            .is_some_and(|kind| self.catalog.is_passable(*kind));
        if passable {
            Ok(())
        } else {
            Err(WorldError::InvalidPosition { role, position })
        }
    }
}
