use stamina_world_core::{
    Action, Position,
    agent::{Agent, QAgent},
    brain,
    config::{LearningConfig, ResetPolicy, RewardConfig, TrainingConfig, WorldConfig},
    map::Grid,
    stats::{EpisodeOutcome, MemorySink},
    storage::{
        JsonMapCatalog, JsonSpawnPreferences, MapCatalogStore, SavedMap, SpawnPreference,
        SpawnPreferenceStore, SpawnPreferenceSync,
    },
    terrain::{TerrainCatalog, TerrainKind},
    training::Trainer,
    world::{EpisodeTemplate, Phase, World},
};
use tempfile::tempdir;

fn world(start_stamina: i32) -> World {
    let config = WorldConfig {
        size: 10,
        start_stamina,
        goal_history: 16,
        seed: Some(21),
    };
    World::new(config, TerrainCatalog::default(), SpawnPreference::default()).unwrap()
}

fn trainer(world: World) -> Trainer<MemorySink> {
    trainer_with(world, ResetPolicy::RetryOnFailure)
}

fn trainer_with(world: World, reset_policy: ResetPolicy) -> Trainer<MemorySink> {
    let agent = QAgent::new(LearningConfig {
        seed: Some(4),
        ..LearningConfig::default()
    });
    let training = TrainingConfig {
        max_steps: None,
        reset_policy,
        ..TrainingConfig::default()
    };
    Trainer::new(
        world,
        agent,
        RewardConfig::default(),
        training,
        MemorySink::default(),
    )
}

/// Vertical river at x = 4 with a single bridge at (4, 5).
fn river_crossing() -> EpisodeTemplate {
    let mut terrain = Grid::square(10, TerrainKind::Grass);
    for y in 0..10 {
        terrain[Position::new(4, y)] = TerrainKind::River;
    }
    terrain[Position::new(4, 5)] = TerrainKind::Bridge;
    terrain[Position::new(9, 5)] = TerrainKind::Goal;
    EpisodeTemplate::new(terrain, Position::new(9, 5), Some(Position::new(0, 5)))
}

#[test]
fn crossing_the_bridge_reaches_the_goal() {
    let mut world = world(100);
    world.load_layout(river_crossing()).unwrap();
    let mut trainer = trainer(world);

    let mut total = 0.0;
    let mut finished = None;
    for _ in 0..9 {
        assert!(finished.is_none());
        let report = trainer.apply(Action::Right).unwrap();
        total += report.shaped.reward;
        finished = report.finished;
    }

    let record = finished.unwrap();
    assert_eq!(record.outcome, EpisodeOutcome::Goal);
    assert_eq!(record.stamina_left, 92);
    assert_eq!(record.steps, 9);
    assert_eq!(total, 492.0);
    assert_eq!(trainer.world().goal_history().back(), Some(&92));
}

#[test]
fn stepping_on_a_trap_with_low_stamina_is_fatal() {
    let mut terrain = Grid::square(10, TerrainKind::Grass);
    terrain[Position::new(1, 0)] = TerrainKind::Trap;
    terrain[Position::new(9, 9)] = TerrainKind::Goal;
    let mut world = world(3);
    world
        .load_layout(EpisodeTemplate::new(
            terrain,
            Position::new(9, 9),
            Some(Position::new(0, 0)),
        ))
        .unwrap();
    let mut trainer = trainer(world);

    let report = trainer.apply(Action::Right).unwrap();
    assert!(report.shaped.done);
    assert_eq!(report.shaped.reward, -150.0);
    let record = report.finished.unwrap();
    assert_eq!(record.outcome, EpisodeOutcome::Dead);
    assert!(record.stamina_left <= 0);

    // Death replays the same map from its starting state.
    let world = trainer.world();
    assert_eq!(world.agent(), Position::new(0, 0));
    assert_eq!(world.stamina(), 3);
    assert_eq!(world.terrain()[Position::new(1, 0)], TerrainKind::Trap);
}

#[test]
fn bonus_is_collected_once() {
    let mut terrain = Grid::square(10, TerrainKind::Grass);
    terrain[Position::new(1, 0)] = TerrainKind::Reward;
    terrain[Position::new(9, 9)] = TerrainKind::Goal;
    let mut world = world(100);
    world
        .load_layout(EpisodeTemplate::new(
            terrain,
            Position::new(9, 9),
            Some(Position::new(0, 0)),
        ))
        .unwrap();

    assert_eq!(world.step(Action::Right).delta, 20);
    assert_eq!(world.terrain()[Position::new(1, 0)], TerrainKind::Reward);
    assert_eq!(world.step(Action::Right).delta, -1);
    assert_eq!(world.terrain()[Position::new(1, 0)], TerrainKind::Grass);
    assert_eq!(world.step(Action::Left).delta, -1);
    assert_eq!(world.stamina(), 118);
}

#[test]
fn goal_waits_for_a_reset() {
    let mut world = world(100);
    world.load_layout(river_crossing()).unwrap();
    for _ in 0..9 {
        world.step(Action::Right);
    }
    assert_eq!(world.phase(), Phase::TerminalPending);

    let stalled = world.step(Action::Left);
    assert!(!stalled.moved);
    assert!(stalled.reached_goal);
    assert_eq!(world.stamina(), 92);

    world.retry().unwrap();
    assert_eq!(world.phase(), Phase::Active);
    assert_eq!(world.agent(), Position::new(0, 5));
    assert_eq!(world.stamina(), 100);
}

#[test]
fn saved_map_replays_in_a_fresh_world() {
    let dir = tempdir().unwrap();
    let catalog = JsonMapCatalog::new(dir.path().join("saved_maps.json"));

    let original = world(100);
    let mut maps = catalog.load();
    let id = SavedMap::unique_id(&maps, 1_700_000_000);
    catalog
        .push(&mut maps, SavedMap::from_template(id, original.template()))
        .unwrap();

    let reloaded = catalog.load();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].id, "map-1700000000");
    let template = reloaded[0].to_template().unwrap();

    let mut other = world(100);
    other.select_layout(Some(template));
    other.reset(true).unwrap();
    assert_eq!(other.terrain(), original.terrain());
    assert_eq!(other.goal(), original.goal());
    assert_eq!(other.agent(), original.agent());

    // Without the saved layout the world generates again.
    other.reset(false).unwrap();
    other.reset(true).unwrap();
    assert_eq!(other.terrain(), original.terrain());
}

#[test]
fn learned_table_resumes_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q_brain.csv");

    let mut world = world(100);
    world.load_layout(river_crossing()).unwrap();
    let mut trainer = trainer_with(world, ResetPolicy::AlwaysRetry);
    for _ in 0..20 {
        for _ in 0..9 {
            trainer.apply(Action::Right).unwrap();
        }
    }
    assert_eq!(trainer.trial(), 20);
    trainer.save_brain(&path).unwrap();

    let (table, epsilon) = brain::load(&path);
    assert_eq!(table.len(), trainer.agent().table().len());
    assert!((epsilon - trainer.agent().epsilon()).abs() < 1e-9);

    let mut resumed = QAgent::with_table(LearningConfig::default(), table, 0.0);
    assert_eq!(resumed.select_action(Position::new(8, 5)), Action::Right);
}

#[test]
fn kept_spawn_follows_new_maps_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("spawn_settings.json");
    let stale = SpawnPreference {
        keep_spawn: true,
        spawn: Some(Position::new(4, 4)),
    };
    JsonSpawnPreferences::new(&path).save(&stale).unwrap();

    let mut sync = SpawnPreferenceSync::new(JsonSpawnPreferences::new(&path));
    let config = WorldConfig {
        size: 10,
        start_stamina: 100,
        goal_history: 16,
        seed: Some(8),
    };
    let mut world = World::new(config, TerrainCatalog::default(), sync.saved()).unwrap();
    for _ in 0..5 {
        world.reset(false).unwrap();
        sync.sync(world.spawn_preference()).unwrap();

        let stored = JsonSpawnPreferences::new(&path).load();
        assert!(stored.keep_spawn);
        assert_eq!(stored.spawn, Some(world.agent()));
    }
    assert!(!sync.sync(world.spawn_preference()).unwrap());
}
