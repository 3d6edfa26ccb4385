//! Durable stores for the saved-map catalog and the spawn preference.
//!
//! Loading never fails: a missing or unreadable file yields the empty or
//! default value. Saving reports errors to the caller.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    Position,
    map::{Grid, GridError},
    terrain::TerrainKind,
    world::EpisodeTemplate,
};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One entry of the saved-map catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedMap {
    pub id: String,
    /// Terrain rows, `grid[y][x]`.
    pub grid: Vec<Vec<TerrainKind>>,
    pub goal_pos: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_pos: Option<Position>,
}

impl SavedMap {
    pub fn from_template(id: String, template: &EpisodeTemplate) -> Self {
        SavedMap {
            id,
            grid: template.terrain().to_rows(),
            goal_pos: template.goal(),
            player_pos: template.spawn(),
        }
    }

    pub fn to_template(&self) -> Result<EpisodeTemplate, GridError> {
        let terrain = Grid::from_rows(self.grid.clone())?;
        Ok(EpisodeTemplate::new(terrain, self.goal_pos, self.player_pos))
    }

    /// Timestamp-derived id, suffixed when the catalog already holds it.
    pub fn unique_id(existing: &[SavedMap], unix_seconds: u64) -> String {
        let base = format!("map-{unix_seconds}");
        let taken = |id: &str| existing.iter().any(|m| m.id == id);
        if !taken(&base) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let id = format!("{base}-{suffix}");
            if !taken(&id) {
                return id;
            }
            suffix += 1;
        }
    }
}

pub fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Persisted "keep spawn" setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpawnPreference {
    #[serde(default)]
    pub keep_spawn: bool,
    #[serde(default, rename = "spawn_pos")]
    pub spawn: Option<Position>,
}

impl SpawnPreference {
    /// The position map generation should aim for, if any.
    pub fn preferred(&self) -> Option<Position> {
        if self.keep_spawn { self.spawn } else { None }
    }
}

pub trait MapCatalogStore {
    fn load(&self) -> Vec<SavedMap>;
    fn save(&self, maps: &[SavedMap]) -> Result<(), PersistenceError>;

    /// Appends `map` and rewrites the whole catalog.
    fn push(&self, maps: &mut Vec<SavedMap>, map: SavedMap) -> Result<(), PersistenceError> {
        maps.push(map);
        self.save(maps)
    }
}

pub trait SpawnPreferenceStore {
    fn load(&self) -> SpawnPreference;
    fn save(&self, preference: &SpawnPreference) -> Result<(), PersistenceError>;
}

/// Writes the spawn preference through to its store whenever it changes.
#[derive(Debug)]
pub struct SpawnPreferenceSync<S: SpawnPreferenceStore> {
    store: S,
    saved: SpawnPreference,
}

impl<S: SpawnPreferenceStore> SpawnPreferenceSync<S> {
    /// Starts from whatever the store holds.
    pub fn new(store: S) -> Self {
        let saved = store.load();
        SpawnPreferenceSync { store, saved }
    }

    /// The preference as last read or written.
    pub fn saved(&self) -> SpawnPreference {
        self.saved
    }

    /// Saves `current` if it differs from the stored value. Returns whether
    /// anything was written.
    pub fn sync(&mut self, current: SpawnPreference) -> Result<bool, PersistenceError> {
        if current == self.saved {
            return Ok(false);
        }
        self.store.save(&current)?;
        self.saved = current;
        Ok(true)
    }
}

/// Catalog stored as a pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonMapCatalog {
    path: PathBuf,
}

impl JsonMapCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonMapCatalog { path: path.into() }
    }
}

impl MapCatalogStore for JsonMapCatalog {
    fn load(&self) -> Vec<SavedMap> {
        read_json(&self.path).unwrap_or_default()
    }

    fn save(&self, maps: &[SavedMap]) -> Result<(), PersistenceError> {
        write_json(&self.path, maps)
    }
}

#[derive(Debug, Clone)]
pub struct JsonSpawnPreferences {
    path: PathBuf,
}

impl JsonSpawnPreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonSpawnPreferences { path: path.into() }
    }
}

impl SpawnPreferenceStore for JsonSpawnPreferences {
    fn load(&self) -> SpawnPreference {
        read_json(&self.path).unwrap_or_default()
    }

    fn save(&self, preference: &SpawnPreference) -> Result<(), PersistenceError> {
        write_json(&self.path, preference)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(|e| PersistenceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_map(id: &str) -> SavedMap {
        let mut terrain = Grid::square(5, TerrainKind::Grass);
        terrain[Position::new(4, 2)] = TerrainKind::Goal;
        terrain[Position::new(2, 2)] = TerrainKind::Obstacle;
        let template = EpisodeTemplate::new(terrain, Position::new(4, 2), Some(Position::new(0, 2)));
        SavedMap::from_template(id.to_string(), &template)
    }

    #[test]
    fn missing_files_load_defaults() {
        let dir = tempdir().unwrap();
        let catalog = JsonMapCatalog::new(dir.path().join("maps.json"));
        let spawn = JsonSpawnPreferences::new(dir.path().join("spawn.json"));
        assert!(catalog.load().is_empty());
        assert_eq!(spawn.load(), SpawnPreference::default());
    }

    #[test]
    fn malformed_files_load_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("maps.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(JsonMapCatalog::new(&path).load().is_empty());
        assert_eq!(JsonSpawnPreferences::new(&path).load(), SpawnPreference::default());
    }

    #[test]
    fn catalog_push_rewrites_everything() {
        let dir = tempdir().unwrap();
        let store = JsonMapCatalog::new(dir.path().join("maps.json"));
        let mut maps = store.load();
        store.push(&mut maps, sample_map("a")).unwrap();
        store.push(&mut maps, sample_map("b")).unwrap();

        let reloaded = store.load();
        assert_eq!(reloaded, maps);
        assert_eq!(reloaded.len(), 2);
        let template = reloaded[1].to_template().unwrap();
        assert_eq!(template.terrain()[Position::new(2, 2)], TerrainKind::Obstacle);
        assert_eq!(template.spawn(), Some(Position::new(0, 2)));
    }

    #[test]
    fn spawn_preference_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonSpawnPreferences::new(dir.path().join("spawn.json"));
        let preference = SpawnPreference {
            keep_spawn: true,
            spawn: Some(Position::new(3, 1)),
        };
        store.save(&preference).unwrap();
        assert_eq!(store.load(), preference);
        assert_eq!(preference.preferred(), Some(Position::new(3, 1)));

        let off = SpawnPreference {
            keep_spawn: false,
            ..preference
        };
        assert_eq!(off.preferred(), None);
    }

    #[test]
    fn unique_ids_get_suffixes() {
        let mut maps = vec![sample_map("map-100")];
        assert_eq!(SavedMap::unique_id(&maps, 200), "map-200");
        assert_eq!(SavedMap::unique_id(&maps, 100), "map-100-2");
        maps.push(sample_map("map-100-2"));
        assert_eq!(SavedMap::unique_id(&maps, 100), "map-100-3");
    }

    #[test]
    fn ragged_saved_grid_is_rejected() {
        let mut map = sample_map("x");
        map.grid[3].pop();
        assert!(map.to_template().is_err());
    }

    #[test]
    fn spawn_sync_writes_only_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spawn.json");
        let mut sync = SpawnPreferenceSync::new(JsonSpawnPreferences::new(&path));
        assert_eq!(sync.saved(), SpawnPreference::default());

        assert!(!sync.sync(SpawnPreference::default()).unwrap());
        assert!(!path.exists());

        let moved = SpawnPreference {
            keep_spawn: true,
            spawn: Some(Position::new(3, 1)),
        };
        assert!(sync.sync(moved).unwrap());
        assert!(!sync.sync(moved).unwrap());
        assert_eq!(JsonSpawnPreferences::new(&path).load(), moved);
        assert_eq!(
            SpawnPreferenceSync::new(JsonSpawnPreferences::new(&path)).saved(),
            moved
        );
    }
}
