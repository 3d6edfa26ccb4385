//! Tunable parameters for the world, the learner and the training loop.
//!
//! Every struct has working defaults; a JSON file only needs to name the
//! values it overrides.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{generator::MIN_GRID_SIZE, terrain::TerrainCatalog};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Grid geometry and episode bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Side length N of the square grid.
    pub size: usize,
    /// Stamina at the start of every episode.
    pub start_stamina: i32,
    /// How many goal-reached stamina totals to remember.
    pub goal_history: usize,
    /// Seed for map generation; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            size: 10,
            start_stamina: 100,
            goal_history: 32,
            seed: None,
        }
    }
}

/// Hyper-parameters of the tabular learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Learning rate α.
    pub alpha: f64,
    /// Discount factor γ.
    pub gamma: f64,
    pub epsilon_start: f64,
    /// Multiplicative decay applied once per step.
    pub epsilon_decay: f64,
    pub epsilon_min: f64,
    /// Seed for action selection; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        LearningConfig {
            alpha: 0.1,
            gamma: 0.9,
            epsilon_start: 1.0,
            epsilon_decay: 0.9995,
            epsilon_min: 0.01,
            seed: None,
        }
    }
}

/// Reward shaping applied on top of the raw stamina delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Replaces the reward of a move that was blocked by a wall or obstacle.
    pub wall_penalty: f64,
    pub goal_bonus: f64,
    /// Added (it is negative) when stamina drops to zero or below.
    pub death_penalty: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        RewardConfig {
            wall_penalty: -5.0,
            goal_bonus: 500.0,
            death_penalty: -100.0,
        }
    }
}

/// What the training loop does with the map once an episode ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// New map after reaching the goal, same map again after dying.
    #[default]
    RetryOnFailure,
    AlwaysNew,
    AlwaysRetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Episodes run with epsilon below this are flagged as testing runs.
    pub testing_threshold: f64,
    /// Truncate an episode after this many steps.
    pub max_steps: Option<u32>,
    /// Write the value table every this many episodes (0 disables).
    pub checkpoint_every: u64,
    pub reset_policy: ResetPolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            testing_threshold: 0.05,
            max_steps: Some(1_000),
            checkpoint_every: 50,
            reset_policy: ResetPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub world: WorldConfig,
    pub terrain: TerrainCatalog,
    pub learning: LearningConfig,
    pub rewards: RewardConfig,
    pub training: TrainingConfig,
}

impl SimConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                })
            }
        }

        if self.world.size < MIN_GRID_SIZE {
            return Err(ConfigError::Invalid {
                field: "world.size",
                reason: format!("{} is below the minimum of {MIN_GRID_SIZE}", self.world.size),
            });
        }
        if self.world.start_stamina <= 0 {
            return Err(ConfigError::Invalid {
                field: "world.start_stamina",
                reason: "must be positive".to_string(),
            });
        }
        let learning = &self.learning;
        unit("learning.alpha", learning.alpha)?;
        unit("learning.gamma", learning.gamma)?;
        unit("learning.epsilon_start", learning.epsilon_start)?;
        unit("learning.epsilon_min", learning.epsilon_min)?;
        if !(learning.epsilon_decay > 0.0 && learning.epsilon_decay <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "learning.epsilon_decay",
                reason: format!("{} is outside (0, 1]", learning.epsilon_decay),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.world.size, 10);
        assert_eq!(config.world.start_stamina, 100);
        assert_eq!(config.rewards.wall_penalty, -5.0);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: SimConfig =
            serde_json::from_str(r#"{"world": {"size": 12}, "training": {"reset_policy": "always_new"}}"#)
                .unwrap();
        assert_eq!(config.world.size, 12);
        assert_eq!(config.world.start_stamina, 100);
        assert_eq!(config.training.reset_policy, ResetPolicy::AlwaysNew);
        assert_eq!(config.learning, LearningConfig::default());
    }

    #[test]
    fn small_grid_is_rejected() {
        let mut config = SimConfig::default();
        config.world.size = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "world.size",
                ..
            })
        ));
    }

    #[test]
    fn decay_must_not_grow_epsilon() {
        let mut config = SimConfig::default();
        config.learning.epsilon_decay = 1.5;
        assert!(config.validate().is_err());
        config.learning.epsilon_decay = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        fs::write(&path, r#"{"learning": {"alpha": 0.5}}"#).unwrap();
        let config = SimConfig::load(&path).unwrap();
        assert_eq!(config.learning.alpha, 0.5);

        fs::write(&path, r#"{"learning": {"alpha": 2.0}}"#).unwrap();
        assert!(SimConfig::load(&path).is_err());
    }
}
