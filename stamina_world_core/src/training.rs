//! The learning loop: observe, act, shape the reward, update, decay.

use std::path::{Path, PathBuf};

use crate::{
    Action, Position,
    agent::{Agent, QAgent},
    brain,
    config::{ResetPolicy, RewardConfig, TrainingConfig},
    stats::{EpisodeOutcome, EpisodeRecord, EpisodeSink},
    storage::PersistenceError,
    world::{StepOutcome, World, WorldError},
};

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("World error: {0}")]
    World(#[from] WorldError),
    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] PersistenceError),
}

/// Reward and termination derived from one raw step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedStep {
    pub reward: f64,
    pub done: bool,
    pub outcome: Option<EpisodeOutcome>,
}

/// Turns raw stamina deltas into learning rewards.
///
/// A blocked move (wall or obstacle) earns the wall penalty instead of its
/// zero delta. A legal move with zero delta, such as entering the goal, keeps
/// its zero. Terminal bonuses stack on top.
#[derive(Debug, Clone)]
pub struct RewardShaper {
    config: RewardConfig,
}

impl RewardShaper {
    pub fn new(config: RewardConfig) -> Self {
        RewardShaper { config }
    }

    pub fn shape(&self, step: &StepOutcome, stamina: i32) -> ShapedStep {
        let mut reward = if step.moved {
            f64::from(step.delta)
        } else {
            self.config.wall_penalty
        };
        let mut outcome = None;
        if stamina <= 0 {
            reward += self.config.death_penalty;
            outcome = Some(EpisodeOutcome::Dead);
        }
        if step.reached_goal {
            reward += self.config.goal_bonus;
            outcome = Some(EpisodeOutcome::Goal);
        }
        ShapedStep {
            reward,
            done: outcome.is_some(),
            outcome,
        }
    }
}

/// Everything that happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub state: Position,
    pub action: Action,
    pub step: StepOutcome,
    pub shaped: ShapedStep,
    /// Set when this tick ended the episode.
    pub finished: Option<EpisodeRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingSummary {
    pub episodes: u64,
    pub goals: u64,
    pub deaths: u64,
    pub timeouts: u64,
    pub total_steps: u64,
}

impl TrainingSummary {
    pub fn record(&mut self, record: &EpisodeRecord) {
        self.episodes += 1;
        self.total_steps += u64::from(record.steps);
        match record.outcome {
            EpisodeOutcome::Goal => self.goals += 1,
            EpisodeOutcome::Dead => self.deaths += 1,
            EpisodeOutcome::Timeout => self.timeouts += 1,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.goals as f64 / self.episodes as f64
        }
    }

    pub fn mean_steps(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_steps as f64 / self.episodes as f64
        }
    }
}

/// Drives one world and one learning agent.
pub struct Trainer<S: EpisodeSink> {
    world: World,
    agent: QAgent,
    shaper: RewardShaper,
    config: TrainingConfig,
    sink: S,
    checkpoint_path: Option<PathBuf>,
    trial: u64,
    steps: u32,
}

impl<S: EpisodeSink> Trainer<S> {
    pub fn new(
        world: World,
        agent: QAgent,
        rewards: RewardConfig,
        config: TrainingConfig,
        sink: S,
    ) -> Self {
        Trainer {
            world,
            agent,
            shaper: RewardShaper::new(rewards),
            config,
            sink,
            checkpoint_path: None,
            trial: 0,
            steps: 0,
        }
    }

    /// Periodically writes the value table to `path`.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Lets the agent pick an action and applies it.
    pub fn tick(&mut self) -> Result<TickReport, TrainingError> {
        let state = self.world.agent();
        let action = self.agent.select_action(state);
        self.apply(action)
    }

    /// Runs one full learning step with a given action.
    pub fn apply(&mut self, action: Action) -> Result<TickReport, TrainingError> {
        let state = self.world.agent();
        let step = self.world.step(action);
        let shaped = self.shaper.shape(&step, self.world.stamina());
        self.steps += 1;

        self.agent
            .update(state, action, shaped.reward, step.position, shaped.done);
        self.agent.decay_exploration();

        let truncated = !shaped.done && self.config.max_steps.is_some_and(|cap| self.steps >= cap);
        let ending = shaped
            .outcome
            .or(truncated.then_some(EpisodeOutcome::Timeout));
        let finished = match ending {
            Some(outcome) => Some(self.finish_episode(outcome)?),
            None => None,
        };

        Ok(TickReport {
            state,
            action,
            step,
            shaped,
            finished,
        })
    }

    /// Ticks until the current episode ends.
    pub fn run_episode(&mut self) -> Result<EpisodeRecord, TrainingError> {
        loop {
            if let Some(record) = self.tick()?.finished {
                return Ok(record);
            }
        }
    }

    pub fn run(&mut self, episodes: u64) -> Result<TrainingSummary, TrainingError> {
        let mut summary = TrainingSummary::default();
        for _ in 0..episodes {
            let record = self.run_episode()?;
            summary.record(&record);
        }
        Ok(summary)
    }

    /// Writes the value table now, if a checkpoint path is set.
    pub fn checkpoint(&self) -> Result<(), PersistenceError> {
        match &self.checkpoint_path {
            Some(path) => self.save_brain(path),
            None => Ok(()),
        }
    }

    pub fn save_brain(&self, path: &Path) -> Result<(), PersistenceError> {
        brain::save(self.agent.table(), self.agent.epsilon(), path)
    }

    /// Abandons the running episode and starts over on a fresh map.
    pub fn restart(&mut self, use_saved_layout: bool) -> Result<(), WorldError> {
        self.steps = 0;
        self.world.reset(use_saved_layout)
    }

    /// Abandons the running episode and replays the current map.
    pub fn retry(&mut self) -> Result<(), WorldError> {
        self.steps = 0;
        self.world.retry()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn agent(&self) -> &QAgent {
        &self.agent
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Completed episodes so far.
    pub fn trial(&self) -> u64 {
        self.trial
    }

    /// Steps taken in the running episode.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn finish_episode(&mut self, outcome: EpisodeOutcome) -> Result<EpisodeRecord, TrainingError> {
        self.trial += 1;
        let epsilon = self.agent.epsilon();
        let record = EpisodeRecord {
            trial: self.trial,
            testing: epsilon < self.config.testing_threshold,
            steps: self.steps,
            stamina_left: self.world.stamina(),
            epsilon,
            alpha: self.agent.alpha(),
            success: outcome.is_success(),
            outcome,
        };
        self.sink.append(&record);

        self.steps = 0;
        let retry = match self.config.reset_policy {
            ResetPolicy::RetryOnFailure => !outcome.is_success(),
            ResetPolicy::AlwaysNew => false,
            ResetPolicy::AlwaysRetry => true,
        };
        if retry {
            self.world.retry()?;
        } else {
            self.world.reset(true)?;
        }

        let every = self.config.checkpoint_every;
        if every > 0 && self.trial % every == 0 {
            self.checkpoint()?;
        }
        Ok(record)
    }
}
