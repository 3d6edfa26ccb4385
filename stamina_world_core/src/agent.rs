use std::collections::{HashMap, hash_map};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{Action, Position, config::LearningConfig};

/// Action values for one state, indexed by [`Action::index`].
pub type ActionValues = [f64; 4];

/// Trait defining how an agent picks its next move.
pub trait Agent {
    /// Chooses the action to take from `state`.
    ///
    /// `&mut self` lets agents keep internal state (random sources, lazily
    /// grown tables).
    fn select_action(&mut self, state: Position) -> Action;
}

/// Baseline agent that moves uniformly at random.
#[derive(Debug)]
pub struct RandomWalker {
    rng: StdRng,
}

impl RandomWalker {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Agent for RandomWalker {
    fn select_action(&mut self, _state: Position) -> Action {
        Action::ALL[self.rng.random_range(0..Action::ALL.len())]
    }
}

/// Sparse state → action-value table.
///
/// Rows are created lazily, all zero, the first time a state is touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QTable {
    rows: HashMap<Position, ActionValues>,
}

impl QTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row for `state`, inserted as zeros if unseen.
    pub fn row_mut(&mut self, state: Position) -> &mut ActionValues {
        self.rows.entry(state).or_insert([0.0; 4])
    }

    pub fn row(&self, state: Position) -> Option<&ActionValues> {
        self.rows.get(&state)
    }

    /// Best value reachable from `state`; zero for unseen states.
    pub fn max_value(&self, state: Position) -> f64 {
        self.row(state)
            .map(|row| row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .unwrap_or(0.0)
    }

    pub fn insert(&mut self, state: Position, values: ActionValues) {
        self.rows.insert(state, values);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Position, ActionValues> {
        self.rows.iter()
    }

    /// Rows ordered by position, for stable output.
    pub fn sorted(&self) -> Vec<(Position, ActionValues)> {
        let mut rows: Vec<_> = self.rows.iter().map(|(p, v)| (*p, *v)).collect();
        rows.sort_by_key(|(p, _)| (p.y, p.x));
        rows
    }
}

/// Index of the largest value; ties go to the lowest index.
fn argmax(values: &ActionValues) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = i;
        }
    }
    best
}

/// Epsilon-greedy tabular Q-learning agent.
#[derive(Debug)]
pub struct QAgent {
    table: QTable,
    epsilon: f64,
    config: LearningConfig,
    rng: StdRng,
}

impl QAgent {
    pub fn new(config: LearningConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        QAgent {
            table: QTable::new(),
            epsilon: config.epsilon_start,
            config,
            rng,
        }
    }

    /// Resumes from a persisted table and exploration rate.
    pub fn with_table(config: LearningConfig, table: QTable, epsilon: f64) -> Self {
        let mut agent = Self::new(config);
        agent.table = table;
        agent.epsilon = epsilon;
        agent
    }

    /// The action with the highest value for `state`, creating the row on
    /// first visit.
    pub fn greedy_action(&mut self, state: Position) -> Action {
        let best = argmax(self.table.row_mut(state));
        Action::ALL[best]
    }

    /// Temporal-difference update of `Q(state, action)`.
    ///
    /// When `done` is set the bootstrap term is exactly zero, whatever the
    /// table holds for `next_state`.
    pub fn update(
        &mut self,
        state: Position,
        action: Action,
        reward: f64,
        next_state: Position,
        done: bool,
    ) {
        let future = if done {
            0.0
        } else {
            self.config.gamma * self.table.max_value(next_state)
        };
        let target = reward + future;
        let value = &mut self.table.row_mut(state)[action.index()];
        *value += self.config.alpha * (target - *value);
    }

    /// Multiplies epsilon by the decay factor, never below the floor and
    /// never upwards.
    pub fn decay_exploration(&mut self) {
        if self.epsilon > self.config.epsilon_min {
            self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }
}

impl Agent for QAgent {
    fn select_action(&mut self, state: Position) -> Action {
        if self.rng.random::<f64>() < self.epsilon {
            Action::ALL[self.rng.random_range(0..Action::ALL.len())]
        } else {
            self.greedy_action(state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LearningConfig {
        LearningConfig {
            seed: Some(5),
            ..LearningConfig::default()
        }
    }

    fn greedy_agent() -> QAgent {
        QAgent::with_table(config(), QTable::new(), 0.0)
    }

    #[test]
    fn greedy_selection_creates_rows_and_breaks_ties_low() {
        let mut agent = greedy_agent();
        let state = Position::new(2, 3);
        assert_eq!(agent.select_action(state), Action::Up);
        assert_eq!(agent.table().row(state), Some(&[0.0; 4]));

        agent.table.insert(state, [1.0, 3.0, 3.0, -2.0]);
        assert_eq!(agent.select_action(state), Action::Down);
    }

    #[test]
    fn full_exploration_visits_every_action() {
        let mut agent = QAgent::with_table(config(), QTable::new(), 1.0);
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[agent.select_action(Position::new(0, 0)).index()] = true;
        }
        assert_eq!(seen, [true; 4]);
        // Pure exploration never touches the table.
        assert!(agent.table().is_empty());
    }

    #[test]
    fn update_bootstraps_from_next_state() {
        let mut agent = greedy_agent();
        let (s, next) = (Position::new(0, 0), Position::new(1, 0));
        agent.table.insert(next, [0.0, 10.0, 0.0, 0.0]);
        agent.update(s, Action::Right, -1.0, next, false);
        // 0 + 0.1 * (-1 + 0.9 * 10 - 0)
        let value = agent.table().row(s).unwrap()[Action::Right.index()];
        assert!((value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn terminal_update_ignores_next_state() {
        let mut agent = greedy_agent();
        let (s, next) = (Position::new(0, 0), Position::new(1, 0));
        agent.table.insert(s, [0.0, 0.0, 0.0, 4.0]);
        agent.table.insert(next, [1e6, 1e6, 1e6, 1e6]);
        agent.update(s, Action::Right, 500.0, next, true);
        let value = agent.table().row(s).unwrap()[Action::Right.index()];
        assert!((value - (4.0 + 0.1 * (500.0 - 4.0))).abs() < 1e-9);
    }

    #[test]
    fn decay_is_monotone_and_floored() {
        let mut agent = QAgent::new(LearningConfig {
            epsilon_decay: 0.5,
            epsilon_min: 0.1,
            ..config()
        });
        let mut previous = agent.epsilon();
        for _ in 0..50 {
            agent.decay_exploration();
            assert!(agent.epsilon() <= previous);
            assert!(agent.epsilon() >= 0.1);
            previous = agent.epsilon();
        }
        assert_eq!(agent.epsilon(), 0.1);
    }

    #[test]
    fn decay_never_raises_a_rate_below_the_floor() {
        let mut agent = QAgent::with_table(config(), QTable::new(), 0.001);
        agent.decay_exploration();
        assert_eq!(agent.epsilon(), 0.001);
    }

    #[test]
    fn max_value_of_unseen_state_is_zero() {
        let mut table = QTable::new();
        assert_eq!(table.max_value(Position::new(3, 3)), 0.0);
        table.insert(Position::new(3, 3), [-4.0, -2.0, -9.0, -3.0]);
        assert_eq!(table.max_value(Position::new(3, 3)), -2.0);
    }

    #[test]
    fn random_walker_is_reproducible() {
        let mut a = RandomWalker::new(9);
        let mut b = RandomWalker::new(9);
        for _ in 0..20 {
            assert_eq!(
                a.select_action(Position::default()),
                b.select_action(Position::default())
            );
        }
    }
}
