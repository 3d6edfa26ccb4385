//! CSV persistence for the learned value table.
//!
//! One row per known state: `X, Y, Q_UP, Q_DOWN, Q_LEFT, Q_RIGHT, EPSILON`.
//! Epsilon is repeated on every row; the last row wins on load.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Position, agent::QTable, storage::PersistenceError};

/// Exploration rate handed out when there is nothing to resume from.
pub const DEFAULT_EPSILON: f64 = 1.0;

#[derive(Debug, Serialize, Deserialize)]
struct BrainRecord {
    #[serde(rename = "X")]
    x: usize,
    #[serde(rename = "Y")]
    y: usize,
    #[serde(rename = "Q_UP")]
    q_up: f64,
    #[serde(rename = "Q_DOWN")]
    q_down: f64,
    #[serde(rename = "Q_LEFT")]
    q_left: f64,
    #[serde(rename = "Q_RIGHT")]
    q_right: f64,
    #[serde(rename = "EPSILON")]
    epsilon: f64,
}

/// Writes the table and the current exploration rate, replacing `path`.
pub fn save(table: &QTable, epsilon: f64, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    if table.is_empty() {
        writer.write_record(["X", "Y", "Q_UP", "Q_DOWN", "Q_LEFT", "Q_RIGHT", "EPSILON"])?;
    }
    for (position, [q_up, q_down, q_left, q_right]) in table.sorted() {
        writer.serialize(BrainRecord {
            x: position.x,
            y: position.y,
            q_up,
            q_down,
            q_left,
            q_right,
            epsilon,
        })?;
    }
    writer.flush().map_err(|e| PersistenceError::io(path, e))
}

/// Reads a saved table.
///
/// A missing or malformed file, including an exploration rate outside
/// `[0, 1]`, yields an empty table and [`DEFAULT_EPSILON`] so training can
/// always start over.
pub fn load(path: impl AsRef<Path>) -> (QTable, f64) {
    try_load(path.as_ref()).unwrap_or_else(|| (QTable::new(), DEFAULT_EPSILON))
}

fn try_load(path: &Path) -> Option<(QTable, f64)> {
    let mut reader = csv::Reader::from_path(path).ok()?;
    let mut table = QTable::new();
    let mut epsilon = DEFAULT_EPSILON;
    for record in reader.deserialize() {
        let record: BrainRecord = record.ok()?;
        // Also rejects NaN.
        if !(0.0..=1.0).contains(&record.epsilon) {
            return None;
        }
        table.insert(
            Position::new(record.x, record.y),
            [record.q_up, record.q_down, record.q_left, record.q_right],
        );
        epsilon = record.epsilon;
    }
    Some((table, epsilon))
}
