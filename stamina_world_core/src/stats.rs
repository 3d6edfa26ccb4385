// Episode statistics sinks.
// - EpisodeSink: trait used by the training loop
// - NoopSink:    discards all records
// - MemorySink:  keeps records in memory
// - CsvStatsLog: appends one CSV row per episode

use std::{
    fmt,
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use serde::Serialize;

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EpisodeOutcome {
    Goal,
    Dead,
    /// Cut off by the step cap.
    Timeout,
}

impl EpisodeOutcome {
    pub fn is_success(self) -> bool {
        self == EpisodeOutcome::Goal
    }
}

impl fmt::Display for EpisodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            EpisodeOutcome::Goal => "Goal",
            EpisodeOutcome::Dead => "Dead",
            EpisodeOutcome::Timeout => "Timeout",
        };
        f.write_str(tag)
    }
}

/// One finished episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRecord {
    pub trial: u64,
    /// Exploration had decayed below the testing threshold.
    pub testing: bool,
    pub steps: u32,
    pub stamina_left: i32,
    pub epsilon: f64,
    pub alpha: f64,
    pub success: bool,
    pub outcome: EpisodeOutcome,
}

/// One row of the training log.
#[derive(Debug, Serialize)]
struct StatsRow {
    trial: u64,
    testing: bool,
    steps: u32,
    stamina_left: i32,
    /// Rounded to 4 decimals.
    epsilon: f64,
    alpha: f64,
    success: bool,
    outcome: EpisodeOutcome,
}

impl From<&EpisodeRecord> for StatsRow {
    fn from(record: &EpisodeRecord) -> Self {
        StatsRow {
            trial: record.trial,
            testing: record.testing,
            steps: record.steps,
            stamina_left: record.stamina_left,
            epsilon: (record.epsilon * 10_000.0).round() / 10_000.0,
            alpha: record.alpha,
            success: record.success,
            outcome: record.outcome,
        }
    }
}

/// Abstract sink for per-episode statistics.
pub trait EpisodeSink {
    fn append(&mut self, record: &EpisodeRecord);
}

impl<S: EpisodeSink + ?Sized> EpisodeSink for Box<S> {
    fn append(&mut self, record: &EpisodeRecord) {
        (**self).append(record);
    }
}

/// Sink that discards all records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EpisodeSink for NoopSink {
    fn append(&mut self, _record: &EpisodeRecord) {}
}

#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<EpisodeRecord>,
}

impl EpisodeSink for MemorySink {
    fn append(&mut self, record: &EpisodeRecord) {
        self.records.push(record.clone());
    }
}

/// Appends to a CSV file, writing the header only when the file is new.
///
/// The file is reopened per record so an interrupted run leaves every
/// finished episode on disk.
#[derive(Debug, Clone)]
pub struct CsvStatsLog {
    path: PathBuf,
}

impl CsvStatsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvStatsLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_append(&self, record: &EpisodeRecord) -> Result<(), csv::Error> {
        let is_new = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // The header comes from the row's field names.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(StatsRow::from(record))?;
        writer.flush()?;
        Ok(())
    }
}

impl EpisodeSink for CsvStatsLog {
    fn append(&mut self, record: &EpisodeRecord) {
        // A lost log line must not stop training.
        let _ = self.try_append(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn record(trial: u64, outcome: EpisodeOutcome) -> EpisodeRecord {
        EpisodeRecord {
            trial,
            testing: false,
            steps: 42,
            stamina_left: 17,
            epsilon: 0.123456,
            alpha: 0.1,
            success: outcome.is_success(),
            outcome,
        }
    }

    #[test]
    fn csv_log_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("training_log.csv");
        let mut log = CsvStatsLog::new(&path);
        log.append(&record(1, EpisodeOutcome::Goal));
        log.append(&record(2, EpisodeOutcome::Dead));

        let mut reopened = CsvStatsLog::new(&path);
        reopened.append(&record(3, EpisodeOutcome::Timeout));

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "trial,testing,steps,stamina_left,epsilon,alpha,success,outcome",
                "1,false,42,17,0.1235,0.1,true,Goal",
                "2,false,42,17,0.1235,0.1,false,Dead",
                "3,false,42,17,0.1235,0.1,false,Timeout",
            ]
        );
    }

    #[test]
    fn unwritable_log_is_ignored() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending.
        let mut log = CsvStatsLog::new(dir.path());
        log.append(&record(1, EpisodeOutcome::Goal));
    }

    #[test]
    fn memory_sink_collects() {
        let mut sink = MemorySink::default();
        sink.append(&record(1, EpisodeOutcome::Dead));
        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.records[0].outcome.to_string(), "Dead");
    }

    #[test]
    fn boxed_sinks_forward_records() {
        let mut sinks: Vec<Box<dyn EpisodeSink>> =
            vec![Box::new(NoopSink), Box::new(MemorySink::default())];
        for sink in &mut sinks {
            sink.append(&record(7, EpisodeOutcome::Goal));
        }
    }
}
