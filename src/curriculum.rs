//! The curriculum data model: datasets, stages, and the mix/until clauses
//! that tie them together. Built by [`crate::config::CurriculumLoader`] and
//! otherwise immutable for the lifetime of a run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::modifiers::Modifier;

/// A named parallel corpus backed by one file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dataset {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// The resumable position of a single dataset's reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetState {
    pub seed: u64,
    pub line: u64,
    pub epoch: u64,
}

/// One entry in a stage's mix clause: a dataset and the fraction of each
/// batch drawn from it.
#[derive(Debug, Clone)]
pub struct MixEntry {
    pub dataset: Dataset,
    pub weight: f64,
}

/// A stage of the curriculum: a weighted mix of datasets, a termination
/// condition (`until <dataset> <epochs|inf>`), and an optional modifier
/// chain that overrides the curriculum-level default for lines produced
/// while this stage is active.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub mix: Vec<MixEntry>,
    pub until_dataset: String,
    /// `None` means `until ... inf` — the stage never ends on its own.
    pub until_epoch: Option<u64>,
    pub modifiers: Option<Arc<Vec<Box<dyn Modifier>>>>,
}

/// The fully validated curriculum: every dataset and stage it references,
/// in declaration order.
pub struct Curriculum {
    pub seed: u64,
    pub num_fields: Option<u32>,
    pub datasets: HashMap<String, Dataset>,
    pub stages: HashMap<String, Stage>,
    pub stage_order: Vec<String>,
    pub modifiers: Arc<Vec<Box<dyn Modifier>>>,
    /// The child trainer command, shell-split from the config's `trainer`
    /// key. `None` when the CLI is expected to supply it as trailing args.
    pub trainer_command: Option<Vec<String>>,
}

impl Curriculum {
    /// The stage that follows `stage` in declaration order, or `None` if
    /// `stage` is the last one.
    pub fn next_stage(&self, stage: &Stage) -> Option<&Stage> {
        let index = self.stage_order.iter().position(|name| name == &stage.name)?;
        self.stage_order.get(index + 1).map(|name| &self.stages[name])
    }

    pub fn first_stage(&self) -> Option<&Stage> {
        self.stage_order.first().map(|name| &self.stages[name])
    }
}

/// Tracks how many epochs a stage's `until` dataset has completed,
/// correcting for the dataset reader having been opened mid-epoch (either
/// because it's shared with a previous stage, or because of a resume).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpochTrackerState {
    pub epoch_offset: u64,
    pub line_offset: u64,
}

pub struct EpochTracker {
    epoch_offset: u64,
    line_offset: u64,
}

impl EpochTracker {
    pub fn new(reader_epoch: u64, reader_line: u64) -> Self {
        Self {
            epoch_offset: reader_epoch,
            line_offset: reader_line,
        }
    }

    pub fn restore(state: EpochTrackerState) -> Self {
        Self {
            epoch_offset: state.epoch_offset,
            line_offset: state.line_offset,
        }
    }

    pub fn state(&self) -> EpochTrackerState {
        EpochTrackerState {
            epoch_offset: self.epoch_offset,
            line_offset: self.line_offset,
        }
    }

    /// Number of epochs completed since this tracker was created, given the
    /// `until` dataset reader's current (epoch, line). A reader that has
    /// wrapped into a new epoch but not yet passed the line it started at
    /// hasn't completed a full epoch yet, hence the correction.
    pub fn epoch(&self, reader_epoch: u64, reader_line: u64) -> i64 {
        let mut epoch = reader_epoch as i64 - self.epoch_offset as i64;
        if reader_line < self.line_offset {
            epoch -= 1;
        }
        epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_tracker_starts_at_zero() {
        let tracker = EpochTracker::new(3, 10);
        assert_eq!(tracker.epoch(3, 10), 0);
        assert_eq!(tracker.epoch(3, 50), 0);
    }

    #[test]
    fn epoch_tracker_counts_full_wraps() {
        let tracker = EpochTracker::new(0, 5);
        // wrapped once, past the starting line: one full epoch done
        assert_eq!(tracker.epoch(1, 20), 1);
        // wrapped once, but not yet past the starting line: not quite a full epoch
        assert_eq!(tracker.epoch(1, 2), 0);
    }

    #[test]
    fn epoch_tracker_state_round_trips() {
        let tracker = EpochTracker::new(2, 7);
        let restored = EpochTracker::restore(tracker.state());
        assert_eq!(tracker.epoch(5, 1), restored.epoch(5, 1));
    }
}
