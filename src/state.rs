//! Periodically persists [`TrainerState`] to disk via atomic rename, and
//! restores it on startup. Wraps a [`Trainer`]'s batch iterator so a dump
//! always happens on normal exit and on error.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::reader::EpochOpener;
use crate::trainer::{RunOptions, Trainer, TrainerError, TrainerState};

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to decode state file {path}: {source}")]
    Decode { path: String, source: bincode::Error },
    #[error("failed to encode state: {0}")]
    Encode(#[from] bincode::Error),
}

/// Loads a [`TrainerState`] from `path`, if it exists.
pub fn load(path: &Path) -> Result<Option<TrainerState>, StateError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let state = bincode::deserialize(&bytes).map_err(|source| StateError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(state))
}

/// Writes `state` to `path` via `<path>.new` then an atomic rename.
pub fn dump(path: &Path, state: &TrainerState) -> Result<(), StateError> {
    let tmp_path = sibling_tmp_path(path);
    let bytes = bincode::serialize(state)?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".new");
    path.with_file_name(name)
}

/// Drives a [`Trainer`]'s batch loop, dumping state to `path` no more often
/// than every `interval` of wall time and always on exit, whether the loop
/// ran to completion or failed.
pub struct StateTracker<'t, O: EpochOpener + Default> {
    trainer: &'t mut Trainer<O>,
    path: PathBuf,
    interval: Duration,
    last_dump: Instant,
}

impl<'t, O: EpochOpener + Default> StateTracker<'t, O> {
    pub fn new(trainer: &'t mut Trainer<O>, path: PathBuf, interval: Duration) -> Self {
        Self {
            trainer,
            path,
            interval,
            last_dump: Instant::now(),
        }
    }

    /// The trainer's current stage, for progress reporting (e.g. on SIGUSR1).
    pub fn stage(&self) -> Option<&str> {
        self.trainer.stage()
    }

    /// Per-dataset `(name, epoch, line)`, for progress reporting.
    pub fn dataset_progress(&self) -> Vec<(String, u64, u64)> {
        self.trainer.dataset_progress()
    }

    /// Restores `trainer`'s state from `path`, if the file is present.
    pub fn restore_if_present(trainer: &mut Trainer<O>, path: &Path) -> Result<bool, StateError> {
        match load(path)? {
            Some(state) => {
                trainer
                    .restore(state)
                    .map_err(|e| StateError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn maybe_dump(&mut self) -> Result<(), StateError> {
        if self.last_dump.elapsed() >= self.interval {
            self.force_dump()?;
        }
        Ok(())
    }

    fn force_dump(&mut self) -> Result<(), StateError> {
        dump(&self.path, &self.trainer.state())?;
        self.last_dump = Instant::now();
        Ok(())
    }

    /// Pulls the next batch, dumping state first if the configured interval
    /// has elapsed. Returns `None` once the curriculum has run to
    /// completion.
    pub fn next_batch(&mut self, opts: RunOptions) -> Option<Result<Vec<String>, TrainerError>> {
        if let Err(e) = self.maybe_dump() {
            log::warn!("failed to dump trainer state: {e}");
        }
        self.trainer.run(opts).next()
    }

    /// Forces a final state dump. Callers MUST invoke this on every exit
    /// path (normal completion, a propagated error, or a signal-driven
    /// shutdown) so progress is never silently lost.
    pub fn finish(&mut self) {
        if let Err(e) = self.force_dump() {
            log::warn!("failed to dump trainer state on exit: {e}");
        }
    }

    /// Convenience for tests and short runs: drains every batch into one
    /// `Vec`, dumping state on exit regardless of outcome.
    pub fn run_to_completion(&mut self, opts: RunOptions) -> Result<Vec<Vec<String>>, TrainerError> {
        let mut batches = Vec::new();
        let result = loop {
            match self.next_batch(opts) {
                Some(Ok(batch)) => batches.push(batch),
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };
        self.finish();
        result.map(|()| batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{Curriculum, Dataset, MixEntry, Stage};
    use crate::reader::SyncOpener;
    use crate::shuffle::ShuffleOptions;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;

    fn write_dataset(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> Dataset {
        let path = dir.path().join(format!("{name}.tsv"));
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        Dataset {
            name: name.to_string(),
            files: vec![path],
        }
    }

    fn curriculum(dataset: Dataset, until_epoch: Option<u64>) -> Arc<Curriculum> {
        let mut datasets = HashMap::new();
        datasets.insert(dataset.name.clone(), dataset.clone());
        let until_dataset = dataset.name.clone();
        let stage = Stage {
            name: "only".to_string(),
            mix: vec![MixEntry { dataset, weight: 1.0 }],
            until_dataset,
            until_epoch,
            modifiers: None,
        };
        let mut stages = HashMap::new();
        stages.insert(stage.name.clone(), stage);
        Arc::new(Curriculum {
            seed: 7,
            num_fields: None,
            datasets,
            stages,
            stage_order: vec!["only".to_string()],
            modifiers: Arc::new(Vec::new()),
            trainer_command: None,
        })
    }

    #[test]
    fn dump_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "clean", &["a", "b"]);
        let c = curriculum(dataset, Some(5));
        let opts = ShuffleOptions {
            shuffle: false,
            ..Default::default()
        };
        let mut trainer: Trainer<SyncOpener> = Trainer::new(c, opts, false);
        trainer
            .run(RunOptions {
                batch_size: 1,
                chunk_size: 16,
                workers: 0,
            })
            .next()
            .unwrap()
            .unwrap();
        let state = trainer.state();

        let path = dir.path().join("state.bin");
        dump(&path, &state).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.stage, state.stage);
        assert_eq!(loaded.rng_state, state.rng_state);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.bin");
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn tracker_always_dumps_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "clean", &["a", "b", "c"]);
        let c = curriculum(dataset, Some(1));
        let opts = ShuffleOptions {
            shuffle: false,
            ..Default::default()
        };
        let mut trainer: Trainer<SyncOpener> = Trainer::new(c, opts, false);
        let path = dir.path().join("state.bin");
        let mut tracker = StateTracker::new(&mut trainer, path.clone(), Duration::from_secs(3600));
        tracker
            .run_to_completion(RunOptions {
                batch_size: 1,
                chunk_size: 16,
                workers: 0,
            })
            .unwrap();
        assert!(path.exists());
    }
}
