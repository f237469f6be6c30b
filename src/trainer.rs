//! The orchestrator: draws weighted slices from dataset readers to build a
//! batch, runs it through the modifier pool, optionally shuffles it, and
//! advances the curriculum's stages as their `until` clauses trip.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::curriculum::{Curriculum, EpochTracker, EpochTrackerState};
use crate::pool::{ModifierPool, PoolError};
use crate::reader::{DatasetReader, EpochOpener, ReaderError};
use crate::rng::SplitMix64;
use crate::shuffle::ShuffleOptions;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub batch_size: usize,
    pub chunk_size: usize,
    pub workers: usize,
}

/// Serializable snapshot of a [`Trainer`], written by the state tracker and
/// used to resume a run exactly where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerState {
    pub stage: String,
    pub rng_state: u64,
    pub epoch_tracker: EpochTrackerState,
    pub datasets: HashMap<String, crate::curriculum::DatasetState>,
}

pub struct Trainer<O: EpochOpener + Default> {
    curriculum: Arc<Curriculum>,
    readers: HashMap<String, DatasetReader<O>>,
    stage: Option<String>,
    epoch_tracker: EpochTracker,
    rng: SplitMix64,
    shuffle: bool,
}

impl<O: EpochOpener + Default> Trainer<O> {
    pub fn new(curriculum: Arc<Curriculum>, shuffle_opts: ShuffleOptions, shuffle: bool) -> Self {
        let readers = curriculum
            .datasets
            .iter()
            .map(|(name, dataset)| {
                let reader = DatasetReader::new(dataset.clone(), curriculum.seed, curriculum.num_fields, shuffle_opts.clone());
                (name.clone(), reader)
            })
            .collect::<HashMap<_, _>>();

        let stage = curriculum.first_stage().map(|s| s.name.clone());
        let epoch_tracker = match &stage {
            Some(name) => {
                let until_dataset = &curriculum.stages[name].until_dataset;
                let reader = &readers[until_dataset];
                EpochTracker::new(reader.epoch(), reader.line())
            }
            None => EpochTracker::new(0, 0),
        };

        Self {
            rng: SplitMix64::new(curriculum.seed),
            curriculum,
            readers,
            stage,
            epoch_tracker,
            shuffle,
        }
    }

    pub fn state(&self) -> TrainerState {
        TrainerState {
            stage: self.stage.clone().unwrap_or_default(),
            rng_state: self.rng.state(),
            epoch_tracker: self.epoch_tracker.state(),
            datasets: self.readers.iter().map(|(name, reader)| (name.clone(), reader.state())).collect(),
        }
    }

    pub fn restore(&mut self, state: TrainerState) -> Result<(), TrainerError> {
        self.stage = Some(state.stage);
        self.rng = SplitMix64::from_state(state.rng_state);
        self.epoch_tracker = EpochTracker::restore(state.epoch_tracker);
        for (name, dataset_state) in state.datasets {
            if let Some(reader) = self.readers.get_mut(&name) {
                reader.restore(dataset_state)?;
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        for reader in self.readers.values_mut() {
            reader.close();
        }
    }

    /// The current stage name, or `None` if the curriculum has run to
    /// completion.
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn dataset_progress(&self) -> Vec<(String, u64, u64)> {
        let mut progress: Vec<(String, u64, u64)> =
            self.readers.iter().map(|(name, reader)| (name.clone(), reader.epoch(), reader.line())).collect();
        progress.sort();
        progress
    }

    fn advance_stage(&mut self) -> bool {
        let Some(stage_name) = self.stage.clone() else {
            return false;
        };
        let current = &self.curriculum.stages[&stage_name];
        match self.curriculum.next_stage(current) {
            Some(next) => {
                let reader = &self.readers[&next.until_dataset];
                self.epoch_tracker = EpochTracker::new(reader.epoch(), reader.line());
                self.stage = Some(next.name.clone());
                true
            }
            None => {
                self.stage = None;
                false
            }
        }
    }

    pub fn run(&mut self, opts: RunOptions) -> BatchIter<'_, O> {
        BatchIter {
            trainer: self,
            batch_size: opts.batch_size,
            chunk_size: opts.chunk_size,
            workers: opts.workers,
            pool: None,
            pool_stage: None,
        }
    }
}

pub struct BatchIter<'t, O: EpochOpener + Default> {
    trainer: &'t mut Trainer<O>,
    batch_size: usize,
    chunk_size: usize,
    workers: usize,
    pool: Option<ModifierPool>,
    pool_stage: Option<String>,
}

impl<O: EpochOpener + Default> Iterator for BatchIter<'_, O> {
    type Item = Result<Vec<String>, TrainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let stage_name = self.trainer.stage.clone()?;
            let curriculum = Arc::clone(&self.trainer.curriculum);
            let stage = curriculum.stages[&stage_name].clone();

            let epoch = {
                let reader = &self.trainer.readers[&stage.until_dataset];
                self.trainer.epoch_tracker.epoch(reader.epoch(), reader.line())
            };
            let reached = matches!(stage.until_epoch, Some(limit) if epoch >= limit as i64);
            if reached {
                if !self.trainer.advance_stage() {
                    return None;
                }
                self.pool = None;
                continue;
            }

            let mut batch = Vec::new();
            for entry in &stage.mix {
                let take = (self.batch_size as f64 * entry.weight).floor() as usize;
                let reader = self
                    .trainer
                    .readers
                    .get_mut(&entry.dataset.name)
                    .expect("mix entries reference only validated datasets");
                for _ in 0..take {
                    match reader.next_line() {
                        Ok(line) => batch.push(line),
                        Err(e) => return Some(Err(e.into())),
                    }
                }
            }

            if self.pool_stage.as_deref() != Some(stage_name.as_str()) {
                let modifiers = stage.modifiers.clone().unwrap_or_else(|| Arc::clone(&curriculum.modifiers));
                self.pool = Some(ModifierPool::new(modifiers, self.workers));
                self.pool_stage = Some(stage_name);
            }
            let pool = self.pool.as_ref().expect("pool built above before first use");
            let mut batch = match pool.map(batch, self.chunk_size, &mut self.trainer.rng) {
                Ok(batch) => batch,
                Err(e) => return Some(Err(e.into())),
            };

            if self.trainer.shuffle {
                batch.shuffle(&mut self.trainer.rng);
            }

            return Some(Ok(batch));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{Dataset, MixEntry, Stage};
    use crate::reader::SyncOpener;
    use std::io::Write;

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

    fn one_stage_curriculum(dataset: Dataset, until_epoch: Option<u64>, modifiers: Vec<Box<dyn crate::modifiers::Modifier>>) -> Curriculum {
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
        Curriculum {
            seed: 1,
            num_fields: None,
            datasets,
            stages,
            stage_order: vec!["only".to_string()],
            modifiers: Arc::new(modifiers),
            trainer_command: None,
        }
    }

    fn no_shuffle_opts() -> ShuffleOptions {
        ShuffleOptions {
            shuffle: false,
            ..Default::default()
        }
    }

    #[test]
    fn baseline_emits_input_order_without_shuffling_or_modifiers() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..10).map(|i| format!("line{i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let dataset = write_dataset(&dir, "clean", &refs);
        let curriculum = Arc::new(one_stage_curriculum(dataset, Some(1), Vec::new()));

        let mut trainer: Trainer<SyncOpener> = Trainer::new(curriculum, no_shuffle_opts(), false);
        let opts = RunOptions {
            batch_size: 1,
            chunk_size: 16,
            workers: 0,
        };
        let output: Vec<String> = trainer.run(opts).map(|b| b.unwrap()).flatten().collect();
        assert_eq!(output, lines);
    }

    #[test]
    fn repeat_wrap_yields_each_line_k_times() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "clean", &["a", "b"]);
        let curriculum = Arc::new(one_stage_curriculum(dataset, Some(2), Vec::new()));

        let mut trainer: Trainer<SyncOpener> = Trainer::new(curriculum, no_shuffle_opts(), false);
        let opts = RunOptions {
            batch_size: 1,
            chunk_size: 16,
            workers: 0,
        };
        let mut output: Vec<String> = trainer.run(opts).map(|b| b.unwrap()).flatten().collect();
        output.sort();
        assert_eq!(output, vec!["a", "a", "b", "b"]);
    }

    #[test]
    fn resume_matches_running_straight_through() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "clean", &["a", "b", "c", "d"]);
        let curriculum = Arc::new(one_stage_curriculum(dataset, Some(3), Vec::new()));
        let opts = RunOptions {
            batch_size: 1,
            chunk_size: 16,
            workers: 0,
        };

        let mut reference: Trainer<SyncOpener> = Trainer::new(Arc::clone(&curriculum), no_shuffle_opts(), false);
        let full: Vec<String> = reference.run(opts).map(|b| b.unwrap()).flatten().collect();

        let mut first_half: Trainer<SyncOpener> = Trainer::new(Arc::clone(&curriculum), no_shuffle_opts(), false);
        let mut produced = Vec::new();
        {
            let mut iter = first_half.run(opts);
            for _ in 0..5 {
                produced.extend(iter.next().unwrap().unwrap());
            }
        }
        let state = first_half.state();

        let mut resumed: Trainer<SyncOpener> = Trainer::new(Arc::clone(&curriculum), no_shuffle_opts(), false);
        resumed.restore(state).unwrap();
        produced.extend(resumed.run(opts).map(|b| b.unwrap()).flatten());

        assert_eq!(produced, full);
    }

    #[test]
    fn workers_one_and_four_agree() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..40).map(|i| format!("word{i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let dataset = write_dataset(&dir, "clean", &refs);

        let modifiers = |p: f64| -> Vec<Box<dyn crate::modifiers::Modifier>> {
            vec![Box::new(crate::modifiers::UpperCaseModifier::new(p))]
        };

        let curriculum1 = Arc::new(one_stage_curriculum(dataset.clone(), Some(2), modifiers(0.25)));
        let mut trainer1: Trainer<SyncOpener> = Trainer::new(curriculum1, no_shuffle_opts(), false);
        let out1: Vec<String> = trainer1
            .run(RunOptions {
                batch_size: 5,
                chunk_size: 3,
                workers: 1,
            })
            .map(|b| b.unwrap())
            .flatten()
            .collect();

        let curriculum4 = Arc::new(one_stage_curriculum(dataset, Some(2), modifiers(0.25)));
        let mut trainer4: Trainer<SyncOpener> = Trainer::new(curriculum4, no_shuffle_opts(), false);
        let out4: Vec<String> = trainer4
            .run(RunOptions {
                batch_size: 5,
                chunk_size: 3,
                workers: 4,
            })
            .map(|b| b.unwrap())
            .flatten()
            .collect();

        assert_eq!(out1, out4);
    }

    #[test]
    fn batch_slice_uses_floor_of_weight_times_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_dataset(&dir, "clean", &["c0", "c1", "c2", "c3", "c4"]);
        let medium_path = dir.path().join("medium.tsv");
        std::fs::write(&medium_path, "m0\nm1\nm2\nm3\n").unwrap();
        let medium = Dataset {
            name: "medium".to_string(),
            files: vec![medium_path],
        };

        let mut datasets = HashMap::new();
        datasets.insert(clean.name.clone(), clean.clone());
        datasets.insert(medium.name.clone(), medium.clone());
        let stage = Stage {
            name: "only".to_string(),
            mix: vec![
                MixEntry { dataset: clean, weight: 0.8 },
                MixEntry { dataset: medium, weight: 0.2 },
            ],
            until_dataset: "clean".to_string(),
            until_epoch: Some(1),
            modifiers: None,
        };
        let mut stages = HashMap::new();
        stages.insert(stage.name.clone(), stage);
        let curriculum = Arc::new(Curriculum {
            seed: 1,
            num_fields: None,
            datasets,
            stages,
            stage_order: vec!["only".to_string()],
            modifiers: Arc::new(Vec::new()),
            trainer_command: None,
        });

        let mut trainer: Trainer<SyncOpener> = Trainer::new(curriculum, no_shuffle_opts(), false);
        let batch = trainer
            .run(RunOptions {
                batch_size: 10,
                chunk_size: 16,
                workers: 0,
            })
            .next()
            .unwrap()
            .unwrap();
        // floor(10*0.8)=8 clean + floor(10*0.2)=2 medium = 10
        assert_eq!(batch.len(), 10);
        assert_eq!(batch.iter().filter(|l| l.starts_with('c')).count(), 8);
        assert_eq!(batch.iter().filter(|l| l.starts_with('m')).count(), 2);
    }
}
