//! Reads one dataset's lines epoch by epoch, shuffling each epoch as it's
//! opened and transparently wrapping to a new epoch (with an incremented
//! seed) when the current one is exhausted.
//!
//! Generic over how an epoch's shuffle is produced: [`SyncOpener`] shuffles
//! synchronously on first use, [`AsyncOpener`] shuffles the *next* epoch on
//! a background thread while the current one is being read.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::curriculum::{Dataset, DatasetState};
use crate::shuffle::{self, ShuffleError, ShuffleOptions};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Shuffle(#[from] ShuffleError),
    #[error("shuffled epoch file for dataset {0:?} was empty")]
    EmptyShuffledFile(String),
    #[error("background shuffle worker for dataset {0:?} panicked")]
    WorkerPanicked(String),
}

/// How a [`DatasetReader`] obtains the file for the next epoch.
pub trait EpochOpener: Send {
    fn open(&mut self, seed: u64, dataset: &Dataset, opts: &ShuffleOptions) -> Result<File, ReaderError>;
    fn close(&mut self);
}

#[derive(Default)]
pub struct SyncOpener;

impl EpochOpener for SyncOpener {
    fn open(&mut self, seed: u64, dataset: &Dataset, opts: &ShuffleOptions) -> Result<File, ReaderError> {
        let mut file = open_epoch_tempfile(opts)?;
        let cancel = AtomicBool::new(false);
        shuffle::materialize(&dataset.files, seed, opts, &cancel, &mut file)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    fn close(&mut self) {}
}

struct PendingShuffle {
    seed: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<File, ReaderError>>,
}

#[derive(Default)]
pub struct AsyncOpener {
    pending: Option<PendingShuffle>,
}

impl AsyncOpener {
    fn spawn(&mut self, seed: u64, dataset: Dataset, opts: ShuffleOptions) {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_thread = Arc::clone(&cancel);
        let handle = thread::spawn(move || -> Result<File, ReaderError> {
            let mut file = open_epoch_tempfile(&opts)?;
            shuffle::materialize(&dataset.files, seed, &opts, &cancel_thread, &mut file)?;
            file.seek(SeekFrom::Start(0))?;
            Ok(file)
        });
        self.pending = Some(PendingShuffle { seed, cancel, handle });
    }
}

impl EpochOpener for AsyncOpener {
    fn open(&mut self, seed: u64, dataset: &Dataset, opts: &ShuffleOptions) -> Result<File, ReaderError> {
        if self.pending.is_none() {
            self.spawn(seed, dataset.clone(), opts.clone());
        }
        let pending = self
            .pending
            .take()
            .expect("async opener always has a pending shuffle before open() returns");
        debug_assert_eq!(
            pending.seed, seed,
            "async reader advanced out of sync with its own pending shuffle"
        );
        let file = pending
            .handle
            .join()
            .map_err(|_| ReaderError::WorkerPanicked(dataset.name.clone()))??;
        self.spawn(seed + 1, dataset.clone(), opts.clone());
        Ok(file)
    }

    fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.store(true, Ordering::Relaxed);
            let _ = pending.handle.join();
        }
    }
}

fn open_epoch_tempfile(opts: &ShuffleOptions) -> std::io::Result<File> {
    match &opts.tmp_dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    }
}

enum ReadOutcome {
    Line(String),
    EpochEnd,
}

pub struct DatasetReader<O: EpochOpener = SyncOpener> {
    dataset: Dataset,
    seed: u64,
    line: u64,
    epoch: u64,
    num_fields: Option<u32>,
    opts: ShuffleOptions,
    opener: O,
    file: Option<BufReader<File>>,
    buffered: Option<String>,
}

pub type AsyncDatasetReader = DatasetReader<AsyncOpener>;

impl<O: EpochOpener + Default> DatasetReader<O> {
    pub fn new(dataset: Dataset, seed: u64, num_fields: Option<u32>, opts: ShuffleOptions) -> Self {
        Self {
            dataset,
            seed,
            line: 0,
            epoch: 0,
            num_fields,
            opts,
            opener: O::default(),
            file: None,
            buffered: None,
        }
    }
}

impl<O: EpochOpener> DatasetReader<O> {
    pub fn state(&self) -> DatasetState {
        DatasetState {
            seed: self.seed,
            line: self.line,
            epoch: self.epoch,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn close(&mut self) {
        self.file = None;
        self.opener.close();
    }

    pub fn restore(&mut self, state: DatasetState) -> Result<(), ReaderError> {
        self.close();
        self.seed = state.seed;
        self.epoch = state.epoch;
        self.line = 0;
        self.buffered = None;
        for _ in 0..state.line {
            self.next_line()?;
        }
        Ok(())
    }

    /// Returns the next line of this dataset, opening (or re-opening, for a
    /// new epoch) the shuffled file as needed.
    pub fn next_line(&mut self) -> Result<String, ReaderError> {
        if self.file.is_none() {
            self.open_epoch()?;
        }
        let line = self
            .buffered
            .take()
            .expect("open_epoch guarantees a buffered line on success");
        self.line += 1;
        match self.read_line()? {
            ReadOutcome::Line(next) => self.buffered = Some(next),
            ReadOutcome::EpochEnd => {}
        }
        Ok(line)
    }

    fn open_epoch(&mut self) -> Result<(), ReaderError> {
        log::info!("reading {:?} for epoch {}", self.dataset.name, self.epoch);
        let file = self.opener.open(self.seed, &self.dataset, &self.opts)?;
        self.file = Some(BufReader::new(file));
        self.line = 0;
        match self.read_line()? {
            ReadOutcome::Line(line) => {
                self.buffered = Some(line);
                Ok(())
            }
            ReadOutcome::EpochEnd => Err(ReaderError::EmptyShuffledFile(self.dataset.name.clone())),
        }
    }

    fn read_line(&mut self) -> Result<ReadOutcome, ReaderError> {
        loop {
            let file = self.file.as_mut().expect("read_line called with a file open");
            let mut raw = Vec::new();
            let n = file.read_until(b'\n', &mut raw)?;
            if n == 0 {
                self.file = None;
                self.seed += 1;
                self.epoch += 1;
                return Ok(ReadOutcome::EpochEnd);
            }

            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim_end_matches(['\r', '\n']);
            let fields: Vec<&str> = trimmed.split('\t').collect();

            if fields.iter().any(|f| f.is_empty()) {
                crate::logging::log_once(format!(
                    "empty field in {:?} line {:?}, skipping",
                    self.dataset.name, trimmed
                ));
                continue;
            }

            if let Some(expected) = self.num_fields {
                let expected = expected as usize;
                match fields.len().cmp(&expected) {
                    std::cmp::Ordering::Equal => return Ok(ReadOutcome::Line(trimmed.to_string())),
                    std::cmp::Ordering::Greater => return Ok(ReadOutcome::Line(fields[..expected].join("\t"))),
                    std::cmp::Ordering::Less => {
                        crate::logging::log_once(format!(
                            "expected {expected} fields in {:?} line but got {}, skipping",
                            self.dataset.name,
                            fields.len()
                        ));
                        continue;
                    }
                }
            }

            return Ok(ReadOutcome::Line(trimmed.to_string()));
        }
    }
}

/// Collected so `DatasetReader` doesn't need to expose `PathBuf` plumbing to
/// its callers; kept here rather than in `curriculum.rs` since it's purely
/// a reader-construction concern.
pub fn default_shuffle_options(chunk_size: usize, workers: usize, tmp_dir: Option<PathBuf>, shuffle: bool) -> ShuffleOptions {
    ShuffleOptions {
        chunk_size,
        workers,
        tmp_dir,
        shuffle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dataset(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> Dataset {
        let path = dir.path().join(format!("{name}.tsv"));
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        Dataset {
            name: name.to_string(),
            files: vec![path],
        }
    }

    #[test]
    fn reads_all_lines_then_wraps_to_a_new_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "d", &["a\tb", "c\td"]);
        let opts = default_shuffle_options(10, 0, None, false);
        let mut reader: DatasetReader<SyncOpener> = DatasetReader::new(dataset, 1, None, opts);

        assert_eq!(reader.next_line().unwrap(), "a\tb");
        assert_eq!(reader.epoch(), 0);
        assert_eq!(reader.next_line().unwrap(), "c\td");
        // next call wraps into epoch 1
        assert_eq!(reader.next_line().unwrap(), "a\tb");
        assert_eq!(reader.epoch(), 1);
    }

    #[test]
    fn skips_lines_with_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "d", &["a\t", "c\td"]);
        let opts = default_shuffle_options(10, 0, None, false);
        let mut reader: DatasetReader<SyncOpener> = DatasetReader::new(dataset, 1, None, opts);
        assert_eq!(reader.next_line().unwrap(), "c\td");
    }

    #[test]
    fn truncates_extra_fields_when_num_fields_set() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "d", &["a\tb\tc"]);
        let opts = default_shuffle_options(10, 0, None, false);
        let mut reader: DatasetReader<SyncOpener> = DatasetReader::new(dataset, 1, Some(2), opts);
        assert_eq!(reader.next_line().unwrap(), "a\tb");
    }

    #[test]
    fn restore_fast_forwards_to_the_saved_position() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "d", &["a", "b", "c"]);
        let opts = default_shuffle_options(10, 0, None, false);
        let mut reader: DatasetReader<SyncOpener> = DatasetReader::new(dataset.clone(), 1, None, opts.clone());
        reader.next_line().unwrap();
        let state = reader.state();

        let mut resumed: DatasetReader<SyncOpener> = DatasetReader::new(dataset, 1, None, opts);
        resumed.restore(state).unwrap();
        assert_eq!(resumed.next_line().unwrap(), "b");
    }

    #[test]
    fn async_opener_produces_the_same_lines_as_sync() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(&dir, "d", &["a", "b", "c"]);
        let opts = default_shuffle_options(10, 0, None, false);
        let mut reader: DatasetReader<AsyncOpener> = DatasetReader::new(dataset, 1, None, opts);
        assert_eq!(reader.next_line().unwrap(), "a");
        assert_eq!(reader.next_line().unwrap(), "b");
        assert_eq!(reader.next_line().unwrap(), "c");
        reader.close();
    }
}
