//! A deterministic, resumable training-data feeder for neural machine
//! translation trainers: curriculum-driven dataset mixing, an
//! external-memory shuffle, and a parallel batch modifier pipeline.

pub mod alignments;
pub mod config;
pub mod curriculum;
pub mod logging;
pub mod modifiers;
pub mod pool;
pub mod reader;
pub mod rng;
pub mod shuffle;
pub mod state;
pub mod trainer;

pub use config::{ConfigError, CurriculumLoader};
pub use curriculum::Curriculum;
pub use pool::{ModifierPool, PoolError};
pub use reader::{AsyncDatasetReader, AsyncOpener, DatasetReader, EpochOpener, ReaderError, SyncOpener};
pub use rng::SplitMix64;
pub use shuffle::{ShuffleError, ShuffleOptions};
pub use state::{StateError, StateTracker};
pub use trainer::{RunOptions, Trainer, TrainerError, TrainerState};
