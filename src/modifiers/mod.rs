//! The modifier chain: ordered, probability-gated transformations applied
//! to a batch of tab-separated lines before it reaches the child trainer.

pub mod merge;
pub mod noise;
pub mod prefix;
pub mod retokenize;
pub mod surface;
pub mod tags;
pub mod tokenizers;
pub mod typos;

pub use merge::MergeModifier;
pub use noise::NoiseModifier;
pub use prefix::PrefixModifier;
pub use retokenize::RetokenizeModifier;
pub use surface::{TitleCaseModifier, UpperCaseModifier};
pub use tags::TagModifier;
pub use typos::TypoModifier;

use thiserror::Error;

use crate::alignments::AlignmentError;
use crate::rng::SplitMix64;

#[derive(Debug, Error)]
pub enum ModifierError {
    #[error("{modifier} modifier expected a malformed line: {reason}")]
    Malformed {
        modifier: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
}

/// A single step in the modifier chain. Implementations are expected to be
/// cheap to construct and `Send + Sync` so the modifier pool can hand a
/// chain of them to each worker.
pub trait Modifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// The construction-time probability with which this modifier acts on
    /// any given line (modifiers that gate at batch granularity, like
    /// `Merge`, interpret this as "probability of starting a merge run").
    fn probability(&self) -> f64;

    /// Apply this modifier to an entire chunk. `rng` is the chunk-local
    /// generator seeded once per chunk by the pool, so repeated calls with
    /// the same seed and chain reproduce the same output.
    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError>;

    /// Called once per stage, after the chain has been fully constructed,
    /// with this modifier's `position` in the chain and the `names` of all
    /// modifiers in it. Returns a warning to log, if this modifier has an
    /// opinion about its placement.
    fn validate(&self, _position: usize, _names: &[&str]) -> Option<String> {
        None
    }
}

/// Runs `validate` for every modifier in `chain` and logs any warnings it
/// returns (via the log-once sink, so a chain rebuilt at every stage
/// boundary doesn't repeat the same warning).
pub fn validate_chain(chain: &[Box<dyn Modifier>]) {
    let names: Vec<&str> = chain.iter().map(|m| m.name()).collect();
    for (position, modifier) in chain.iter().enumerate() {
        if let Some(warning) = modifier.validate(position, &names) {
            crate::logging::log_once(warning);
        }
    }
}
