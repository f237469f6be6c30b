//! Runs a batch through the modifier chain, split into `rayon`-parallel
//! chunks that are each seeded deterministically ahead of dispatch so the
//! result never depends on worker scheduling.

use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;

use crate::modifiers::{Modifier, ModifierError};
use crate::rng::SplitMix64;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Modifier(#[from] ModifierError),
}

/// Applies a fixed modifier chain to batches of lines.
///
/// `sequential` forces single-threaded processing regardless of the
/// process-wide `rayon` pool size; every chunk still gets its own
/// `SplitMix64`, so output is identical either way.
pub struct ModifierPool {
    modifiers: std::sync::Arc<Vec<Box<dyn Modifier>>>,
    sequential: bool,
}

impl ModifierPool {
    pub fn new(modifiers: std::sync::Arc<Vec<Box<dyn Modifier>>>, workers: usize) -> Self {
        Self {
            modifiers,
            sequential: workers <= 1,
        }
    }

    /// Splits `batch` into chunks of `chunk_size`, draws one seed per chunk
    /// from `rng` in order, then runs each chunk through the full modifier
    /// chain with its own chunk-local generator.
    pub fn map(&self, batch: Vec<String>, chunk_size: usize, rng: &mut SplitMix64) -> Result<Vec<String>, PoolError> {
        if batch.is_empty() {
            return Ok(batch);
        }
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Vec<String>> = batch.chunks(chunk_size).map(<[String]>::to_vec).collect();
        let seeds: Vec<u64> = (0..chunks.len()).map(|_| rng.gen()).collect();

        let process = |seed: u64, chunk: Vec<String>| -> Result<Vec<String>, ModifierError> {
            let mut local_rng = SplitMix64::new(seed);
            let mut chunk = chunk;
            for modifier in self.modifiers.iter() {
                chunk = modifier.apply(chunk, &mut local_rng)?;
            }
            Ok(chunk)
        };

        let processed: Vec<Vec<String>> = if self.sequential {
            seeds
                .into_iter()
                .zip(chunks)
                .map(|(seed, chunk)| process(seed, chunk))
                .collect::<Result<_, _>>()?
        } else {
            seeds
                .into_par_iter()
                .zip(chunks)
                .map(|(seed, chunk)| process(seed, chunk))
                .collect::<Result<_, _>>()?
        };

        Ok(processed.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifiers::ModifierError as ME;

    struct Uppercase;
    impl Modifier for Uppercase {
        fn name(&self) -> &'static str {
            "Uppercase"
        }
        fn probability(&self) -> f64 {
            1.0
        }
        fn apply(&self, batch: Vec<String>, _rng: &mut SplitMix64) -> Result<Vec<String>, ME> {
            Ok(batch.into_iter().map(|l| l.to_uppercase()).collect())
        }
    }

    fn pool(workers: usize) -> ModifierPool {
        ModifierPool::new(std::sync::Arc::new(vec![Box::new(Uppercase) as Box<dyn Modifier>]), workers)
    }

    #[test]
    fn preserves_batch_length_and_applies_chain() {
        let mut rng = SplitMix64::new(1);
        let batch = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let out = pool(1).map(batch, 2, &mut rng).unwrap();
        assert_eq!(out, vec!["A", "B", "C"]);
    }

    #[test]
    fn sequential_and_parallel_agree_for_the_same_seed() {
        let batch: Vec<String> = (0..37).map(|i| format!("line{i}")).collect();

        let mut rng_seq = SplitMix64::new(99);
        let seq = pool(1).map(batch.clone(), 4, &mut rng_seq).unwrap();

        let mut rng_par = SplitMix64::new(99);
        let par = pool(4).map(batch, 4, &mut rng_par).unwrap();

        assert_eq!(seq, par);
    }

    #[test]
    fn empty_batch_short_circuits() {
        let mut rng = SplitMix64::new(1);
        let out = pool(4).map(Vec::new(), 10, &mut rng).unwrap();
        assert!(out.is_empty());
    }
}
