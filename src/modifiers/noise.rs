//! Injects synthetic nonsense sentence pairs alongside real lines, so a
//! model learns to recognize (and ideally not translate) garbage input.

use rand::Rng;
use serde::Deserialize;

use super::{Modifier, ModifierError};
use crate::alignments::{format_alignments, Pair};
use crate::config::{parse_params, ConfigError};
use crate::rng::SplitMix64;

/// A handful of Unicode blocks to draw nonsense "words" from. Not
/// exhaustive — just enough variety that the noise lines don't look like
/// the rest of the corpus.
const SCRIPT_RANGES: [(u32, u32); 6] = [
    (0x0041, 0x005A), // Latin upper
    (0x0061, 0x007A), // Latin lower
    (0x00C0, 0x00FF), // Latin-1 supplement
    (0x0391, 0x03A9), // Greek
    (0x0410, 0x044F), // Cyrillic
    (0x3040, 0x309F), // Hiragana
];

fn random_word(rng: &mut SplitMix64, min_len: usize, max_len: usize) -> String {
    let len = rng.gen_range(min_len..=max_len);
    (0..len)
        .map(|_| {
            let (lo, hi) = SCRIPT_RANGES[rng.gen_range(0..SCRIPT_RANGES.len())];
            char::from_u32(rng.gen_range(lo..=hi)).unwrap_or('?')
        })
        .collect()
}

fn random_words(rng: &mut SplitMix64, min_word_length: usize, max_word_length: usize, max_words: usize) -> Vec<String> {
    let count = rng.gen_range(1..=max_words.max(1));
    (0..count)
        .map(|_| random_word(rng, min_word_length, max_word_length))
        .collect()
}

#[derive(Deserialize)]
#[serde(default)]
struct NoiseParams {
    min_word_length: usize,
    max_word_length: usize,
    max_words: usize,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            min_word_length: 2,
            max_word_length: 5,
            max_words: 6,
        }
    }
}

pub struct NoiseModifier {
    probability: f64,
    min_word_length: usize,
    max_word_length: usize,
    max_words: usize,
}

impl NoiseModifier {
    pub fn from_params(probability: f64, params: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        let params: NoiseParams = parse_params(params, "Noise")?;
        if params.min_word_length == 0 || params.min_word_length > params.max_word_length {
            return Err(ConfigError::InvalidParameter {
                modifier: "Noise",
                name: "min_word_length/max_word_length".to_string(),
            });
        }
        Ok(Self {
            probability,
            min_word_length: params.min_word_length,
            max_word_length: params.max_word_length,
            max_words: params.max_words,
        })
    }
}

impl Modifier for NoiseModifier {
    fn name(&self) -> &'static str {
        "Noise"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError> {
        let mut out = Vec::with_capacity(batch.len());
        for line in batch {
            if rng.gen::<f64>() < self.probability {
                let tokens = random_words(rng, self.min_word_length, self.max_word_length, self.max_words);
                let joined = tokens.join(" ");
                let mut noise_line = format!("{joined}\t{joined}");
                if line.matches('\t').count() >= 2 {
                    let pairs: Vec<Pair> = (0..tokens.len() as u32).map(|i| Pair { src: i, trg: i }).collect();
                    noise_line.push('\t');
                    noise_line.push_str(&format_alignments(&pairs));
                }
                out.push(noise_line);
            }
            out.push(line);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_keeps_the_original_line() {
        let m = NoiseModifier {
            probability: 0.0,
            min_word_length: 2,
            max_word_length: 3,
            max_words: 2,
        };
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["a\tb".to_string()], &mut rng).unwrap();
        assert_eq!(out, vec!["a\tb".to_string()]);
    }

    #[test]
    fn injects_a_noise_pair_before_the_real_line() {
        let m = NoiseModifier {
            probability: 1.0,
            min_word_length: 2,
            max_word_length: 2,
            max_words: 3,
        };
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["a\tb".to_string()], &mut rng).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], "a\tb");
        let noise_fields: Vec<&str> = out[0].split('\t').collect();
        assert_eq!(noise_fields.len(), 2);
        assert_eq!(noise_fields[0], noise_fields[1]);
    }

    #[test]
    fn noise_pair_gets_aligned_when_line_has_alignment_column() {
        let m = NoiseModifier {
            probability: 1.0,
            min_word_length: 2,
            max_word_length: 2,
            max_words: 1,
        };
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["a\tb\t0-0".to_string()], &mut rng).unwrap();
        assert_eq!(out[0].split('\t').count(), 3);
    }
}
