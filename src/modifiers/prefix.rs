//! Prepends a templated span of target-side tokens to the source field, to
//! teach a model to condition on a hint of what it's about to produce.

use rand::Rng;
use serde::Deserialize;

use super::{Modifier, ModifierError};
use crate::config::{parse_params, ConfigError};
use crate::rng::SplitMix64;

#[derive(Deserialize)]
#[serde(default)]
struct PrefixParams {
    min_words: usize,
    max_words: usize,
    template: String,
}

impl Default for PrefixParams {
    fn default() -> Self {
        Self {
            min_words: 2,
            max_words: 5,
            template: "__start__ {trg} __end__ ".to_string(),
        }
    }
}

pub struct PrefixModifier {
    probability: f64,
    min_words: usize,
    max_words: usize,
    template: String,
}

impl PrefixModifier {
    pub fn from_params(probability: f64, params: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        let params: PrefixParams = parse_params(params, "Prefix")?;
        if params.min_words == 0 || params.min_words > params.max_words {
            return Err(ConfigError::InvalidParameter {
                modifier: "Prefix",
                name: "min_words/max_words".to_string(),
            });
        }
        Ok(Self {
            probability,
            min_words: params.min_words,
            max_words: params.max_words,
            template: params.template,
        })
    }

    fn apply_line(&self, line: String, rng: &mut SplitMix64) -> String {
        if rng.gen::<f64>() >= self.probability {
            return line;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            return line;
        }
        let target_tokens: Vec<&str> = fields[1].split_whitespace().collect();
        let span = rng.gen_range(self.min_words..=self.max_words);
        if target_tokens.len() < span {
            return line;
        }
        let max_start = target_tokens.len() - span;
        let start = rng.gen_range(0..=max_start);
        let augment = target_tokens[start..start + span].join(" ");
        format!("{}{}", self.template.replace("{trg}", &augment), line)
    }
}

impl Modifier for PrefixModifier {
    fn name(&self) -> &'static str {
        "Prefix"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError> {
        Ok(batch.into_iter().map(|line| self.apply_line(line, rng)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_a_target_span_within_range() {
        let m = PrefixModifier {
            probability: 1.0,
            min_words: 2,
            max_words: 2,
            template: "__start__ {trg} __end__ ".to_string(),
        };
        let mut rng = SplitMix64::new(3);
        let out = m.apply_line("a b\tone two three four".to_string(), &mut rng);
        assert!(out.starts_with("__start__ "));
        assert!(out.contains("__end__ a b\tone two three four"));
    }

    #[test]
    fn skips_lines_shorter_than_min_words() {
        let m = PrefixModifier {
            probability: 1.0,
            min_words: 5,
            max_words: 5,
            template: "{trg} ".to_string(),
        };
        let mut rng = SplitMix64::new(3);
        let line = "a b\tone two".to_string();
        assert_eq!(m.apply_line(line.clone(), &mut rng), line);
    }
}
