//! Re-tokenizes the source and target fields through a pluggable
//! tokenizer/detokenizer pair.

use rand::Rng;

use super::tokenizers::{Detokenizer, SpaceDetokenizer, SpaceTokenizer, Tokenizer};
use super::{Modifier, ModifierError};
use crate::config::ConfigError;
use crate::rng::SplitMix64;

pub struct RetokenizeModifier {
    probability: f64,
    src_detokenizer: Box<dyn Detokenizer>,
    src_tokenizer: Box<dyn Tokenizer>,
    trg_detokenizer: Box<dyn Detokenizer>,
    trg_tokenizer: Box<dyn Tokenizer>,
}

impl RetokenizeModifier {
    pub fn from_params(probability: f64, _params: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        // Only the space tokenizer ships as a reference implementation; any
        // other `Tokenizer`/`Detokenizer` pair can be substituted here.
        Ok(Self {
            probability,
            src_detokenizer: Box::new(SpaceDetokenizer),
            src_tokenizer: Box::new(SpaceTokenizer),
            trg_detokenizer: Box::new(SpaceDetokenizer),
            trg_tokenizer: Box::new(SpaceTokenizer),
        })
    }
}

impl Modifier for RetokenizeModifier {
    fn name(&self) -> &'static str {
        "Retokenize"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError> {
        Ok(batch
            .into_iter()
            .map(|line| {
                if rng.gen::<f64>() >= self.probability {
                    return line;
                }
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() < 2 {
                    return line;
                }
                let src_tokens: Vec<String> = fields[0].split_whitespace().map(String::from).collect();
                let trg_tokens: Vec<String> = fields[1].split_whitespace().map(String::from).collect();
                let src_text = self.src_detokenizer.detokenize(&src_tokens);
                let trg_text = self.trg_detokenizer.detokenize(&trg_tokens);
                let new_src = self.src_tokenizer.tokenize(&src_text).join(" ");
                let new_trg = self.trg_tokenizer.tokenize(&trg_text).join(" ");
                let mut out = vec![new_src, new_trg];
                out.extend(fields[2..].iter().map(|field| field.to_string()));
                out.join("\t")
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_through_the_space_tokenizer() {
        let m = RetokenizeModifier::from_params(1.0, &serde_yaml::Mapping::new()).unwrap();
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["a   b\tc    d".to_string()], &mut rng).unwrap();
        assert_eq!(out, vec!["a b\tc d".to_string()]);
    }

    #[test]
    fn preserves_trailing_columns() {
        let m = RetokenizeModifier::from_params(1.0, &serde_yaml::Mapping::new()).unwrap();
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["a\tb\t0-0".to_string()], &mut rng).unwrap();
        assert_eq!(out, vec!["a\tb\t0-0".to_string()]);
    }
}
