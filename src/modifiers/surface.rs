//! Whole-line case transforms.

use rand::Rng;

use super::{Modifier, ModifierError};
use crate::rng::SplitMix64;

pub struct UpperCaseModifier {
    probability: f64,
}

impl UpperCaseModifier {
    pub fn new(probability: f64) -> Self {
        Self { probability }
    }
}

impl Modifier for UpperCaseModifier {
    fn name(&self) -> &'static str {
        "UpperCase"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError> {
        Ok(batch
            .into_iter()
            .map(|line| {
                if rng.gen::<f64>() < self.probability {
                    line.to_uppercase()
                } else {
                    line
                }
            })
            .collect())
    }
}

pub struct TitleCaseModifier {
    probability: f64,
}

impl TitleCaseModifier {
    pub fn new(probability: f64) -> Self {
        Self { probability }
    }
}

impl Modifier for TitleCaseModifier {
    fn name(&self) -> &'static str {
        "TitleCase"
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
                line.split('\t')
                    .map(titlecase_field)
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect())
    }
}

fn titlecase_field(field: &str) -> String {
    field
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercase_always_fires_at_probability_one() {
        let m = UpperCaseModifier::new(1.0);
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["hello\tworld".to_string()], &mut rng).unwrap();
        assert_eq!(out, vec!["HELLO\tWORLD".to_string()]);
    }

    #[test]
    fn uppercase_never_fires_at_probability_zero() {
        let m = UpperCaseModifier::new(0.0);
        let mut rng = SplitMix64::new(1);
        let out = m.apply(vec!["hello\tworld".to_string()], &mut rng).unwrap();
        assert_eq!(out, vec!["hello\tworld".to_string()]);
    }

    #[test]
    fn titlecase_capitalizes_each_word_per_field() {
        let m = TitleCaseModifier::new(1.0);
        let mut rng = SplitMix64::new(1);
        let out = m
            .apply(vec!["the cat\tle chat".to_string()], &mut rng)
            .unwrap();
        assert_eq!(out, vec!["The Cat\tLe Chat".to_string()]);
    }
}
