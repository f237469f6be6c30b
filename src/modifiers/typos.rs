//! A family of independently-gated typo transforms applied to the source
//! field only. Each named sub-modifier has its own probability, defaulting
//! to 0.1, and fires independently of the others.

use rand::Rng;

use super::{Modifier, ModifierError};
use crate::config::ConfigError;
use crate::rng::SplitMix64;

const TYPO_KINDS: [&str; 9] = [
    "char_swap",
    "missing_char",
    "extra_char",
    "nearby_char",
    "similar_char",
    "skipped_space",
    "random_space",
    "repeated_char",
    "unichar",
];

pub struct TypoModifier {
    probability: f64,
    sub_probabilities: Vec<(&'static str, f64)>,
}

impl TypoModifier {
    pub fn from_params(probability: f64, params: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        for (key, _) in params {
            let key = key.as_str().unwrap_or_default();
            if !TYPO_KINDS.contains(&key) {
                return Err(ConfigError::UnknownParameter {
                    modifier: "Typos",
                    name: key.to_string(),
                });
            }
        }

        let mut sub_probabilities = Vec::with_capacity(TYPO_KINDS.len());
        for kind in TYPO_KINDS {
            let value = params.get(kind);
            let prob = match value {
                Some(v) => v.as_f64().ok_or_else(|| ConfigError::InvalidParameter {
                    modifier: "Typos",
                    name: kind.to_string(),
                })?,
                None => 0.1,
            };
            if !(0.0..=1.0).contains(&prob) {
                return Err(ConfigError::InvalidParameter {
                    modifier: "Typos",
                    name: kind.to_string(),
                });
            }
            sub_probabilities.push((kind, prob));
        }

        Ok(Self {
            probability,
            sub_probabilities,
        })
    }

    fn apply_line(&self, line: &str, rng: &mut SplitMix64) -> String {
        let mut fields: Vec<String> = line.split('\t').map(String::from).collect();
        if fields.is_empty() {
            return line.to_string();
        }
        let has_alignment = fields.len() > 2;
        let mut src: Vec<char> = fields[0].chars().collect();

        for (kind, prob) in &self.sub_probabilities {
            if rng.gen::<f64>() >= *prob {
                continue;
            }
            if has_alignment && matches!(*kind, "random_space" | "skipped_space" | "missing_char") {
                crate::logging::log_once(format!(
                    "Typos modifier skipped '{kind}' on a line with alignment info, to avoid de-aligning it"
                ));
                continue;
            }
            match *kind {
                "char_swap" => swap_adjacent_char(&mut src, rng),
                "missing_char" => remove_random_char(&mut src, rng),
                "extra_char" => insert_neighbor_char(&mut src, rng),
                "nearby_char" => replace_with_neighbor(&mut src, rng),
                "similar_char" => replace_with_similar(&mut src, rng),
                "repeated_char" => repeat_random_char(&mut src, rng),
                "unichar" => collapse_repeated_char(&mut src, rng),
                "random_space" => insert_random_space(&mut src, rng),
                "skipped_space" => remove_random_space(&mut src, rng),
                _ => {}
            }
        }

        fields[0] = src.into_iter().collect();
        fields.join("\t")
    }
}

impl Modifier for TypoModifier {
    fn name(&self) -> &'static str {
        "Typos"
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
                self.apply_line(&line, rng)
            })
            .collect())
    }
}

fn keyboard_neighbors(c: char) -> &'static [char] {
    match c.to_ascii_lowercase() {
        'q' => &['w', 'a'],
        'w' => &['q', 'e', 's'],
        'e' => &['w', 'r', 'd'],
        'r' => &['e', 't', 'f'],
        't' => &['r', 'y', 'g'],
        'y' => &['t', 'u', 'h'],
        'u' => &['y', 'i', 'j'],
        'i' => &['u', 'o', 'k'],
        'o' => &['i', 'p', 'l'],
        'p' => &['o', 'l'],
        'a' => &['q', 's', 'z'],
        's' => &['a', 'd', 'w', 'x'],
        'd' => &['s', 'f', 'e', 'c'],
        'f' => &['d', 'g', 'r', 'v'],
        'g' => &['f', 'h', 't', 'b'],
        'h' => &['g', 'j', 'y', 'n'],
        'j' => &['h', 'k', 'u', 'm'],
        'k' => &['j', 'l', 'i'],
        'l' => &['k', 'o'],
        'z' => &['a', 's', 'x'],
        'x' => &['z', 'd', 'c'],
        'c' => &['x', 'f', 'v'],
        'v' => &['c', 'g', 'b'],
        'b' => &['v', 'h', 'n'],
        'n' => &['b', 'j', 'm'],
        'm' => &['n', 'k'],
        _ => &[],
    }
}

fn similar_chars(c: char) -> &'static [char] {
    match c.to_ascii_lowercase() {
        'o' => &['0'],
        '0' => &['o'],
        'l' => &['1', 'i'],
        '1' => &['l', 'i'],
        'i' => &['l', '1'],
        's' => &['5'],
        '5' => &['s'],
        'b' => &['8'],
        '8' => &['b'],
        _ => &[],
    }
}

fn word_char_indices(chars: &[char]) -> Vec<usize> {
    chars
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| i)
        .collect()
}

fn swap_adjacent_char(chars: &mut [char], rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.len() < 2 {
        return;
    }
    let pos = rng.gen_range(0..indices.len() - 1);
    let (i, j) = (indices[pos], indices[pos + 1]);
    if j == i + 1 {
        chars.swap(i, j);
    }
}

fn remove_random_char(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.len() <= 1 {
        return;
    }
    let i = indices[rng.gen_range(0..indices.len())];
    chars.remove(i);
}

fn insert_neighbor_char(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.is_empty() {
        return;
    }
    let i = indices[rng.gen_range(0..indices.len())];
    let neighbors = keyboard_neighbors(chars[i]);
    if neighbors.is_empty() {
        return;
    }
    chars.insert(i + 1, neighbors[rng.gen_range(0..neighbors.len())]);
}

fn replace_with_neighbor(chars: &mut [char], rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.is_empty() {
        return;
    }
    let i = indices[rng.gen_range(0..indices.len())];
    let neighbors = keyboard_neighbors(chars[i]);
    if neighbors.is_empty() {
        return;
    }
    chars[i] = neighbors[rng.gen_range(0..neighbors.len())];
}

fn replace_with_similar(chars: &mut [char], rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.is_empty() {
        return;
    }
    let i = indices[rng.gen_range(0..indices.len())];
    let similar = similar_chars(chars[i]);
    if similar.is_empty() {
        return;
    }
    chars[i] = similar[rng.gen_range(0..similar.len())];
}

fn repeat_random_char(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.is_empty() {
        return;
    }
    let i = indices[rng.gen_range(0..indices.len())];
    chars.insert(i, chars[i]);
}

fn collapse_repeated_char(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    let repeats: Vec<usize> = (1..chars.len()).filter(|&i| chars[i] == chars[i - 1]).collect();
    if repeats.is_empty() {
        return;
    }
    let i = repeats[rng.gen_range(0..repeats.len())];
    chars.remove(i);
}

fn insert_random_space(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    let indices = word_char_indices(chars);
    if indices.len() < 2 {
        return;
    }
    let i = indices[rng.gen_range(1..indices.len())];
    chars.insert(i, ' ');
}

fn remove_random_space(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    if chars.len() < 3 {
        return;
    }
    let spaces: Vec<usize> = (1..chars.len() - 1).filter(|&i| chars[i] == ' ').collect();
    if spaces.is_empty() {
        return;
    }
    let i = spaces[rng.gen_range(0..spaces.len())];
    chars.remove(i);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modifier(prob: f64) -> TypoModifier {
        TypoModifier {
            probability: 1.0,
            sub_probabilities: TYPO_KINDS.iter().map(|k| (*k, prob)).collect(),
        }
    }

    #[test]
    fn probability_zero_leaves_line_untouched() {
        let m = modifier(0.0);
        let mut rng = SplitMix64::new(1);
        assert_eq!(m.apply_line("hello\tworld", &mut rng), "hello\tworld");
    }

    #[test]
    fn only_touches_the_source_field() {
        let m = modifier(1.0);
        let mut rng = SplitMix64::new(42);
        let out = m.apply_line("hello\tworld", &mut rng);
        let fields: Vec<&str> = out.split('\t').collect();
        assert_eq!(fields[1], "world");
    }

    #[test]
    fn skips_space_altering_ops_when_aligned() {
        let m = modifier(1.0);
        let mut rng = SplitMix64::new(7);
        // with an alignment column present, random_space/skipped_space/missing_char
        // are skipped, so the field count is preserved.
        let out = m.apply_line("hello\tworld\t0-0", &mut rng);
        assert_eq!(out.split('\t').count(), 3);
    }

    #[test]
    fn rejects_unknown_parameter() {
        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert("bogus_kind".into(), 0.5.into());
        assert!(TypoModifier::from_params(1.0, &mapping).is_err());
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert("char_swap".into(), 1.5.into());
        assert!(TypoModifier::from_params(1.0, &mapping).is_err());
    }
}
