//! Wraps a random contiguous span of the source field in numbered
//! placeholder tags, mirroring the wrapped span onto the aligned target
//! tokens when an alignment column is present.

use rand::Rng;
use serde::Deserialize;

use super::{Modifier, ModifierError};
use crate::alignments::parse_alignments;
use crate::config::{parse_params, ConfigError};
use crate::rng::SplitMix64;

#[derive(Deserialize)]
#[serde(default)]
struct TagParams {
    num_tags: usize,
}

impl Default for TagParams {
    fn default() -> Self {
        Self { num_tags: 2 }
    }
}

pub struct TagModifier {
    probability: f64,
    num_tags: usize,
}

impl TagModifier {
    pub fn from_params(probability: f64, params: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        let params: TagParams = parse_params(params, "Tags")?;
        if params.num_tags == 0 {
            return Err(ConfigError::InvalidParameter {
                modifier: "Tags",
                name: "num_tags".to_string(),
            });
        }
        Ok(Self {
            probability,
            num_tags: params.num_tags,
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
        let src_tokens: Vec<&str> = fields[0].split_whitespace().collect();
        if src_tokens.is_empty() {
            return line;
        }

        let span = rng.gen_range(1..=self.num_tags.max(1)).min(src_tokens.len());
        let start = rng.gen_range(0..=src_tokens.len() - span);
        let new_src = wrap_span(&src_tokens, start, span);

        if fields.len() > 2 {
            if let Ok(pairs) = parse_alignments(fields[2]) {
                if let Some((trg_start, trg_end)) = aligned_target_span(&pairs, start, start + span) {
                    let trg_tokens: Vec<&str> = fields[1].split_whitespace().collect();
                    if trg_end <= trg_tokens.len() {
                        let new_trg = wrap_span(&trg_tokens, trg_start, trg_end - trg_start);
                        return format!("{new_src}\t{new_trg}\t{}", fields[2]);
                    }
                }
            }
        }

        let rest = if fields.len() > 1 { fields[1..].join("\t") } else { String::new() };
        format!("{new_src}\t{rest}")
    }
}

fn wrap_span(tokens: &[&str], start: usize, span: usize) -> String {
    let mut out = Vec::with_capacity(tokens.len() + 2);
    out.extend_from_slice(&tokens[..start]);
    out.push("<tag0>");
    out.extend_from_slice(&tokens[start..start + span]);
    out.push("</tag0>");
    out.extend_from_slice(&tokens[start + span..]);
    out.join(" ")
}

fn aligned_target_span(pairs: &[crate::alignments::Pair], src_start: usize, src_end: usize) -> Option<(usize, usize)> {
    let mut min_t = None;
    let mut max_t = None;
    for pair in pairs {
        let src = pair.src as usize;
        if src >= src_start && src < src_end {
            let trg = pair.trg as usize;
            min_t = Some(min_t.map_or(trg, |m: usize| m.min(trg)));
            max_t = Some(max_t.map_or(trg, |m: usize| m.max(trg)));
        }
    }
    match (min_t, max_t) {
        (Some(a), Some(b)) => Some((a, b + 1)),
        _ => None,
    }
}

impl Modifier for TagModifier {
    fn name(&self) -> &'static str {
        "Tags"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError> {
        Ok(batch.into_iter().map(|line| self.apply_line(line, rng)).collect())
    }

    fn validate(&self, position: usize, names: &[&str]) -> Option<String> {
        if position + 1 != names.len() {
            Some(
                "Tags modifier is not the last modifier in its chain; later modifiers may not expect injected placeholder tags".to_string(),
            )
        } else {
            None
        }
    }
}
