//! Merges a random run of consecutive batch lines into one, re-flowing any
//! alignment column to account for the concatenated token offsets.

use rand::Rng;
use serde::Deserialize;

use super::{Modifier, ModifierError};
use crate::alignments::{format_alignments, parse_alignments, prefix_offsets, Pair};
use crate::config::{parse_params, ConfigError};
use crate::rng::SplitMix64;

#[derive(Deserialize)]
#[serde(default)]
struct MergeParams {
    min_lines: usize,
    max_lines: usize,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            min_lines: 2,
            max_lines: 4,
        }
    }
}

pub struct MergeModifier {
    probability: f64,
    min_lines: usize,
    max_lines: usize,
}

impl MergeModifier {
    pub fn from_params(probability: f64, params: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        let params: MergeParams = parse_params(params, "Merge")?;
        if params.min_lines < 2 || params.min_lines > params.max_lines {
            return Err(ConfigError::InvalidParameter {
                modifier: "Merge",
                name: "min_lines/max_lines".to_string(),
            });
        }
        Ok(Self {
            probability,
            min_lines: params.min_lines,
            max_lines: params.max_lines,
        })
    }
}

impl Modifier for MergeModifier {
    fn name(&self) -> &'static str {
        "Merge"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn apply(&self, batch: Vec<String>, rng: &mut SplitMix64) -> Result<Vec<String>, ModifierError> {
        let mut out = Vec::with_capacity(batch.len());
        let mut i = 0;
        while i < batch.len() {
            if rng.gen::<f64>() < self.probability && batch.len() - i >= 2 {
                let span = rng
                    .gen_range(self.min_lines..=self.max_lines)
                    .min(batch.len() - i);
                out.push(merge_lines(&batch[i..i + span]));
                i += span;
            } else {
                out.push(batch[i].clone());
                i += 1;
            }
        }
        Ok(out)
    }
}

fn merge_lines(lines: &[String]) -> String {
    let rows: Vec<Vec<&str>> = lines.iter().map(|line| line.split('\t').collect()).collect();
    let src_tokens: Vec<Vec<&str>> = rows
        .iter()
        .map(|row| row.first().copied().unwrap_or("").split_whitespace().collect())
        .collect();
    let trg_tokens: Vec<Vec<&str>> = rows
        .iter()
        .map(|row| row.get(1).copied().unwrap_or("").split_whitespace().collect())
        .collect();

    let merged_src = src_tokens.iter().flatten().copied().collect::<Vec<_>>().join(" ");
    let merged_trg = trg_tokens.iter().flatten().copied().collect::<Vec<_>>().join(" ");
    let mut columns = vec![merged_src, merged_trg];

    if rows.iter().all(|row| row.len() > 2) {
        let src_offsets = prefix_offsets(src_tokens.iter().map(|t| t.len()));
        let trg_offsets = prefix_offsets(trg_tokens.iter().map(|t| t.len()));
        let mut merged_pairs: Vec<Pair> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if let Ok(pairs) = parse_alignments(row[2]) {
                merged_pairs.extend(pairs.into_iter().map(|p| Pair {
                    src: p.src + src_offsets[i],
                    trg: p.trg + trg_offsets[i],
                }));
            }
        }
        columns.push(format_alignments(&merged_pairs));
    }

    columns.join("\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_src_and_trg_fields() {
        let merged = merge_lines(&["a b\tc d".to_string(), "e\tf g".to_string()]);
        assert_eq!(merged, "a b e\tc d f g");
    }

    #[test]
    fn shifts_alignment_offsets() {
        let merged = merge_lines(&[
            "a b\tc d\t0-0 1-1".to_string(),
            "e\tf g\t0-1".to_string(),
        ]);
        // second line's tokens start at src offset 2, trg offset 2
        assert_eq!(merged, "a b e\tc d f g\t0-0 1-1 2-3");
    }

    #[test]
    fn never_exceeds_remaining_batch() {
        let m = MergeModifier {
            probability: 1.0,
            min_lines: 4,
            max_lines: 4,
        };
        let mut rng = SplitMix64::new(2);
        let batch = vec!["a\tb".to_string(), "c\td".to_string()];
        let out = m.apply(batch, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], "a c\tb d");
    }
}
