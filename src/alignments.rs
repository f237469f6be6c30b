//! Parsing and formatting of the `"src-trg src-trg ..."` alignment column
//! that trails a tab-separated training line.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("malformed alignment pair: {0:?}")]
    Malformed(String),
}

/// One aligned (source token index, target token index) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub src: u32,
    pub trg: u32,
}

/// Parse `"1-2 3-4"` into `[Pair{src:1,trg:2}, Pair{src:3,trg:4}]`.
pub fn parse_alignments(input: &str) -> Result<Vec<Pair>, AlignmentError> {
    input
        .split_whitespace()
        .map(|token| {
            let (src, trg) = token
                .split_once('-')
                .ok_or_else(|| AlignmentError::Malformed(token.to_string()))?;
            let src = src
                .parse()
                .map_err(|_| AlignmentError::Malformed(token.to_string()))?;
            let trg = trg
                .parse()
                .map_err(|_| AlignmentError::Malformed(token.to_string()))?;
            Ok(Pair { src, trg })
        })
        .collect()
}

/// The inverse of [`parse_alignments`].
pub fn format_alignments(pairs: &[Pair]) -> String {
    pairs
        .iter()
        .map(|p| format!("{}-{}", p.src, p.trg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cumulative token-count offsets, for shifting alignment indices when
/// concatenating several lines' worth of tokens together.
pub fn prefix_offsets(lengths: impl Iterator<Item = usize>) -> Vec<u32> {
    let mut out = vec![0u32];
    let mut acc = 0u32;
    for len in lengths {
        acc += len as u32;
        out.push(acc);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        let pairs = parse_alignments("0-0 1-2 3-1").unwrap();
        assert_eq!(
            pairs,
            vec![
                Pair { src: 0, trg: 0 },
                Pair { src: 1, trg: 2 },
                Pair { src: 3, trg: 1 },
            ]
        );
    }

    #[test]
    fn round_trips() {
        let original = "0-0 1-2 3-1";
        let pairs = parse_alignments(original).unwrap();
        assert_eq!(format_alignments(&pairs), original);
    }

    #[test]
    fn rejects_malformed_pair() {
        assert!(parse_alignments("0-0 garbage").is_err());
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(parse_alignments("").unwrap(), Vec::new());
        assert_eq!(format_alignments(&[]), "");
    }

    #[test]
    fn prefix_offsets_accumulate() {
        assert_eq!(prefix_offsets([3, 2, 5].into_iter()), vec![0, 3, 5, 10]);
    }
}
