//! The pluggable tokenizer/detokenizer boundary used by [`super::retokenize`].
//! Only a whitespace-based reference implementation ships here; a
//! Moses- or SentencePiece-backed implementation is out of scope but can be
//! dropped in behind the same traits.

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

pub trait Detokenizer: Send + Sync {
    fn detokenize(&self, tokens: &[String]) -> String;
}

pub struct SpaceTokenizer;

impl Tokenizer for SpaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(String::from).collect()
    }
}

pub struct SpaceDetokenizer;

impl Detokenizer for SpaceDetokenizer {
    fn detokenize(&self, tokens: &[String]) -> String {
        tokens.join(" ")
    }
}
