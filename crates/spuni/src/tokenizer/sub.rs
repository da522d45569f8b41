//! The sub-tokenizer seam: model-specific tokenization of plain text spans.
//!
//! The engine handles everything token-boundary related (special tokens,
//! added tokens, lowercasing, trimming) and hands the remaining plain spans
//! to a [`SubTokenizer`]. Implementations never see special tokens.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::types::TokenizerError;

/// Model-specific tokenization over plain text, behind a trait so the
/// engine stays agnostic of the base vocabulary scheme.
pub trait SubTokenizer: Send + Sync {
    /// Tokenize a span of ordinary text into base-vocabulary token strings.
    fn tokenize_plain_span(&self, span: &str) -> Vec<String>;

    /// Reassemble a run of base-vocabulary tokens into text.
    fn detokenize_spans(&self, tokens: &[String]) -> String;

    /// Base-vocabulary lookup. No unknown-token fallback happens here.
    fn convert_token_to_id(&self, token: &str) -> Option<u32>;

    fn convert_id_to_token(&self, id: u32) -> Option<String>;

    /// Size of the base vocabulary, excluding any overlay.
    fn vocab_size(&self) -> usize;

    /// Serializable description of this model for tokenizer files.
    fn to_model_section(&self) -> ModelSection;
}

/// Serialized form of a sub-tokenizer model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSection {
    Wordpiece {
        vocab: BTreeMap<String, u32>,
        unk_token: String,
        continuing_subword_prefix: String,
    },
}

/// Rebuild a boxed sub-tokenizer from its serialized model section.
pub fn sub_tokenizer_from_model(
    section: ModelSection,
) -> Result<Box<dyn SubTokenizer>, TokenizerError> {
    match section {
        ModelSection::Wordpiece {
            vocab,
            unk_token,
            continuing_subword_prefix,
        } => {
            let tokenizer = WordPieceSubTokenizer::new(vocab.into_iter().collect(), unk_token)?
                .with_continuing_prefix(continuing_subword_prefix);
            Ok(Box::new(tokenizer))
        }
    }
}

/// Greedy longest-prefix WordPiece over a flat vocabulary.
///
/// Continuation pieces carry the `##` prefix. A word with no decomposition
/// becomes the unknown token as a whole. Lowercasing is the engine's job,
/// so text arrives here already normalized.
pub struct WordPieceSubTokenizer {
    vocab: HashMap<String, u32>,
    inverse: HashMap<u32, String>,
    unk_token: String,
    continuing_prefix: String,
}

impl WordPieceSubTokenizer {
    /// Build from a vocabulary map. Ids are expected to be dense starting
    /// at zero; overlay ids are allocated directly above `vocab.len()`.
    pub fn new(
        vocab: HashMap<String, u32>,
        unk_token: impl Into<String>,
    ) -> Result<Self, TokenizerError> {
        let unk_token = unk_token.into();
        if !vocab.contains_key(&unk_token) {
            return Err(TokenizerError::InvalidConfig(format!(
                "unknown token {:?} is not in the vocabulary",
                unk_token
            )));
        }
        let inverse = vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();
        Ok(WordPieceSubTokenizer {
            vocab,
            inverse,
            unk_token,
            continuing_prefix: "##".to_string(),
        })
    }

    pub fn with_continuing_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.continuing_prefix = prefix.into();
        self
    }

    fn piece_word(&self, word: &str) -> Vec<String> {
        if self.vocab.contains_key(word) {
            return vec![word.to_string()];
        }

        let mut pieces = Vec::new();
        let mut remaining = word;

        while !remaining.is_empty() {
            let mut matched: Option<(usize, String)> = None;

            // Longest prefix first, walking char boundaries only.
            let ends: Vec<usize> = remaining
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .collect();
            for &end in ends.iter().rev() {
                let prefix = &remaining[..end];
                let candidate = if remaining.len() != word.len() {
                    format!("{}{}", self.continuing_prefix, prefix)
                } else {
                    prefix.to_string()
                };
                if self.vocab.contains_key(&candidate) {
                    matched = Some((end, candidate));
                    break;
                }
            }

            match matched {
                Some((end, piece)) => {
                    pieces.push(piece);
                    remaining = &remaining[end..];
                }
                None => return vec![self.unk_token.clone()],
            }
        }

        pieces
    }
}

impl SubTokenizer for WordPieceSubTokenizer {
    fn tokenize_plain_span(&self, span: &str) -> Vec<String> {
        let mut spaced = String::new();
        for c in span.chars() {
            if c.is_ascii_punctuation() {
                spaced.push(' ');
                spaced.push(c);
                spaced.push(' ');
            } else {
                spaced.push(c);
            }
        }

        spaced
            .split_whitespace()
            .flat_map(|word| self.piece_word(word))
            .collect()
    }

    fn detokenize_spans(&self, tokens: &[String]) -> String {
        let mut text = String::new();
        for token in tokens {
            if let Some(rest) = token.strip_prefix(self.continuing_prefix.as_str()) {
                text.push_str(rest);
            } else {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(token);
            }
        }
        text
    }

    fn convert_token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }

    fn convert_id_to_token(&self, id: u32) -> Option<String> {
        self.inverse.get(&id).cloned()
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn to_model_section(&self) -> ModelSection {
        ModelSection::Wordpiece {
            vocab: self.vocab.iter().map(|(t, &i)| (t.clone(), i)).collect(),
            unk_token: self.unk_token.clone(),
            continuing_subword_prefix: self.continuing_prefix.clone(),
        }
    }
}
