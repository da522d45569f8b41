//! Shared tokenizer types: strategies, added tokens, options and errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced by tokenization and padding/truncation.
///
/// Variants fall into two families. Configuration errors mean the call was
/// set up wrong (missing pad token, unsupported strategy combination, broken
/// tokenizer file). Data errors mean the input itself cannot be processed
/// (out-of-range ids, unknown tokens with no fallback).
#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("asked to pad but no pad token is set; add one to the special token registry first")]
    PadTokenNotSet,

    #[error(
        "overflowing tokens are not available for sequence pairs under longest_first truncation; \
         use only_first or only_second instead"
    )]
    OverflowUnavailable,

    #[error(
        "truncation and padding are both active but max_length {max_length} is not a multiple \
         of pad_to_multiple_of {multiple}"
    )]
    IndivisibleMultiple { max_length: usize, multiple: usize },

    #[error("invalid tokenizer configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot remove {to_remove} tokens from a sequence of length {available}")]
    SequenceTooShort { to_remove: usize, available: usize },

    #[error("token id {id} is out of range for a vocabulary of size {vocab_size}")]
    IdOutOfRange { id: u32, vocab_size: usize },

    #[error("token {token:?} is not in the vocabulary and no unknown token is configured")]
    UnknownToken { token: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TokenizerError {
    /// True for the configuration family, false for the data family.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TokenizerError::PadTokenNotSet
                | TokenizerError::OverflowUnavailable
                | TokenizerError::IndivisibleMultiple { .. }
                | TokenizerError::InvalidConfig(_)
                | TokenizerError::Io(_)
                | TokenizerError::Json(_)
        )
    }
}

/// How encoded sequences are padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingStrategy {
    /// Pad every sequence in a batch to the longest sequence in that batch.
    Longest,
    /// Pad to a fixed target length.
    MaxLength,
    #[default]
    DoNotPad,
}

/// How over-length sequences are truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// Remove tokens from the first sequence only.
    OnlyFirst,
    /// Remove tokens from the second sequence only.
    OnlySecond,
    /// Remove one token at a time from whichever sequence is currently longer.
    LongestFirst,
    #[default]
    DoNotTruncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingSide {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationSide {
    Left,
    #[default]
    Right,
}

/// A token registered on top of the base vocabulary, with its matching flags.
///
/// `lstrip`/`rstrip` make the token swallow whitespace from the neighbouring
/// text when it is cut out of the input; both default to on, so a bare token
/// strips both sides unless a flag says otherwise. `normalized` records
/// whether the content participates in lowercasing, and `special` marks
/// tokens that can be stripped from decoded text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddedToken {
    pub content: String,
    pub single_word: bool,
    pub lstrip: bool,
    pub rstrip: bool,
    pub normalized: bool,
    pub special: bool,
}

impl AddedToken {
    /// An ordinary added token. Normalization stays on.
    pub fn new(content: impl Into<String>) -> Self {
        AddedToken {
            content: content.into(),
            single_word: false,
            lstrip: true,
            rstrip: true,
            normalized: true,
            special: false,
        }
    }

    /// A special token. Special tokens are exempt from normalization.
    pub fn special(content: impl Into<String>) -> Self {
        AddedToken {
            content: content.into(),
            single_word: false,
            lstrip: true,
            rstrip: true,
            normalized: false,
            special: true,
        }
    }

    pub fn with_lstrip(mut self, lstrip: bool) -> Self {
        self.lstrip = lstrip;
        self
    }

    pub fn with_rstrip(mut self, rstrip: bool) -> Self {
        self.rstrip = rstrip;
        self
    }

    pub fn with_single_word(mut self, single_word: bool) -> Self {
        self.single_word = single_word;
        self
    }

    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }
}

impl Default for AddedToken {
    fn default() -> Self {
        AddedToken::new("")
    }
}

impl From<&str> for AddedToken {
    fn from(content: &str) -> Self {
        AddedToken::new(content)
    }
}

impl From<String> for AddedToken {
    fn from(content: String) -> Self {
        AddedToken::new(content)
    }
}

impl fmt::Display for AddedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content)
    }
}

/// Behavioural switches that persist with the tokenizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerOptions {
    pub do_lower_case: bool,
    pub padding_side: PaddingSide,
    pub truncation_side: TruncationSide,
    pub pad_token_type_id: u32,
    pub clean_up_tokenization_spaces: bool,
    pub spaces_between_special_tokens: bool,
    /// Strict mode turns short-side truncation failures into errors instead
    /// of log-and-continue.
    pub strict_truncation: bool,
    pub model_input_names: Vec<String>,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        TokenizerOptions {
            do_lower_case: false,
            padding_side: PaddingSide::Right,
            truncation_side: TruncationSide::Right,
            pad_token_type_id: 0,
            clean_up_tokenization_spaces: true,
            spaces_between_special_tokens: true,
            strict_truncation: false,
            model_input_names: vec![
                "input_ids".to_string(),
                "token_type_ids".to_string(),
                "attention_mask".to_string(),
            ],
        }
    }
}

/// Per-call knobs for [`encode_plus`](crate::tokenizer::Tokenizer::encode_plus).
#[derive(Debug, Clone)]
pub struct EncodeParams {
    pub add_special_tokens: bool,
    pub padding: PaddingStrategy,
    pub truncation: TruncationStrategy,
    pub max_length: Option<usize>,
    /// Number of tokens from the cut point carried into the overflow window.
    pub stride: usize,
    pub pad_to_multiple_of: Option<usize>,
    pub return_token_type_ids: Option<bool>,
    pub return_attention_mask: Option<bool>,
    pub return_special_tokens_mask: bool,
    pub return_overflowing_tokens: bool,
}

impl Default for EncodeParams {
    fn default() -> Self {
        EncodeParams {
            add_special_tokens: true,
            padding: PaddingStrategy::DoNotPad,
            truncation: TruncationStrategy::DoNotTruncate,
            max_length: None,
            stride: 0,
            pad_to_multiple_of: None,
            return_token_type_ids: None,
            return_attention_mask: None,
            return_special_tokens_mask: false,
            return_overflowing_tokens: false,
        }
    }
}

impl EncodeParams {
    pub fn with_padding(mut self, padding: PaddingStrategy) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_truncation(mut self, truncation: TruncationStrategy) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_pad_to_multiple_of(mut self, multiple: usize) -> Self {
        self.pad_to_multiple_of = Some(multiple);
        self
    }

    pub fn with_special_tokens(mut self, add_special_tokens: bool) -> Self {
        self.add_special_tokens = add_special_tokens;
        self
    }

    pub fn with_overflowing_tokens(mut self, return_overflowing: bool) -> Self {
        self.return_overflowing_tokens = return_overflowing;
        self
    }

    pub fn with_special_tokens_mask(mut self, return_mask: bool) -> Self {
        self.return_special_tokens_mask = return_mask;
        self
    }
}
