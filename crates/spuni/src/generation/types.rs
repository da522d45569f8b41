use thiserror::Error;

use crate::common::CancellationError;

/// Errors raised by batch generation.
///
/// Configuration problems surface before the first model call; everything
/// else is reported per call. Model-forward failures pass through
/// unmodified, generation is abandoned without retry.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("sampling parameter {name} is out of range: {message}")]
    InvalidParam {
        name: &'static str,
        message: String,
    },

    #[error(
        "a custom {0} logits processor was supplied but one is already created from the \
         generation config; change the config values instead of passing a duplicate"
    )]
    DuplicateProcessor(&'static str),

    #[error("sequence {index} contains only padding; at least one real token is required")]
    EmptySequence { index: usize },

    #[error(
        "sequence {index} has {length} tokens but the model buffer only holds {seq_length}"
    )]
    PromptTooLong {
        index: usize,
        length: usize,
        seq_length: usize,
    },

    #[error("sequence {row} does not contain the anchor token {token} required by the \
             two-dimensional position scheme")]
    AnchorTokenMissing { row: usize, token: u32 },

    #[error("sequence {index} holds token id {id}, outside the model vocabulary of {vocab_size}")]
    VocabMismatch {
        index: usize,
        id: u32,
        vocab_size: usize,
    },

    #[error("model returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Cancelled(#[from] CancellationError),

    #[error(transparent)]
    Model(#[from] anyhow::Error),
}
