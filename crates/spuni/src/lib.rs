//! Special-token-aware tokenization and batch autoregressive decoding.
//!
//! Two halves share this crate. The tokenizer side turns text into ids and
//! back: a no-split trie carves protected tokens out of raw text, a
//! pluggable sub-tokenizer handles the plain spans in between, and the
//! engine layers truncation, padding and special-token assembly on top.
//! The generation side drives a [`generation::DecoderModel`] step by step
//! over a padded batch, slicing inputs for cache-aware models, shaping
//! scores through a processor pipeline and streaming tokens as they are
//! chosen.

pub mod common;
pub mod generation;
pub mod tokenizer;

// Re-export commonly used items
pub use crate::{
    common::{CancellationHandle, CancellationToken},
    generation::{
        BatchGenerator, DecoderModel, ForwardRequest, ForwardResponse, GenerationConfig,
        GenerationError, InputBuilderKind, StreamedToken, TokenStreamer, TokenType,
    },
    tokenizer::{
        AddedToken, EncodeParams, Encoding, PaddingStrategy, SpecialTokenRole, Tokenizer,
        TokenizerError, TruncationStrategy,
    },
};

// Prelude for easy imports
pub mod prelude {
    pub use crate::common::{CancellationHandle, CancellationToken};
    pub use crate::generation::{
        BatchGenerator, ChannelStreamer, DecoderModel, ForwardRequest, ForwardResponse,
        GenerationConfig, GenerationError, InputBuilderKind, StreamEvent, StreamedToken,
        TokenStreamer, TokenType,
    };
    pub use crate::tokenizer::{
        AddedToken, DecodeParams, EncodeParams, Encoding, PaddingSide, PaddingStrategy,
        SpecialTokenRegistry, SpecialTokenRole, SubTokenizer, Tokenizer, TokenizerError,
        TokenizerOptions, TruncationSide, TruncationStrategy, WordPieceSubTokenizer,
    };
}
