//! The contract between the decoding loop and the model driving it.

use anyhow::Result;
use async_trait::async_trait;
use ndarray::{Array2, Array3};

/// Position metadata for models whose attention layout a plain index
/// cannot express, currently the two-dimensional position scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionMetadata {
    /// `(batch, 2, rows)`: absolute positions stacked on block positions.
    pub position_ids: Array3<u32>,
    /// `(batch, rows, seq_length)`; `true` marks a blocked attention edge.
    pub attention_mask: Array3<bool>,
}

/// Inputs for one forward call over the whole batch.
///
/// Finished rows are still present; their buffers are frozen and their
/// scores ignored by the loop.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// `(batch, seq_length)` on full calls, `(batch, 1)` on incremental
    /// ones.
    pub input_ids: Array2<u32>,
    /// Position of each row's last real token. The layout is
    /// builder-specific: the standard builder flattens into the row-major
    /// batch x seq buffer, the two-dimensional builder keeps per-row
    /// offsets.
    pub current_index: Vec<usize>,
    /// Real token count per row, trailing padding excluded.
    pub valid_length: Vec<usize>,
    /// True on the first call of a generation; a model holding key/value
    /// state from an earlier run must drop it before serving the call.
    /// Models without a cache can ignore it.
    pub reset_cache: bool,
    /// Flips false once a cache-capable model has absorbed the full
    /// prompt; stays true forever for models without incremental support.
    pub is_first_iteration: bool,
    pub positions: Option<PositionMetadata>,
}

impl ForwardRequest {
    /// Incremental requests carry a single token column per row.
    pub fn is_incremental(&self) -> bool {
        !self.is_first_iteration
    }
}

/// What one forward call produced.
#[derive(Debug, Clone)]
pub enum ForwardResponse {
    /// Raw scores, `(batch, rows, vocab)`. The loop gathers one row per
    /// sequence and runs its processor pipeline on the result.
    Logits(Array3<f32>),
    /// Pre-narrowed candidate sets, both `(batch, candidates)`. The model
    /// has already shaped the distribution, so the loop selects among the
    /// candidates directly and skips its own processors.
    Sampled {
        scores: Array2<f32>,
        candidates: Array2<u32>,
    },
}

/// A decoder-only language model driven step by step.
///
/// Implementations wrap whatever executes the network; the loop only ever
/// sees this surface.
#[async_trait]
pub trait DecoderModel: Send + Sync {
    /// Run one decoding step over the whole batch.
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse>;

    /// Fixed width of the model's sequence buffer.
    fn seq_length(&self) -> usize;

    fn vocab_size(&self) -> usize;

    /// True when the model keeps a key/value cache and accepts
    /// single-token calls after the first full pass.
    fn supports_incremental_decoding(&self) -> bool;
}
