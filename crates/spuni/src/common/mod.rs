//! Shared primitives used by both the tokenizer and the generation loop.

pub mod cancellation;
pub mod sampling;

pub use cancellation::{CancellationError, CancellationHandle, CancellationToken};
pub use sampling::{
    apply_repetition_penalty_inplace, argmax, log_softmax_1d_inplace, sample_from_probs,
    softmax_1d, softmax_1d_inplace, top_k_filtering_inplace, top_p_filtering_inplace,
};
