use serde::{Deserialize, Serialize};

use super::types::GenerationError;

/// Knobs for one generation call.
///
/// `max_length` counts the prompt, so a sequence stops growing once its
/// valid length reaches `min(max_length, seq_length)`. With `do_sample`
/// off the sampling knobs are ignored and selection is plain argmax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_length: usize,
    pub do_sample: bool,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub renormalize_logits: bool,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: u32,
    /// Fixed model buffer width. `None` asks the model for its own.
    pub seq_length: Option<usize>,
}

/// Greedy decoding with no score shaping.
impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 100,
            do_sample: false,
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            renormalize_logits: false,
            eos_token_id: None,
            pad_token_id: 0,
            seq_length: None,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.max_length == 0 {
            return Err(GenerationError::InvalidParam {
                name: "max_length",
                message: "must be at least 1".to_string(),
            });
        }
        if self.temperature <= 0.0 {
            return Err(GenerationError::InvalidParam {
                name: "temperature",
                message: format!("must be strictly positive, got {}", self.temperature),
            });
        }
        if self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(GenerationError::InvalidParam {
                name: "top_p",
                message: format!("must be in (0, 1], got {}", self.top_p),
            });
        }
        if self.repetition_penalty <= 0.0 {
            return Err(GenerationError::InvalidParam {
                name: "repetition_penalty",
                message: format!("must be strictly positive, got {}", self.repetition_penalty),
            });
        }
        Ok(())
    }
}
