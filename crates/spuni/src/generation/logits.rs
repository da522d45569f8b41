//! Score transforms applied between the model forward pass and token
//! selection, assembled per generation call.

use std::fmt;

use ndarray::Array2;

use crate::common::{
    apply_repetition_penalty_inplace, log_softmax_1d_inplace, top_k_filtering_inplace,
    top_p_filtering_inplace,
};

use super::config::GenerationConfig;
use super::types::GenerationError;

/// A pure transform over per-step scores.
///
/// `input_ids` holds each sequence's real token prefix (no padding) and
/// `scores` is one `(batch, vocab)` row of logits per sequence.
pub trait LogitsProcessor: Send + Sync {
    /// Stable kind name, used to reject duplicates when merging lists.
    fn name(&self) -> &'static str;

    fn process(&self, input_ids: &[&[u32]], scores: &mut Array2<f32>);
}

/// Pushes already-seen tokens toward exclusion.
///
/// Positive scores are divided by the penalty and non-positive scores
/// multiplied, so the shift is always away from re-selection.
pub struct RepetitionPenaltyProcessor {
    penalty: f32,
}

impl RepetitionPenaltyProcessor {
    pub fn new(penalty: f32) -> Result<Self, GenerationError> {
        if penalty <= 0.0 {
            return Err(GenerationError::InvalidParam {
                name: "repetition_penalty",
                message: format!("must be strictly positive, got {penalty}"),
            });
        }
        Ok(Self { penalty })
    }
}

impl LogitsProcessor for RepetitionPenaltyProcessor {
    fn name(&self) -> &'static str {
        "repetition_penalty"
    }

    fn process(&self, input_ids: &[&[u32]], scores: &mut Array2<f32>) {
        for (i, prefix) in input_ids.iter().enumerate().take(scores.nrows()) {
            apply_repetition_penalty_inplace(&mut scores.row_mut(i), prefix, self.penalty);
        }
    }
}

pub struct TemperatureWarper {
    temperature: f32,
}

impl TemperatureWarper {
    pub fn new(temperature: f32) -> Result<Self, GenerationError> {
        if temperature <= 0.0 {
            return Err(GenerationError::InvalidParam {
                name: "temperature",
                message: format!("must be strictly positive, got {temperature}"),
            });
        }
        Ok(Self { temperature })
    }
}

impl LogitsProcessor for TemperatureWarper {
    fn name(&self) -> &'static str {
        "temperature"
    }

    fn process(&self, _input_ids: &[&[u32]], scores: &mut Array2<f32>) {
        scores.mapv_inplace(|v| v / self.temperature);
    }
}

/// Keeps the `top_k` highest-scoring candidates per sequence, masking the
/// rest to negative infinity.
pub struct TopKWarper {
    top_k: usize,
}

impl TopKWarper {
    pub fn new(top_k: usize) -> Result<Self, GenerationError> {
        if top_k == 0 {
            return Err(GenerationError::InvalidParam {
                name: "top_k",
                message: "must keep at least one candidate".to_string(),
            });
        }
        Ok(Self { top_k })
    }
}

impl LogitsProcessor for TopKWarper {
    fn name(&self) -> &'static str {
        "top_k"
    }

    fn process(&self, _input_ids: &[&[u32]], scores: &mut Array2<f32>) {
        for mut row in scores.rows_mut() {
            top_k_filtering_inplace(&mut row, self.top_k);
        }
    }
}

/// Nucleus filtering: keeps the smallest prefix of candidates whose
/// cumulative probability reaches `top_p`.
pub struct TopPWarper {
    top_p: f32,
    min_tokens_to_keep: usize,
}

impl TopPWarper {
    pub fn new(top_p: f32, min_tokens_to_keep: usize) -> Result<Self, GenerationError> {
        if top_p <= 0.0 || top_p > 1.0 {
            return Err(GenerationError::InvalidParam {
                name: "top_p",
                message: format!("must be in (0, 1], got {top_p}"),
            });
        }
        Ok(Self {
            top_p,
            min_tokens_to_keep: min_tokens_to_keep.max(1),
        })
    }
}

impl LogitsProcessor for TopPWarper {
    fn name(&self) -> &'static str {
        "top_p"
    }

    fn process(&self, _input_ids: &[&[u32]], scores: &mut Array2<f32>) {
        for mut row in scores.rows_mut() {
            top_p_filtering_inplace(&mut row, self.top_p, self.min_tokens_to_keep);
        }
    }
}

/// Re-applies log-softmax so downstream consumers see normalized scores.
/// When present it must run after every other transform.
pub struct LogitNormalization;

impl LogitsProcessor for LogitNormalization {
    fn name(&self) -> &'static str {
        "logit_normalization"
    }

    fn process(&self, _input_ids: &[&[u32]], scores: &mut Array2<f32>) {
        for mut row in scores.rows_mut() {
            log_softmax_1d_inplace(&mut row);
        }
    }
}

/// An ordered list of transforms applied back to back.
#[derive(Default)]
pub struct LogitsProcessorList {
    processors: Vec<Box<dyn LogitsProcessor>>,
}

impl LogitsProcessorList {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    pub fn push(&mut self, processor: Box<dyn LogitsProcessor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Append caller-supplied processors, rejecting any whose kind is
    /// already covered by this list.
    pub fn merge(
        mut self,
        custom: Vec<Box<dyn LogitsProcessor>>,
    ) -> Result<Self, GenerationError> {
        for processor in custom {
            if self.processors.iter().any(|p| p.name() == processor.name()) {
                return Err(GenerationError::DuplicateProcessor(processor.name()));
            }
            self.processors.push(processor);
        }
        Ok(self)
    }

    /// Normalization has to observe the final scores, so it always runs last.
    fn move_normalization_last(&mut self) {
        if let Some(pos) = self
            .processors
            .iter()
            .position(|p| p.name() == "logit_normalization")
        {
            if pos + 1 != self.processors.len() {
                let normalization = self.processors.remove(pos);
                self.processors.push(normalization);
            }
        }
    }

    pub fn process(&self, input_ids: &[&[u32]], scores: &mut Array2<f32>) {
        for processor in &self.processors {
            processor.process(input_ids, scores);
        }
    }
}

impl fmt::Debug for LogitsProcessorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogitsProcessorList")
            .field("processors", &self.names())
            .finish()
    }
}

/// Processors derived from the config (currently the repetition penalty),
/// merged with caller-supplied ones.
pub fn build_processor_list(
    config: &GenerationConfig,
    custom: Vec<Box<dyn LogitsProcessor>>,
) -> Result<LogitsProcessorList, GenerationError> {
    let mut defaults = LogitsProcessorList::new();
    if config.repetition_penalty != 1.0 {
        defaults.push(Box::new(RepetitionPenaltyProcessor::new(
            config.repetition_penalty,
        )?));
    }
    let mut merged = defaults.merge(custom)?;
    if config.renormalize_logits {
        merged.push(Box::new(LogitNormalization));
    }
    merged.move_normalization_last();
    Ok(merged)
}

/// Warpers for multinomial sampling. Greedy decoding zeroes out the
/// narrowing filters so only temperature scaling remains.
pub fn build_warper_list(config: &GenerationConfig) -> Result<LogitsProcessorList, GenerationError> {
    let (top_k, top_p) = if config.do_sample {
        (config.top_k, config.top_p)
    } else {
        (0, 1.0)
    };

    let mut warpers = LogitsProcessorList::new();
    if config.temperature != 1.0 {
        warpers.push(Box::new(TemperatureWarper::new(config.temperature)?));
    }
    if top_k != 0 {
        warpers.push(Box::new(TopKWarper::new(top_k)?));
    }
    if top_p < 1.0 {
        warpers.push(Box::new(TopPWarper::new(top_p, 1)?));
    }
    if config.renormalize_logits {
        warpers.push(Box::new(LogitNormalization));
    }
    Ok(warpers)
}
