//! Batch decoding loop: drives a [`DecoderModel`] token by token over a
//! shared padded buffer until every sequence has finished.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::{pin_mut, StreamExt};
use log::{debug, info};
use ndarray::{s, Array2};

use crate::common::{argmax, sample_from_probs, softmax_1d, CancellationToken};

use super::config::GenerationConfig;
use super::inputs::{InputBuilder, InputBuilderKind, StepView};
use super::logits::{
    build_processor_list, build_warper_list, LogitsProcessor, LogitsProcessorList,
};
use super::model::{DecoderModel, ForwardResponse};
use super::stream::{StreamedToken, TokenStreamer, TokenType};
use super::types::GenerationError;

/// Mutable per-call loop state. Born when a generate call starts, dropped
/// when it returns; nothing is shared across calls.
struct GenerationState {
    /// `(batch, seq_length)` right-padded buffer the loop appends into.
    input_ids: Array2<u32>,
    /// Grows by exactly one per step for every running row.
    valid_length: Vec<usize>,
    /// Finished rows are frozen; their buffers never change again.
    is_finished: Vec<bool>,
    target_length: usize,
    is_first_iteration: bool,
}

impl GenerationState {
    fn batch(&self) -> usize {
        self.valid_length.len()
    }

    fn all_finished(&self) -> bool {
        self.is_finished.iter().all(|&finished| finished)
    }

    fn view(&self) -> StepView<'_> {
        StepView {
            input_ids: &self.input_ids,
            valid_length: &self.valid_length,
            is_first_iteration: self.is_first_iteration,
        }
    }

    /// Real token prefix of one row, trailing padding excluded.
    fn prefix(&self, row: usize) -> Vec<u32> {
        self.input_ids
            .row(row)
            .iter()
            .take(self.valid_length[row])
            .copied()
            .collect()
    }
}

/// Step-lockstep autoregressive decoding over a batch of prompts.
///
/// Sequences finish independently on end-of-sequence or on reaching
/// `min(max_length, seq_length)`; the loop runs until the last one does.
/// The score pipeline and the input builder are resolved once here, so a
/// generator is cheap to reuse across calls.
pub struct BatchGenerator {
    model: Arc<dyn DecoderModel>,
    config: GenerationConfig,
    processors: LogitsProcessorList,
    warpers: LogitsProcessorList,
    input_builder: Box<dyn InputBuilder>,
    cancellation: CancellationToken,
}

impl fmt::Debug for BatchGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGenerator")
            .field("config", &self.config)
            .field("processors", &self.processors)
            .field("warpers", &self.warpers)
            .finish_non_exhaustive()
    }
}

impl BatchGenerator {
    /// Validate the config and assemble the score pipeline up front, so
    /// configuration mistakes surface before the first model call.
    pub fn new(
        model: Arc<dyn DecoderModel>,
        config: GenerationConfig,
    ) -> Result<Self, GenerationError> {
        Self::with_processors(model, config, Vec::new())
    }

    /// Like [`BatchGenerator::new`] with caller-supplied logits processors
    /// merged into the config-derived list. A custom processor whose kind
    /// the config already covers is rejected.
    pub fn with_processors(
        model: Arc<dyn DecoderModel>,
        config: GenerationConfig,
        custom: Vec<Box<dyn LogitsProcessor>>,
    ) -> Result<Self, GenerationError> {
        config.validate()?;
        let processors = build_processor_list(&config, custom)?;
        let warpers = build_warper_list(&config)?;
        Ok(Self {
            model,
            config,
            processors,
            warpers,
            input_builder: InputBuilderKind::Standard.instantiate(),
            cancellation: CancellationToken::never(),
        })
    }

    /// Swap the forward-request layout; models with bespoke position
    /// schemes pick their kind here.
    pub fn with_input_builder(mut self, kind: InputBuilderKind) -> Self {
        self.input_builder = kind.instantiate();
        self
    }

    /// Attach a cancellation token, checked once per decode step.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    fn seq_length(&self) -> usize {
        self.config
            .seq_length
            .unwrap_or_else(|| self.model.seq_length())
    }

    /// Scan the prompts, right-pad them into the step buffer and size the
    /// run. Rows whose prompt already fills the target start out finished
    /// and emit nothing.
    fn init_state(&self, prompts: &[Vec<u32>]) -> Result<GenerationState, GenerationError> {
        let seq_length = self.seq_length();
        let pad = self.config.pad_token_id;
        let vocab_size = self.model.vocab_size();

        let mut valid_length = Vec::with_capacity(prompts.len());
        for (index, row) in prompts.iter().enumerate() {
            if row.len() > seq_length {
                return Err(GenerationError::PromptTooLong {
                    index,
                    length: row.len(),
                    seq_length,
                });
            }
            // An all-pad row has no last real token to decode from.
            let valid = row
                .iter()
                .rposition(|&id| id != pad)
                .map(|last| last + 1)
                .ok_or(GenerationError::EmptySequence { index })?;
            if let Some(&id) = row.iter().find(|&&id| id as usize >= vocab_size) {
                return Err(GenerationError::VocabMismatch {
                    index,
                    id,
                    vocab_size,
                });
            }
            valid_length.push(valid);
        }

        let mut input_ids = Array2::from_elem((prompts.len(), seq_length), pad);
        for (i, row) in prompts.iter().enumerate() {
            for (j, &id) in row.iter().enumerate() {
                input_ids[[i, j]] = id;
            }
        }

        let target_length = seq_length.min(self.config.max_length);
        let is_finished = valid_length
            .iter()
            .map(|&valid| valid >= target_length)
            .collect();

        Ok(GenerationState {
            input_ids,
            valid_length,
            is_finished,
            target_length,
            is_first_iteration: true,
        })
    }

    /// Normalize one forward response to a score row per sequence. Raw
    /// logits are gathered at the last real token (row 0 on incremental
    /// calls) and pushed through the processor pipeline; pre-narrowed
    /// candidate sets bypass it.
    fn scores_for_step(
        &self,
        state: &GenerationState,
        response: ForwardResponse,
    ) -> Result<(Array2<f32>, Option<Array2<u32>>), GenerationError> {
        let batch = state.batch();
        match response {
            ForwardResponse::Logits(logits) => {
                let (sequences, rows, vocab) = logits.dim();
                if sequences != batch {
                    return Err(GenerationError::MalformedResponse(format!(
                        "expected logits for {batch} sequences, got {sequences}"
                    )));
                }
                if vocab != self.model.vocab_size() {
                    return Err(GenerationError::MalformedResponse(format!(
                        "model scored {vocab} tokens per step but declares a vocabulary of {}",
                        self.model.vocab_size()
                    )));
                }

                let mut scores = Array2::zeros((batch, vocab));
                for i in 0..batch {
                    let row = if state.is_first_iteration && rows > 1 {
                        state.valid_length[i] - 1
                    } else {
                        0
                    };
                    if row >= rows {
                        return Err(GenerationError::MalformedResponse(format!(
                            "sequence {i} needs the score row at {row} but the model \
                             returned {rows} rows"
                        )));
                    }
                    scores.row_mut(i).assign(&logits.slice(s![i, row, ..]));
                }

                let prefix_store: Vec<Vec<u32>> = (0..batch).map(|i| state.prefix(i)).collect();
                let prefixes: Vec<&[u32]> = prefix_store.iter().map(Vec::as_slice).collect();
                self.processors.process(&prefixes, &mut scores);
                self.warpers.process(&prefixes, &mut scores);
                Ok((scores, None))
            }
            ForwardResponse::Sampled { scores, candidates } => {
                if scores.dim() != candidates.dim() {
                    return Err(GenerationError::MalformedResponse(format!(
                        "candidate scores are {:?} but candidate ids are {:?}",
                        scores.dim(),
                        candidates.dim()
                    )));
                }
                if scores.nrows() != batch {
                    return Err(GenerationError::MalformedResponse(format!(
                        "expected candidate sets for {batch} sequences, got {}",
                        scores.nrows()
                    )));
                }
                if scores.ncols() == 0 {
                    return Err(GenerationError::MalformedResponse(
                        "candidate sets are empty".to_string(),
                    ));
                }
                Ok((scores, Some(candidates)))
            }
        }
    }

    /// Decode as an async stream of tokens.
    ///
    /// Prompt rows are echoed first ([`TokenType::Prompt`], trailing
    /// padding dropped), then generated tokens in the order the loop
    /// appends them, interleaved across rows; [`StreamedToken::sequence`]
    /// demuxes. The stream closes when every row has finished, or with
    /// the first error; model failures abort the run, there is no retry.
    pub fn generate_stream(
        &self,
        prompts: Vec<Vec<u32>>,
    ) -> impl Stream<Item = Result<StreamedToken, GenerationError>> + '_ {
        try_stream! {
            let mut state = self.init_state(&prompts)?;
            let batch = state.batch();
            info!(
                "generating for {} sequences, target length {}",
                batch, state.target_length
            );

            for i in 0..batch {
                for id in state.prefix(i) {
                    yield StreamedToken {
                        id,
                        sequence: i,
                        token_type: TokenType::Prompt,
                    };
                }
            }

            let mut steps = 0usize;
            while !state.all_finished() {
                self.cancellation.check()?;

                let request = self.input_builder.build(&state.view())?;
                let response = self.model.forward(request).await?;
                let (scores, candidates) = self.scores_for_step(&state, response)?;

                for i in 0..batch {
                    if state.is_finished[i] {
                        continue;
                    }
                    let row = scores.row(i);
                    let choice = if self.config.do_sample {
                        sample_from_probs(&softmax_1d(&row))
                    } else {
                        argmax(&row)
                    };
                    let token = match &candidates {
                        Some(ids) => ids[[i, choice]],
                        None => choice as u32,
                    };

                    state.input_ids[[i, state.valid_length[i]]] = token;
                    state.valid_length[i] += 1;
                    yield StreamedToken {
                        id: token,
                        sequence: i,
                        token_type: TokenType::Generated,
                    };

                    if self.config.eos_token_id == Some(token)
                        || state.valid_length[i] >= state.target_length
                    {
                        state.is_finished[i] = true;
                    }
                }

                state.is_first_iteration = !self.model.supports_incremental_decoding();
                steps += 1;
            }
            debug!("generation finished after {steps} steps");
        }
    }

    /// Decode the whole batch and return each row's real tokens, prompt
    /// included, trailing padding dropped.
    pub async fn generate(
        &self,
        prompts: &[Vec<u32>],
    ) -> Result<Vec<Vec<u32>>, GenerationError> {
        let start = Instant::now();
        let mut outputs = vec![Vec::new(); prompts.len()];
        let mut generated = 0usize;

        let stream = self.generate_stream(prompts.to_vec());
        pin_mut!(stream);
        while let Some(token) = stream.next().await {
            let token = token?;
            if token.token_type == TokenType::Generated {
                generated += 1;
            }
            outputs[token.sequence].push(token.id);
        }

        info!(
            "generated {generated} tokens across {} sequences in {:.2?}",
            prompts.len(),
            start.elapsed()
        );
        Ok(outputs)
    }

    /// Like [`BatchGenerator::generate`] with a push-style sink observing
    /// every token as it becomes available. `end` fires only when the run
    /// completes; an error or cancellation leaves the sink open-ended.
    pub async fn generate_with_streamer(
        &self,
        prompts: &[Vec<u32>],
        streamer: &mut dyn TokenStreamer,
    ) -> Result<Vec<Vec<u32>>, GenerationError> {
        let mut outputs = vec![Vec::new(); prompts.len()];

        let stream = self.generate_stream(prompts.to_vec());
        pin_mut!(stream);
        while let Some(token) = stream.next().await {
            let token = token?;
            outputs[token.sequence].push(token.id);
            streamer.put(token);
        }

        streamer.end();
        Ok(outputs)
    }
}
