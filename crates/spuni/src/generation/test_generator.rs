use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ndarray::{array, s, Array2, Array3};

use crate::common::CancellationToken;
use crate::generation::{
    BatchGenerator, ChannelStreamer, DecoderModel, ForwardRequest, ForwardResponse,
    GenerationConfig, GenerationError, InputBuilderKind, LogitsProcessor,
    RepetitionPenaltyProcessor, StreamEvent, StreamedToken, TokenType,
};

// =========================================================================
//  Mock models
// =========================================================================

/// One recorded forward call, kept small enough to assert against.
#[derive(Debug, Clone)]
struct RecordedRequest {
    columns: usize,
    current_index: Vec<usize>,
    reset_cache: bool,
    is_first_iteration: bool,
    has_positions: bool,
    ids: Vec<u32>,
}

/// Scores `forced[i % forced.len()]` highest at every position so greedy
/// selection is fully predictable, with an optional runner-up at half the
/// score for penalty tests.
struct MockDecoderModel {
    seq_length: usize,
    vocab_size: usize,
    forced: Vec<u32>,
    runner_up: Option<u32>,
    incremental: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockDecoderModel {
    fn forcing(forced: Vec<u32>) -> Self {
        Self {
            seq_length: 8,
            vocab_size: 100,
            forced,
            runner_up: None,
            incremental: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_seq_length(mut self, seq_length: usize) -> Self {
        self.seq_length = seq_length;
        self
    }

    fn with_runner_up(mut self, token: u32) -> Self {
        self.runner_up = Some(token);
        self
    }

    fn with_incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecoderModel for MockDecoderModel {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(RecordedRequest {
            columns: request.input_ids.ncols(),
            current_index: request.current_index.clone(),
            reset_cache: request.reset_cache,
            is_first_iteration: request.is_first_iteration,
            has_positions: request.positions.is_some(),
            ids: request.input_ids.iter().copied().collect(),
        });

        let (batch, rows) = (request.input_ids.nrows(), request.input_ids.ncols());
        let mut logits = Array3::zeros((batch, rows, self.vocab_size));
        for i in 0..batch {
            let forced = self.forced[i % self.forced.len()] as usize;
            logits.slice_mut(s![i, .., forced]).fill(100.0);
            if let Some(runner_up) = self.runner_up {
                logits.slice_mut(s![i, .., runner_up as usize]).fill(50.0);
            }
        }
        Ok(ForwardResponse::Logits(logits))
    }

    fn seq_length(&self) -> usize {
        self.seq_length
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn supports_incremental_decoding(&self) -> bool {
        self.incremental
    }
}

/// Hands back pre-narrowed candidate sets instead of raw logits.
struct SampledMockModel;

#[async_trait]
impl DecoderModel for SampledMockModel {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        let batch = request.input_ids.nrows();
        let scores = Array2::from_shape_fn((batch, 2), |(_, c)| if c == 1 { 3.0 } else { 0.5 });
        let candidates = Array2::from_shape_fn((batch, 2), |(_, c)| if c == 1 { 42 } else { 3 });
        Ok(ForwardResponse::Sampled { scores, candidates })
    }

    fn seq_length(&self) -> usize {
        4
    }

    fn vocab_size(&self) -> usize {
        100
    }

    fn supports_incremental_decoding(&self) -> bool {
        false
    }
}

/// Always fails, to exercise error passthrough.
struct FailingModel;

#[async_trait]
impl DecoderModel for FailingModel {
    async fn forward(&self, _request: ForwardRequest) -> Result<ForwardResponse> {
        Err(anyhow::anyhow!("device lost"))
    }

    fn seq_length(&self) -> usize {
        4
    }

    fn vocab_size(&self) -> usize {
        10
    }

    fn supports_incremental_decoding(&self) -> bool {
        false
    }
}

/// Returns logits for the wrong number of sequences.
struct WrongBatchModel;

#[async_trait]
impl DecoderModel for WrongBatchModel {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        let batch = request.input_ids.nrows();
        Ok(ForwardResponse::Logits(Array3::zeros((
            batch + 1,
            request.input_ids.ncols(),
            self.vocab_size(),
        ))))
    }

    fn seq_length(&self) -> usize {
        4
    }

    fn vocab_size(&self) -> usize {
        10
    }

    fn supports_incremental_decoding(&self) -> bool {
        false
    }
}

fn greedy(max_length: usize) -> GenerationConfig {
    GenerationConfig {
        max_length,
        ..Default::default()
    }
}

// =========================================================================
//  Core loop behavior
// =========================================================================

#[tokio::test]
async fn test_greedy_generation_runs_to_target_length() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(6)).unwrap();

    let outputs = generator.generate(&[vec![5, 6]]).await.unwrap();

    // target is min(max_length, seq_length) = 4, prompt counts toward it.
    assert_eq!(outputs, vec![vec![5, 6, 7, 7]]);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_eos_finishes_a_row_in_one_step() {
    let model = Arc::new(MockDecoderModel::forcing(vec![9]).with_seq_length(4));
    let config = GenerationConfig {
        max_length: 6,
        eos_token_id: Some(9),
        ..Default::default()
    };
    let generator = BatchGenerator::new(model.clone(), config).unwrap();

    let outputs = generator.generate(&[vec![5, 6, 0, 0]]).await.unwrap();

    assert_eq!(outputs, vec![vec![5, 6, 9]]);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_rows_finish_independently() {
    // Row 0 is forced straight onto eos, row 1 runs to the target.
    let model = Arc::new(MockDecoderModel::forcing(vec![9, 7]).with_seq_length(6));
    let config = GenerationConfig {
        max_length: 4,
        eos_token_id: Some(9),
        ..Default::default()
    };
    let generator = BatchGenerator::new(model.clone(), config).unwrap();

    let outputs = generator.generate(&[vec![5], vec![5, 6]]).await.unwrap();

    assert_eq!(outputs[0], vec![5, 9]);
    assert_eq!(outputs[1], vec![5, 6, 7, 7]);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_termination_bound_and_output_lengths() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(10)).unwrap();

    let outputs = generator
        .generate(&[vec![1], vec![1, 2, 3]])
        .await
        .unwrap();

    // Steps are bounded by target_length minus the shortest prompt.
    assert_eq!(model.calls(), 3);
    assert!(outputs.iter().all(|row| row.len() <= 4));
    assert_eq!(outputs[0], vec![1, 7, 7, 7]);
    assert_eq!(outputs[1], vec![1, 2, 3, 7]);
}

#[tokio::test]
async fn test_prompt_already_at_target_emits_nothing() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(4)).unwrap();

    let outputs = generator.generate(&[vec![1, 2, 3, 4]]).await.unwrap();

    assert_eq!(outputs, vec![vec![1, 2, 3, 4]]);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_argmax_decoding_is_deterministic() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(6));
    let generator = BatchGenerator::new(model, greedy(6)).unwrap();
    let prompts = vec![vec![5, 6], vec![8]];

    let first = generator.generate(&prompts).await.unwrap();
    let second = generator.generate(&prompts).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_sampling_with_top_k_one_is_deterministic() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let config = GenerationConfig {
        max_length: 4,
        do_sample: true,
        top_k: 1,
        temperature: 0.9,
        ..Default::default()
    };
    let generator = BatchGenerator::new(model, config).unwrap();

    let outputs = generator.generate(&[vec![5]]).await.unwrap();

    assert_eq!(outputs, vec![vec![5, 7, 7, 7]]);
}

#[tokio::test]
async fn test_repetition_penalty_applies_to_generated_prefix() {
    let model = Arc::new(
        MockDecoderModel::forcing(vec![7])
            .with_runner_up(8)
            .with_seq_length(4),
    );
    let config = GenerationConfig {
        max_length: 4,
        repetition_penalty: 1000.0,
        ..Default::default()
    };
    let generator = BatchGenerator::new(model, config).unwrap();

    let outputs = generator.generate(&[vec![5]]).await.unwrap();

    // Once 7 is in the prefix its score collapses and the runner-up wins.
    assert_eq!(outputs[0][1], 7);
    assert_eq!(outputs[0][2], 8);
}

#[tokio::test]
async fn test_sample_acceleration_selects_from_candidate_ids() {
    let generator = BatchGenerator::new(Arc::new(SampledMockModel), greedy(2)).unwrap();

    let outputs = generator.generate(&[vec![5]]).await.unwrap();

    // The winning index is 1; the emitted token is its candidate id.
    assert_eq!(outputs, vec![vec![5, 42]]);
}

// =========================================================================
//  Input construction
// =========================================================================

#[tokio::test]
async fn test_incremental_requests_slice_to_latest_token() {
    let _ = env_logger::builder().is_test(true).try_init();
    let model = Arc::new(
        MockDecoderModel::forcing(vec![7])
            .with_seq_length(4)
            .with_incremental(),
    );
    let generator = BatchGenerator::new(model.clone(), greedy(4)).unwrap();

    let outputs = generator.generate(&[vec![5, 6]]).await.unwrap();
    assert_eq!(outputs, vec![vec![5, 6, 7, 7]]);

    let requests = model.recorded();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0].columns, 4);
    assert!(requests[0].is_first_iteration);
    assert!(requests[0].reset_cache);
    assert_eq!(requests[0].current_index, vec![1]);

    assert_eq!(requests[1].columns, 1);
    assert!(!requests[1].is_first_iteration);
    assert!(!requests[1].reset_cache);
    assert_eq!(requests[1].ids, vec![7], "only the just-appended token");
    assert_eq!(requests[1].current_index, vec![2]);
}

#[tokio::test]
async fn test_non_incremental_requests_stay_full_width() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(4)).unwrap();

    generator.generate(&[vec![5, 6]]).await.unwrap();

    let requests = model.recorded();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|request| request.columns == 4 && request.is_first_iteration));
    // The appended token shows up in the next full-width request.
    assert_eq!(requests[1].ids, vec![5, 6, 7, 0]);
}

#[tokio::test]
async fn test_flat_indices_cover_the_whole_batch() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(3)).unwrap();

    generator.generate(&[vec![5, 6], vec![8]]).await.unwrap();

    let requests = model.recorded();
    // Row offsets of 0 and seq_length, plus each row's last real token.
    assert_eq!(requests[0].current_index, vec![1, 4]);
}

#[tokio::test]
async fn test_two_dimensional_builder_attaches_positions() {
    let model = Arc::new(
        MockDecoderModel::forcing(vec![7])
            .with_seq_length(6)
            .with_incremental(),
    );
    let generator = BatchGenerator::new(model.clone(), greedy(5))
        .unwrap()
        .with_input_builder(InputBuilderKind::Recomputed2d {
            bos_token_id: 90,
            mask_token_id: 91,
            gmask_token_id: None,
        });

    let outputs = generator.generate(&[vec![5, 91, 90]]).await.unwrap();
    assert_eq!(outputs, vec![vec![5, 91, 90, 7, 7]]);

    let requests = model.recorded();
    assert!(requests.iter().all(|request| request.has_positions));
    assert_eq!(requests[0].columns, 6);
    assert_eq!(requests[1].columns, 1);
}

#[tokio::test]
async fn test_two_dimensional_builder_errors_surface() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(6));
    let generator = BatchGenerator::new(model, greedy(5))
        .unwrap()
        .with_input_builder(InputBuilderKind::Recomputed2d {
            bos_token_id: 90,
            mask_token_id: 91,
            gmask_token_id: None,
        });

    let err = generator.generate(&[vec![5, 6]]).await.unwrap_err();
    assert!(matches!(
        err,
        GenerationError::AnchorTokenMissing { row: 0, token: 90 }
    ));
}

// =========================================================================
//  Input validation
// =========================================================================

#[tokio::test]
async fn test_all_pad_row_is_rejected() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(4)).unwrap();

    let err = generator.generate(&[vec![5], vec![0, 0]]).await.unwrap_err();

    assert!(matches!(err, GenerationError::EmptySequence { index: 1 }));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_long_prompt_is_rejected() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model, greedy(8)).unwrap();

    let err = generator.generate(&[vec![1, 2, 3, 4, 5]]).await.unwrap_err();

    assert!(matches!(
        err,
        GenerationError::PromptTooLong {
            index: 0,
            length: 5,
            seq_length: 4,
        }
    ));
}

#[tokio::test]
async fn test_out_of_vocabulary_prompt_is_rejected() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model, greedy(4)).unwrap();

    let err = generator.generate(&[vec![5, 200]]).await.unwrap_err();

    assert!(matches!(
        err,
        GenerationError::VocabMismatch {
            index: 0,
            id: 200,
            vocab_size: 100,
        }
    ));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_up_front() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]));
    let config = GenerationConfig {
        temperature: 0.0,
        ..Default::default()
    };

    let err = BatchGenerator::new(model, config).unwrap_err();
    assert!(matches!(
        err,
        GenerationError::InvalidParam {
            name: "temperature",
            ..
        }
    ));
}

#[tokio::test]
async fn test_duplicate_custom_processor_is_rejected() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]));
    let config = GenerationConfig {
        repetition_penalty: 1.5,
        ..Default::default()
    };
    let custom: Vec<Box<dyn LogitsProcessor>> =
        vec![Box::new(RepetitionPenaltyProcessor::new(2.0).unwrap())];

    let err = BatchGenerator::with_processors(model, config, custom).unwrap_err();
    assert!(matches!(
        err,
        GenerationError::DuplicateProcessor("repetition_penalty")
    ));
}

// =========================================================================
//  Failure passthrough
// =========================================================================

#[tokio::test]
async fn test_model_failure_aborts_generation() {
    let generator = BatchGenerator::new(Arc::new(FailingModel), greedy(4)).unwrap();

    let err = generator.generate(&[vec![1]]).await.unwrap_err();
    assert!(matches!(err, GenerationError::Model(_)));
}

#[tokio::test]
async fn test_wrong_batch_response_is_rejected() {
    let generator = BatchGenerator::new(Arc::new(WrongBatchModel), greedy(4)).unwrap();

    let err = generator.generate(&[vec![1]]).await.unwrap_err();
    assert!(matches!(err, GenerationError::MalformedResponse(_)));
}

// =========================================================================
//  Streaming and cancellation
// =========================================================================

#[tokio::test]
async fn test_stream_yields_prompt_then_generated() {
    let model = Arc::new(MockDecoderModel::forcing(vec![9]).with_seq_length(4));
    let config = GenerationConfig {
        max_length: 6,
        eos_token_id: Some(9),
        ..Default::default()
    };
    let generator = BatchGenerator::new(model, config).unwrap();

    let tokens: Vec<StreamedToken> = generator
        .generate_stream(vec![vec![5, 6]])
        .try_collect()
        .await
        .unwrap();

    let prompt: Vec<u32> = tokens
        .iter()
        .filter(|token| token.is_prompt())
        .map(|token| token.id)
        .collect();
    let generated: Vec<u32> = tokens
        .iter()
        .filter(|token| !token.is_prompt())
        .map(|token| token.id)
        .collect();

    assert_eq!(prompt, vec![5, 6]);
    assert_eq!(generated, vec![9]);
    assert_eq!(tokens[0].token_type, TokenType::Prompt);
    assert_eq!(tokens.last().unwrap().token_type, TokenType::Generated);
}

#[tokio::test]
async fn test_streamer_sees_every_token_then_end() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model, greedy(4)).unwrap();
    let (mut streamer, mut receiver) = ChannelStreamer::new();

    let outputs = generator
        .generate_with_streamer(&[vec![5, 6]], &mut streamer)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    assert_eq!(events.last(), Some(&StreamEvent::End));

    let streamed: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Token(token) => Some(token.id),
            StreamEvent::End => None,
        })
        .collect();
    assert_eq!(streamed, outputs[0]);
}

#[tokio::test]
async fn test_cancelled_token_stops_generation_before_any_step() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(4));
    let generator = BatchGenerator::new(model.clone(), greedy(4))
        .unwrap()
        .with_cancellation(CancellationToken::already_cancelled());

    let err = generator.generate(&[vec![5]]).await.unwrap_err();

    assert!(matches!(err, GenerationError::Cancelled(_)));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_mid_stream_is_observed_next_step() {
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(8));
    let (token, handle) = CancellationToken::new();
    let generator = BatchGenerator::new(model, greedy(8))
        .unwrap()
        .with_cancellation(token);

    let stream = generator.generate_stream(vec![vec![5]]);
    futures::pin_mut!(stream);

    let mut generated = 0;
    let mut cancelled = false;
    while let Some(item) = stream.next().await {
        match item {
            Ok(token) if token.token_type == TokenType::Generated => {
                generated += 1;
                handle.cancel();
            }
            Ok(_) => {}
            Err(GenerationError::Cancelled(_)) => {
                cancelled = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(generated, 1);
    assert!(cancelled);
}

// =========================================================================
//  Request snapshots
// =========================================================================

#[tokio::test]
async fn test_valid_length_scan_ignores_trailing_padding_only() {
    // An interior pad id is real data; only the trailing run is padding.
    let model = Arc::new(MockDecoderModel::forcing(vec![7]).with_seq_length(6));
    let generator = BatchGenerator::new(model.clone(), greedy(5)).unwrap();

    let outputs = generator.generate(&[vec![5, 0, 6, 0, 0]]).await.unwrap();

    assert_eq!(outputs[0][..3], [5, 0, 6]);
    assert_eq!(model.recorded()[0].current_index, vec![2]);
}

#[tokio::test]
async fn test_forced_logits_sanity() {
    let model = MockDecoderModel::forcing(vec![3]).with_seq_length(2);
    let request = ForwardRequest {
        input_ids: array![[1_u32, 2]],
        current_index: vec![1],
        valid_length: vec![2],
        reset_cache: true,
        is_first_iteration: true,
        positions: None,
    };
    match model.forward(request).await.unwrap() {
        ForwardResponse::Logits(logits) => {
            assert_eq!(logits[[0, 0, 3]], 100.0);
            assert_eq!(logits[[0, 1, 3]], 100.0);
            assert_eq!(logits[[0, 0, 4]], 0.0);
        }
        ForwardResponse::Sampled { .. } => panic!("expected raw logits"),
    }
}
