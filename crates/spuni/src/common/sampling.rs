//! Score transforms and token selection primitives.
//!
//! Everything here operates on 1-D score vectors so the same helpers serve
//! both the per-row warpers in `generation::logits` and the final selection
//! step of the decoding loop.

use ndarray::{Array1, ArrayBase, Data, DataMut, Ix1};
use rand::Rng;

/// Numerically stable softmax, in-place.
pub fn softmax_1d_inplace<S>(logits: &mut ArrayBase<S, Ix1>)
where
    S: DataMut<Elem = f32>,
{
    let max_val = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let mut sum = 0.0f32;
    logits.mapv_inplace(|x| {
        let e = (x - max_val).exp();
        sum += e;
        e
    });
    if sum > 0.0 {
        logits.mapv_inplace(|x| x / sum);
    }
}

/// Softmax into a fresh array, leaving the input untouched.
pub fn softmax_1d<S>(logits: &ArrayBase<S, Ix1>) -> Array1<f32>
where
    S: Data<Elem = f32>,
{
    let mut probs = logits.to_owned();
    softmax_1d_inplace(&mut probs);
    probs
}

/// Log-softmax in-place, via the log-sum-exp shift.
pub fn log_softmax_1d_inplace<S>(logits: &mut ArrayBase<S, Ix1>)
where
    S: DataMut<Elem = f32>,
{
    let max_val = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exp_sum: f32 = logits.iter().map(|&x| (x - max_val).exp()).sum();
    let log_sum = exp_sum.ln() + max_val;
    logits.mapv_inplace(|x| x - log_sum);
}

/// Apply repetition penalty in-place - works with both Array1 and ArrayViewMut1.
///
/// Seen tokens with a positive score are divided by the penalty, seen tokens
/// with a non-positive score are multiplied, so the penalty always pushes the
/// token away from being selected again.
pub fn apply_repetition_penalty_inplace<S>(
    logits: &mut ArrayBase<S, Ix1>,
    tokens: &[u32],
    penalty: f32,
) where
    S: DataMut<Elem = f32>,
{
    if penalty == 1.0 {
        return;
    }
    for &token in tokens {
        let idx = token as usize;
        if idx < logits.len() {
            let score = logits[idx];
            if score > 0.0 {
                logits[idx] = score / penalty;
            } else {
                logits[idx] = score * penalty;
            }
        }
    }
}

/// Keep the `k` highest scores, mask everything else to negative infinity.
///
/// `k >= len` leaves the vector unchanged.
pub fn top_k_filtering_inplace<S>(logits: &mut ArrayBase<S, Ix1>, k: usize)
where
    S: DataMut<Elem = f32>,
{
    if k >= logits.len() {
        return;
    }
    let mut indices: Vec<usize> = (0..logits.len()).collect();
    indices.sort_by(|&a, &b| logits[b].partial_cmp(&logits[a]).unwrap());
    for &idx in &indices[k..] {
        logits[idx] = f32::NEG_INFINITY;
    }
}

/// Nucleus filtering: keep the smallest descending-probability prefix whose
/// cumulative softmax mass reaches `p`, mask the rest to negative infinity.
///
/// At least `min_tokens_to_keep` survive regardless of `p`.
pub fn top_p_filtering_inplace<S>(logits: &mut ArrayBase<S, Ix1>, p: f32, min_tokens_to_keep: usize)
where
    S: DataMut<Elem = f32>,
{
    let mut indices: Vec<usize> = (0..logits.len()).collect();
    indices.sort_by(|&a, &b| logits[b].partial_cmp(&logits[a]).unwrap());

    let probs = softmax_1d(logits);

    let mut cutoff = indices.len();
    let mut cumulative = 0.0f32;
    for (rank, &idx) in indices.iter().enumerate() {
        cumulative += probs[idx];
        if cumulative >= p {
            cutoff = rank + 1;
            break;
        }
    }
    let cutoff = cutoff.max(min_tokens_to_keep).min(indices.len());
    for &idx in &indices[cutoff..] {
        logits[idx] = f32::NEG_INFINITY;
    }
}

/// Index of the highest score; the first occurrence wins ties.
pub fn argmax<S>(scores: &ArrayBase<S, Ix1>) -> usize
where
    S: Data<Elem = f32>,
{
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &val) in scores.iter().enumerate() {
        if val > best_val {
            best = idx;
            best_val = val;
        }
    }
    best
}

/// Draw an index from a normalized probability vector.
pub fn sample_from_probs<S>(probs: &ArrayBase<S, Ix1>) -> usize
where
    S: Data<Elem = f32>,
{
    let mut rng = rand::thread_rng();
    let uniform: f32 = rng.r#gen();
    let mut cumulative = 0.0;
    for (idx, &prob) in probs.iter().enumerate() {
        cumulative += prob;
        // Strict, so a zero-probability prefix can never swallow a draw
        // of exactly 0.0.
        if cumulative > uniform {
            return idx;
        }
    }
    // Rounding can leave the cumulative sum a hair below 1.0.
    probs.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // ============== softmax ==============

    #[test]
    fn test_softmax_1d_basic() {
        let mut logits = array![1.0, 2.0, 3.0];
        softmax_1d_inplace(&mut logits);
        assert!((logits.sum() - 1.0).abs() < 1e-6);
        assert!(logits.iter().all(|&p| p > 0.0));
        assert!(logits[2] > logits[1]);
        assert!(logits[1] > logits[0]);
    }

    #[test]
    fn test_softmax_1d_numerical_stability() {
        // Large values that would overflow a naive implementation
        let mut logits = array![1000.0, 1001.0, 1002.0];
        softmax_1d_inplace(&mut logits);
        assert!((logits.sum() - 1.0).abs() < 1e-6);
        assert!(logits.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_softmax_1d_with_neg_infinity() {
        let mut logits = array![1.0, f32::NEG_INFINITY, 2.0];
        softmax_1d_inplace(&mut logits);
        assert_eq!(logits[1], 0.0);
        assert!((logits.sum() - 1.0).abs() < 1e-6);
    }

    // ============== log_softmax ==============

    #[test]
    fn test_log_softmax_matches_softmax_log() {
        let logits = array![1.0, 2.0, 3.0];
        let mut log_probs = logits.clone();
        log_softmax_1d_inplace(&mut log_probs);

        let probs = softmax_1d(&logits);
        for i in 0..3 {
            assert!((log_probs[i] - probs[i].ln()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_log_softmax_all_non_positive() {
        let mut logits = array![1.0, 2.0, 3.0];
        log_softmax_1d_inplace(&mut logits);
        assert!(logits.iter().all(|&lp| lp <= 0.0));
    }

    // ============== repetition penalty ==============

    #[test]
    fn test_repetition_penalty_noop_at_one() {
        let mut logits = array![1.0, 2.0, 3.0];
        apply_repetition_penalty_inplace(&mut logits, &[0, 1], 1.0);
        assert_eq!(logits, array![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_repetition_penalty_positive_scores_divided() {
        let mut logits = array![2.0, 4.0, 6.0];
        apply_repetition_penalty_inplace(&mut logits, &[1], 2.0);
        assert_eq!(logits[0], 2.0);
        assert_eq!(logits[1], 2.0); // 4.0 / 2.0
        assert_eq!(logits[2], 6.0);
    }

    #[test]
    fn test_repetition_penalty_negative_scores_multiplied() {
        let mut logits = array![-2.0, -4.0, 1.0];
        apply_repetition_penalty_inplace(&mut logits, &[0, 1], 2.0);
        assert_eq!(logits[0], -4.0); // -2.0 * 2.0
        assert_eq!(logits[1], -8.0); // -4.0 * 2.0
        assert_eq!(logits[2], 1.0);
    }

    #[test]
    fn test_repetition_penalty_ignores_out_of_range() {
        let mut logits = array![1.0, 2.0, 3.0];
        apply_repetition_penalty_inplace(&mut logits, &[100], 2.0);
        assert_eq!(logits, array![1.0, 2.0, 3.0]);
    }

    // ============== top-k ==============

    #[test]
    fn test_top_k_keeps_highest() {
        let mut logits = array![1.0, 5.0, 3.0, 4.0, 2.0];
        top_k_filtering_inplace(&mut logits, 3);
        assert!(logits[1].is_finite()); // 5.0
        assert!(logits[3].is_finite()); // 4.0
        assert!(logits[2].is_finite()); // 3.0
        assert_eq!(logits[0], f32::NEG_INFINITY);
        assert_eq!(logits[4], f32::NEG_INFINITY);
    }

    #[test]
    fn test_top_k_equal_to_len_is_noop() {
        let mut logits = array![1.0, 2.0, 3.0];
        top_k_filtering_inplace(&mut logits, 3);
        assert!(logits.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_top_k_one_keeps_only_max() {
        let mut logits = array![1.0, 5.0, 3.0];
        top_k_filtering_inplace(&mut logits, 1);
        assert!(logits[1].is_finite());
        assert_eq!(logits[0], f32::NEG_INFINITY);
        assert_eq!(logits[2], f32::NEG_INFINITY);
    }

    // ============== top-p ==============

    #[test]
    fn test_top_p_one_keeps_everything() {
        let mut logits = array![1.0, 2.0, 3.0, 4.0];
        top_p_filtering_inplace(&mut logits, 1.0, 1);
        assert!(logits.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_top_p_small_p_keeps_dominant_token() {
        let mut logits = array![1.0, 2.0, 10.0];
        top_p_filtering_inplace(&mut logits, 0.01, 1);
        assert!(logits[2].is_finite());
        assert_eq!(logits[0], f32::NEG_INFINITY);
        assert_eq!(logits[1], f32::NEG_INFINITY);
    }

    #[test]
    fn test_top_p_keeps_crossing_token() {
        // Uniform distribution over four tokens: each carries 0.25 mass, so
        // p = 0.5 keeps exactly the first two in sort order.
        let mut logits = array![1.0, 1.0, 1.0, 1.0];
        top_p_filtering_inplace(&mut logits, 0.5, 1);
        let kept = logits.iter().filter(|x| x.is_finite()).count();
        assert_eq!(kept, 2);
    }

    #[test]
    fn test_top_p_respects_min_tokens_to_keep() {
        let mut logits = array![1.0, 2.0, 10.0];
        top_p_filtering_inplace(&mut logits, 0.01, 2);
        let kept = logits.iter().filter(|x| x.is_finite()).count();
        assert_eq!(kept, 2);
    }

    // ============== selection ==============

    #[test]
    fn test_argmax_basic() {
        let logits = array![1.0, 5.0, 3.0, 2.0];
        assert_eq!(argmax(&logits), 1);
    }

    #[test]
    fn test_argmax_tie_takes_first() {
        let logits = array![5.0, 5.0, 1.0];
        assert_eq!(argmax(&logits), 0);
    }

    #[test]
    fn test_sample_from_probs_deterministic() {
        let probs = array![0.0, 0.0, 1.0, 0.0];
        for _ in 0..10 {
            assert_eq!(sample_from_probs(&probs), 2);
        }
    }

    #[test]
    fn test_sample_from_probs_valid_range() {
        let probs = array![0.25, 0.25, 0.25, 0.25];
        for _ in 0..100 {
            assert!(sample_from_probs(&probs) < 4);
        }
    }
}
