//! Per-step forward-request construction.
//!
//! What a model wants to see each step is family-specific: most take the
//! padded buffer plus flat last-token indices, some need their position
//! and attention metadata rebuilt around anchor tokens. The loop stays
//! agnostic and hands the live state to a builder resolved once at
//! generator construction.

use ndarray::{Array2, Array3};

use super::model::{ForwardRequest, PositionMetadata};
use super::types::GenerationError;

/// Read-only view of the loop state, handed to a builder once per step.
pub struct StepView<'a> {
    /// Right-padded `(batch, seq_length)` buffer.
    pub input_ids: &'a Array2<u32>,
    /// Real token count per row; at least 1 for every row.
    pub valid_length: &'a [usize],
    pub is_first_iteration: bool,
}

impl StepView<'_> {
    pub fn batch(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_length(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// Which forward-request layout the model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBuilderKind {
    /// Full rows on the first pass, a single-token slice per row after,
    /// last-token indices flattened into the batch x seq buffer.
    Standard,
    /// Two-dimensional position scheme: position pairs and the attention
    /// mask are rebuilt from scratch every call and cut down to the live
    /// column on incremental ones. `bos` closes the context prefix; the
    /// mask tokens anchor generation positions, `gmask` winning over
    /// `mask` when both occur.
    Recomputed2d {
        bos_token_id: u32,
        mask_token_id: u32,
        gmask_token_id: Option<u32>,
    },
}

impl InputBuilderKind {
    /// Resolution table mapping each kind to its builder.
    pub fn instantiate(self) -> Box<dyn InputBuilder> {
        match self {
            InputBuilderKind::Standard => Box::new(StandardInputBuilder),
            InputBuilderKind::Recomputed2d {
                bos_token_id,
                mask_token_id,
                gmask_token_id,
            } => Box::new(Recomputed2dInputBuilder {
                bos_token_id,
                mask_token_id,
                gmask_token_id,
            }),
        }
    }
}

/// Cuts one step's worth of model inputs out of the loop state.
pub trait InputBuilder: Send + Sync {
    fn build(&self, view: &StepView<'_>) -> Result<ForwardRequest, GenerationError>;
}

/// Flat-ABI builder. `current_index[i]` addresses the last real token
/// inside the row-major `(batch, seq_length)` buffer, so it carries the
/// `i * seq_length` row offset; nothing outside this builder deals in
/// flattened indices.
pub struct StandardInputBuilder;

impl InputBuilder for StandardInputBuilder {
    fn build(&self, view: &StepView<'_>) -> Result<ForwardRequest, GenerationError> {
        let seq_length = view.seq_length();
        let current_index: Vec<usize> = view
            .valid_length
            .iter()
            .enumerate()
            .map(|(i, &valid)| valid - 1 + i * seq_length)
            .collect();

        let input_ids = if view.is_first_iteration {
            view.input_ids.clone()
        } else {
            Array2::from_shape_fn((view.batch(), 1), |(i, _)| {
                view.input_ids[[i, view.valid_length[i] - 1]]
            })
        };

        Ok(ForwardRequest {
            input_ids,
            current_index,
            valid_length: view.valid_length.to_vec(),
            reset_cache: view.is_first_iteration,
            is_first_iteration: view.is_first_iteration,
            positions: None,
        })
    }
}

/// Builder for models with two-dimensional positions: attention is fully
/// open over the prompt prefix up to `bos` and causal after it, and each
/// position is an (absolute, block) pair anchored at the mask token.
pub struct Recomputed2dInputBuilder {
    bos_token_id: u32,
    mask_token_id: u32,
    gmask_token_id: Option<u32>,
}

impl Recomputed2dInputBuilder {
    /// Tokens before `bos` form the context prefix every position may
    /// attend to.
    fn context_length(&self, view: &StepView<'_>, row: usize) -> Result<usize, GenerationError> {
        view.input_ids
            .row(row)
            .iter()
            .position(|&id| id == self.bos_token_id)
            .ok_or(GenerationError::AnchorTokenMissing {
                row,
                token: self.bos_token_id,
            })
    }

    /// Generated positions all point at the mask token they expand.
    fn anchor_position(&self, view: &StepView<'_>, row: usize) -> Result<usize, GenerationError> {
        let ids = view.input_ids.row(row);
        if let Some(gmask) = self.gmask_token_id {
            if let Some(pos) = ids.iter().position(|&id| id == gmask) {
                return Ok(pos);
            }
        }
        ids.iter()
            .position(|&id| id == self.mask_token_id)
            .ok_or(GenerationError::AnchorTokenMissing {
                row,
                token: self.mask_token_id,
            })
    }
}

impl InputBuilder for Recomputed2dInputBuilder {
    fn build(&self, view: &StepView<'_>) -> Result<ForwardRequest, GenerationError> {
        let batch = view.batch();
        let seq_length = view.seq_length();

        let mut blocked = Array3::from_elem((batch, seq_length, seq_length), false);
        let mut position_ids = Array3::<u32>::zeros((batch, 2, seq_length));
        for i in 0..batch {
            let context_length = self.context_length(view, i)?;
            let anchor = self.anchor_position(view, i)? as u32;
            for q in 0..seq_length {
                for k in 0..seq_length {
                    blocked[[i, q, k]] = k > q && k >= context_length;
                }
            }
            for pos in 0..seq_length {
                if pos < context_length {
                    position_ids[[i, 0, pos]] = pos as u32;
                } else {
                    position_ids[[i, 0, pos]] = anchor;
                    position_ids[[i, 1, pos]] = (pos - context_length + 1) as u32;
                }
            }
        }

        let request = if view.is_first_iteration {
            ForwardRequest {
                input_ids: view.input_ids.clone(),
                current_index: view.valid_length.iter().map(|&valid| valid - 1).collect(),
                valid_length: view.valid_length.to_vec(),
                reset_cache: true,
                is_first_iteration: true,
                positions: Some(PositionMetadata {
                    position_ids,
                    attention_mask: blocked,
                }),
            }
        } else {
            // Metadata above is always rebuilt in full; incremental calls
            // just carry the column of the latest real token.
            let live = |i: usize| view.valid_length[i] - 1;
            ForwardRequest {
                input_ids: Array2::from_shape_fn((batch, 1), |(i, _)| {
                    view.input_ids[[i, live(i)]]
                }),
                current_index: view.valid_length.iter().map(|&valid| valid - 1).collect(),
                valid_length: view.valid_length.to_vec(),
                reset_cache: false,
                is_first_iteration: false,
                positions: Some(PositionMetadata {
                    position_ids: Array3::from_shape_fn((batch, 2, 1), |(i, axis, _)| {
                        position_ids[[i, axis, live(i)]]
                    }),
                    attention_mask: Array3::from_shape_fn((batch, 1, seq_length), |(i, _, k)| {
                        blocked[[i, live(i), k]]
                    }),
                }),
            }
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn view<'a>(
        input_ids: &'a Array2<u32>,
        valid_length: &'a [usize],
        is_first_iteration: bool,
    ) -> StepView<'a> {
        StepView {
            input_ids,
            valid_length,
            is_first_iteration,
        }
    }

    // ============== standard builder ==============

    #[test]
    fn test_standard_first_pass_sends_full_rows_with_flat_indices() {
        let buffer = array![[5_u32, 6, 0, 0], [7, 0, 0, 0]];
        let valid = [2, 1];
        let request = StandardInputBuilder
            .build(&view(&buffer, &valid, true))
            .unwrap();

        assert_eq!(request.input_ids, buffer);
        assert_eq!(request.current_index, vec![1, 4]);
        assert_eq!(request.valid_length, vec![2, 1]);
        assert!(request.reset_cache);
        assert!(request.is_first_iteration);
        assert!(request.positions.is_none());
    }

    #[test]
    fn test_standard_incremental_pass_slices_latest_token() {
        let buffer = array![[5_u32, 6, 9, 0], [7, 8, 0, 0]];
        let valid = [3, 2];
        let request = StandardInputBuilder
            .build(&view(&buffer, &valid, false))
            .unwrap();

        assert_eq!(request.input_ids, array![[9_u32], [8]]);
        assert_eq!(request.current_index, vec![2, 5]);
        assert!(!request.reset_cache);
        assert!(request.is_incremental());
    }

    // ============== two-dimensional builder ==============

    fn two_dimensional() -> Recomputed2dInputBuilder {
        Recomputed2dInputBuilder {
            bos_token_id: 90,
            mask_token_id: 91,
            gmask_token_id: Some(92),
        }
    }

    #[test]
    fn test_recomputed2d_positions_anchor_at_mask_token() {
        // mask at 1, bos at 2: context is [5, 91], generation starts at 2.
        let buffer = array![[5_u32, 91, 90, 0, 0]];
        let valid = [3];
        let request = two_dimensional()
            .build(&view(&buffer, &valid, true))
            .unwrap();

        let positions = request.positions.unwrap();
        assert_eq!(
            positions.position_ids,
            array![[[0_u32, 1, 1, 1, 1], [0, 0, 1, 2, 3]]]
        );
        // Context columns stay open everywhere; generated columns are causal.
        let mask = positions.attention_mask;
        assert!(!mask[[0, 0, 1]]);
        assert!(mask[[0, 0, 2]]);
        assert!(mask[[0, 2, 3]]);
        assert!(!mask[[0, 3, 3]]);
        assert!(!mask[[0, 4, 2]]);
    }

    #[test]
    fn test_recomputed2d_prefers_gmask_over_mask() {
        let buffer = array![[91_u32, 92, 90, 0]];
        let valid = [3];
        let request = two_dimensional()
            .build(&view(&buffer, &valid, true))
            .unwrap();
        let positions = request.positions.unwrap();
        // Anchor is the gmask position, not the earlier mask.
        assert_eq!(positions.position_ids[[0, 0, 3]], 1);
    }

    #[test]
    fn test_recomputed2d_incremental_slices_live_column() {
        let buffer = array![[5_u32, 92, 90, 33, 0]];
        let valid = [4];
        let request = two_dimensional()
            .build(&view(&buffer, &valid, false))
            .unwrap();

        assert_eq!(request.input_ids, array![[33_u32]]);
        assert_eq!(request.current_index, vec![3]);
        let positions = request.positions.unwrap();
        assert_eq!(positions.position_ids, array![[[1_u32], [2]]]);
        assert_eq!(positions.attention_mask.dim(), (1, 1, 5));
        // The live row may see everything up to itself.
        assert!(!positions.attention_mask[[0, 0, 3]]);
        assert!(positions.attention_mask[[0, 0, 4]]);
    }

    #[test]
    fn test_recomputed2d_missing_bos_is_an_error() {
        let buffer = array![[5_u32, 92, 6, 0]];
        let valid = [3];
        let err = two_dimensional()
            .build(&view(&buffer, &valid, true))
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::AnchorTokenMissing { row: 0, token: 90 }
        ));
    }

    #[test]
    fn test_recomputed2d_missing_mask_is_an_error() {
        let buffer = array![[5_u32, 90, 6, 0]];
        let valid = [3];
        let err = two_dimensional()
            .build(&view(&buffer, &valid, true))
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::AnchorTokenMissing { row: 0, token: 91 }
        ));
    }
}
