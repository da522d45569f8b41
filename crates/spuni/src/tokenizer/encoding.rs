//! The result of encoding text: ids plus the aligned auxiliary sequences.

use serde::{Deserialize, Serialize};

/// Encoded output for one sequence or sequence pair.
///
/// The optional vectors, when present, are index-aligned with `ids` and
/// padding keeps them aligned. `overflowing_tokens` holds the tokens cut by
/// truncation (including the stride window) when the caller asked for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub ids: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type_ids: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_mask: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_tokens_mask: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overflowing_tokens: Vec<u32>,
    /// How many tokens truncation removed, zero when nothing overflowed.
    #[serde(default)]
    pub num_truncated_tokens: usize,
}

impl Encoding {
    pub fn new(ids: Vec<u32>) -> Self {
        Encoding {
            ids,
            ..Encoding::default()
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get_ids(&self) -> &[u32] {
        &self.ids
    }
}
