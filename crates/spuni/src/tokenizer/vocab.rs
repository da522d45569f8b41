//! Overlay vocabulary for tokens registered after the base model was built.

use std::collections::HashMap;

/// Token/id mappings layered on top of the base vocabulary.
///
/// Overlay ids start at the base vocabulary size and grow upwards, so the
/// combined id space stays dense. Lookups here take priority over the base
/// vocabulary in both directions.
#[derive(Debug, Clone, Default)]
pub struct VocabularyOverlay {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
}

impl VocabularyOverlay {
    pub fn new() -> Self {
        VocabularyOverlay::default()
    }

    pub fn insert(&mut self, token: String, id: u32) {
        self.id_to_token.insert(id, token.clone());
        self.token_to_id.insert(token, id);
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.id_to_token.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// Entries sorted by id, for stable serialization.
    pub fn entries(&self) -> Vec<(&str, u32)> {
        let mut entries: Vec<(&str, u32)> = self
            .token_to_id
            .iter()
            .map(|(token, &id)| (token.as_str(), id))
            .collect();
        entries.sort_by_key(|&(_, id)| id);
        entries
    }
}
