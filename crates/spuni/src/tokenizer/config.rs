//! Saving and loading tokenizers as a single JSON document.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::engine::{PostSection, Tokenizer};
use super::special::{SpecialTokenRegistry, SpecialTokenRole};
use super::sub::{sub_tokenizer_from_model, ModelSection};
use super::types::{AddedToken, TokenizerError, TokenizerOptions};

/// An overlay entry together with the id it held when saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAddedToken {
    pub id: u32,
    #[serde(flatten)]
    pub token: AddedToken,
}

/// Everything needed to reconstruct a [`Tokenizer`], including the base
/// model vocabulary.
///
/// Added tokens are stored in ascending id order and replayed in that order
/// on load, so overlay ids land exactly where they were. A config only loads
/// against the base vocabulary it was saved with; a drifted vocabulary is
/// reported as a configuration error rather than silently renumbering ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub options: TokenizerOptions,
    pub special_tokens_map: SpecialTokenRegistry,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_tokens: Vec<SavedAddedToken>,
    #[serde(default)]
    pub post_processor: PostSection,
    pub model: ModelSection,
}

impl Tokenizer {
    /// Snapshot the full tokenizer state.
    pub fn to_config(&self) -> TokenizerConfig {
        TokenizerConfig {
            options: self.options().clone(),
            special_tokens_map: self.special_tokens().clone(),
            added_tokens: self
                .added_tokens()
                .into_iter()
                .map(|(token, id)| SavedAddedToken { id, token })
                .collect(),
            post_processor: self.post_section(),
            model: self.sub_tokenizer().to_model_section(),
        }
    }

    /// Rebuild a tokenizer from a saved config.
    ///
    /// The overlay is rebuilt first, from the saved entries in id order, and
    /// the special-token roles are installed afterwards. Installing roles
    /// last keeps a role that was bound late in the original session from
    /// stealing an earlier overlay id.
    pub fn from_config(config: TokenizerConfig) -> Result<Self, TokenizerError> {
        let sub = sub_tokenizer_from_model(config.model)?;
        let mut tokenizer = Tokenizer::new(sub, SpecialTokenRegistry::new(), config.options)
            .with_post_processor(config.post_processor.instantiate());

        let mut added_tokens = config.added_tokens;
        added_tokens.sort_by_key(|saved| saved.id);
        for saved in &added_tokens {
            tokenizer.add_tokens(
                std::slice::from_ref(&saved.token),
                saved.token.special,
            );
            let resolved = tokenizer.convert_token_to_id(&saved.token.content)?;
            if resolved != saved.id {
                return Err(TokenizerError::InvalidConfig(format!(
                    "saved added token {:?} resolves to id {} instead of {}; the base \
                     vocabulary no longer matches the one this config was saved with",
                    saved.token.content, resolved, saved.id
                )));
            }
        }

        for role in SpecialTokenRole::ALL {
            if let Some(token) = config.special_tokens_map.peek(role) {
                tokenizer.set_special_token(role, token.clone());
            }
        }
        tokenizer.add_additional_special_tokens(config.special_tokens_map.additional());
        Ok(tokenizer)
    }

    /// Serialize to pretty JSON and write to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TokenizerError> {
        let json = serde_json::to_string_pretty(&self.to_config())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a JSON config from `path` and rebuild the tokenizer.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let json = std::fs::read_to_string(path)?;
        let config: TokenizerConfig = serde_json::from_str(&json)?;
        Self::from_config(config)
    }
}
