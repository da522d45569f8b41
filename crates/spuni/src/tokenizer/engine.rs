//! The tokenization engine: registration, encoding, truncation, padding
//! and decoding, built around a no-split trie and a pluggable sub-tokenizer.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::encoding::Encoding;
use super::special::{SpecialTokenRegistry, SpecialTokenRole};
use super::sub::SubTokenizer;
use super::trie::Trie;
use super::types::{
    AddedToken, EncodeParams, PaddingSide, PaddingStrategy, TokenizerError, TokenizerOptions,
    TruncationSide, TruncationStrategy,
};
use super::vocab::VocabularyOverlay;

/// Special-token ids resolved against the current vocabulary, handed to the
/// post-processor so it never needs the engine itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialIds {
    pub bos: Option<u32>,
    pub eos: Option<u32>,
    pub cls: Option<u32>,
    pub sep: Option<u32>,
    pub pad: Option<u32>,
}

/// Serializable identity of a post-processor, recorded in saved configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSection {
    #[default]
    Concat,
    ClsSep,
}

impl PostSection {
    pub fn instantiate(self) -> Box<dyn PostProcessor> {
        match self {
            PostSection::Concat => Box::new(ConcatPostProcessor),
            PostSection::ClsSep => Box::new(ClsSepPostProcessor),
        }
    }
}

/// Model-specific assembly of final input sequences.
///
/// `build_inputs` combines one or two id sequences and inserts whatever
/// special ids the scheme calls for; the other two methods must mirror its
/// layout exactly so the auxiliary vectors stay aligned.
pub trait PostProcessor: Send + Sync {
    fn build_inputs(&self, specials: &SpecialIds, ids: &[u32], pair_ids: Option<&[u32]>)
        -> Vec<u32>;

    fn build_token_type_ids(
        &self,
        specials: &SpecialIds,
        len_ids: usize,
        len_pair: Option<usize>,
    ) -> Vec<u32>;

    fn build_special_tokens_mask(
        &self,
        specials: &SpecialIds,
        len_ids: usize,
        len_pair: Option<usize>,
    ) -> Vec<u32>;

    fn to_post_section(&self) -> PostSection;
}

/// Default assembly: plain concatenation, no special ids inserted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatPostProcessor;

impl PostProcessor for ConcatPostProcessor {
    fn build_inputs(
        &self,
        _specials: &SpecialIds,
        ids: &[u32],
        pair_ids: Option<&[u32]>,
    ) -> Vec<u32> {
        let mut sequence = ids.to_vec();
        if let Some(pair) = pair_ids {
            sequence.extend_from_slice(pair);
        }
        sequence
    }

    fn build_token_type_ids(
        &self,
        _specials: &SpecialIds,
        len_ids: usize,
        len_pair: Option<usize>,
    ) -> Vec<u32> {
        let mut types = vec![0u32; len_ids];
        if let Some(len_pair) = len_pair {
            types.extend(std::iter::repeat(1).take(len_pair));
        }
        types
    }

    fn build_special_tokens_mask(
        &self,
        _specials: &SpecialIds,
        len_ids: usize,
        len_pair: Option<usize>,
    ) -> Vec<u32> {
        vec![0u32; len_ids + len_pair.unwrap_or(0)]
    }

    fn to_post_section(&self) -> PostSection {
        PostSection::Concat
    }
}

/// Classifier-style assembly: `[CLS] A [SEP]` and `[CLS] A [SEP] B [SEP]`.
///
/// Unresolvable role slots are simply skipped, so a registry without a cls
/// token degrades to `A [SEP]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClsSepPostProcessor;

impl PostProcessor for ClsSepPostProcessor {
    fn build_inputs(
        &self,
        specials: &SpecialIds,
        ids: &[u32],
        pair_ids: Option<&[u32]>,
    ) -> Vec<u32> {
        let mut sequence = Vec::with_capacity(ids.len() + pair_ids.map_or(0, <[u32]>::len) + 3);
        if let Some(cls) = specials.cls {
            sequence.push(cls);
        }
        sequence.extend_from_slice(ids);
        if let Some(sep) = specials.sep {
            sequence.push(sep);
        }
        if let Some(pair) = pair_ids {
            sequence.extend_from_slice(pair);
            if let Some(sep) = specials.sep {
                sequence.push(sep);
            }
        }
        sequence
    }

    fn build_token_type_ids(
        &self,
        specials: &SpecialIds,
        len_ids: usize,
        len_pair: Option<usize>,
    ) -> Vec<u32> {
        let cls_len = if specials.cls.is_some() { 1 } else { 0 };
        let sep_len = if specials.sep.is_some() { 1 } else { 0 };
        let mut types = vec![0u32; cls_len + len_ids + sep_len];
        if let Some(len_pair) = len_pair {
            types.extend(std::iter::repeat(1).take(len_pair + sep_len));
        }
        types
    }

    fn build_special_tokens_mask(
        &self,
        specials: &SpecialIds,
        len_ids: usize,
        len_pair: Option<usize>,
    ) -> Vec<u32> {
        let mut mask = Vec::new();
        if specials.cls.is_some() {
            mask.push(1);
        }
        mask.extend(std::iter::repeat(0).take(len_ids));
        if specials.sep.is_some() {
            mask.push(1);
        }
        if let Some(len_pair) = len_pair {
            mask.extend(std::iter::repeat(0).take(len_pair));
            if specials.sep.is_some() {
                mask.push(1);
            }
        }
        mask
    }

    fn to_post_section(&self) -> PostSection {
        PostSection::ClsSep
    }
}

/// Per-call knobs for [`Tokenizer::decode`].
#[derive(Debug, Clone, Default)]
pub struct DecodeParams {
    pub skip_special_tokens: bool,
    /// `None` falls back to the tokenizer options.
    pub clean_up_tokenization_spaces: Option<bool>,
    /// `None` falls back to the tokenizer options.
    pub spaces_between_special_tokens: Option<bool>,
}

impl DecodeParams {
    pub fn with_skip_special_tokens(mut self, skip: bool) -> Self {
        self.skip_special_tokens = skip;
        self
    }

    pub fn with_clean_up(mut self, clean_up: bool) -> Self {
        self.clean_up_tokenization_spaces = Some(clean_up);
        self
    }

    pub fn with_spaces_between_special_tokens(mut self, spaces: bool) -> Self {
        self.spaces_between_special_tokens = Some(spaces);
        self
    }
}

/// Special-token-aware tokenizer over a pluggable base model.
///
/// The engine owns everything that happens at token boundaries: the no-split
/// trie, the added-token overlay, special-token roles, truncation, padding
/// and decoding. The base vocabulary itself is behind the [`SubTokenizer`]
/// trait, so the same engine serves wordpiece today and other schemes later.
///
/// # Example
///
/// ```no_run
/// use std::collections::HashMap;
/// use spuni::tokenizer::{
///     AddedToken, EncodeParams, SpecialTokenRegistry, SpecialTokenRole, Tokenizer,
///     TokenizerOptions, WordPieceSubTokenizer,
/// };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let vocab: HashMap<String, u32> = HashMap::new();
/// let sub = WordPieceSubTokenizer::new(vocab, "[UNK]")?;
/// let mut registry = SpecialTokenRegistry::new();
/// registry.set(SpecialTokenRole::Eos, AddedToken::special("<eos>"));
/// let tokenizer = Tokenizer::new(Box::new(sub), registry, TokenizerOptions::default());
/// let encoding = tokenizer.encode_plus("hello<eos>", None, &EncodeParams::default())?;
/// # Ok(())
/// # }
/// ```
pub struct Tokenizer {
    sub: Box<dyn SubTokenizer>,
    special: SpecialTokenRegistry,
    overlay: VocabularyOverlay,
    added_flags: HashMap<String, AddedToken>,
    no_split_tokens: Vec<String>,
    trie: Trie,
    options: TokenizerOptions,
    post: Box<dyn PostProcessor>,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("special", &self.special)
            .field("no_split_tokens", &self.no_split_tokens)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// Build an engine and register every token the registry carries, so
    /// each role is resolvable and treated as a no-split atom.
    pub fn new(
        sub: Box<dyn SubTokenizer>,
        special: SpecialTokenRegistry,
        options: TokenizerOptions,
    ) -> Self {
        let registry_tokens: Vec<AddedToken> =
            special.all_special_tokens().into_iter().cloned().collect();
        let mut tokenizer = Tokenizer {
            sub,
            special,
            overlay: VocabularyOverlay::new(),
            added_flags: HashMap::new(),
            no_split_tokens: Vec::new(),
            trie: Trie::new(),
            options,
            post: Box::new(ConcatPostProcessor),
        };
        tokenizer.add_tokens(&registry_tokens, true);
        tokenizer
    }

    pub fn with_post_processor(mut self, post: Box<dyn PostProcessor>) -> Self {
        self.post = post;
        self
    }

    pub fn options(&self) -> &TokenizerOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TokenizerOptions {
        &mut self.options
    }

    pub fn special_tokens(&self) -> &SpecialTokenRegistry {
        &self.special
    }

    pub fn post_section(&self) -> PostSection {
        self.post.to_post_section()
    }

    pub(crate) fn sub_tokenizer(&self) -> &dyn SubTokenizer {
        self.sub.as_ref()
    }

    /// Combined vocabulary size: base plus overlay.
    pub fn len(&self) -> usize {
        self.sub.vocab_size() + self.overlay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlay entries with their flags, sorted by id.
    pub fn added_tokens(&self) -> Vec<(AddedToken, u32)> {
        self.overlay
            .entries()
            .into_iter()
            .map(|(content, id)| {
                let flags = self
                    .added_flags
                    .get(content)
                    .cloned()
                    .unwrap_or_else(|| AddedToken::new(content));
                (flags, id)
            })
            .collect()
    }

    pub fn no_split_tokens(&self) -> &[String] {
        &self.no_split_tokens
    }

    // ---------- registration ----------

    /// Register tokens, assigning overlay ids above the current vocabulary.
    ///
    /// A candidate is skipped when it already resolves to something other
    /// than the unknown token, or when it is the unknown token itself.
    /// Non-special tokens are lowercased first when the engine is
    /// case-insensitive. Special tokens always join the no-split set, even
    /// when they were already known. Returns the number of genuinely new
    /// tokens.
    pub fn add_tokens(&mut self, tokens: &[AddedToken], special: bool) -> usize {
        let unk_content: Option<String> = self
            .special
            .peek(SpecialTokenRole::Unk)
            .map(|t| t.content.clone());
        let unk_id: Option<u32> = unk_content.as_deref().and_then(|c| self.resolve_existing(c));

        let mut tokens_to_add: Vec<AddedToken> = Vec::new();
        for token in tokens {
            let mut token = token.clone();
            if !special && self.options.do_lower_case {
                token.content = token.content.to_lowercase();
            }
            if token.content.is_empty() {
                continue;
            }
            let is_unk_itself = unk_content.as_deref() == Some(token.content.as_str());
            let resolved = self.resolve_existing(&token.content);
            let is_new = !is_unk_itself && (resolved.is_none() || resolved == unk_id);
            if is_new && !tokens_to_add.iter().any(|t| t.content == token.content) {
                log::info!("adding {:?} to the vocabulary", token.content);
                tokens_to_add.push(token);
            }
        }

        let base = self.len() as u32;
        for (i, token) in tokens_to_add.iter().enumerate() {
            self.overlay.insert(token.content.clone(), base + i as u32);
        }

        if special {
            for token in tokens {
                if token.content.is_empty() {
                    continue;
                }
                self.added_flags
                    .insert(token.content.clone(), token.clone());
                self.insert_no_split(&token.content);
            }
        } else {
            for token in &tokens_to_add {
                self.added_flags
                    .insert(token.content.clone(), token.clone());
                self.insert_no_split(&token.content);
            }
        }
        self.rebuild_trie();
        tokens_to_add.len()
    }

    /// Bind a token to a role and make sure it is resolvable and no-split.
    pub fn set_special_token(&mut self, role: SpecialTokenRole, token: AddedToken) -> usize {
        self.special.set(role, token.clone());
        self.add_tokens(&[token], true)
    }

    /// Register extra special tokens outside the named roles.
    pub fn add_additional_special_tokens(&mut self, tokens: &[AddedToken]) -> usize {
        for token in tokens {
            self.special.add_additional(token.clone());
        }
        self.add_tokens(tokens, true)
    }

    // ---------- tokenization ----------

    /// Split text into token strings.
    ///
    /// No-split atoms are cut out with the trie, adjacent whitespace is
    /// trimmed per each atom's strip flags, and the remaining ordinary spans
    /// go through the sub-tokenizer. With `do_lower_case` the text is
    /// lowercased first, except for characters inside no-split atoms.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let prepared: String = if self.options.do_lower_case {
            self.lowercase_preserving_no_split(text)
        } else {
            text.to_string()
        };

        let mut chunks: Vec<String> = self
            .trie
            .split(&prepared)
            .into_iter()
            .map(str::to_string)
            .collect();

        for i in 0..chunks.len() {
            if !self.is_no_split(&chunks[i]) {
                continue;
            }
            let (trim_left, trim_right) = match self.added_flags.get(chunks[i].as_str()) {
                Some(flags) => (flags.lstrip, flags.rstrip),
                None => (true, true),
            };
            if trim_right && i + 1 < chunks.len() {
                chunks[i + 1] = chunks[i + 1].trim_start().to_string();
            }
            if trim_left && i > 0 {
                chunks[i - 1] = chunks[i - 1].trim_end().to_string();
            }
        }

        let mut tokens = Vec::new();
        for chunk in &chunks {
            if chunk.is_empty() {
                continue;
            }
            if self.is_no_split(chunk) {
                tokens.push(chunk.clone());
            } else {
                tokens.extend(self.sub.tokenize_plain_span(chunk));
            }
        }
        tokens
    }

    // ---------- conversions ----------

    /// Overlay-first id lookup with unknown-token fallback.
    pub fn convert_token_to_id(&self, token: &str) -> Result<u32, TokenizerError> {
        if let Some(id) = self.resolve_existing(token) {
            return Ok(id);
        }
        if let Some(unk) = self.special.peek(SpecialTokenRole::Unk) {
            if let Some(id) = self.resolve_existing(&unk.content) {
                return Ok(id);
            }
        }
        Err(TokenizerError::UnknownToken {
            token: token.to_string(),
        })
    }

    pub fn convert_tokens_to_ids<S: AsRef<str>>(
        &self,
        tokens: &[S],
    ) -> Result<Vec<u32>, TokenizerError> {
        tokens
            .iter()
            .map(|token| self.convert_token_to_id(token.as_ref()))
            .collect()
    }

    /// Overlay-first token lookup. Out-of-range ids are a data error naming
    /// the id and the vocabulary size.
    pub fn convert_id_to_token(&self, id: u32) -> Result<String, TokenizerError> {
        if (id as usize) >= self.len() {
            return Err(TokenizerError::IdOutOfRange {
                id,
                vocab_size: self.len(),
            });
        }
        if let Some(token) = self.overlay.id_to_token(id) {
            return Ok(token.to_string());
        }
        self.sub
            .convert_id_to_token(id)
            .ok_or(TokenizerError::IdOutOfRange {
                id,
                vocab_size: self.len(),
            })
    }

    pub fn convert_ids_to_tokens(
        &self,
        ids: &[u32],
        skip_special_tokens: bool,
    ) -> Result<Vec<String>, TokenizerError> {
        let special_ids = if skip_special_tokens {
            self.all_special_ids()?
        } else {
            Vec::new()
        };
        let mut tokens = Vec::with_capacity(ids.len());
        for &id in ids {
            if skip_special_tokens && special_ids.contains(&id) {
                continue;
            }
            tokens.push(self.convert_id_to_token(id)?);
        }
        Ok(tokens)
    }

    // ---------- special token surface ----------

    pub fn all_special_tokens(&self) -> Vec<String> {
        self.special
            .all_special_tokens()
            .into_iter()
            .map(|t| t.content.clone())
            .collect()
    }

    pub fn all_special_ids(&self) -> Result<Vec<u32>, TokenizerError> {
        self.special
            .all_special_tokens()
            .into_iter()
            .map(|t| self.convert_token_to_id(&t.content))
            .collect()
    }

    pub fn pad_token_id(&self) -> Option<u32> {
        self.role_id(SpecialTokenRole::Pad)
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.role_id(SpecialTokenRole::Eos)
    }

    pub fn bos_token_id(&self) -> Option<u32> {
        self.role_id(SpecialTokenRole::Bos)
    }

    pub fn unk_token_id(&self) -> Option<u32> {
        self.role_id(SpecialTokenRole::Unk)
    }

    /// How many ids the post-processor inserts for a single or pair encode.
    pub fn num_special_tokens_to_add(&self, pair: bool) -> usize {
        let specials = self.resolved_special_ids();
        let empty_pair: Option<&[u32]> = if pair { Some(&[]) } else { None };
        self.post.build_inputs(&specials, &[], empty_pair).len()
    }

    /// Mask marking special positions with 1.
    ///
    /// With `already_has_special_tokens` the ids are scanned for membership
    /// in the special id set; otherwise the post-processor reports where it
    /// would insert specials around bare sequences.
    pub fn get_special_tokens_mask(
        &self,
        ids: &[u32],
        pair_ids: Option<&[u32]>,
        already_has_special_tokens: bool,
    ) -> Result<Vec<u32>, TokenizerError> {
        if already_has_special_tokens {
            if pair_ids.is_some() {
                return Err(TokenizerError::InvalidConfig(
                    "already_has_special_tokens cannot be combined with a pair sequence".into(),
                ));
            }
            let special_ids = self.all_special_ids()?;
            return Ok(ids
                .iter()
                .map(|id| if special_ids.contains(id) { 1 } else { 0 })
                .collect());
        }
        Ok(self.post.build_special_tokens_mask(
            &self.resolved_special_ids(),
            ids.len(),
            pair_ids.map(<[u32]>::len),
        ))
    }

    // ---------- encoding ----------

    /// Tokenize, truncate, assemble and pad one sequence or pair.
    pub fn encode_plus(
        &self,
        text: &str,
        text_pair: Option<&str>,
        params: &EncodeParams,
    ) -> Result<Encoding, TokenizerError> {
        let ids = self.convert_tokens_to_ids(&self.tokenize(text))?;
        let pair_ids = match text_pair {
            Some(pair) => Some(self.convert_tokens_to_ids(&self.tokenize(pair))?),
            None => None,
        };
        self.prepare_for_model(ids, pair_ids, params)
    }

    /// Ids-only convenience over [`encode_plus`](Tokenizer::encode_plus).
    pub fn encode(&self, text: &str, params: &EncodeParams) -> Result<Vec<u32>, TokenizerError> {
        Ok(self.encode_plus(text, None, params)?.ids)
    }

    pub fn encode_batch(
        &self,
        texts: &[&str],
        params: &EncodeParams,
    ) -> Result<Vec<Encoding>, TokenizerError> {
        let mut encodings: Vec<Encoding> = texts
            .par_iter()
            .map(|text| self.encode_plus(text, None, params))
            .collect::<Result<_, _>>()?;
        if params.padding == PaddingStrategy::Longest {
            self.pad_batch(
                &mut encodings,
                PaddingStrategy::Longest,
                params.max_length,
                params.pad_to_multiple_of,
                params.return_attention_mask,
            )?;
        }
        Ok(encodings)
    }

    /// The truncate/assemble/pad half of encoding, for pre-tokenized ids.
    pub fn prepare_for_model(
        &self,
        ids: Vec<u32>,
        pair_ids: Option<Vec<u32>>,
        params: &EncodeParams,
    ) -> Result<Encoding, TokenizerError> {
        let pair = pair_ids.is_some();

        if params.return_token_type_ids == Some(true) && !params.add_special_tokens {
            return Err(TokenizerError::InvalidConfig(
                "returning token_type_ids with add_special_tokens disabled is undefined; \
                 enable special tokens or leave return_token_type_ids unset"
                    .into(),
            ));
        }
        if params.return_overflowing_tokens
            && params.truncation == TruncationStrategy::LongestFirst
            && pair
        {
            return Err(TokenizerError::OverflowUnavailable);
        }
        if params.truncation != TruncationStrategy::DoNotTruncate
            && params.padding != PaddingStrategy::DoNotPad
        {
            if let (Some(max_length), Some(multiple)) = (params.max_length, params.pad_to_multiple_of)
            {
                if multiple > 0 && max_length % multiple != 0 {
                    return Err(TokenizerError::IndivisibleMultiple { max_length, multiple });
                }
            }
        }

        let special_overhead = if params.add_special_tokens {
            self.num_special_tokens_to_add(pair)
        } else {
            0
        };
        let total_len =
            ids.len() + pair_ids.as_ref().map_or(0, Vec::len) + special_overhead;

        let mut ids = ids;
        let mut pair_ids = pair_ids;
        let mut overflowing = Vec::new();
        if let Some(max_length) = params.max_length {
            if total_len > max_length {
                if params.truncation == TruncationStrategy::DoNotTruncate {
                    log::warn!(
                        "token sequence of length {} exceeds max_length {} and truncation is \
                         disabled; returning it untruncated",
                        total_len,
                        max_length
                    );
                } else {
                    let (new_ids, new_pair, overflow) = self.truncate_sequences(
                        ids,
                        pair_ids,
                        total_len - max_length,
                        params.truncation,
                        params.stride,
                    )?;
                    ids = new_ids;
                    pair_ids = new_pair;
                    overflowing = overflow;
                }
            }
        }

        let specials = self.resolved_special_ids();
        let (sequence, token_type_ids) = if params.add_special_tokens {
            (
                self.post.build_inputs(&specials, &ids, pair_ids.as_deref()),
                self.post.build_token_type_ids(
                    &specials,
                    ids.len(),
                    pair_ids.as_ref().map(Vec::len),
                ),
            )
        } else {
            let mut sequence = ids.clone();
            if let Some(pair) = &pair_ids {
                sequence.extend_from_slice(pair);
            }
            let types = vec![0u32; sequence.len()];
            (sequence, types)
        };

        let return_token_type_ids = params.return_token_type_ids.unwrap_or_else(|| {
            self.options
                .model_input_names
                .iter()
                .any(|name| name == "token_type_ids")
        });
        let return_attention_mask = params.return_attention_mask.unwrap_or_else(|| {
            self.options
                .model_input_names
                .iter()
                .any(|name| name == "attention_mask")
        });

        let mut encoding = Encoding::new(sequence);
        if return_token_type_ids {
            encoding.token_type_ids = Some(token_type_ids);
        }
        if params.return_special_tokens_mask {
            encoding.special_tokens_mask = Some(if params.add_special_tokens {
                self.get_special_tokens_mask(&ids, pair_ids.as_deref(), false)?
            } else {
                vec![0u32; encoding.ids.len()]
            });
        }
        if params.return_overflowing_tokens {
            encoding.overflowing_tokens = overflowing;
            encoding.num_truncated_tokens = params
                .max_length
                .map_or(0, |max_length| total_len.saturating_sub(max_length));
        }

        if params.padding != PaddingStrategy::DoNotPad || return_attention_mask {
            self.pad_encoding(
                &mut encoding,
                params.max_length,
                params.padding,
                params.pad_to_multiple_of,
                Some(return_attention_mask),
            )?;
        }
        Ok(encoding)
    }

    // ---------- truncation ----------

    /// Remove `num_tokens_to_remove` tokens per the strategy.
    ///
    /// Single-sided strategies emit the removed tokens (plus the stride
    /// window) as overflow. `longest_first` with a pair removes one token at
    /// a time from whichever sequence is longer, favours keeping the first
    /// on ties, and always reports an empty overflow list. When the
    /// designated side is too short the failure is logged and the input
    /// passes through unchanged, unless strict truncation is enabled.
    pub fn truncate_sequences(
        &self,
        ids: Vec<u32>,
        pair_ids: Option<Vec<u32>>,
        num_tokens_to_remove: usize,
        strategy: TruncationStrategy,
        stride: usize,
    ) -> Result<(Vec<u32>, Option<Vec<u32>>, Vec<u32>), TokenizerError> {
        if num_tokens_to_remove == 0 {
            return Ok((ids, pair_ids, Vec::new()));
        }

        let mut ids = ids;
        let mut pair_ids = pair_ids;
        let mut overflowing = Vec::new();

        match strategy {
            TruncationStrategy::OnlyFirst | TruncationStrategy::LongestFirst
                if strategy == TruncationStrategy::OnlyFirst || pair_ids.is_none() =>
            {
                if ids.len() > num_tokens_to_remove {
                    let window_len = ids.len().min(stride + num_tokens_to_remove);
                    match self.options.truncation_side {
                        TruncationSide::Left => {
                            overflowing = ids[..window_len].to_vec();
                            ids.drain(..num_tokens_to_remove);
                        }
                        TruncationSide::Right => {
                            overflowing = ids[ids.len() - window_len..].to_vec();
                            ids.truncate(ids.len() - num_tokens_to_remove);
                        }
                    }
                } else if self.options.strict_truncation {
                    return Err(TokenizerError::SequenceTooShort {
                        to_remove: num_tokens_to_remove,
                        available: ids.len(),
                    });
                } else {
                    log::error!(
                        "cannot remove {} tokens: the first sequence only has {}; consider the \
                         longest_first or only_second strategy",
                        num_tokens_to_remove,
                        ids.len()
                    );
                }
            }
            TruncationStrategy::LongestFirst => {
                log::warn!(
                    "overflowing tokens are not returned when truncating a sequence pair with \
                     longest_first; the overflow list will be empty even though tokens were \
                     removed"
                );
                for _ in 0..num_tokens_to_remove {
                    let trim_first = match &pair_ids {
                        Some(pair) => ids.len() > pair.len(),
                        None => true,
                    };
                    let target = if trim_first {
                        &mut ids
                    } else {
                        match pair_ids.as_mut() {
                            Some(pair) => pair,
                            None => &mut ids,
                        }
                    };
                    if target.is_empty() {
                        continue;
                    }
                    match self.options.truncation_side {
                        TruncationSide::Right => {
                            target.truncate(target.len() - 1);
                        }
                        TruncationSide::Left => {
                            target.remove(0);
                        }
                    }
                }
            }
            TruncationStrategy::OnlySecond => {
                if let Some(pair) = pair_ids.as_mut() {
                    if pair.len() > num_tokens_to_remove {
                        let window_len = pair.len().min(stride + num_tokens_to_remove);
                        match self.options.truncation_side {
                            TruncationSide::Left => {
                                overflowing = pair[..window_len].to_vec();
                                pair.drain(..num_tokens_to_remove);
                            }
                            TruncationSide::Right => {
                                overflowing = pair[pair.len() - window_len..].to_vec();
                                pair.truncate(pair.len() - num_tokens_to_remove);
                            }
                        }
                    } else if self.options.strict_truncation {
                        return Err(TokenizerError::SequenceTooShort {
                            to_remove: num_tokens_to_remove,
                            available: pair.len(),
                        });
                    } else {
                        log::error!(
                            "cannot remove {} tokens: the second sequence only has {}; consider \
                             the longest_first or only_first strategy",
                            num_tokens_to_remove,
                            pair.len()
                        );
                    }
                }
            }
            TruncationStrategy::DoNotTruncate => {}
            // OnlyFirst with a pair is covered by the guarded arm above.
            TruncationStrategy::OnlyFirst => {}
        }

        Ok((ids, pair_ids, overflowing))
    }

    // ---------- padding ----------

    /// Pad one encoding in place, keeping every auxiliary vector aligned.
    ///
    /// `longest` targets the current length (a no-op for a single encoding,
    /// the batch entry point substitutes the batch maximum), `max_length`
    /// targets `max_length` rounded up to `pad_to_multiple_of`. Padding
    /// never truncates.
    pub fn pad_encoding(
        &self,
        encoding: &mut Encoding,
        max_length: Option<usize>,
        strategy: PaddingStrategy,
        pad_to_multiple_of: Option<usize>,
        return_attention_mask: Option<bool>,
    ) -> Result<(), TokenizerError> {
        let return_attention_mask = return_attention_mask.unwrap_or_else(|| {
            self.options
                .model_input_names
                .iter()
                .any(|name| name == "attention_mask")
        });
        let current_len = encoding.ids.len();

        if return_attention_mask && encoding.attention_mask.is_none() {
            encoding.attention_mask = Some(vec![1u32; current_len]);
        }
        if strategy == PaddingStrategy::DoNotPad {
            return Ok(());
        }

        let pad_id = self.pad_token_id().ok_or(TokenizerError::PadTokenNotSet)?;
        let mut target = match strategy {
            PaddingStrategy::Longest => current_len,
            PaddingStrategy::MaxLength => max_length.ok_or_else(|| {
                TokenizerError::InvalidConfig(
                    "padding strategy mandates max_length but none was provided".into(),
                )
            })?,
            PaddingStrategy::DoNotPad => unreachable!("handled above"),
        };
        if let Some(multiple) = pad_to_multiple_of {
            if multiple > 0 && target % multiple != 0 {
                target = ((target / multiple) + 1) * multiple;
            }
        }
        if target <= current_len {
            return Ok(());
        }

        let difference = target - current_len;
        match self.options.padding_side {
            PaddingSide::Right => {
                if let Some(mask) = &mut encoding.attention_mask {
                    mask.extend(std::iter::repeat(0).take(difference));
                }
                if let Some(types) = &mut encoding.token_type_ids {
                    types.extend(
                        std::iter::repeat(self.options.pad_token_type_id).take(difference),
                    );
                }
                if let Some(special) = &mut encoding.special_tokens_mask {
                    special.extend(std::iter::repeat(1).take(difference));
                }
                encoding
                    .ids
                    .extend(std::iter::repeat(pad_id).take(difference));
            }
            PaddingSide::Left => {
                if let Some(mask) = &mut encoding.attention_mask {
                    prepend(mask, 0, difference);
                }
                if let Some(types) = &mut encoding.token_type_ids {
                    prepend(types, self.options.pad_token_type_id, difference);
                }
                if let Some(special) = &mut encoding.special_tokens_mask {
                    prepend(special, 1, difference);
                }
                prepend(&mut encoding.ids, pad_id, difference);
            }
        }
        Ok(())
    }

    /// Pad a batch. `longest` resolves to the longest member first.
    pub fn pad_batch(
        &self,
        encodings: &mut [Encoding],
        strategy: PaddingStrategy,
        max_length: Option<usize>,
        pad_to_multiple_of: Option<usize>,
        return_attention_mask: Option<bool>,
    ) -> Result<(), TokenizerError> {
        let (strategy, max_length) = match strategy {
            PaddingStrategy::Longest => {
                let longest = encodings.iter().map(Encoding::len).max().unwrap_or(0);
                (PaddingStrategy::MaxLength, Some(longest))
            }
            other => (other, max_length),
        };
        for encoding in encodings.iter_mut() {
            self.pad_encoding(
                encoding,
                max_length,
                strategy,
                pad_to_multiple_of,
                return_attention_mask,
            )?;
        }
        Ok(())
    }

    // ---------- decoding ----------

    /// Map ids back to text.
    ///
    /// Runs of base-vocabulary tokens are joined by the sub-tokenizer's
    /// detokenization rule; overlay tokens stay standalone atoms. Atoms are
    /// joined with or without spaces per configuration, and the standard
    /// whitespace/punctuation cleanup is applied last.
    pub fn decode(&self, ids: &[u32], params: &DecodeParams) -> Result<String, TokenizerError> {
        let tokens = self.convert_ids_to_tokens(ids, params.skip_special_tokens)?;

        let mut atoms: Vec<String> = Vec::new();
        let mut run: Vec<String> = Vec::new();
        for token in tokens {
            if self.overlay.contains_token(&token) {
                if !run.is_empty() {
                    atoms.push(self.sub.detokenize_spans(&run));
                    run.clear();
                }
                atoms.push(token);
            } else {
                run.push(token);
            }
        }
        if !run.is_empty() {
            atoms.push(self.sub.detokenize_spans(&run));
        }

        let spaces = params
            .spaces_between_special_tokens
            .unwrap_or(self.options.spaces_between_special_tokens);
        let text = if spaces { atoms.join(" ") } else { atoms.concat() };

        let clean = params
            .clean_up_tokenization_spaces
            .unwrap_or(self.options.clean_up_tokenization_spaces);
        Ok(if clean { clean_up_tokenization(&text) } else { text })
    }

    pub fn decode_batch(
        &self,
        sequences: &[Vec<u32>],
        params: &DecodeParams,
    ) -> Result<Vec<String>, TokenizerError> {
        sequences
            .par_iter()
            .map(|ids| self.decode(ids, params))
            .collect()
    }

    // ---------- helpers ----------

    fn resolve_existing(&self, token: &str) -> Option<u32> {
        self.overlay
            .token_to_id(token)
            .or_else(|| self.sub.convert_token_to_id(token))
    }

    fn role_id(&self, role: SpecialTokenRole) -> Option<u32> {
        self.special
            .peek(role)
            .and_then(|token| self.resolve_existing(&token.content))
    }

    fn resolved_special_ids(&self) -> SpecialIds {
        SpecialIds {
            bos: self.role_id(SpecialTokenRole::Bos),
            eos: self.role_id(SpecialTokenRole::Eos),
            cls: self.role_id(SpecialTokenRole::Cls),
            sep: self.role_id(SpecialTokenRole::Sep),
            pad: self.role_id(SpecialTokenRole::Pad),
        }
    }

    fn is_no_split(&self, chunk: &str) -> bool {
        self.no_split_tokens
            .binary_search_by(|probe| probe.as_str().cmp(chunk))
            .is_ok()
    }

    fn insert_no_split(&mut self, token: &str) {
        if let Err(pos) = self
            .no_split_tokens
            .binary_search_by(|probe| probe.as_str().cmp(token))
        {
            self.no_split_tokens.insert(pos, token.to_string());
        }
    }

    fn rebuild_trie(&mut self) {
        self.trie = Trie::from_tokens(self.no_split_tokens.iter());
    }

    /// Lowercase everything except characters inside no-split atoms.
    fn lowercase_preserving_no_split(&self, text: &str) -> String {
        self.trie
            .split(text)
            .into_iter()
            .map(|chunk| {
                if self.is_no_split(chunk) {
                    chunk.to_string()
                } else {
                    chunk.to_lowercase()
                }
            })
            .collect()
    }
}

fn prepend(values: &mut Vec<u32>, fill: u32, count: usize) {
    let mut padded = vec![fill; count];
    padded.extend_from_slice(values);
    *values = padded;
}

/// The fixed cleanup pass applied after decoding.
fn clean_up_tokenization(text: &str) -> String {
    text.replace(" .", ".")
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" ,", ",")
        .replace(" ' ", "'")
        .replace(" n't", "n't")
        .replace(" 'm", "'m")
        .replace(" 's", "'s")
        .replace(" 've", "'ve")
        .replace(" 're", "'re")
}
