//! Special token roles and the registry that binds tokens to them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::AddedToken;

/// The named slots a special token can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialTokenRole {
    Bos,
    Eos,
    Unk,
    Sep,
    Pad,
    Cls,
    Mask,
}

impl SpecialTokenRole {
    /// All roles in their canonical order.
    pub const ALL: [SpecialTokenRole; 7] = [
        SpecialTokenRole::Bos,
        SpecialTokenRole::Eos,
        SpecialTokenRole::Unk,
        SpecialTokenRole::Sep,
        SpecialTokenRole::Pad,
        SpecialTokenRole::Cls,
        SpecialTokenRole::Mask,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SpecialTokenRole::Bos => "bos_token",
            SpecialTokenRole::Eos => "eos_token",
            SpecialTokenRole::Unk => "unk_token",
            SpecialTokenRole::Sep => "sep_token",
            SpecialTokenRole::Pad => "pad_token",
            SpecialTokenRole::Cls => "cls_token",
            SpecialTokenRole::Mask => "mask_token",
        }
    }
}

impl fmt::Display for SpecialTokenRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Maps roles to their tokens, plus a free-form list of additional specials.
///
/// Every role is optional. The logging [`get`](SpecialTokenRegistry::get)
/// accessor mirrors the convention that asking for an unset role is a
/// recoverable mistake worth surfacing, while [`peek`](SpecialTokenRegistry::peek)
/// is for internal checks that handle absence themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTokenRegistry {
    #[serde(skip_serializing_if = "Option::is_none")]
    bos_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eos_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unk_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sep_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pad_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cls_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_token: Option<AddedToken>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    additional_special_tokens: Vec<AddedToken>,
}

impl SpecialTokenRegistry {
    pub fn new() -> Self {
        SpecialTokenRegistry::default()
    }

    pub fn set(&mut self, role: SpecialTokenRole, token: AddedToken) {
        *self.slot_mut(role) = Some(token);
    }

    /// Look up a role, logging when it has never been set.
    pub fn get(&self, role: SpecialTokenRole) -> Option<&AddedToken> {
        let token = self.slot(role).as_ref();
        if token.is_none() {
            log::warn!("{} was requested but has not been set", role.key());
        }
        token
    }

    /// Silent lookup for callers that handle absence themselves.
    pub fn peek(&self, role: SpecialTokenRole) -> Option<&AddedToken> {
        self.slot(role).as_ref()
    }

    pub fn is_set(&self, role: SpecialTokenRole) -> bool {
        self.slot(role).is_some()
    }

    /// Register an extra special token outside the named roles.
    pub fn add_additional(&mut self, token: AddedToken) {
        if !self
            .additional_special_tokens
            .iter()
            .any(|existing| existing.content == token.content)
        {
            self.additional_special_tokens.push(token);
        }
    }

    pub fn additional(&self) -> &[AddedToken] {
        &self.additional_special_tokens
    }

    /// Every registered special token, role slots first in canonical order,
    /// then the additional list, with duplicate contents dropped.
    pub fn all_special_tokens(&self) -> Vec<&AddedToken> {
        let mut seen: Vec<&str> = Vec::new();
        let mut tokens: Vec<&AddedToken> = Vec::new();
        let role_tokens = SpecialTokenRole::ALL
            .iter()
            .filter_map(|&role| self.slot(role).as_ref());
        for token in role_tokens.chain(self.additional_special_tokens.iter()) {
            if !seen.contains(&token.content.as_str()) {
                seen.push(&token.content);
                tokens.push(token);
            }
        }
        tokens
    }

    fn slot(&self, role: SpecialTokenRole) -> &Option<AddedToken> {
        match role {
            SpecialTokenRole::Bos => &self.bos_token,
            SpecialTokenRole::Eos => &self.eos_token,
            SpecialTokenRole::Unk => &self.unk_token,
            SpecialTokenRole::Sep => &self.sep_token,
            SpecialTokenRole::Pad => &self.pad_token,
            SpecialTokenRole::Cls => &self.cls_token,
            SpecialTokenRole::Mask => &self.mask_token,
        }
    }

    fn slot_mut(&mut self, role: SpecialTokenRole) -> &mut Option<AddedToken> {
        match role {
            SpecialTokenRole::Bos => &mut self.bos_token,
            SpecialTokenRole::Eos => &mut self.eos_token,
            SpecialTokenRole::Unk => &mut self.unk_token,
            SpecialTokenRole::Sep => &mut self.sep_token,
            SpecialTokenRole::Pad => &mut self.pad_token,
            SpecialTokenRole::Cls => &mut self.cls_token,
            SpecialTokenRole::Mask => &mut self.mask_token,
        }
    }
}
