//! Special-token-aware tokenization: a no-split trie over a pluggable base
//! vocabulary, with truncation, padding and persistence.

pub mod config;
pub mod encoding;
pub mod engine;
pub mod special;
pub mod sub;
pub mod trie;
pub mod types;
pub mod vocab;

pub use config::*;
pub use encoding::*;
pub use engine::*;
pub use special::*;
pub use sub::*;
pub use trie::*;
pub use types::*;
pub use vocab::*;
