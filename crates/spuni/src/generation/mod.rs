//! Batch autoregressive decoding: a step-lockstep loop over a padded id
//! buffer, slicing inputs for cache-aware models, shaping scores through a
//! processor pipeline and streaming tokens as they are chosen.

pub mod config;
pub mod generator;
pub mod inputs;
pub mod logits;
pub mod model;
pub mod stream;
pub mod types;

pub use config::*;
pub use generator::*;
pub use inputs::*;
pub use logits::*;
pub use model::*;
pub use stream::*;
pub use types::*;

#[cfg(test)]
mod test_generator;
