//! Query embedding clients.

use anyhow::Result;

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Trait implemented by concrete query encoders.
///
/// Encoders are deterministic for a fixed model and carry no per-request
/// state, so one handle is built at startup and shared across requests.
pub trait Embedder: Send + Sync {
    /// Encodes a query string into a fixed-length vector.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}
