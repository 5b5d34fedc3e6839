//! Extractive question-answering clients.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod hosted;

pub use hosted::HostedExtractor;

/// Answer span located within a context passage.
///
/// `start` and `end` are character offsets into the context exactly as it
/// was passed to the extractor. Not byte offsets, not token offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedAnswer {
    /// Answer text; a substring of the context.
    pub answer: String,
    /// Character offset where the span begins (inclusive).
    pub start: usize,
    /// Character offset where the span ends (exclusive).
    pub end: usize,
    /// Model confidence for this span.
    pub score: f32,
}

/// Trait implemented by concrete QA backends.
pub trait AnswerExtractor: Send + Sync {
    /// Locates an answer span for `question` within `context`.
    fn answer(&self, question: &str, context: &str) -> Result<ExtractedAnswer>;
}
