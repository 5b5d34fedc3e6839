#![warn(missing_docs)]
//! Core library entry points for the spansearch extractive search service.

pub mod controls;
pub mod embedder;
pub mod extractor;
pub mod highlight;
pub mod index;
pub mod pipeline;
pub mod render;

pub use controls::{Cli, SearchControls};
pub use embedder::Embedder;
pub use extractor::{AnswerExtractor, ExtractedAnswer};
pub use highlight::{fragment_url, SplicedPassage};
pub use index::{Candidate, CandidateMetadata, VectorIndex};
pub use pipeline::{CandidateOutcome, ResultRecord, SearchOutcome, SearchPipeline};
