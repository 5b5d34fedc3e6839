//! Hosted vector index clients and the retrieved-candidate data model.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod pinecone;

pub use pinecone::PineconeIndex;

/// One retrieved match from the vector index, ordered by descending
/// similarity within a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Index-assigned record identifier.
    pub id: String,
    /// Similarity score reported by the index.
    pub score: f32,
    /// Document metadata stored alongside the vector.
    #[serde(default)]
    pub metadata: CandidateMetadata,
}

/// Metadata attached to an indexed document.
///
/// The FAQ corpus stores the passage under `text`; the paper corpus stores
/// it under `abstract` with `authors`. Both shapes decode into this struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateMetadata {
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Source URL.
    #[serde(default)]
    pub url: String,
    /// Passage text used as QA context.
    #[serde(default)]
    pub text: String,
    /// Author list, when the corpus carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    /// Paper abstract, when the corpus carries one.
    #[serde(
        rename = "abstract",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub abstract_text: Option<String>,
}

impl CandidateMetadata {
    /// Passage used for extraction and display: `text` when present,
    /// otherwise the abstract.
    pub fn passage(&self) -> &str {
        if !self.text.is_empty() {
            &self.text
        } else {
            self.abstract_text.as_deref().unwrap_or_default()
        }
    }
}

/// Trait implemented by concrete vector index clients.
pub trait VectorIndex: Send + Sync {
    /// Runs a nearest-neighbor query and returns candidates in the index's
    /// native ranking order (descending similarity).
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
        include_metadata: bool,
    ) -> Result<Vec<Candidate>>;
}
