//! Search tuning knobs shared across the server and CLI binaries.

use clap::Parser;

/// Default question rendered when a caller supplies no query.
pub const DEFAULT_QUERY: &str = "What is AI Safety?";

/// Tunable knobs that bound a single search request.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchControls {
    top_k: usize,
    score_threshold: f32,
    dedupe_by_title: bool,
    extract_answers: bool,
    namespace: Option<String>,
    dimensions: usize,
}

impl SearchControls {
    /// Constructs a new set of search controls.
    pub fn new(
        top_k: usize,
        score_threshold: f32,
        dedupe_by_title: bool,
        extract_answers: bool,
        namespace: Option<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            top_k: top_k.max(1),
            score_threshold,
            dedupe_by_title,
            extract_answers,
            namespace,
            dimensions,
        }
    }

    /// Number of nearest neighbors requested from the index.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// QA confidence below or equal to this is dropped.
    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// Whether repeated titles suppress their section header.
    pub fn dedupe_by_title(&self) -> bool {
        self.dedupe_by_title
    }

    /// Whether the extractive QA stage runs at all.
    pub fn extract_answers(&self) -> bool {
        self.extract_answers
    }

    /// Optional index namespace restricting the searchable partition.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Embedding dimensionality the index was built with.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Returns a copy with a different top-k, clamped to at least 1.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }
}

impl Default for SearchControls {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.01,
            dedupe_by_title: false,
            extract_answers: true,
            namespace: None,
            dimensions: 768,
        }
    }
}

/// Command-line interface shared by binaries that run searches.
#[derive(Parser, Debug, Clone)]
#[command(name = "spansearch", about = "Extractive search over a hosted vector index")]
pub struct Cli {
    /// Nearest neighbors fetched per query
    #[arg(long, env = "SPANSEARCH_TOP_K", default_value_t = 5)]
    pub top_k: usize,

    /// QA answers scoring at or below this are skipped
    #[arg(long, env = "SPANSEARCH_SCORE_THRESHOLD", default_value_t = 0.01)]
    pub score_threshold: f32,

    /// Suppress repeated section headers for the same title
    #[arg(long, env = "SPANSEARCH_DEDUPE_BY_TITLE", default_value_t = false)]
    pub dedupe_by_title: bool,

    /// Disable the extractive QA stage (raw similarity results only)
    #[arg(long, env = "SPANSEARCH_NO_EXTRACT", default_value_t = false)]
    pub no_extract: bool,

    /// Index namespace to search (empty = default collection)
    #[arg(long, env = "SPANSEARCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Embedding dimensionality expected by the index
    #[arg(long, env = "SPANSEARCH_DIMENSIONS", default_value_t = 768)]
    pub dimensions: usize,

    /// Vector index query endpoint (e.g. https://<index>-<project>.svc.<env>.pinecone.io)
    #[arg(long, env = "SPANSEARCH_INDEX_URL")]
    pub index_url: String,

    /// API key for the hosted vector index
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub index_api_key: String,

    /// OpenAI-compatible embeddings endpoint base URL
    #[arg(
        long,
        env = "SPANSEARCH_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub embed_base_url: String,

    /// API key for the embeddings endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub embed_api_key: String,

    /// Embedding model identifier
    #[arg(
        long,
        env = "SPANSEARCH_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embed_model: String,

    /// Hosted question-answering endpoint
    #[arg(
        long,
        env = "SPANSEARCH_QA_URL",
        default_value = "https://api-inference.huggingface.co/models/deepset/electra-base-squad2"
    )]
    pub qa_url: String,

    /// API key for the QA endpoint (falls back to the embedding key when unset)
    #[arg(long, env = "SPANSEARCH_QA_API_KEY", hide_env_values = true)]
    pub qa_api_key: Option<String>,

    /// Seconds before outbound HTTP requests time out
    #[arg(long, env = "SPANSEARCH_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Retry attempts for transient collaborator errors
    #[arg(long, env = "SPANSEARCH_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,
}

impl Cli {
    /// Converts the parsed CLI into `SearchControls`.
    pub fn build_controls(&self) -> SearchControls {
        SearchControls::new(
            self.top_k,
            self.score_threshold,
            self.dedupe_by_title,
            !self.no_extract,
            self.namespace.clone().filter(|ns| !ns.trim().is_empty()),
            self.dimensions,
        )
    }

    /// Key used for the QA endpoint.
    pub fn qa_key(&self) -> &str {
        self.qa_api_key.as_deref().unwrap_or(&self.embed_api_key)
    }
}
