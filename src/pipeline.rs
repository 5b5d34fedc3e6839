//! Retrieve-then-extract orchestration: the core of the service.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use lru::LruCache;
use serde::Serialize;

use crate::controls::SearchControls;
use crate::embedder::Embedder;
use crate::extractor::AnswerExtractor;
use crate::highlight::{fragment_url, SplicedPassage};
use crate::index::VectorIndex;

/// One renderable search result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    /// Index-assigned candidate identifier.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// Displayed score: QA confidence when extraction ran, raw similarity
    /// otherwise.
    pub score: f32,
    /// False when title dedup suppressed this record's header.
    pub show_header: bool,
    /// Passage text, plain or split around a highlighted answer span.
    pub passage: PassageDisplay,
}

/// Passage rendering payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassageDisplay {
    /// No extraction ran; the whole passage is shown as-is.
    Plain {
        /// Full passage text.
        text: String,
    },
    /// Extraction located a span to highlight.
    Highlighted {
        /// Text before the answer span.
        before: String,
        /// The answer span.
        answer: String,
        /// Text after the answer span.
        after: String,
        /// Source URL with a `#:~:text=` fragment targeting the span.
        fragment_url: String,
    },
}

/// Per-candidate disposition, reported alongside the records so the
/// skip/continue policy stays observable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    /// Candidate became a result record.
    Included {
        /// Candidate identifier.
        id: String,
    },
    /// QA confidence was at or below the threshold.
    SkippedLowConfidence {
        /// Candidate identifier.
        id: String,
        /// The confidence that failed the threshold.
        score: f32,
    },
    /// Extraction or splicing failed for this candidate; the rest of the
    /// query continued.
    Failed {
        /// Candidate identifier.
        id: String,
        /// Failure description.
        error: String,
    },
}

/// Everything a caller needs to render one search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// Records in index ranking order.
    pub records: Vec<ResultRecord>,
    /// Disposition of every retrieved candidate, in ranking order.
    pub outcomes: Vec<CandidateOutcome>,
}

impl SearchOutcome {
    /// True when no candidate survived retrieval and filtering; callers
    /// should render a "no answer found" state rather than an empty list.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Orchestrates embed, retrieve, extract, filter, dedup.
///
/// Collaborator handles are expensive to build and are shared process-wide;
/// construct one pipeline at startup and reuse it for every request.
pub struct SearchPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    extractor: Option<Arc<dyn AnswerExtractor>>,
    controls: SearchControls,
    embedding_cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl SearchPipeline {
    /// Builds a pipeline around the given collaborators.
    ///
    /// `extractor` may be `None` even when the controls request extraction;
    /// extraction is only performed when both are present.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        extractor: Option<Arc<dyn AnswerExtractor>>,
        controls: SearchControls,
    ) -> Self {
        Self {
            embedder,
            index,
            extractor,
            controls,
            embedding_cache: None,
        }
    }

    /// Enables an in-memory LRU cache of query embeddings (0 disables).
    pub fn with_embedding_cache(mut self, capacity: usize) -> Self {
        self.embedding_cache =
            NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        self
    }

    /// The controls this pipeline was configured with.
    pub fn controls(&self) -> &SearchControls {
        &self.controls
    }

    /// Runs a full search with the configured controls.
    pub fn search(&self, query: &str) -> Result<SearchOutcome> {
        self.search_with(query, &self.controls)
    }

    /// Runs a full search with per-request control overrides.
    pub fn search_with(&self, query: &str, controls: &SearchControls) -> Result<SearchOutcome> {
        let candidates = self.retrieve(query, controls.top_k(), controls.namespace())?;

        let extractor = if controls.extract_answers() {
            self.extractor.as_deref()
        } else {
            None
        };

        let mut records = Vec::with_capacity(candidates.len());
        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut seen_titles: HashSet<String> = HashSet::new();

        for candidate in candidates {
            let title = candidate.metadata.title.clone();
            let url = candidate.metadata.url.clone();
            let passage = candidate.metadata.passage().to_string();

            let (score, display) = match extractor {
                Some(extractor) => {
                    match extract_span(extractor, query, &passage, &url) {
                        Ok((score, display)) => {
                            if score <= controls.score_threshold() {
                                tracing::debug!(
                                    id = %candidate.id,
                                    score,
                                    threshold = controls.score_threshold(),
                                    "candidate below confidence threshold"
                                );
                                outcomes.push(CandidateOutcome::SkippedLowConfidence {
                                    id: candidate.id,
                                    score,
                                });
                                continue;
                            }
                            (score, display)
                        }
                        Err(err) => {
                            tracing::warn!(id = %candidate.id, error = %err, "extraction failed; skipping candidate");
                            outcomes.push(CandidateOutcome::Failed {
                                id: candidate.id,
                                error: format!("{err:#}"),
                            });
                            continue;
                        }
                    }
                }
                None => (candidate.score, PassageDisplay::Plain { text: passage }),
            };

            let show_header = if controls.dedupe_by_title() {
                seen_titles.insert(title.clone())
            } else {
                true
            };

            outcomes.push(CandidateOutcome::Included {
                id: candidate.id.clone(),
            });
            records.push(ResultRecord {
                id: candidate.id,
                title,
                url,
                score,
                show_header,
                passage: display,
            });
        }

        Ok(SearchOutcome { records, outcomes })
    }

    /// Embeds the query and fetches raw candidates from the index, with no
    /// extraction or filtering. An empty result set is not an error.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<crate::index::Candidate>> {
        let embedding = self.embed_cached(query)?;
        self.index
            .query(&embedding, top_k, namespace, true)
            .context("vector index query failed")
    }

    fn embed_cached(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.embedding_cache {
            if let Some(hit) = lock_cache(cache).get(query).cloned() {
                return Ok(hit);
            }
        }
        let embedding = self
            .embedder
            .embed_query(query)
            .context("failed to embed query")?;
        if let Some(cache) = &self.embedding_cache {
            lock_cache(cache).put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}

/// Locks the embedding cache, recovering from poisoning. The cache holds
/// only cloned vectors, so a guard abandoned mid-panic is still valid.
fn lock_cache(
    cache: &Mutex<LruCache<String, Vec<f32>>>,
) -> std::sync::MutexGuard<'_, LruCache<String, Vec<f32>>> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn extract_span(
    extractor: &dyn AnswerExtractor,
    query: &str,
    passage: &str,
    url: &str,
) -> Result<(f32, PassageDisplay)> {
    anyhow::ensure!(!passage.is_empty(), "candidate has no passage text");
    let answer = extractor.answer(query, passage)?;
    let spliced = SplicedPassage::new(passage, answer.start, answer.end)?;
    let fragment = fragment_url(url, &spliced.answer);
    Ok((
        answer.score,
        PassageDisplay::Highlighted {
            before: spliced.before,
            answer: spliced.answer,
            after: spliced.after,
            fragment_url: fragment,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractedAnswer;
    use crate::index::{Candidate, CandidateMetadata, VectorIndex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedder {
        calls: AtomicUsize,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for FakeEmbedder {
        fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            anyhow::ensure!(!text.trim().is_empty(), "query text must not be empty");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1; 8])
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            anyhow::bail!("encoder unavailable")
        }
    }

    struct FakeIndex {
        candidates: Vec<Candidate>,
    }

    impl VectorIndex for FakeIndex {
        fn query(
            &self,
            _vector: &[f32],
            top_k: usize,
            _namespace: Option<&str>,
            _include_metadata: bool,
        ) -> Result<Vec<Candidate>> {
            Ok(self.candidates.iter().take(top_k).cloned().collect())
        }
    }

    /// Extractor that answers with the first word of the context, scored by
    /// a per-context table (defaulting to 0.9), and fails on contexts
    /// containing "poison".
    struct FakeExtractor {
        scores: Vec<(&'static str, f32)>,
    }

    impl AnswerExtractor for FakeExtractor {
        fn answer(&self, _question: &str, context: &str) -> Result<ExtractedAnswer> {
            if context.contains("poison") {
                anyhow::bail!("model choked on context");
            }
            let end = context.find(' ').unwrap_or(context.len());
            let score = self
                .scores
                .iter()
                .find(|(needle, _)| context.contains(needle))
                .map(|(_, score)| *score)
                .unwrap_or(0.9);
            Ok(ExtractedAnswer {
                answer: context[..end].to_string(),
                start: 0,
                end,
                score,
            })
        }
    }

    fn candidate(id: &str, title: &str, score: f32, text: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            score,
            metadata: CandidateMetadata {
                title: title.to_string(),
                url: format!("https://example.org/{id}"),
                text: text.to_string(),
                authors: None,
                abstract_text: None,
            },
        }
    }

    fn pipeline(
        candidates: Vec<Candidate>,
        extractor: Option<FakeExtractor>,
        controls: SearchControls,
    ) -> SearchPipeline {
        SearchPipeline::new(
            Arc::new(FakeEmbedder::new()),
            Arc::new(FakeIndex { candidates }),
            extractor.map(|e| Arc::new(e) as Arc<dyn AnswerExtractor>),
            controls,
        )
    }

    #[test]
    fn qa_disabled_emits_every_candidate_with_raw_similarity() {
        let candidates = (0..5)
            .map(|i| candidate(&format!("c{i}"), &format!("Doc {i}"), 0.9 - i as f32 * 0.1, "body text"))
            .collect();
        let controls = SearchControls::new(5, 0.01, false, false, None, 768);
        let outcome = pipeline(candidates, None, controls)
            .search("What is AI Safety?")
            .expect("search");

        assert_eq!(outcome.records.len(), 5);
        for (i, record) in outcome.records.iter().enumerate() {
            assert!((record.score - (0.9 - i as f32 * 0.1)).abs() < 1e-6);
            assert!(matches!(record.passage, PassageDisplay::Plain { .. }));
            assert!(record.show_header);
        }
    }

    #[test]
    fn filtering_removes_but_never_reorders() {
        let candidates = vec![
            candidate("a", "A", 0.9, "keep one"),
            candidate("b", "B", 0.8, "drop this"),
            candidate("c", "C", 0.7, "keep two"),
        ];
        let extractor = FakeExtractor {
            scores: vec![("drop", 0.0)],
        };
        let controls = SearchControls::new(5, 0.01, false, true, None, 768);
        let outcome = pipeline(candidates, Some(extractor), controls)
            .search("q")
            .expect("search");

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(matches!(
            outcome.outcomes[1],
            CandidateOutcome::SkippedLowConfidence { ref id, .. } if id == "b"
        ));
    }

    #[test]
    fn score_equal_to_threshold_is_excluded() {
        let candidates = vec![
            candidate("at", "At", 0.9, "boundary case"),
            candidate("above", "Above", 0.8, "included case"),
        ];
        let extractor = FakeExtractor {
            scores: vec![("boundary", 0.01), ("included", 0.010001)],
        };
        let controls = SearchControls::new(5, 0.01, false, true, None, 768);
        let outcome = pipeline(candidates, Some(extractor), controls)
            .search("q")
            .expect("search");

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].id, "above");
    }

    #[test]
    fn empty_index_result_is_empty_not_error() {
        let controls = SearchControls::default();
        let outcome = pipeline(Vec::new(), None, controls)
            .search("What is AI Safety?")
            .expect("search");
        assert!(outcome.is_empty());
        assert!(outcome.outcomes.is_empty());
    }

    #[test]
    fn duplicate_title_keeps_passage_but_loses_header() {
        let candidates = vec![
            candidate("p1", "Same Paper", 0.9, "first passage here"),
            candidate("p2", "Same Paper", 0.8, "second passage here"),
        ];
        let extractor = FakeExtractor { scores: vec![] };
        let controls = SearchControls::new(5, 0.01, true, true, None, 768);
        let outcome = pipeline(candidates, Some(extractor), controls)
            .search("q")
            .expect("search");

        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records[0].show_header);
        assert!(!outcome.records[1].show_header);
        assert!(matches!(
            outcome.records[1].passage,
            PassageDisplay::Highlighted { .. }
        ));
    }

    #[test]
    fn extractor_failure_skips_candidate_and_continues() {
        let candidates = vec![
            candidate("ok1", "First", 0.9, "good passage"),
            candidate("bad", "Broken", 0.8, "poison passage"),
            candidate("ok2", "Third", 0.7, "another passage"),
        ];
        let extractor = FakeExtractor { scores: vec![] };
        let controls = SearchControls::new(5, 0.01, false, true, None, 768);
        let outcome = pipeline(candidates, Some(extractor), controls)
            .search("q")
            .expect("search");

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ok1", "ok2"]);
        assert!(matches!(
            outcome.outcomes[1],
            CandidateOutcome::Failed { ref id, .. } if id == "bad"
        ));
    }

    #[test]
    fn highlighted_record_carries_fragment_url() {
        let candidates = vec![candidate("c1", "Doc", 0.9, "alignment matters a lot")];
        let extractor = FakeExtractor { scores: vec![] };
        let controls = SearchControls::new(5, 0.01, false, true, None, 768);
        let outcome = pipeline(candidates, Some(extractor), controls)
            .search("q")
            .expect("search");

        match &outcome.records[0].passage {
            PassageDisplay::Highlighted {
                before,
                answer,
                after,
                fragment_url,
            } => {
                assert_eq!(before, "");
                assert_eq!(answer, "alignment");
                assert_eq!(after, " matters a lot");
                assert_eq!(fragment_url, "https://example.org/c1#:~:text=alignment");
            }
            other => panic!("expected highlighted passage, got {other:?}"),
        }
    }

    #[test]
    fn embedder_failure_propagates() {
        let pipeline = SearchPipeline::new(
            Arc::new(FailingEmbedder),
            Arc::new(FakeIndex { candidates: vec![] }),
            None,
            SearchControls::default(),
        );
        assert!(pipeline.search("q").is_err());
    }

    #[test]
    fn poisoned_embedding_cache_is_recovered_not_repanicked() {
        let cache = Arc::new(Mutex::new(LruCache::new(
            NonZeroUsize::new(4).expect("capacity"),
        )));
        lock_cache(&cache).put("q".to_string(), vec![1.0, 2.0]);

        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("lock before panic");
            panic!("poison the cache lock");
        })
        .join();
        assert!(cache.is_poisoned());

        let mut guard = lock_cache(&cache);
        assert_eq!(guard.get("q"), Some(&vec![1.0, 2.0]));
    }

    #[test]
    fn embedding_cache_avoids_repeat_encoder_calls() {
        let embedder = Arc::new(FakeEmbedder::new());
        let pipeline = SearchPipeline::new(
            embedder.clone(),
            Arc::new(FakeIndex { candidates: vec![] }),
            None,
            SearchControls::default(),
        )
        .with_embedding_cache(16);

        pipeline.search("same question").expect("first");
        pipeline.search("same question").expect("second");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
