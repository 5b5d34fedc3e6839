use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Form, Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use spansearch::controls::DEFAULT_QUERY;
use spansearch::embedder::OpenAiEmbedder;
use spansearch::extractor::{AnswerExtractor, HostedExtractor};
use spansearch::index::PineconeIndex;
use spansearch::render;
use spansearch::{Cli, SearchPipeline};

#[derive(Parser, Debug)]
#[command(
    name = "spansearch-api",
    about = "HTTP server for extractive search over a hosted vector index"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "SPANSEARCH_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Maximum top-k allowed per request.
    #[arg(long, env = "SPANSEARCH_MAX_TOP_K", default_value_t = 12)]
    max_top_k: usize,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, env = "SPANSEARCH_EMBED_CACHE", default_value_t = 1024)]
    embedding_cache_size: usize,

    #[command(flatten)]
    search: Cli,
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<SearchPipeline>,
    max_top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ApiResult {
    id: String,
    score: f32,
    title: String,
    authors: String,
    url: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spansearch=info,spansearch_api=info".into()),
        )
        .init();

    let cli = ApiCli::parse();
    let timeout = Duration::from_secs(cli.search.http_timeout_secs.max(1));

    let embedder = Arc::new(OpenAiEmbedder::new(
        cli.search.embed_api_key.clone(),
        cli.search.embed_base_url.clone(),
        cli.search.embed_model.clone(),
        Some(cli.search.dimensions),
        timeout,
        cli.search.max_retries,
    )?);
    let index = Arc::new(PineconeIndex::new(
        cli.search.index_api_key.clone(),
        cli.search.index_url.clone(),
        timeout,
        cli.search.max_retries,
    )?);
    let extractor: Option<Arc<dyn AnswerExtractor>> = if cli.search.no_extract {
        None
    } else {
        Some(Arc::new(HostedExtractor::new(
            cli.search.qa_key().to_string(),
            cli.search.qa_url.clone(),
            timeout,
            cli.search.max_retries,
        )?))
    };

    let pipeline = Arc::new(
        SearchPipeline::new(embedder, index, extractor, cli.search.build_controls())
            .with_embedding_cache(cli.embedding_cache_size),
    );
    let state = AppState {
        pipeline,
        max_top_k: cli.max_top_k.max(1),
    };

    let app = Router::new()
        .route("/", get(home_handler))
        .route("/healthz", get(healthz))
        .route("/api/search", get(api_search_get).post(api_search_post))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!(%addr, "spansearch-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn home_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Html<String> {
    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_QUERY.to_string());
    let top_k = params
        .top_k
        .unwrap_or_else(|| state.pipeline.controls().top_k())
        .clamp(1, state.max_top_k);
    let controls = state.pipeline.controls().clone().with_top_k(top_k);

    let pipeline = state.pipeline.clone();
    let start = Instant::now();
    let search_query = query.clone();
    let result =
        tokio::task::spawn_blocking(move || pipeline.search_with(&search_query, &controls)).await;

    let outcome = match result {
        Ok(Ok(outcome)) => {
            tracing::info!(
                query = %query,
                records = outcome.records.len(),
                latency_ms = start.elapsed().as_millis() as u64,
                "search completed"
            );
            outcome
        }
        Ok(Err(err)) => {
            // Degrade to the no-answer page; the process keeps serving.
            tracing::warn!(query = %query, error = %format!("{err:#}"), "search failed");
            spansearch::SearchOutcome {
                records: Vec::new(),
                outcomes: Vec::new(),
            }
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "search task panicked");
            spansearch::SearchOutcome {
                records: Vec::new(),
                outcomes: Vec::new(),
            }
        }
    };

    Html(render::render_page(&query, &outcome))
}

async fn api_search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ApiResult>>, (StatusCode, Json<ErrorBody>)> {
    run_api_search(state, params).await
}

async fn api_search_post(
    State(state): State<AppState>,
    Form(params): Form<SearchParams>,
) -> Result<Json<Vec<ApiResult>>, (StatusCode, Json<ErrorBody>)> {
    run_api_search(state, params).await
}

async fn run_api_search(
    state: AppState,
    params: SearchParams,
) -> Result<Json<Vec<ApiResult>>, (StatusCode, Json<ErrorBody>)> {
    let query = params
        .query
        .unwrap_or_else(|| DEFAULT_QUERY.to_string());
    if query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    let top_k = params
        .top_k
        .unwrap_or_else(|| state.pipeline.controls().top_k())
        .clamp(1, state.max_top_k);
    let namespace = state.pipeline.controls().namespace().map(str::to_string);

    let pipeline = state.pipeline.clone();
    let search_query = query.clone();
    let candidates =
        tokio::task::spawn_blocking(move || {
            pipeline.retrieve(&search_query, top_k, namespace.as_deref())
        })
        .await
        .map_err(|err| internal_error(anyhow::anyhow!("search task join error: {err}")))?
        .map_err(internal_error)?;

    let results = candidates
        .into_iter()
        .map(|candidate| ApiResult {
            id: candidate.id,
            score: candidate.score,
            title: candidate.metadata.title,
            authors: candidate.metadata.authors.unwrap_or_default(),
            url: candidate.metadata.url,
            abstract_text: candidate
                .metadata
                .abstract_text
                .unwrap_or(candidate.metadata.text),
        })
        .collect();
    Ok(Json(results))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use spansearch::controls::SearchControls;
    use spansearch::embedder::Embedder;
    use spansearch::index::{Candidate, CandidateMetadata, VectorIndex};

    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
    }

    /// Index that returns as many candidates as asked for, up to five.
    struct FakeIndex;

    impl VectorIndex for FakeIndex {
        fn query(
            &self,
            _vector: &[f32],
            top_k: usize,
            _namespace: Option<&str>,
            _include_metadata: bool,
        ) -> Result<Vec<Candidate>> {
            Ok((0..top_k.min(5))
                .map(|i| Candidate {
                    id: format!("c{i}"),
                    score: 0.9 - i as f32 * 0.1,
                    metadata: CandidateMetadata {
                        title: format!("Doc {i}"),
                        url: format!("https://example.org/{i}"),
                        text: "passage text".to_string(),
                        authors: None,
                        abstract_text: None,
                    },
                })
                .collect())
        }
    }

    fn state(max_top_k: usize) -> AppState {
        let controls = SearchControls::new(5, 0.01, false, false, None, 4);
        AppState {
            pipeline: Arc::new(SearchPipeline::new(
                Arc::new(FakeEmbedder),
                Arc::new(FakeIndex),
                None,
                controls,
            )),
            max_top_k,
        }
    }

    #[tokio::test]
    async fn html_route_honors_the_top_k_param() {
        let page = home_handler(
            State(state(12)),
            Query(SearchParams {
                query: Some("what is alignment".to_string()),
                top_k: Some(2),
            }),
        )
        .await;
        assert_eq!(page.0.matches("<h3>").count(), 2);
    }

    #[tokio::test]
    async fn html_route_clamps_top_k_to_the_server_maximum() {
        let page = home_handler(
            State(state(3)),
            Query(SearchParams {
                query: Some("what is alignment".to_string()),
                top_k: Some(50),
            }),
        )
        .await;
        assert_eq!(page.0.matches("<h3>").count(), 3);
    }

    #[tokio::test]
    async fn html_route_defaults_to_configured_top_k() {
        let page = home_handler(
            State(state(12)),
            Query(SearchParams {
                query: Some("what is alignment".to_string()),
                top_k: None,
            }),
        )
        .await;
        assert_eq!(page.0.matches("<h3>").count(), 5);
    }
}
