//! Pinecone-compatible vector index client.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{Candidate, VectorIndex};

/// Blocking client that talks to a Pinecone-compatible `/query` endpoint.
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    endpoint: String,
    max_retries: usize,
}

impl PineconeIndex {
    /// Builds a new index client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `Api-Key` header (usually from `PINECONE_API_KEY`)
    /// * `base_url` - Index endpoint, e.g. `https://<index>-<project>.svc.<env>.pinecone.io`
    pub fn new(
        api_key: String,
        base_url: String,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing vector index API key");
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "vector index endpoint must be an http(s) URL"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid vector index API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build vector index HTTP client")?;
        let endpoint = format!("{}/query", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            max_retries: max_retries.max(1),
        })
    }
}

impl VectorIndex for PineconeIndex {
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
        include_metadata: bool,
    ) -> Result<Vec<Candidate>> {
        anyhow::ensure!(!vector.is_empty(), "query vector must not be empty");

        let mut attempt = 0usize;
        loop {
            let request = QueryRequest {
                vector,
                top_k,
                namespace,
                include_metadata,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload: QueryResponse = resp
                            .json()
                            .context("failed to parse vector index response")?;
                        return Ok(payload.matches);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("vector index query failed ({}): {}", status, body);
                }
                Err(err) => {
                    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
                        if attempt + 1 < self.max_retries {
                            attempt += 1;
                            thread::sleep(retry_backoff(attempt));
                            continue;
                        }
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Candidate>,
}
