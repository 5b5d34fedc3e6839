//! Hosted question-answering client (HuggingFace Inference API wire shape).

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;

use super::{AnswerExtractor, ExtractedAnswer};

/// Blocking client for an inference endpoint serving an extractive QA model
/// such as `deepset/electra-base-squad2`.
#[derive(Clone)]
pub struct HostedExtractor {
    client: Client,
    endpoint: String,
    max_retries: usize,
}

impl HostedExtractor {
    /// Builds a new QA client.
    pub fn new(
        api_key: String,
        endpoint: String,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing QA API key");
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "QA endpoint must be an http(s) URL"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid QA API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build QA HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            max_retries: max_retries.max(1),
        })
    }
}

impl AnswerExtractor for HostedExtractor {
    fn answer(&self, question: &str, context: &str) -> Result<ExtractedAnswer> {
        anyhow::ensure!(!question.trim().is_empty(), "question must not be empty");
        anyhow::ensure!(!context.is_empty(), "context must not be empty");

        let mut attempt = 0usize;
        loop {
            let request = QaRequest {
                inputs: QaInputs { question, context },
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ExtractedAnswer =
                            resp.json().context("failed to parse QA response")?;
                        return Ok(parsed);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("QA request failed ({}): {}", status, body);
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
    // 503 additionally covers inference endpoints still loading the model.
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct QaRequest<'a> {
    inputs: QaInputs<'a>,
}

#[derive(Serialize)]
struct QaInputs<'a> {
    question: &'a str,
    context: &'a str,
}
