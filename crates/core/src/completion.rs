//! Completion Service Transport
//!
//! The language model runs out of process behind a llama.cpp-style HTTP
//! server. This module owns the single round-trip to it: `POST /completion`
//! with `{prompt, n_predict}`, answered by `{content}`.
//!
//! Transport problems and malformed answers are reported as distinct
//! [`CompletionError`] variants. Neither is ever turned into a fallback
//! policy; that only happens when a well-formed answer names no policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Failure modes of a completion round-trip.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The service could not be reached or did not answer in time.
    #[error("Completion service unreachable: {0}")]
    Transport(String),
    /// The service answered with a non-success HTTP status.
    #[error("Completion service returned HTTP {0}")]
    Status(u16),
    /// The service answered, but not with the expected `{content}` shape.
    #[error("Malformed completion response: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CompletionError::Malformed(_))
    }
}

/// A source of free-text completions for a prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Serialize, Debug)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    content: String,
}

/// [`CompletionClient`] for a llama.cpp-compatible `/completion` endpoint.
pub struct LlamaCppClient {
    http: reqwest::Client,
    endpoint: String,
    n_predict: u32,
}

impl LlamaCppClient {
    /// Creates a client for the server at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Server root, e.g. `http://localhost:8080`.
    /// * `n_predict` - Maximum number of tokens to generate.
    /// * `timeout` - Upper bound for the whole request, connect included.
    pub fn new(base_url: &str, n_predict: u32, timeout: Duration) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/completion", base_url.trim_end_matches('/')),
            n_predict,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionClient for LlamaCppClient {
    #[instrument(name = "completion", skip_all, fields(endpoint = %self.endpoint))]
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = CompletionRequest {
            prompt,
            n_predict: self.n_predict,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        let parsed: CompletionResponse =
            serde_json::from_slice(&body).map_err(|e| CompletionError::Malformed(e.to_string()))?;

        debug!(chars = parsed.content.len(), "Completion received");
        Ok(parsed.content)
    }
}
