//! Ollama-style completion client using the `/api/generate` API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{check_http_response, CompletionClient, CompletionError};

/// Default completion endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434/api/generate";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Request body: `{ model, prompt, stream: false }`.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    /// Model name.
    pub model: &'a str,
    /// Full instruction text.
    pub prompt: &'a str,
    /// Always `false`; the client reads one JSON envelope.
    pub stream: bool,
}

/// Response envelope: `{ response: string }`. Other fields are ignored.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub response: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Completion client for an Ollama-compatible generate endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    /// Full endpoint URL.
    #[doc(hidden)]
    pub endpoint: String,
    /// Model name sent with every request.
    #[doc(hidden)]
    pub model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError::Request`] if the HTTP client cannot be built.
    pub fn new(endpoint: String, model: String, timeout: Duration) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Request(e.to_string()))?;
        Ok(Self {
            endpoint,
            model,
            client,
        })
    }
}

/// Build the request body for `prompt`.
#[doc(hidden)]
pub fn build_request<'a>(model: &'a str, prompt: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        model,
        prompt,
        stream: false,
    }
}

/// Extract the generated text from a response body.
///
/// # Errors
///
/// Returns `CompletionError::Parse` if the envelope is not `{ response: string }`.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<String, CompletionError> {
    let resp: GenerateResponse =
        serde_json::from_str(body).map_err(|e| CompletionError::Parse(e.to_string()))?;
    Ok(resp.response)
}

#[async_trait::async_trait]
impl CompletionClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = build_request(&self.model, prompt);
        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
