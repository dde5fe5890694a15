//! Completion service abstraction.
//!
//! Defines the [`CompletionClient`] trait: one prompt in, raw generated text
//! out. Implementations:
//! - [`ollama::OllamaClient`]: Ollama-style `/api/generate` endpoint
//! - [`retry::RetryingClient`]: bounded retry wrapper around any client
//!
//! No retry happens unless the caller opts into [`retry::RetryingClient`].

use async_trait::async_trait;
use regex::Regex;

pub mod ollama;
pub mod retry;

/// Longest diagnostic text carried in errors and error responses.
pub const MAX_DIAGNOSTIC_CHARS: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport and availability failures of the completion service.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// Network failure before a response arrived.
    #[error("completion request failed: {0}")]
    Request(String),
    /// No response within the configured timeout.
    #[error("completion request timed out")]
    Timeout,
    /// Upstream answered with a non-success status.
    #[error("completion service returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Truncated, redacted response body.
        body: String,
    },
    /// Response envelope did not match `{ "response": string }`.
    #[error("completion response parse error: {0}")]
    Parse(String),
}

impl CompletionError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(truncate_diagnostic(&e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// External free-text → structured-text generator.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one prompt and return the raw generated text.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError`] on transport, status, or envelope failure.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Model identifier, for logs.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `CompletionError::Request` on transport failure,
/// `CompletionError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, CompletionError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(CompletionError::HttpStatus {
            status: status.as_u16(),
            body: truncate_diagnostic(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact secret-looking tokens, and cap the length.
pub fn truncate_diagnostic(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-[A-Za-z0-9_\-]{20,}",
        r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
        r"(?i)(api[_-]?key|token|password)=[^&\s]+",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_DIAGNOSTIC_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_DIAGNOSTIC_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
