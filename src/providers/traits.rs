use async_trait::async_trait;
use thiserror::Error;

/// Why a completion produced no usable text. Every variant is treated the
/// same by the dispatcher: one failure notice, no retry, no quota use.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("{0} API key not set")]
    MissingApiKey(String),
    #[error("completion request timed out")]
    Timeout,
    #[error("completion request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion response: {0}")]
    MalformedBody(String),
    #[error("completion response contained no text")]
    EmptyResponse,
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e)
        }
    }
}

/// Remote text-completion service.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Send one rendered prompt, return the trimmed, non-empty reply.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}
