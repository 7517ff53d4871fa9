//! External collaborator contracts and their HTTP clients.
//!
//! The core treats embedding and generation as opaque synchronous calls
//! behind the [`EmbeddingProvider`] and [`GenerationProvider`] traits. The
//! concrete clients speak JSON over HTTP with a bounded timeout and retry
//! transport-level faults with exponential backoff; anything that still
//! fails surfaces to the orchestrator as a dependency error.

pub mod embedding;
pub mod generation;

pub use embedding::HttpEmbeddingClient;
pub use generation::HttpGenerationClient;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of prior conversation passed through to the generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// A completed generation and its reported token cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub tokens_consumed: u64,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}")]
    Status { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}

pub trait GenerationProvider: Send + Sync {
    fn generate(
        &self,
        context: &str,
        query: &str,
        history: &[ChatTurn],
    ) -> std::result::Result<Generation, ProviderError>;
}

/// Run a request closure with retries on server and transport faults.
///
/// Client errors (4xx) are returned immediately; 5xx and transport failures
/// are retried with exponential backoff up to `retry_attempts`.
pub(crate) fn request_with_retry<F>(
    retry_attempts: u32,
    mut request_fn: F,
) -> std::result::Result<String, ProviderError>
where
    F: FnMut() -> std::result::Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=retry_attempts {
        debug!("HTTP request attempt {}/{}", attempt, retry_attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                let retryable = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, retry_attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(ProviderError::Status { status: *status });
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, retry_attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !retryable {
                    return Err(ProviderError::Transport(error.to_string()));
                }

                last_error = Some(match error {
                    ureq::Error::StatusCode(status) => ProviderError::Status { status },
                    other => ProviderError::Transport(other.to_string()),
                });

                if attempt < retry_attempts {
                    let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                    let delay = Duration::from_millis(delay_ms);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All {} request attempts failed", retry_attempts);

    Err(last_error
        .unwrap_or_else(|| ProviderError::Transport("request failed after retries".to_string())))
}
