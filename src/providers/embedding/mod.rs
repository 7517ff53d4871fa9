
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{EmbeddingProvider, ProviderError, request_with_retry};
use crate::config::ProvidersConfig;
use crate::{RagError, Result};

/// HTTP client for the external embedding service.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    endpoint: Url,
    model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    #[inline]
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.embedding_url)
            .map_err(|e| RagError::Config(format!("invalid embedding URL: {}", e)))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.embedding_model.clone(),
            agent,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    fn request_embedding(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        debug!("Requesting embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        if response.embedding.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "provider returned an empty embedding".to_string(),
            ));
        }

        debug!(
            "Received embedding with {} dimensions",
            response.embedding.len()
        );
        Ok(response.embedding)
    }
}

impl EmbeddingProvider for HttpEmbeddingClient {
    #[inline]
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        self.request_embedding(text)
    }
}
