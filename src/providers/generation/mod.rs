#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ChatRole, ChatTurn, Generation, GenerationProvider, ProviderError, request_with_retry};
use crate::config::ProvidersConfig;
use crate::ledger::estimate_tokens;
use crate::{RagError, Result};

/// HTTP client for the external generation service (chat-completion style).
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatTurn>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

impl HttpGenerationClient {
    #[inline]
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.generation_url)
            .map_err(|e| RagError::Config(format!("invalid generation URL: {}", e)))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.generation_model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
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

    fn system_message(context: &str) -> String {
        format!(
            "You are a helpful assistant that provides accurate information about \
             executive orders and government guidance based on the context provided.\n\n\
             CONTEXT:\n{}\n\n\
             Based solely on the above context, answer the user's question. If the \
             answer cannot be determined from the context, say \"I don't have enough \
             information to answer that question.\" Do not make up information.",
            context
        )
    }

    fn request_generation(
        &self,
        context: &str,
        query: &str,
        history: &[ChatTurn],
    ) -> std::result::Result<Generation, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatTurn {
            role: ChatRole::System,
            content: Self::system_message(context),
        });
        messages.extend(history.iter().cloned());
        messages.push(ChatTurn {
            role: ChatRole::User,
            content: query.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        debug!(
            "Requesting generation: {} history turns, context length {}",
            history.len(),
            context.len()
        );

        let response_text = request_with_retry(self.retry_attempts, || {
            let mut req = self
                .agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json");
            if let Some(ref key) = self.api_key {
                req = req.header("api-key", key.as_str());
            }
            req.send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response contained no choices".to_string())
            })?;

        // Some deployments omit usage; fall back to an estimate so quota
        // accounting still advances.
        let tokens_consumed = response
            .usage
            .map_or_else(|| estimate_tokens(&text), |usage| usage.total_tokens);

        debug!("Generation completed ({} tokens reported)", tokens_consumed);

        Ok(Generation {
            text,
            tokens_consumed,
        })
    }
}

impl GenerationProvider for HttpGenerationClient {
    #[inline]
    fn generate(
        &self,
        context: &str,
        query: &str,
        history: &[ChatTurn],
    ) -> std::result::Result<Generation, ProviderError> {
        self.request_generation(context, query, history)
    }
}
