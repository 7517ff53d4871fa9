#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::ledger::LimiterConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub limiter: LimiterSettings,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub generation_url: String,
    pub generation_model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for ProvidersConfig {
    #[inline]
    fn default() -> Self {
        Self {
            embedding_url: "http://localhost:11434/api/embed".to_string(),
            embedding_model: "nomic-embed-text:latest".to_string(),
            embedding_dimension: 768,
            generation_url: "http://localhost:11434/v1/chat/completions".to_string(),
            generation_model: "llama3.1:latest".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 800,
            timeout_seconds: 60,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub corpus_path: PathBuf,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from("corpus.json"),
            top_k: 4,
            similarity_threshold: 0.4,
            max_context_chars: 12_000,
        }
    }
}

/// Limiter settings as stored on disk. A limit of `0` means unlimited,
/// matching the environment-variable convention the deployment uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimiterSettings {
    pub enabled: bool,
    pub prompt_limit: u64,
    pub token_limit: u64,
    pub reset_period_hours: i64,
    pub unlimited_identities: Vec<String>,
    pub admin_identities: Vec<String>,
}

impl Default for LimiterSettings {
    #[inline]
    fn default() -> Self {
        let defaults = LimiterConfig::default();
        Self {
            enabled: defaults.enabled,
            prompt_limit: defaults.prompt_limit.unwrap_or(0),
            token_limit: defaults.token_limit.unwrap_or(0),
            reset_period_hours: 24,
            unlimited_identities: defaults.unlimited_identities,
            admin_identities: defaults.admin_identities,
        }
    }
}

impl LimiterSettings {
    /// Build the in-memory limiter snapshot from the stored settings.
    #[inline]
    pub fn to_limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            enabled: self.enabled,
            prompt_limit: (self.prompt_limit > 0).then_some(self.prompt_limit),
            token_limit: (self.token_limit > 0).then_some(self.token_limit),
            reset_period: chrono::Duration::hours(self.reset_period_hours),
            unlimited_identities: self.unlimited_identities.clone(),
            admin_identities: self.admin_identities.clone(),
        }
    }

    /// Write the limiter snapshot back into the stored settings.
    #[inline]
    pub fn apply_limiter_config(&mut self, config: &LimiterConfig) {
        self.enabled = config.enabled;
        self.prompt_limit = config.prompt_limit.unwrap_or(0);
        self.token_limit = config.token_limit.unwrap_or(0);
        self.reset_period_hours = config.reset_period.num_hours().max(1);
        self.unlimited_identities = config.unlimited_identities.clone();
        self.admin_identities = config.admin_identities.clone();
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxTokens(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid similarity threshold: {0} (must be between -1.0 and 1.0)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid context budget: {0} (must be between 256 and 1000000 characters)")]
    InvalidContextBudget(usize),
    #[error("Invalid reset period: {0} (must be between 1 and 8760 hours)")]
    InvalidResetPeriod(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the SQLite usage database.
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("usage.db")
    }

    /// Corpus location; relative paths resolve against the config directory.
    #[inline]
    pub fn corpus_path(&self) -> PathBuf {
        if self.retrieval.corpus_path.is_absolute() {
            self.retrieval.corpus_path.clone()
        } else {
            self.base_dir.join(&self.retrieval.corpus_path)
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.providers.validate()?;
        self.retrieval.validate()?;
        self.limiter.validate()?;
        Ok(())
    }
}

impl ProvidersConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.embedding_url)
            .map_err(|_| ConfigError::InvalidUrl(self.embedding_url.clone()))?;
        Url::parse(&self.generation_url)
            .map_err(|_| ConfigError::InvalidUrl(self.generation_url.clone()))?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }
        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generation_model.clone()));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.max_tokens == 0 || self.max_tokens > 32_768 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        if self.timeout_seconds == 0 || self.timeout_seconds > 300 {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 || self.top_k > 100 {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.similarity_threshold,
            ));
        }

        if !(256..=1_000_000).contains(&self.max_context_chars) {
            return Err(ConfigError::InvalidContextBudget(self.max_context_chars));
        }

        Ok(())
    }
}

impl LimiterSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reset_period_hours < 1 || self.reset_period_hours > 8760 {
            return Err(ConfigError::InvalidResetPeriod(self.reset_period_hours));
        }
        Ok(())
    }
}
