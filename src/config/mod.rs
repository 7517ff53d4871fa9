// Configuration management: TOML settings with validation.

pub mod settings;


pub use settings::{Config, ConfigError, LimiterSettings, ProvidersConfig, RetrievalConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("govdocs-rag"))
        .ok_or(ConfigError::DirectoryError)
}
