use super::*;
use tempfile::TempDir;

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    config.validate().expect("default config should validate");
}

#[test]
fn missing_file_yields_defaults() {
    let temp_dir = TempDir::new().expect("temp dir");

    let config = Config::load(temp_dir.path()).expect("load should succeed");
    assert_eq!(config, Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.retrieval.top_k = 8;
    config.retrieval.similarity_threshold = 0.25;
    config.limiter.prompt_limit = 50;
    config.limiter.unlimited_identities.push("10.0.0.0/8".to_string());
    config.providers.api_key = Some("secret".to_string());

    config.save().expect("save should succeed");

    let loaded = Config::load(temp_dir.path()).expect("load should succeed");
    assert_eq!(loaded, config);
}

#[test]
fn parse_failure_is_an_error() {
    let temp_dir = TempDir::new().expect("temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "not = [valid").expect("write");

    let result = Config::load(temp_dir.path());
    assert!(result.is_err());
}

#[test]
fn out_of_range_values_fail_validation() {
    let mut config = Config::default();
    config.retrieval.top_k = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut config = Config::default();
    config.retrieval.similarity_threshold = 1.5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidSimilarityThreshold(_))
    ));

    let mut config = Config::default();
    config.providers.embedding_url = "not a url".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

    let mut config = Config::default();
    config.providers.temperature = 3.0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTemperature(_))
    ));

    let mut config = Config::default();
    config.limiter.reset_period_hours = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidResetPeriod(0))
    ));

    let mut config = Config::default();
    config.retrieval.max_context_chars = 10;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidContextBudget(10))
    ));
}

#[test]
fn zero_limits_mean_unlimited() {
    let settings = LimiterSettings {
        prompt_limit: 0,
        token_limit: 0,
        ..LimiterSettings::default()
    };

    let limiter = settings.to_limiter_config();
    assert_eq!(limiter.prompt_limit, None);
    assert_eq!(limiter.token_limit, None);
}

#[test]
fn limiter_settings_round_trip_through_snapshot() {
    let settings = LimiterSettings {
        enabled: true,
        prompt_limit: 20,
        token_limit: 50_000,
        reset_period_hours: 12,
        unlimited_identities: vec!["127.0.0.1".to_string()],
        admin_identities: vec!["::1".to_string()],
    };

    let snapshot = settings.to_limiter_config();
    assert_eq!(snapshot.prompt_limit, Some(20));
    assert_eq!(snapshot.token_limit, Some(50_000));
    assert_eq!(snapshot.reset_period, chrono::Duration::hours(12));

    let mut back = LimiterSettings::default();
    back.apply_limiter_config(&snapshot);
    assert_eq!(back, settings);
}

#[test]
fn corpus_path_resolves_against_base_dir() {
    let config = Config {
        base_dir: std::path::PathBuf::from("/etc/govdocs-rag"),
        ..Config::default()
    };
    assert_eq!(
        config.corpus_path(),
        std::path::PathBuf::from("/etc/govdocs-rag/corpus.json")
    );

    let mut config = config;
    config.retrieval.corpus_path = std::path::PathBuf::from("/data/corpus.json");
    assert_eq!(
        config.corpus_path(),
        std::path::PathBuf::from("/data/corpus.json")
    );
}
