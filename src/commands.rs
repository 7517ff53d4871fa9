use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::RagError;
use crate::config::{Config, get_config_dir};
use crate::index::{IndexStore, VectorIndex};
use crate::ledger::store::SqliteUsageStore;
use crate::ledger::{LimiterConfig, UsageLedger};
use crate::providers::{EmbeddingProvider, HttpEmbeddingClient, HttpGenerationClient};
use crate::rag::{AnswerOutcome, DEFAULT_STORE, Orchestrator, render_with_sources};

fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    Config::load(config_dir)
}

async fn open_ledger(config: &Config) -> Result<Arc<UsageLedger>> {
    let store = SqliteUsageStore::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to open usage database")?;
    let ledger = UsageLedger::open(Arc::new(store), config.limiter.to_limiter_config())
        .await
        .context("Failed to open usage ledger")?;
    Ok(Arc::new(ledger))
}

fn load_index(config: &Config, override_path: Option<&PathBuf>) -> Result<Arc<IndexStore>> {
    let corpus_path = override_path.map_or_else(|| config.corpus_path(), Clone::clone);

    let file = File::open(&corpus_path)
        .with_context(|| format!("Failed to open corpus file: {}", corpus_path.display()))?;

    let store = Arc::new(IndexStore::new());
    store
        .load_from_reader(DEFAULT_STORE, BufReader::new(file))
        .with_context(|| format!("Failed to load corpus from {}", corpus_path.display()))?;

    Ok(store)
}

/// Validate a corpus file and report what it contains.
#[inline]
pub fn load_corpus(path: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let corpus_path = path.unwrap_or_else(|| config.corpus_path());

    info!("Validating corpus at {}", corpus_path.display());

    let file = File::open(&corpus_path)
        .with_context(|| format!("Failed to open corpus file: {}", corpus_path.display()))?;
    let index = VectorIndex::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to load corpus from {}", corpus_path.display()))?;

    println!("Corpus OK: {}", corpus_path.display());
    println!("  Chunks: {}", index.len());
    println!("  Embedding dimension: {}", index.dimension());

    Ok(())
}

/// Run the full answer pipeline for one question.
#[inline]
pub async fn ask(question: String, identity: Option<String>) -> Result<()> {
    let config = load_config()?;
    let identity = identity.unwrap_or_else(|| "127.0.0.1".to_string());

    let ledger = open_ledger(&config).await?;
    let index_store = load_index(&config, None)?;
    let embedder = Arc::new(HttpEmbeddingClient::new(&config.providers)?);
    let generator = Arc::new(HttpGenerationClient::new(&config.providers)?);

    let orchestrator = Orchestrator::new(
        index_store,
        ledger,
        embedder,
        generator,
        &config.retrieval,
    );

    match orchestrator.answer(&identity, &question, &[]).await {
        Ok(AnswerOutcome::Answered { text, sources, tokens_consumed }) => {
            println!("{}", render_with_sources(&text, &sources));
            info!("Answered with {} sources, {} tokens", sources.len(), tokens_consumed);
        }
        Ok(AnswerOutcome::NoRelevantInformation) => {
            println!("I couldn't find any relevant information to answer your question.");
        }
        Ok(AnswerOutcome::QuotaExceeded(denial)) => {
            println!("Request denied: {}.", denial);
            println!("This limit resets automatically at the end of the current window.");
        }
        Err(RagError::Dependency(message)) => {
            error!("Dependency failure: {}", message);
            println!("A backing service is temporarily unavailable. Please try again shortly.");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Retrieval only: print the chunks most similar to a query.
#[inline]
pub fn search(question: String, k: Option<usize>) -> Result<()> {
    let config = load_config()?;
    let index_store = load_index(&config, None)?;
    let embedder = HttpEmbeddingClient::new(&config.providers)?;

    let query_vector = embedder
        .embed(&question)
        .map_err(|e| RagError::Dependency(e.to_string()))?;

    let index = index_store
        .get(DEFAULT_STORE)
        .context("Corpus is not loaded")?;
    let hits = index.query(
        &query_vector,
        k.unwrap_or(config.retrieval.top_k),
        config.retrieval.similarity_threshold,
    )?;

    if hits.is_empty() {
        println!("No relevant documents found.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("Result {} [Score: {:.4}]", i + 1, hit.score);
        if let Some(title) = hit.metadata.get("title") {
            println!("Title: {}", title);
        }
        if let Some(eo) = hit.metadata.get("eo_number") {
            println!("Executive Order: {}", eo);
        }
        if let Some(source) = hit.metadata.get("source_filename") {
            println!("Source: {}", source);
        }

        let snippet: String = hit.text.chars().take(300).collect();
        if hit.text.chars().count() > 300 {
            println!("\n{}...\n", snippet);
        } else {
            println!("\n{}\n", snippet);
        }
        println!("{}", "-".repeat(80));
    }

    Ok(())
}

/// Print ledger statistics, for everyone or for one identity.
#[inline]
pub async fn stats(identity: Option<String>) -> Result<()> {
    let config = load_config()?;
    let ledger = open_ledger(&config).await?;

    match identity {
        Some(identity) => match ledger.identity_stats(&identity).await {
            Some(stats) => {
                println!("Usage for {}:", stats.identity);
                println!("  Prompts this window: {}", stats.prompt_count);
                println!("  Tokens this window: {}", stats.token_count);
                println!("  Window started: {}", stats.window_start);
                println!("  Last request: {}", stats.last_request_at);
                println!("  Unlimited: {}", stats.is_unlimited);
                println!("  Admin: {}", stats.is_admin);
            }
            None => println!("No usage recorded for '{}'.", identity),
        },
        None => {
            let stats = ledger.stats().await;
            println!(
                "Usage limiting: {}",
                if stats.enabled { "enabled" } else { "disabled" }
            );
            println!(
                "  Prompt limit: {}",
                stats
                    .prompt_limit
                    .map_or_else(|| "unlimited".to_string(), |l| l.to_string())
            );
            println!(
                "  Token limit: {}",
                stats
                    .token_limit
                    .map_or_else(|| "unlimited".to_string(), |l| l.to_string())
            );
            println!("  Identities tracked: {}", stats.total_identities);
            println!("  Total prompts: {}", stats.total_prompts);
            println!("  Total tokens: {}", stats.total_tokens);
        }
    }

    Ok(())
}

/// Show the effective limiter configuration.
#[inline]
pub fn show_limits() -> Result<()> {
    let config = load_config()?;
    print_limiter(&config.limiter.to_limiter_config());
    Ok(())
}

/// Update limits; a value of 0 means unlimited.
#[inline]
pub async fn set_limits(
    prompt_limit: Option<u64>,
    token_limit: Option<u64>,
    reset_hours: Option<i64>,
) -> Result<()> {
    let mut config = load_config()?;
    let ledger = open_ledger(&config).await?;

    let mut new_config = (*ledger.snapshot()).clone();
    if let Some(limit) = prompt_limit {
        new_config.prompt_limit = (limit > 0).then_some(limit);
    }
    if let Some(limit) = token_limit {
        new_config.token_limit = (limit > 0).then_some(limit);
    }
    if let Some(hours) = reset_hours {
        new_config.reset_period = chrono::Duration::hours(hours);
    }

    let effective = ledger.update_limits(new_config);
    persist_limiter(&mut config, &effective)?;
    print_limiter(&effective);

    Ok(())
}

/// Enable or disable usage limiting.
#[inline]
pub async fn set_limiter_enabled(enabled: bool) -> Result<()> {
    let mut config = load_config()?;
    let ledger = open_ledger(&config).await?;

    let effective = ledger.set_enabled(enabled);
    persist_limiter(&mut config, &effective)?;

    println!(
        "Usage limiting {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Zero one identity's counters and history.
#[inline]
pub async fn reset_identity(identity: String) -> Result<()> {
    let config = load_config()?;
    let ledger = open_ledger(&config).await?;

    ledger.reset(&identity).await?;
    println!("Usage counters reset for '{}'.", identity);
    Ok(())
}

#[inline]
pub async fn allow_identity(identity: String) -> Result<()> {
    edit_identity_lists(|ledger| ledger.add_unlimited_identity(&identity)).await?;
    Ok(())
}

#[inline]
pub async fn disallow_identity(identity: String) -> Result<()> {
    edit_identity_lists(|ledger| ledger.remove_unlimited_identity(&identity)).await?;
    Ok(())
}

#[inline]
pub async fn add_admin_identity(identity: String) -> Result<()> {
    edit_identity_lists(|ledger| ledger.add_admin_identity(&identity)).await?;
    Ok(())
}

#[inline]
pub async fn remove_admin_identity(identity: String) -> Result<()> {
    edit_identity_lists(|ledger| ledger.remove_admin_identity(&identity)).await?;
    Ok(())
}

async fn edit_identity_lists<F>(edit: F) -> Result<()>
where
    F: FnOnce(&UsageLedger) -> Arc<LimiterConfig>,
{
    let mut config = load_config()?;
    let ledger = open_ledger(&config).await?;

    let effective = edit(&ledger);
    persist_limiter(&mut config, &effective)?;
    print_limiter(&effective);

    Ok(())
}

fn persist_limiter(config: &mut Config, effective: &LimiterConfig) -> Result<()> {
    config.limiter.apply_limiter_config(effective);
    config.save().context("Failed to save configuration")?;
    info!("Limiter configuration saved");
    Ok(())
}

fn print_limiter(config: &LimiterConfig) {
    println!(
        "Usage limiting: {}",
        if config.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Prompt limit: {}",
        config
            .prompt_limit
            .map_or_else(|| "unlimited".to_string(), |l| l.to_string())
    );
    println!(
        "  Token limit: {}",
        config
            .token_limit
            .map_or_else(|| "unlimited".to_string(), |l| l.to_string())
    );
    println!("  Reset period: {} hours", config.reset_period.num_hours());
    println!("  Unlimited identities: {}", config.unlimited_identities.join(", "));
    println!("  Admin identities: {}", config.admin_identities.join(", "));
}
