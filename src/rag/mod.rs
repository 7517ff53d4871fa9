//! Retrieval orchestration: one request lifecycle from quota check to
//! grounded answer.
//!
//! The quota gate runs first so that a denied request costs no embedding or
//! generation work. The prompt reservation is finalized inside the gate
//! (counter incremented and persisted) before any provider call, so a caller
//! abandoning the request mid-flight cannot leave an unaccounted
//! reservation; the token cost is reconciled after generation completes.


use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::index::{IndexStore, SearchHit};
use crate::ledger::{Denial, UsageLedger, Verdict, estimate_tokens};
use crate::providers::{ChatTurn, EmbeddingProvider, GenerationProvider};
use crate::{RagError, Result};

/// Logical index store name used when none is configured.
pub const DEFAULT_STORE: &str = "corpus";

const BLOCK_SEPARATOR: &str = "\n----\n";

/// Citation for one chunk that contributed to an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub chunk_id: String,
    pub title: String,
    pub eo_number: Option<String>,
    pub page: Option<String>,
    pub score: f32,
}

/// Outcome of one answer request. Quota denial and an empty retrieval are
/// expected results, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    Answered {
        text: String,
        sources: Vec<SourceRef>,
        tokens_consumed: u64,
    },
    NoRelevantInformation,
    QuotaExceeded(Denial),
}

pub struct Orchestrator {
    index_store: Arc<IndexStore>,
    ledger: Arc<UsageLedger>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    store_name: String,
    top_k: usize,
    similarity_threshold: f32,
    max_context_chars: usize,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        index_store: Arc<IndexStore>,
        ledger: Arc<UsageLedger>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            index_store,
            ledger,
            embedder,
            generator,
            store_name: DEFAULT_STORE.to_string(),
            top_k: retrieval.top_k,
            similarity_threshold: retrieval.similarity_threshold,
            max_context_chars: retrieval.max_context_chars,
        }
    }

    #[inline]
    pub fn with_store_name(mut self, name: &str) -> Self {
        self.store_name = name.to_string();
        self
    }

    /// Answer a question grounded in the loaded corpus.
    pub async fn answer(
        &self,
        identity: &str,
        query_text: &str,
        history: &[ChatTurn],
    ) -> Result<AnswerOutcome> {
        let estimate = estimate_tokens(query_text);
        let admission = match self.ledger.check_and_reserve(identity, estimate).await {
            Verdict::Admitted(admission) => admission,
            Verdict::Denied(denial) => {
                info!("Denying request from '{}': {}", identity, denial);
                return Ok(AnswerOutcome::QuotaExceeded(denial));
            }
        };

        debug!(
            "Admitted '{}' (prompt {} this window), embedding query",
            admission.identity, admission.prompt_count
        );

        let query_vector = self
            .embedder
            .embed(query_text)
            .map_err(|e| RagError::Dependency(format!("embedding provider: {}", e)))?;

        // A store that has never been loaded behaves as an empty index.
        let hits = match self.index_store.get(&self.store_name) {
            Some(index) => index.query(&query_vector, self.top_k, self.similarity_threshold)?,
            None => Vec::new(),
        };

        if hits.is_empty() {
            debug!("No chunk cleared the similarity threshold for '{}'", identity);
            return Ok(AnswerOutcome::NoRelevantInformation);
        }

        let (context, sources) = assemble_context(&hits, self.max_context_chars);

        let generation = self
            .generator
            .generate(&context, query_text, history)
            .map_err(|e| RagError::Dependency(format!("generation provider: {}", e)))?;

        if let Err(e) = self
            .ledger
            .record_actual_usage(&admission.identity, generation.tokens_consumed)
            .await
        {
            // The in-memory counters advanced; only durability degraded.
            warn!("Token reconciliation not durable: {}", e);
        }

        Ok(AnswerOutcome::Answered {
            text: generation.text,
            sources,
            tokens_consumed: generation.tokens_consumed,
        })
    }

}

/// Build a bounded context from scored hits, best score first.
///
/// Hits are appended in order until the character budget would be exceeded;
/// everything after that point (the lowest-scoring hits) is dropped. A
/// single hit larger than the whole budget is truncated rather than dropped
/// so the context is never empty.
pub fn assemble_context(hits: &[SearchHit], max_chars: usize) -> (String, Vec<SourceRef>) {
    let mut blocks: Vec<String> = Vec::new();
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut used = 0usize;

    for (i, hit) in hits.iter().enumerate() {
        let block = format_block(i + 1, hit);
        let separator = if blocks.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.len()
        };
        let block_len = block.chars().count();

        if used + separator + block_len > max_chars {
            if blocks.is_empty() {
                let truncated: String = block.chars().take(max_chars).collect();
                blocks.push(truncated);
                sources.push(source_ref(hit));
            }
            break;
        }

        used += separator + block_len;
        blocks.push(block);
        sources.push(source_ref(hit));
    }

    (blocks.join(BLOCK_SEPARATOR), sources)
}

fn format_block(number: usize, hit: &SearchHit) -> String {
    let source_name = hit
        .metadata
        .get("source_filename")
        .map_or_else(|| "Unknown source".to_string(), |v| v.to_string());

    let heading = if let Some(title) = hit.metadata.get("title") {
        format!("Title: {}\nSource: {}", title, source_name)
    } else if let Some(eo) = hit.metadata.get("eo_number") {
        format!("Executive Order: {}\nSource: {}", eo, source_name)
    } else {
        format!("Source: {}", source_name)
    };

    format!("[Document {}]:\n{}\n\n{}\n", number, heading, hit.text)
}

fn source_ref(hit: &SearchHit) -> SourceRef {
    let title = hit
        .metadata
        .get("title")
        .or_else(|| hit.metadata.get("source_filename"))
        .map_or_else(|| "Unknown Source".to_string(), |v| v.to_string());

    SourceRef {
        chunk_id: hit.chunk_id.clone(),
        title,
        eo_number: hit.metadata.get("eo_number").map(|v| v.to_string()),
        page: hit.metadata.get("page_number").map(|v| v.to_string()),
        score: hit.score,
    }
}

/// Append a numbered citation block to an answer for display surfaces.
pub fn render_with_sources(text: &str, sources: &[SourceRef]) -> String {
    if sources.is_empty() {
        return text.to_string();
    }

    let mut lines = Vec::with_capacity(sources.len());
    for (i, source) in sources.iter().enumerate() {
        let mut line = format!("{}. ", i + 1);
        if let Some(ref eo) = source.eo_number {
            line.push_str(&format!("Executive Order {}", eo));
        } else {
            line.push_str(&source.title);
        }
        if let Some(ref page) = source.page {
            line.push_str(&format!(", page {}", page));
        }
        lines.push(line);
    }

    format!("{}\n\nSources:\n{}", text, lines.join("\n"))
}
