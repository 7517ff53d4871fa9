//! Usage ledger: admits or denies requests per identity under a quota.
//!
//! Counters accumulate within a time window and reset lazily when the window
//! has elapsed. Identities on the unlimited or admin lists are still counted
//! for visibility but never enforced. The in-memory state is authoritative;
//! every mutation is written through to the [`store::UsageStore`], and a
//! storage fault never changes an admission decision that has been made.
//!
//! Same-identity operations are serialized by a per-identity async lock;
//! operations on different identities proceed without contention. The write
//! to the store happens inside the identity's critical section, so durable
//! writes are ordered per identity.


pub mod models;
pub mod store;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{RagError, Result};
use models::UsageRecord;
use store::UsageStore;

/// Quota settings, held as an immutable snapshot and replaced wholesale.
///
/// Entries in the identity lists may be exact identities (IPs, account ids,
/// hostnames) or IPv4/IPv6 CIDR blocks such as `10.0.0.0/8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    pub enabled: bool,
    pub prompt_limit: Option<u64>,
    pub token_limit: Option<u64>,
    pub reset_period: Duration,
    pub unlimited_identities: Vec<String>,
    pub admin_identities: Vec<String>,
}

impl Default for LimiterConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            prompt_limit: Some(20),
            token_limit: None,
            reset_period: Duration::hours(24),
            unlimited_identities: loopback_identities(),
            admin_identities: loopback_identities(),
        }
    }
}

fn loopback_identities() -> Vec<String> {
    vec![
        "127.0.0.1".to_string(),
        "::1".to_string(),
        "localhost".to_string(),
    ]
}

impl LimiterConfig {
    #[inline]
    pub fn is_unlimited(&self, identity: &str) -> bool {
        identity_in_list(identity, &self.unlimited_identities)
    }

    #[inline]
    pub fn is_admin(&self, identity: &str) -> bool {
        identity_in_list(identity, &self.admin_identities)
    }

    #[inline]
    pub fn is_exempt(&self, identity: &str) -> bool {
        self.is_unlimited(identity) || self.is_admin(identity)
    }
}

/// Lowercase and trim an identity so list membership and ledger keys agree.
#[inline]
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_ascii_lowercase()
}

/// Rough token count for quota pre-checks, about four characters per token.
#[inline]
pub fn estimate_tokens(text: &str) -> u64 {
    text.len() as u64 / 4
}

fn identity_in_list(identity: &str, list: &[String]) -> bool {
    list.iter().any(|entry| identity_matches(entry, identity))
}

fn identity_matches(entry: &str, identity: &str) -> bool {
    if entry.eq_ignore_ascii_case(identity) {
        return true;
    }

    let Some((network_part, prefix_part)) = entry.split_once('/') else {
        return false;
    };
    let (Ok(network), Ok(prefix_len), Ok(addr)) = (
        network_part.parse::<IpAddr>(),
        prefix_part.parse::<u32>(),
        identity.parse::<IpAddr>(),
    ) else {
        return false;
    };

    cidr_contains(network, prefix_len, addr)
}

fn cidr_contains(network: IpAddr, prefix_len: u32, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix_len > 32 {
                return false;
            }
            if prefix_len == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - prefix_len);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix_len > 128 {
                return false;
            }
            if prefix_len == 0 {
                return true;
            }
            let mask = u128::MAX << (128 - prefix_len);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// Why a request was denied. User-facing and final for the current window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    #[error("prompt limit exceeded ({used}/{limit} prompts used in the current window)")]
    PromptLimitExceeded { used: u64, limit: u64 },

    #[error("token limit exceeded ({used}/{limit} tokens used in the current window)")]
    TokenLimitExceeded { used: u64, limit: u64 },
}

/// A granted admission, with the counters as of this request.
///
/// `durable` is false when the write-through to the store failed; the
/// in-memory counters still advanced and remain authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub identity: String,
    pub prompt_count: u64,
    pub token_count: u64,
    pub exempt: bool,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admitted(Admission),
    Denied(Denial),
}

impl Verdict {
    #[inline]
    pub fn is_admitted(&self) -> bool {
        matches!(*self, Verdict::Admitted(_))
    }
}

/// Aggregate counters across every known identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    pub enabled: bool,
    pub prompt_limit: Option<u64>,
    pub token_limit: Option<u64>,
    pub total_identities: usize,
    pub total_prompts: u64,
    pub total_tokens: u64,
}

/// One identity's current counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStats {
    pub identity: String,
    pub prompt_count: u64,
    pub token_count: u64,
    pub window_start: DateTime<Utc>,
    pub last_request_at: DateTime<Utc>,
    pub is_unlimited: bool,
    pub is_admin: bool,
}

pub struct UsageLedger {
    config: RwLock<Arc<LimiterConfig>>,
    entries: Mutex<HashMap<String, Arc<AsyncMutex<UsageRecord>>>>,
    store: Arc<dyn UsageStore>,
}

impl UsageLedger {
    /// Hydrate the ledger from the store and start serving decisions.
    pub async fn open(store: Arc<dyn UsageStore>, config: LimiterConfig) -> Result<Self> {
        let records = store
            .load_all()
            .await
            .map_err(|e| RagError::Persistence(e.to_string()))?;

        let mut entries = HashMap::with_capacity(records.len());
        for record in records {
            entries.insert(
                record.identity.clone(),
                Arc::new(AsyncMutex::new(record)),
            );
        }

        info!("Usage ledger opened with {} known identities", entries.len());

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            entries: Mutex::new(entries),
            store,
        })
    }

    /// Current configuration snapshot. Each call observes exactly one
    /// version; a concurrent [`Self::update_limits`] is seen entirely or
    /// not at all.
    #[inline]
    pub fn snapshot(&self) -> Arc<LimiterConfig> {
        let guard = self.config.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Atomically replace the configuration.
    #[inline]
    pub fn update_limits(&self, new_config: LimiterConfig) -> Arc<LimiterConfig> {
        let snapshot = Arc::new(new_config);
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&snapshot);
        drop(guard);

        info!(
            "Limiter configuration updated: enabled={}, prompt_limit={:?}, token_limit={:?}",
            snapshot.enabled, snapshot.prompt_limit, snapshot.token_limit
        );
        snapshot
    }

    #[inline]
    pub fn set_enabled(&self, enabled: bool) -> Arc<LimiterConfig> {
        let mut config = (*self.snapshot()).clone();
        config.enabled = enabled;
        self.update_limits(config)
    }

    #[inline]
    pub fn add_unlimited_identity(&self, identity: &str) -> Arc<LimiterConfig> {
        self.edit_lists(|config| add_entry(&mut config.unlimited_identities, identity))
    }

    #[inline]
    pub fn remove_unlimited_identity(&self, identity: &str) -> Arc<LimiterConfig> {
        self.edit_lists(|config| remove_entry(&mut config.unlimited_identities, identity))
    }

    #[inline]
    pub fn add_admin_identity(&self, identity: &str) -> Arc<LimiterConfig> {
        self.edit_lists(|config| add_entry(&mut config.admin_identities, identity))
    }

    #[inline]
    pub fn remove_admin_identity(&self, identity: &str) -> Arc<LimiterConfig> {
        self.edit_lists(|config| remove_entry(&mut config.admin_identities, identity))
    }

    fn edit_lists<F: FnOnce(&mut LimiterConfig)>(&self, edit: F) -> Arc<LimiterConfig> {
        let mut config = (*self.snapshot()).clone();
        edit(&mut config);
        self.update_limits(config)
    }

    /// The single atomic admission check. Applies the lazy window reset,
    /// evaluates the limits, and on admission records the prompt and
    /// persists the record before returning.
    ///
    /// The caller's `estimated_cost` is used only for the token headroom
    /// comparison; `token_count` itself is advanced exclusively by
    /// [`Self::record_actual_usage`] once the real cost is known.
    #[inline]
    pub async fn check_and_reserve(&self, identity: &str, estimated_cost: u64) -> Verdict {
        self.check_and_reserve_at(identity, estimated_cost, Utc::now())
            .await
    }

    pub async fn check_and_reserve_at(
        &self,
        identity: &str,
        estimated_cost: u64,
        now: DateTime<Utc>,
    ) -> Verdict {
        let identity = normalize_identity(identity);
        let config = self.snapshot();
        let entry = self.entry_for(&identity, now);
        let mut record = entry.lock().await;

        if record.window_expired(now, config.reset_period) {
            debug!("Window expired for '{}', resetting counters", identity);
            record.reset_window(now);
        }

        let exempt = config.is_exempt(&identity);
        if config.enabled && !exempt {
            if let Some(limit) = config.prompt_limit {
                if record.prompt_count + 1 > limit {
                    debug!(
                        "Denying '{}': {}/{} prompts used",
                        identity, record.prompt_count, limit
                    );
                    return Verdict::Denied(Denial::PromptLimitExceeded {
                        used: record.prompt_count,
                        limit,
                    });
                }
            }
            if let Some(limit) = config.token_limit {
                if record.token_count + estimated_cost > limit {
                    debug!(
                        "Denying '{}': {} tokens used, {} estimated, limit {}",
                        identity, record.token_count, estimated_cost, limit
                    );
                    return Verdict::Denied(Denial::TokenLimitExceeded {
                        used: record.token_count,
                        limit,
                    });
                }
            }
        }

        record.record_prompt(now);
        let durable = self.persist(&record).await;

        Verdict::Admitted(Admission {
            identity,
            prompt_count: record.prompt_count,
            token_count: record.token_count,
            exempt,
            durable,
        })
    }

    /// Reconcile the identity's token counter with the real cost of a
    /// completed request. The in-memory update always applies; a storage
    /// fault is surfaced after the fact as a persistence error.
    #[inline]
    pub async fn record_actual_usage(&self, identity: &str, tokens_consumed: u64) -> Result<()> {
        self.record_actual_usage_at(identity, tokens_consumed, Utc::now())
            .await
    }

    pub async fn record_actual_usage_at(
        &self,
        identity: &str,
        tokens_consumed: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let identity = normalize_identity(identity);
        let config = self.snapshot();
        let entry = self.entry_for(&identity, now);
        let mut record = entry.lock().await;

        if record.window_expired(now, config.reset_period) {
            record.reset_window(now);
        }
        record.record_tokens(now, tokens_consumed);

        if self.persist(&record).await {
            Ok(())
        } else {
            Err(RagError::Persistence(format!(
                "failed to persist usage for '{}'",
                identity
            )))
        }
    }

    /// Administrative reset of one identity: counters and history are
    /// zeroed, a new window starts, the identity entry is kept. Idempotent.
    pub async fn reset(&self, identity: &str) -> Result<()> {
        self.reset_at(identity, Utc::now()).await
    }

    pub async fn reset_at(&self, identity: &str, now: DateTime<Utc>) -> Result<()> {
        let identity = normalize_identity(identity);
        let entry = self.entry_for(&identity, now);
        let mut record = entry.lock().await;

        record.manual_reset(now);
        info!("Usage counters manually reset for '{}'", identity);

        if self.persist(&record).await {
            Ok(())
        } else {
            Err(RagError::Persistence(format!(
                "failed to persist reset for '{}'",
                identity
            )))
        }
    }

    /// Aggregate totals across all known identities. Read-only.
    pub async fn stats(&self) -> LedgerStats {
        let config = self.snapshot();
        let entries: Vec<Arc<AsyncMutex<UsageRecord>>> = {
            let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            guard.values().map(Arc::clone).collect()
        };

        let mut total_prompts = 0;
        let mut total_tokens = 0;
        for entry in &entries {
            let record = entry.lock().await;
            total_prompts += record.prompt_count;
            total_tokens += record.token_count;
        }

        LedgerStats {
            enabled: config.enabled,
            prompt_limit: config.prompt_limit,
            token_limit: config.token_limit,
            total_identities: entries.len(),
            total_prompts,
            total_tokens,
        }
    }

    /// One identity's current counters, if it has ever been seen. Read-only.
    pub async fn identity_stats(&self, identity: &str) -> Option<IdentityStats> {
        let identity = normalize_identity(identity);
        let config = self.snapshot();
        let entry = {
            let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            guard.get(&identity).map(Arc::clone)
        }?;

        let record = entry.lock().await;
        Some(IdentityStats {
            identity: record.identity.clone(),
            prompt_count: record.prompt_count,
            token_count: record.token_count,
            window_start: record.window_start,
            last_request_at: record.last_request_at,
            is_unlimited: config.is_unlimited(&record.identity),
            is_admin: config.is_admin(&record.identity),
        })
    }

    fn entry_for(&self, identity: &str, now: DateTime<Utc>) -> Arc<AsyncMutex<UsageRecord>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(UsageRecord::new(identity, now))));
        Arc::clone(entry)
    }

    async fn persist(&self, record: &UsageRecord) -> bool {
        match self.store.upsert(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to persist usage record for '{}': {:#}",
                    record.identity, e
                );
                false
            }
        }
    }
}

fn add_entry(list: &mut Vec<String>, identity: &str) {
    let normalized = normalize_identity(identity);
    if !list.iter().any(|e| *e == normalized) {
        list.push(normalized);
    }
}

fn remove_entry(list: &mut Vec<String>, identity: &str) {
    let normalized = normalize_identity(identity);
    list.retain(|e| *e != normalized);
}
