
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Upper bound on retained history entries per identity.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Prompt,
    TokenUpdate,
    CounterReset,
    ManualReset,
}

/// One analytics event in an identity's request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub tokens: u64,
    pub kind: HistoryKind,
}

/// Per-identity usage counters for the current window, plus a bounded
/// request history kept for analytics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub identity: String,
    pub prompt_count: u64,
    pub token_count: u64,
    pub window_start: DateTime<Utc>,
    pub last_request_at: DateTime<Utc>,
    pub history: VecDeque<HistoryEntry>,
}

impl UsageRecord {
    #[inline]
    pub fn new(identity: &str, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            prompt_count: 0,
            token_count: 0,
            window_start: now,
            last_request_at: now,
            history: VecDeque::new(),
        }
    }

    #[inline]
    pub fn window_expired(&self, now: DateTime<Utc>, reset_period: Duration) -> bool {
        now - self.window_start >= reset_period
    }

    /// Zero the counters and start a new window. The zeroing and the new
    /// `window_start` happen together; callers hold the identity lock.
    #[inline]
    pub fn reset_window(&mut self, now: DateTime<Utc>) {
        self.prompt_count = 0;
        self.token_count = 0;
        self.window_start = now;
        self.push_history(HistoryEntry {
            timestamp: now,
            tokens: 0,
            kind: HistoryKind::CounterReset,
        });
    }

    /// Administrative reset: zero counters, discard history, new window.
    #[inline]
    pub fn manual_reset(&mut self, now: DateTime<Utc>) {
        self.prompt_count = 0;
        self.token_count = 0;
        self.window_start = now;
        self.history.clear();
        self.push_history(HistoryEntry {
            timestamp: now,
            tokens: 0,
            kind: HistoryKind::ManualReset,
        });
    }

    #[inline]
    pub fn record_prompt(&mut self, now: DateTime<Utc>) {
        self.prompt_count += 1;
        self.last_request_at = now;
        self.push_history(HistoryEntry {
            timestamp: now,
            tokens: 0,
            kind: HistoryKind::Prompt,
        });
    }

    #[inline]
    pub fn record_tokens(&mut self, now: DateTime<Utc>, tokens: u64) {
        self.token_count += tokens;
        self.last_request_at = now;
        self.push_history(HistoryEntry {
            timestamp: now,
            tokens,
            kind: HistoryKind::TokenUpdate,
        });
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }
}
