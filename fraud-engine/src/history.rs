//! Historical transaction summaries
//!
//! The engine reads per-user history through [`HistoryProvider`]. The ledger
//! store owns the real data; [`InMemoryHistory`] is the in-process
//! implementation used by the operator binary and tests.

use crate::types::TransactionContext;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Trailing window ending at the transaction timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    /// Window length
    pub lookback: Duration,
}

impl HistoryWindow {
    /// Window of the given length
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }

    /// Window start for a window ending at `as_of`
    pub fn start(&self, as_of: DateTime<Utc>) -> DateTime<Utc> {
        as_of - self.lookback
    }
}

/// Summary of a user's transactions within a window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Transactions in the window
    pub transaction_count: u32,

    /// Mean amount, rounded to cents
    pub avg_amount: Decimal,

    /// Largest amount
    pub max_amount: Decimal,

    /// Recipients seen repeatedly, most frequent first
    pub frequent_recipients: Vec<String>,

    /// Countries seen repeatedly, most frequent first
    pub frequent_countries: Vec<String>,
}

impl HistorySummary {
    /// Summary returned for users with no history
    pub fn empty() -> Self {
        Self::default()
    }

    /// No prior transactions
    pub fn is_empty(&self) -> bool {
        self.transaction_count == 0
    }

    /// Whether the recipient is in the frequent set
    pub fn knows_recipient(&self, recipient_id: &str) -> bool {
        self.frequent_recipients.iter().any(|r| r == recipient_id)
    }

    /// Whether the country is in the frequent set (case-insensitive)
    pub fn knows_country(&self, country: &str) -> bool {
        self.frequent_countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country))
    }
}

/// History bundle used by one assessment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserHistory {
    /// Baseline window summary
    pub baseline: HistorySummary,

    /// Same-user transactions in the trailing velocity window
    pub transactions_last_hour: u32,
}

/// Historical transaction summary provider
///
/// Implementations return [`HistorySummary::empty`] for unknown users; an
/// `Err` means the provider itself is unreachable.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Summarise `user_id`'s transactions in `window` ending at `as_of`
    async fn summary(
        &self,
        user_id: &str,
        window: HistoryWindow,
        as_of: DateTime<Utc>,
    ) -> Result<HistorySummary>;
}

/// Transaction record kept for summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction ID
    pub transaction_id: Uuid,

    /// Amount
    pub amount: Decimal,

    /// Recipient
    pub recipient_id: String,

    /// Origin country, if known
    pub country: Option<String>,

    /// Transaction time
    pub timestamp: DateTime<Utc>,
}

impl From<&TransactionContext> for TransactionRecord {
    fn from(ctx: &TransactionContext) -> Self {
        Self {
            transaction_id: ctx.transaction_id,
            amount: ctx.amount,
            recipient_id: ctx.recipient_id.clone(),
            country: ctx.location.country.clone(),
            timestamp: ctx.timestamp,
        }
    }
}

/// Per-user transaction log
struct UserLedger {
    transactions: Vec<TransactionRecord>,
}

impl UserLedger {
    fn new() -> Self {
        Self {
            transactions: Vec::new(),
        }
    }

    /// Drop transactions older than the cutoff
    fn cleanup(&mut self, cutoff: DateTime<Utc>) {
        self.transactions.retain(|tx| tx.timestamp >= cutoff);
    }

    fn newest(&self) -> Option<DateTime<Utc>> {
        self.transactions.iter().map(|tx| tx.timestamp).max()
    }

    fn in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&TransactionRecord> {
        self.transactions
            .iter()
            .filter(|tx| tx.timestamp >= start && tx.timestamp < end)
            .collect()
    }
}

/// In-memory history keyed by user
pub struct InMemoryHistory {
    // Map: user_id -> UserLedger
    users: DashMap<String, UserLedger>,
    min_occurrences: usize,
    max_frequent: usize,
    // Records older than this relative to the user's newest are dropped
    retention: Duration,
}

impl InMemoryHistory {
    /// Recipients/countries seen at least twice count as frequent
    pub fn new() -> Self {
        Self::with_frequency(2, 10)
    }

    /// Custom frequent-set rules
    pub fn with_frequency(min_occurrences: usize, max_frequent: usize) -> Self {
        Self {
            users: DashMap::new(),
            min_occurrences: min_occurrences.max(1),
            max_frequent,
            retention: Duration::days(90),
        }
    }

    /// Keep each user's records for `retention` behind their newest one
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Record a completed transaction, dropping the user's expired records
    pub fn record(&self, user_id: &str, record: TransactionRecord) {
        let mut ledger = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(UserLedger::new);
        ledger.transactions.push(record);

        if let Some(newest) = ledger.newest() {
            ledger.cleanup(newest - self.retention);
        }
    }

    /// Record a transaction straight from its context
    pub fn record_context(&self, ctx: &TransactionContext) {
        self.record(&ctx.user_id, TransactionRecord::from(ctx));
    }

    /// Drop records older than `cutoff` for every user
    pub fn prune(&self, cutoff: DateTime<Utc>) {
        for mut entry in self.users.iter_mut() {
            entry.value_mut().cleanup(cutoff);
        }
        self.users.retain(|_, ledger| !ledger.transactions.is_empty());
    }

    /// Clear history for a user
    pub fn reset_user(&self, user_id: &str) {
        self.users.remove(user_id);
    }

    /// Number of users with history
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }

    fn frequent<'a>(&self, values: impl Iterator<Item = &'a str>) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in values {
            *counts.entry(value).or_insert(0) += 1;
        }

        let mut frequent: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_occurrences)
            .collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        frequent
            .into_iter()
            .take(self.max_frequent)
            .map(|(value, _)| value.to_string())
            .collect()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryProvider for InMemoryHistory {
    async fn summary(
        &self,
        user_id: &str,
        window: HistoryWindow,
        as_of: DateTime<Utc>,
    ) -> Result<HistorySummary> {
        let Some(ledger) = self.users.get(user_id) else {
            return Ok(HistorySummary::empty());
        };

        let transactions = ledger.in_window(window.start(as_of), as_of);
        if transactions.is_empty() {
            return Ok(HistorySummary::empty());
        }

        let count = transactions.len();
        let total: Decimal = transactions.iter().map(|tx| tx.amount).sum();
        let max_amount = transactions
            .iter()
            .map(|tx| tx.amount)
            .max()
            .unwrap_or(Decimal::ZERO);

        Ok(HistorySummary {
            transaction_count: count as u32,
            avg_amount: (total / Decimal::from(count as u64)).round_dp(2),
            max_amount,
            frequent_recipients: self
                .frequent(transactions.iter().map(|tx| tx.recipient_id.as_str())),
            frequent_countries: self
                .frequent(transactions.iter().filter_map(|tx| tx.country.as_deref())),
        })
    }
}
