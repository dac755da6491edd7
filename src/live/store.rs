//! Widget-scoped stores for pushed data. Readers take cheap `Arc` snapshots
//! while merges swap the whole vector behind a lock, so a render never sees
//! a half-applied batch.

use crate::live::merge::{self, Keyed};
use chrono::{DateTime, Utc};
use hashlink::LinkedHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const DEFAULT_INSIGHT_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightCategory {
    Opportunity,
    Risk,
    News,
    Rebalance,
}

/// One AI-generated insight card as pushed by the insights stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub category: InsightCategory,
    pub headline: String,
    pub body: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Insight {
    fn key(&self) -> &str {
        &self.id
    }
}

/// A watchlist row. Identity and naming come from the seed; the numeric
/// fields move with live ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
}

impl Keyed for Quote {
    fn key(&self) -> &str {
        &self.symbol
    }
}

/// One live price update for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteTick {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
}

impl Keyed for QuoteTick {
    fn key(&self) -> &str {
        &self.symbol
    }
}

impl Quote {
    /// Ticks replace only the numeric fields; symbol and name stay put.
    pub fn apply_tick(&mut self, tick: &QuoteTick) {
        self.price = tick.price;
        self.change = tick.change;
        self.change_percent = tick.change_percent;
        self.volume = tick.volume;
    }
}

struct InsightState {
    items: Arc<Vec<Insight>>,
    last_updated: Option<DateTime<Utc>>,
}

/// Streaming insights, newest first, merged with append-dedup-cap.
pub struct InsightStore {
    cap: usize,
    state: Mutex<InsightState>,
}

impl InsightStore {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_INSIGHT_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap,
            state: Mutex::new(InsightState {
                items: Arc::new(Vec::new()),
                last_updated: None,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Insight>> {
        self.state
            .lock()
            .map(|state| Arc::clone(&state.items))
            .unwrap_or_else(|_| Arc::new(Vec::new()))
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .map(|state| state.last_updated)
            .unwrap_or(None)
    }

    pub fn push(&self, incoming: &[Insight]) {
        if let Ok(mut state) = self.state.lock() {
            let merged = merge::append_dedup_cap(&state.items, incoming, self.cap);
            state.items = Arc::new(merged);
            state.last_updated = Some(Utc::now());
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InsightStore {
    fn default() -> Self {
        Self::new()
    }
}

struct QuoteState {
    items: Arc<Vec<Quote>>,
    last_updated: Option<DateTime<Utc>>,
}

/// Watchlist quotes, seeded once and patched in place by live ticks.
pub struct QuoteStore {
    state: Mutex<QuoteState>,
}

impl QuoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QuoteState {
                items: Arc::new(Vec::new()),
                last_updated: None,
            }),
        }
    }

    /// Replace the symbol universe, keeping row order. A symbol listed twice
    /// keeps its first entry.
    pub fn seed(&self, quotes: Vec<Quote>) {
        let mut deduped: LinkedHashMap<String, Quote> = LinkedHashMap::new();
        for quote in quotes {
            deduped.entry(quote.symbol.clone()).or_insert(quote);
        }
        if let Ok(mut state) = self.state.lock() {
            state.items = Arc::new(deduped.into_iter().map(|(_, quote)| quote).collect());
            state.last_updated = Some(Utc::now());
        }
    }

    /// Patch live ticks into the seeded rows. Symbols outside the universe
    /// are ignored.
    pub fn apply(&self, ticks: &[QuoteTick]) {
        if let Ok(mut state) = self.state.lock() {
            let next = merge::patch_by_key(&state.items, ticks, Quote::apply_tick);
            state.items = Arc::new(next);
            state.last_updated = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Quote>> {
        self.state
            .lock()
            .map(|state| Arc::clone(&state.items))
            .unwrap_or_else(|_| Arc::new(Vec::new()))
    }

    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.snapshot()
            .iter()
            .find(|q| q.symbol == symbol)
            .cloned()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .map(|state| state.last_updated)
            .unwrap_or(None)
    }
}

impl Default for QuoteStore {
    fn default() -> Self {
        Self::new()
    }
}
