// src/ingest/planner.rs
//! Query planning: a descending ladder of time windows paired with progressively
//! simpler keyword strategies, so a slow upstream still yields something under a deadline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::ingest::types::{SearchRequest, SortOrder, DEFAULT_LANG};

/// Upper bound on any window handed to the upstream API (30 days).
pub const MAX_WINDOW_MINUTES: u32 = 30 * 24 * 60;

/// Step-down ladder applied after the caller's own window, clipped to it.
const STEP_DOWN_MINUTES: [u32; 6] = [240, 120, 60, 30, 15, 5];

/// Keyword strategy, ordered from widest to cheapest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStrategy {
    Broad,
    Narrow,
    Minimal,
}

impl KeywordStrategy {
    /// Cheapest strategy that a window of this size warrants.
    fn tier_for_window(window_minutes: u32) -> Self {
        if window_minutes > 60 {
            KeywordStrategy::Broad
        } else if window_minutes > 15 {
            KeywordStrategy::Narrow
        } else {
            KeywordStrategy::Minimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordStrategy::Broad => "broad",
            KeywordStrategy::Narrow => "narrow",
            KeywordStrategy::Minimal => "minimal",
        }
    }
}

impl fmt::Display for KeywordStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean keyword expression. In TOML: `"phrase"`, `{ all = [...] }` or `{ any = [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordExpr {
    Phrase(String),
    All { all: Vec<KeywordExpr> },
    Any { any: Vec<KeywordExpr> },
}

impl KeywordExpr {
    pub fn phrase(s: &str) -> Self {
        KeywordExpr::Phrase(s.to_string())
    }

    /// Render into the upstream complex-query shape (`$and` / `$or` / `keyword`).
    pub fn to_query_json(&self) -> Value {
        match self {
            KeywordExpr::Phrase(p) => json!({ "keyword": p }),
            KeywordExpr::All { all } => {
                json!({ "$and": all.iter().map(Self::to_query_json).collect::<Vec<_>>() })
            }
            KeywordExpr::Any { any } => {
                json!({ "$or": any.iter().map(Self::to_query_json).collect::<Vec<_>>() })
            }
        }
    }

    /// Number of keyword leaves.
    pub fn complexity(&self) -> usize {
        match self {
            KeywordExpr::Phrase(_) => 1,
            KeywordExpr::All { all: xs } | KeywordExpr::Any { any: xs } => {
                xs.iter().map(Self::complexity).sum()
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, xs: &[KeywordExpr], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, x) in xs.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{x}")?;
    }
    f.write_str(")")
}

impl fmt::Display for KeywordExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordExpr::Phrase(p) => write!(f, "\"{p}\""),
            KeywordExpr::All { all } => write_joined(f, all, "AND"),
            KeywordExpr::Any { any } => write_joined(f, any, "OR"),
        }
    }
}

fn default_broad() -> KeywordExpr {
    KeywordExpr::Any {
        any: vec![
            KeywordExpr::phrase("bitcoin mining"),
            KeywordExpr::phrase("bitcoin miner"),
            KeywordExpr::All {
                all: vec![KeywordExpr::phrase("bitcoin"), KeywordExpr::phrase("hashrate")],
            },
            KeywordExpr::All {
                all: vec![KeywordExpr::phrase("bitcoin"), KeywordExpr::phrase("ASIC")],
            },
        ],
    }
}

fn default_narrow() -> KeywordExpr {
    KeywordExpr::phrase("bitcoin mining")
}

fn default_minimal() -> KeywordExpr {
    KeywordExpr::phrase("bitcoin")
}

fn default_language() -> String {
    DEFAULT_LANG.to_string()
}

/// `[query]` table: keyword expressions per strategy plus fixed request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_broad")]
    pub broad: KeywordExpr,
    #[serde(default = "default_narrow")]
    pub narrow: KeywordExpr,
    #[serde(default = "default_minimal")]
    pub minimal: KeywordExpr,
    #[serde(default)]
    pub excluded_terms: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub sort_by: SortOrder,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            broad: default_broad(),
            narrow: default_narrow(),
            minimal: default_minimal(),
            excluded_terms: Vec::new(),
            language: default_language(),
            sort_by: SortOrder::Date,
        }
    }
}

impl QueryConfig {
    pub fn keywords_for(&self, strategy: KeywordStrategy) -> &KeywordExpr {
        match strategy {
            KeywordStrategy::Broad => &self.broad,
            KeywordStrategy::Narrow => &self.narrow,
            KeywordStrategy::Minimal => &self.minimal,
        }
    }

    /// Resolve a plan entry into a concrete upstream request.
    pub fn request_for(&self, spec: &QuerySpec) -> SearchRequest {
        // Wider strategies tolerate bigger clusters; the minimal one keeps the response small.
        let max_articles = match spec.strategy {
            KeywordStrategy::Minimal => 10,
            _ => 20,
        };
        SearchRequest {
            keywords: self.keywords_for(spec.strategy).clone(),
            excluded_terms: self.excluded_terms.clone(),
            window_minutes: spec.window_minutes,
            language: self.language.clone(),
            min_articles: 1,
            max_articles,
            sort_by: self.sort_by,
            count: spec.count,
        }
    }
}

/// One time-boxed upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuerySpec {
    pub window_minutes: u32,
    pub strategy: KeywordStrategy,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    initial_strategy: KeywordStrategy,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(KeywordStrategy::Broad)
    }
}

impl QueryPlanner {
    pub fn new(initial_strategy: KeywordStrategy) -> Self {
        Self { initial_strategy }
    }

    /// Build the fallback ladder.
    ///
    /// Windows never exceed the request and never increase; strategies never widen.
    /// One entry per distinct window, and the last entry is always `Minimal`.
    pub fn plan(&self, initial_window_minutes: u32, max_events: usize) -> Vec<QuerySpec> {
        let top = initial_window_minutes.clamp(1, MAX_WINDOW_MINUTES);
        if top < initial_window_minutes {
            tracing::warn!(
                target: "planner",
                requested = initial_window_minutes,
                capped = top,
                "time window capped at 30 days"
            );
        } else if top > 24 * 60 {
            tracing::warn!(
                target: "planner",
                window_minutes = top,
                "windows over one day are slow upstream"
            );
        }

        let mut windows = vec![top];
        for step in STEP_DOWN_MINUTES {
            let w = step.min(top);
            if windows.last() != Some(&w) {
                windows.push(w);
            }
        }

        let mut plan: Vec<QuerySpec> = Vec::with_capacity(windows.len());
        for w in windows {
            let strategy = match plan.last() {
                None => self.initial_strategy,
                Some(prev) => prev.strategy.max(KeywordStrategy::tier_for_window(w)),
            };
            plan.push(QuerySpec {
                window_minutes: w,
                strategy,
                count: requested_count(strategy, max_events),
            });
        }

        if let Some(last) = plan.last_mut() {
            last.strategy = KeywordStrategy::Minimal;
            last.count = requested_count(KeywordStrategy::Minimal, max_events);
        }
        plan
    }
}

/// Ask for a small multiple of what we need; filtering discards a share of results.
fn requested_count(strategy: KeywordStrategy, max_events: usize) -> u32 {
    let need = max_events.max(1) as u32;
    match strategy {
        KeywordStrategy::Minimal => need.saturating_mul(2).min(10),
        _ => need.saturating_mul(3).min(15),
    }
}
