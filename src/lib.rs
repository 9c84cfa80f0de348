// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod generate;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod relevance;

// ---- Re-exports for stable public API ----
pub use crate::generate::{
    process_queue, Article, ArticleGenerator, ConsumeOutcome, ConsumeReport,
};
pub use crate::ingest::fallback::{AttemptBudget, AttemptOutcome, FallbackController};
pub use crate::ingest::planner::{KeywordStrategy, QueryConfig, QueryPlanner, QuerySpec};
pub use crate::ingest::types::{Event, EventDetails, EventSource, RawEvent, SearchRequest};
pub use crate::ingest::{IngestOptions, IngestReport, IngestionPipeline};
pub use crate::ledger::{DedupLedger, EnqueuePolicy, LedgerPaths, Outcome};
pub use crate::relevance::{Relevance, RelevanceFilter, RelevanceTerms};
