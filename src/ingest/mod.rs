// src/ingest/mod.rs
pub mod config;
pub mod fallback;
pub mod planner;
pub mod providers;
pub mod scheduler;
pub mod types;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::ingest::fallback::{AttemptBudget, AttemptReport, FallbackController};
use crate::ingest::planner::{QueryConfig, QueryPlanner};
use crate::ingest::types::{Event, EventSource};
use crate::ledger::{DedupLedger, EnqueuePolicy};
use crate::relevance::RelevanceFilter;

/// Cap on normalized title/summary length, in chars.
const MAX_TEXT_CHARS: usize = 4000;

/// One-time metrics registration (so series show up in the exposition output).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_raw_events_total",
            "Events returned by the winning upstream attempt."
        );
        describe_counter!(
            "ingest_filter_passed_total",
            "Events that passed the relevance filter."
        );
        describe_counter!(
            "ingest_filter_rejected_total",
            "Events rejected by the relevance filter."
        );
        describe_counter!("ingest_enqueued_total", "Identifiers newly added to the queue.");
        describe_counter!(
            "ingest_known_total",
            "Candidates skipped as already queued, processed, or retry-capped."
        );
        describe_counter!(
            "fallback_attempts_total",
            "Upstream attempts by outcome (timeout/error/empty/relevant)."
        );
        describe_histogram!("fallback_attempt_ms", "Upstream attempt duration in milliseconds.");
        describe_counter!("ledger_writes_total", "Successful ledger document writes.");
        describe_counter!("ledger_write_errors_total", "Failed ledger document writes.");
        describe_counter!("ingest_runs_total", "Scheduled ingest runs completed.");
        describe_counter!("generate_processed_total", "Queued events turned into articles.");
        describe_counter!("generate_failed_total", "Queued events the generator failed on.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

/// Normalize text: decode entities, strip tags, fold quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (Unicode \s also covers the NBSP from `&nbsp;`)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// Fixed identifiers used by dry runs instead of calling the source.
pub fn dry_run_ids(max_events: usize) -> Vec<String> {
    (1..=max_events.min(3))
        .map(|i| format!("dry-run-event-{i}"))
        .collect()
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub recency_minutes: u32,
    pub max_events: usize,
    /// Fabricate placeholder ids, skip the source, and write nothing.
    pub dry_run: bool,
    /// Admit ids already in the processed set.
    pub force: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            recency_minutes: 90,
            max_events: 5,
            dry_run: false,
            force: false,
        }
    }
}

impl IngestOptions {
    /// Trim the window to two hours and the batch to ten for a quick, reliable run.
    pub fn fast(mut self) -> Self {
        self.recency_minutes = self.recency_minutes.min(120);
        self.max_events = self.max_events.min(10);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub raw_fetched: usize,
    pub passed_filter: usize,
    pub newly_enqueued: Vec<String>,
    pub already_known: usize,
    pub retry_capped: usize,
    pub exhausted: bool,
    pub dry_run: bool,
    /// Queue after the run, in order.
    pub queue: Vec<String>,
    #[serde(skip)]
    pub attempts: Vec<AttemptReport>,
}

impl IngestReport {
    pub fn found_nothing_new(&self) -> bool {
        self.newly_enqueued.is_empty()
    }

    /// Machine-readable run summary. When nothing new was found the current queue is
    /// echoed so downstream steps still have work to pick up.
    pub fn summary(&self) -> FetchSummary {
        FetchSummary {
            new_events_added: self.newly_enqueued.len(),
            total_events_in_queue: self.queue.len(),
            fetch_time: chrono::Utc::now().to_rfc3339(),
            new_event_uris: self.newly_enqueued.clone(),
            existing_queue_uris: self.found_nothing_new().then(|| self.queue.clone()),
            exhausted: self.exhausted,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub new_events_added: usize,
    pub total_events_in_queue: usize,
    pub fetch_time: String,
    pub new_event_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_queue_uris: Option<Vec<String>>,
    pub exhausted: bool,
    pub dry_run: bool,
}

pub struct IngestionPipeline {
    planner: QueryPlanner,
    controller: FallbackController,
    filter: RelevanceFilter,
}

impl IngestionPipeline {
    pub fn new(source: Arc<dyn EventSource>, query: QueryConfig, filter: RelevanceFilter) -> Self {
        Self {
            planner: QueryPlanner::default(),
            controller: FallbackController::new(source, query),
            filter,
        }
    }

    pub fn with_budget(mut self, budget: AttemptBudget) -> Self {
        self.controller = self.controller.with_budget(budget);
        self
    }

    pub fn with_planner(mut self, planner: QueryPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn filter(&self) -> &RelevanceFilter {
        &self.filter
    }

    /// Filter, rank by descending relevance score, and cap at `max_events`.
    pub fn rank_candidates(&self, events: Vec<Event>, max_events: usize) -> Vec<Event> {
        let mut candidates: Vec<Event> = events
            .into_iter()
            .filter_map(|mut ev| {
                let rel = self.filter.evaluate(&ev);
                rel.is_candidate().then(|| {
                    ev.relevance = Some(rel.score);
                    ev
                })
            })
            .collect();
        // Stable: equal scores keep upstream order.
        candidates.sort_by(|a, b| b.relevance.cmp(&a.relevance));
        candidates.truncate(max_events);
        candidates
    }

    /// One ingestion pass: fetch with fallback, filter, rank, dedup, persist.
    ///
    /// Exhaustion is a normal zero-result outcome; only ledger write failures are errors.
    pub async fn run(&self, ledger: &mut DedupLedger, opts: &IngestOptions) -> Result<IngestReport> {
        ensure_metrics_described();
        let policy = if opts.force {
            EnqueuePolicy::Force
        } else {
            EnqueuePolicy::SkipProcessed
        };

        if opts.dry_run {
            let ids = dry_run_ids(opts.max_events);
            let preview = ledger.preview_enqueue(&ids, policy);
            info!(
                target: "ingest",
                simulated = ids.len(),
                would_enqueue = preview.accepted.len(),
                "dry run: no API calls, nothing persisted"
            );
            let mut queue = ledger.queue().to_vec();
            queue.extend(preview.accepted.iter().cloned());
            return Ok(IngestReport {
                raw_fetched: ids.len(),
                passed_filter: ids.len(),
                already_known: preview.already_known(),
                retry_capped: preview.retry_capped.len(),
                newly_enqueued: preview.accepted,
                exhausted: false,
                dry_run: true,
                queue,
                attempts: Vec::new(),
            });
        }

        let plan = self.planner.plan(opts.recency_minutes, opts.max_events);
        let fetched = self.controller.fetch(&plan, &self.filter).await;
        let raw_fetched = fetched.events.len();

        let candidates = self.rank_candidates(fetched.events, opts.max_events);
        let passed_filter = candidates.len();
        let ids: Vec<&str> = candidates.iter().map(|ev| ev.id.as_str()).collect();
        for ev in &candidates {
            info!(
                target: "ingest",
                id = %ev.id,
                score = ev.relevance.unwrap_or_default(),
                title = %ev.title.chars().take(100).collect::<String>(),
                "candidate"
            );
        }

        let enqueued = ledger.enqueue(&ids, policy)?;

        counter!("ingest_raw_events_total").increment(raw_fetched as u64);
        counter!("ingest_filter_passed_total").increment(passed_filter as u64);
        counter!("ingest_filter_rejected_total")
            .increment(raw_fetched.saturating_sub(passed_filter) as u64);
        counter!("ingest_enqueued_total").increment(enqueued.accepted.len() as u64);
        counter!("ingest_known_total").increment(enqueued.already_known() as u64);
        gauge!("ingest_pipeline_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);

        let report = IngestReport {
            raw_fetched,
            passed_filter,
            already_known: enqueued.already_known(),
            retry_capped: enqueued.retry_capped.len(),
            newly_enqueued: enqueued.accepted,
            exhausted: fetched.exhausted,
            dry_run: false,
            queue: ledger.queue().to_vec(),
            attempts: fetched.attempts,
        };
        info!(
            target: "ingest",
            raw = report.raw_fetched,
            passed = report.passed_filter,
            enqueued = report.newly_enqueued.len(),
            known = report.already_known,
            exhausted = report.exhausted,
            queue_len = report.queue.len(),
            "ingest run finished"
        );
        Ok(report)
    }
}
