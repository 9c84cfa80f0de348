// tests/ingest_pipeline.rs
// End-to-end ingestion runs against temp ledger files.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mining_news_pipeline::ingest::fallback::AttemptBudget;
use mining_news_pipeline::ingest::planner::QueryConfig;
use mining_news_pipeline::ingest::types::{EventSource, LocalizedText, RawEvent, SearchRequest};
use mining_news_pipeline::ingest::{IngestOptions, IngestionPipeline};
use mining_news_pipeline::ledger::{DedupLedger, LedgerPaths, Outcome};
use mining_news_pipeline::relevance::RelevanceFilter;

/// Returns the same batch on every call, or hangs forever when `batch` is `None`.
struct FixedSource {
    batch: Option<Vec<RawEvent>>,
    calls: AtomicUsize,
}

impl FixedSource {
    fn returning(batch: Vec<RawEvent>) -> Arc<Self> {
        Arc::new(Self {
            batch: Some(batch),
            calls: AtomicUsize::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            batch: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl EventSource for FixedSource {
    async fn search(&self, _request: &SearchRequest) -> anyhow::Result<Vec<RawEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.batch {
            Some(b) => Ok(b.clone()),
            None => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "Fixed"
    }
}

fn mining_event(uri: &str, title: &str) -> RawEvent {
    RawEvent {
        uri: Some(uri.into()),
        title: LocalizedText::Single(title.into()),
        summary: LocalizedText::Single("Miners reported higher hashrate this week.".into()),
        ..Default::default()
    }
}

fn pipeline(source: Arc<FixedSource>) -> IngestionPipeline {
    IngestionPipeline::new(source, QueryConfig::default(), RelevanceFilter::default())
        .with_budget(AttemptBudget::uniform(Duration::from_secs(2)))
}

/// processed = {A}, queue = [B]
fn seeded_ledger(paths: &LedgerPaths) -> DedupLedger {
    let mut ledger = DedupLedger::open(paths.clone(), 3).unwrap();
    ledger.enqueue(&["A"], Default::default()).unwrap();
    ledger.mark_outcome("A", Outcome::Processed, "").unwrap();
    ledger.enqueue(&["B"], Default::default()).unwrap();
    ledger
}

#[tokio::test(start_paused = true)]
async fn only_unseen_events_are_appended() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = seeded_ledger(&paths);

    let source = FixedSource::returning(vec![
        mining_event("A", "Bitcoin mining firm posts results"),
        mining_event("B", "Bitcoin miner buys new ASICs"),
        mining_event("C", "Bitcoin mining difficulty adjusts upward"),
    ]);
    let report = pipeline(source.clone())
        .run(&mut ledger, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.newly_enqueued, vec!["C".to_string()]);
    assert_eq!(report.already_known, 2);
    assert_eq!(report.queue, vec!["B".to_string(), "C".to_string()]);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    // Durable state matches what the run reported.
    let reopened = DedupLedger::open(paths, 3).unwrap();
    assert_eq!(reopened.queue(), &["B".to_string(), "C".to_string()]);
    assert_eq!(reopened.processed(), &["A".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_fallback_leaves_queue_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = seeded_ledger(&paths);
    let before = std::fs::read_to_string(&paths.queue).unwrap();

    let source = FixedSource::hanging();
    let report = pipeline(source.clone())
        .run(&mut ledger, &IngestOptions::default())
        .await
        .unwrap();

    assert!(report.exhausted);
    assert!(report.found_nothing_new());
    assert_eq!(report.queue, vec!["B".to_string()]);
    assert_eq!(report.attempts.len(), 5);
    assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    assert_eq!(std::fs::read_to_string(&paths.queue).unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn processed_event_leaves_queue_and_is_not_requeued() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = seeded_ledger(&paths);
    let source = FixedSource::returning(vec![mining_event("C", "Bitcoin mining in Texas")]);
    let p = pipeline(source);

    p.run(&mut ledger, &IngestOptions::default()).await.unwrap();
    ledger.mark_outcome("C", Outcome::Processed, "").unwrap();
    assert_eq!(ledger.queue(), &["B".to_string()]);

    let again = p.run(&mut ledger, &IngestOptions::default()).await.unwrap();
    assert!(again.newly_enqueued.is_empty());
    assert_eq!(ledger.queue(), &["B".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn force_readmits_processed_but_never_duplicates_queue() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = seeded_ledger(&paths);
    let source = FixedSource::returning(vec![
        mining_event("A", "Bitcoin mining recap"),
        mining_event("B", "Bitcoin miners rally"),
    ]);
    let opts = IngestOptions {
        force: true,
        ..Default::default()
    };
    let report = pipeline(source).run(&mut ledger, &opts).await.unwrap();

    assert_eq!(report.newly_enqueued, vec!["A".to_string()]);
    assert_eq!(ledger.queue(), &["B".to_string(), "A".to_string()]);

    // The next process (generate, a scheduler tick) still sees the re-admitted id.
    let mut reopened = DedupLedger::open(paths.clone(), 3).unwrap();
    assert_eq!(reopened.queue(), &["B".to_string(), "A".to_string()]);
    reopened.mark_outcome("A", Outcome::Processed, "").unwrap();
    assert_eq!(reopened.queue(), &["B".to_string()]);
    assert_eq!(reopened.processed(), &["A".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn ranking_prefers_more_mining_terms_and_caps_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = DedupLedger::open(LedgerPaths::in_dir(dir.path()), 3).unwrap();
    let plain = |uri: &str, title: &str| RawEvent {
        uri: Some(uri.into()),
        title: LocalizedText::Single(title.into()),
        ..Default::default()
    };
    let source = FixedSource::returning(vec![
        plain("low", "Bitcoin mining stocks drift"),
        plain("high", "Bitcoin miners add hashrate as ASIC supply and mining margins recover"),
        plain("off", "Bitcoin price slips"),
        plain("mid", "Bitcoin miner hashrate steady"),
    ]);
    let opts = IngestOptions {
        max_events: 2,
        ..Default::default()
    };
    let report = pipeline(source).run(&mut ledger, &opts).await.unwrap();

    assert_eq!(report.raw_fetched, 4);
    assert_eq!(report.passed_filter, 2);
    assert_eq!(report.newly_enqueued, vec!["high".to_string(), "mid".to_string()]);
}

#[tokio::test]
async fn dry_run_touches_neither_source_nor_disk() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = DedupLedger::open(paths.clone(), 3).unwrap();
    let source = FixedSource::hanging();

    let opts = IngestOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = pipeline(source.clone()).run(&mut ledger, &opts).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(
        report.newly_enqueued,
        vec!["dry-run-event-1", "dry-run-event-2", "dry-run-event-3"]
    );
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert!(!paths.queue.exists());
    assert!(ledger.queue().is_empty());
}
