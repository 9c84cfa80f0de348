// tests/metrics.rs
// The Prometheus recorder is process-global, so this file holds a single test.

use std::sync::Arc;

use mining_news_pipeline::ingest::planner::QueryConfig;
use mining_news_pipeline::ingest::providers::FixtureSource;
use mining_news_pipeline::ingest::{IngestOptions, IngestionPipeline};
use mining_news_pipeline::ledger::{DedupLedger, LedgerPaths};
use mining_news_pipeline::metrics::Metrics;
use mining_news_pipeline::relevance::RelevanceFilter;

const FIXTURE: &str = r#"[
    {"uri": "m1", "title": "Bitcoin miners add hashrate"},
    {"uri": "n1", "title": "Bitcoin price slips"}
]"#;

#[tokio::test]
async fn run_metrics_are_rendered_and_dumped() {
    let metrics = Metrics::install().expect("first recorder install succeeds");

    let dir = tempfile::tempdir().unwrap();
    let mut ledger = DedupLedger::open(LedgerPaths::in_dir(dir.path()), 3).unwrap();
    let source = Arc::new(FixtureSource::from_json_str(FIXTURE).unwrap());
    let pipeline =
        IngestionPipeline::new(source, QueryConfig::default(), RelevanceFilter::default());
    let report = pipeline
        .run(&mut ledger, &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.newly_enqueued, vec!["m1".to_string()]);

    let text = metrics.render();
    for needle in [
        "ingest_raw_events_total",
        "ingest_filter_passed_total",
        "ingest_filter_rejected_total",
        "ingest_enqueued_total",
        "fallback_attempts_total",
        "fallback_attempt_ms",
        "ledger_writes_total",
        "ingest_pipeline_last_run_ts",
    ] {
        assert!(text.contains(needle), "missing {needle} in:\n{text}");
    }
    assert!(text.contains(r#"outcome="relevant""#));

    let out = dir.path().join("mining_news.prom");
    metrics.write_textfile(&out).unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), metrics.render());

    // A second global recorder is refused.
    assert!(Metrics::install().is_err());
}
