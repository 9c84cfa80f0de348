// tests/ledger_invariants.rs
// Randomized enqueue / mark-outcome sequences plus write-failure rollback.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use mining_news_pipeline::ledger::{DedupLedger, EnqueuePolicy, LedgerPaths, Outcome};

const MAX_FAILURES: u32 = 2;

fn pool() -> Vec<String> {
    (0..12).map(|i| format!("eng-{i}")).collect()
}

fn assert_invariants(ledger: &DedupLedger) {
    let queue: HashSet<&String> = ledger.queue().iter().collect();
    assert_eq!(queue.len(), ledger.queue().len(), "duplicate in queue");

    let processed: HashSet<&String> = ledger.processed().iter().collect();
    assert_eq!(processed.len(), ledger.processed().len(), "duplicate in processed");
    assert!(
        queue.is_disjoint(&processed),
        "id both queued and processed"
    );
}

fn assert_same_as_disk(ledger: &DedupLedger) {
    let reopened = DedupLedger::open(ledger.paths().clone(), MAX_FAILURES).unwrap();
    assert_eq!(reopened.queue(), ledger.queue());
    assert_eq!(reopened.processed(), ledger.processed());
    assert_eq!(reopened.failed(), ledger.failed());
}

#[test]
fn random_sequences_keep_dedup_and_exclusivity() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = tempfile::tempdir().unwrap();
        let mut ledger =
            DedupLedger::open(LedgerPaths::in_dir(dir.path()), MAX_FAILURES).unwrap();
        let ids = pool();

        for _ in 0..60 {
            if rng.random_bool(0.5) || ledger.queue().is_empty() {
                let n = rng.random_range(1..=5);
                let batch: Vec<&str> = (0..n)
                    .map(|_| ids[rng.random_range(0..ids.len())].as_str())
                    .collect();
                let before: HashSet<String> = ledger.queue().iter().cloned().collect();
                let report = ledger.enqueue(&batch, EnqueuePolicy::SkipProcessed).unwrap();

                for id in &report.accepted {
                    assert!(!before.contains(id), "{id} was already queued");
                    assert!(!ledger.processed().contains(id), "{id} was processed");
                    assert!(ledger.failure_count(id) < MAX_FAILURES, "{id} is retry-capped");
                }
                assert_eq!(
                    report.accepted.len() + report.already_known(),
                    batch.len(),
                    "every input id is accounted for"
                );
            } else {
                let q = ledger.queue();
                let id = q[rng.random_range(0..q.len())].clone();
                let outcome = if rng.random_bool(0.5) {
                    Outcome::Processed
                } else {
                    Outcome::Failed
                };
                let records_before = ledger.processed().len() + ledger.failed().len();
                ledger.mark_outcome(&id, outcome, "generator error").unwrap();

                assert!(!ledger.is_queued(&id));
                assert_eq!(
                    ledger.processed().len() + ledger.failed().len(),
                    records_before + 1,
                    "exactly one terminal record per outcome"
                );
            }
            assert_invariants(&ledger);
        }
        assert_same_as_disk(&ledger);
    }
}

#[test]
fn documents_carry_matching_counts() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = DedupLedger::open(paths.clone(), MAX_FAILURES).unwrap();
    ledger
        .enqueue(&["a", "b", "c"], EnqueuePolicy::SkipProcessed)
        .unwrap();
    ledger.mark_outcome("a", Outcome::Processed, "").unwrap();
    ledger.mark_outcome("b", Outcome::Failed, "timeout").unwrap();

    let read = |p: &std::path::Path| -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap()
    };
    let q = read(&paths.queue);
    assert_eq!(q["event_uris"], serde_json::json!(["c"]));
    assert_eq!(q["total_events"], 1);
    let p = read(&paths.processed);
    assert_eq!(p["processed_uris"], serde_json::json!(["a"]));
    assert_eq!(p["total_processed"], 1);
    let f = read(&paths.failed);
    assert_eq!(f["failed_uris"][0]["uri"], "b");
    assert_eq!(f["failed_uris"][0]["error"], "timeout");
    assert_eq!(f["total_failed"], 1);
    assert!(q["updated_at"].is_string());
}

#[test]
fn failed_queue_write_rolls_back_enqueue() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = DedupLedger::open(paths.clone(), MAX_FAILURES).unwrap();

    // A directory where the queue file belongs makes every write attempt fail.
    std::fs::create_dir(&paths.queue).unwrap();
    let err = ledger.enqueue(&["x"], EnqueuePolicy::SkipProcessed).unwrap_err();
    assert!(format!("{err:#}").contains("enqueue not committed"));
    assert!(ledger.queue().is_empty());
    assert!(!ledger.is_queued("x"));

    std::fs::remove_dir(&paths.queue).unwrap();
    let r = ledger.enqueue(&["x"], EnqueuePolicy::SkipProcessed).unwrap();
    assert_eq!(r.accepted, vec!["x".to_string()]);
    assert_same_as_disk(&ledger);
}

#[test]
fn failed_terminal_write_keeps_id_queued() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = DedupLedger::open(paths.clone(), MAX_FAILURES).unwrap();
    ledger.enqueue(&["x", "y"], EnqueuePolicy::SkipProcessed).unwrap();

    // Occupy the processed path with a directory so the terminal write fails.
    std::fs::create_dir(&paths.processed).unwrap();
    let err = ledger.mark_outcome("x", Outcome::Processed, "").unwrap_err();
    assert!(format!("{err:#}").contains("not committed"));

    assert!(ledger.is_queued("x"));
    assert!(ledger.processed().is_empty());
    assert_eq!(ledger.queue(), &["x".to_string(), "y".to_string()]);

    // Failure records go to a different document and still work.
    ledger.mark_outcome("y", Outcome::Failed, "boom").unwrap();
    assert_eq!(ledger.queue(), &["x".to_string()]);
    assert_eq!(ledger.failure_count("y"), 1);
}

#[test]
fn failed_dequeue_reverts_terminal_record() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LedgerPaths::in_dir(dir.path());
    let mut ledger = DedupLedger::open(paths.clone(), MAX_FAILURES).unwrap();
    ledger.enqueue(&["x", "y"], EnqueuePolicy::SkipProcessed).unwrap();

    // Terminal documents stay writable; only the queue path is blocked.
    std::fs::remove_file(&paths.queue).unwrap();
    std::fs::create_dir(&paths.queue).unwrap();

    let err = ledger.mark_outcome("x", Outcome::Processed, "").unwrap_err();
    assert!(format!("{err:#}").contains("dequeue of x not committed"));
    let err = ledger.mark_outcome("y", Outcome::Failed, "boom").unwrap_err();
    assert!(format!("{err:#}").contains("dequeue of y not committed"));

    assert_eq!(ledger.queue(), &["x".to_string(), "y".to_string()]);
    assert!(ledger.processed().is_empty());
    assert!(ledger.failed().is_empty());
    assert_eq!(ledger.failure_count("y"), 0);

    let read = |p: &std::path::Path| -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap()
    };
    let p = read(&paths.processed);
    assert_eq!(p["processed_uris"], serde_json::json!([]));
    assert_eq!(p["total_processed"], 0);
    let f = read(&paths.failed);
    assert_eq!(f["failed_uris"], serde_json::json!([]));
    assert_eq!(f["total_failed"], 0);

    // Once the queue is writable again the same outcome commits.
    std::fs::remove_dir(&paths.queue).unwrap();
    ledger.mark_outcome("x", Outcome::Processed, "").unwrap();
    let reopened = DedupLedger::open(paths.clone(), MAX_FAILURES).unwrap();
    assert_eq!(reopened.queue(), &["y".to_string()]);
    assert_eq!(reopened.processed(), &["x".to_string()]);
    assert!(reopened.failed().is_empty());
}

#[test]
fn retry_cap_blocks_requeue_after_repeated_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = DedupLedger::open(LedgerPaths::in_dir(dir.path()), MAX_FAILURES).unwrap();
    for _ in 0..MAX_FAILURES {
        let r = ledger.enqueue(&["flaky"], EnqueuePolicy::SkipProcessed).unwrap();
        assert_eq!(r.accepted, vec!["flaky".to_string()]);
        ledger.mark_outcome("flaky", Outcome::Failed, "err").unwrap();
    }
    let r = ledger.enqueue(&["flaky"], EnqueuePolicy::Force).unwrap();
    assert!(r.accepted.is_empty());
    assert_eq!(r.retry_capped, vec!["flaky".to_string()]);
}
