// src/ingest/scheduler.rs
use anyhow::Result;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::ingest::{IngestOptions, IngestReport, IngestionPipeline};
use crate::ledger::{DedupLedger, LedgerPaths};

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval: Duration,
    /// Stop after this many runs; `None` runs until shutdown.
    pub max_runs: Option<u64>,
    /// `0` disables the retry cap.
    pub max_failures: u32,
}

/// Run the pipeline on a fixed interval until `shutdown` resolves.
///
/// Runs never overlap: a slow run delays the next tick instead of stacking.
/// Each run reopens the ledger so it starts from the latest durable snapshot.
/// A ledger error ends the loop and is returned.
pub async fn run_scheduled<S, F>(
    cfg: IngestSchedulerCfg,
    pipeline: &IngestionPipeline,
    paths: &LedgerPaths,
    opts: &IngestOptions,
    shutdown: S,
    mut on_report: F,
) -> Result<u64>
where
    S: Future<Output = ()>,
    F: FnMut(&IngestReport),
{
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut runs = 0u64;
    loop {
        if cfg.max_runs.is_some_and(|max| runs >= max) {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(target: "ingest", runs, "scheduler shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        let mut ledger = DedupLedger::open(paths.clone(), cfg.max_failures)?;
        let report = pipeline.run(&mut ledger, opts).await?;
        runs += 1;
        counter!("ingest_runs_total").increment(1);
        tracing::info!(
            target: "ingest",
            run = runs,
            enqueued = report.newly_enqueued.len(),
            queue_len = report.queue.len(),
            "scheduled ingest tick"
        );
        on_report(&report);
    }
    Ok(runs)
}
