//! ledger.rs: durable queue / processed / failed records with atomic-replace writes.
//!
//! Three independent JSON documents share one shape: a primary array, an ISO-8601
//! `updated_at`, and a redundant count that always equals the array length.
//! Every write goes to a temp file in the same directory, is fsynced, then renamed
//! over the target, so readers see either the old or the new snapshot.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts per document write before the mutation is rolled back.
const WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    pub queue: PathBuf,
    pub processed: PathBuf,
    pub failed: PathBuf,
}

impl Default for LedgerPaths {
    fn default() -> Self {
        Self {
            queue: PathBuf::from("events.json"),
            processed: PathBuf::from("processed_events.json"),
            failed: PathBuf::from("failed_events.json"),
        }
    }
}

impl LedgerPaths {
    /// Default file names under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        let d = Self::default();
        Self {
            queue: dir.join(d.queue),
            processed: dir.join(d.processed),
            failed: dir.join(d.failed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueDoc {
    #[serde(default)]
    event_uris: Vec<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    total_events: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProcessedDoc {
    #[serde(default)]
    processed_uris: Vec<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    total_processed: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FailedDoc {
    #[serde(default)]
    failed_uris: Vec<FailedEntry>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    total_failed: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub uri: String,
    pub error: String,
    pub failed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Failed,
}

/// How `enqueue` treats identifiers already in the processed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnqueuePolicy {
    #[default]
    SkipProcessed,
    /// Operator override: re-admit processed identifiers for another pass. The id is
    /// queued while still in the processed set; recording it again only dequeues it.
    Force,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Appended to the queue, in input order.
    pub accepted: Vec<String>,
    pub already_processed: Vec<String>,
    pub already_queued: Vec<String>,
    /// Failed too often to be retried automatically.
    pub retry_capped: Vec<String>,
}

impl EnqueueReport {
    pub fn already_known(&self) -> usize {
        self.already_processed.len() + self.already_queued.len() + self.retry_capped.len()
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    queue: Vec<String>,
    queued: HashSet<String>,
    processed: Vec<String>,
    processed_set: HashSet<String>,
    failed: Vec<FailedEntry>,
}

#[derive(Debug, Clone, Copy)]
enum Doc {
    Queue,
    Processed,
    Failed,
}

#[derive(Debug)]
pub struct DedupLedger {
    paths: LedgerPaths,
    state: LedgerState,
    /// `0` disables the cap.
    max_failures: u32,
}

impl DedupLedger {
    /// Load the latest durable snapshot. Missing files start empty; unreadable ones are fatal.
    pub fn open(paths: LedgerPaths, max_failures: u32) -> Result<Self> {
        let queue_doc: QueueDoc = read_doc(&paths.queue)?;
        let processed_doc: ProcessedDoc = read_doc(&paths.processed)?;
        let failed_doc: FailedDoc = read_doc(&paths.failed)?;

        check_count(&paths.queue, queue_doc.total_events, queue_doc.event_uris.len());
        check_count(
            &paths.processed,
            processed_doc.total_processed,
            processed_doc.processed_uris.len(),
        );
        check_count(&paths.failed, failed_doc.total_failed, failed_doc.failed_uris.len());

        let mut state = LedgerState::default();
        for uri in processed_doc.processed_uris {
            if state.processed_set.insert(uri.clone()) {
                state.processed.push(uri);
            }
        }
        // A queued id may also be processed: a forced re-run, or a terminal write
        // whose revert failed. It stays queued until the consumer records it again.
        for uri in queue_doc.event_uris {
            if state.queued.insert(uri.clone()) {
                state.queue.push(uri);
            } else {
                warn!(target: "ledger", %uri, "duplicate queue entry dropped on load");
            }
        }
        state.failed = failed_doc.failed_uris;

        info!(
            target: "ledger",
            queued = state.queue.len(),
            processed = state.processed.len(),
            failed = state.failed.len(),
            "ledger loaded"
        );
        Ok(Self {
            paths,
            state,
            max_failures,
        })
    }

    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    /// True if `id` was durably processed. Queue membership is checked via [`Self::is_queued`].
    pub fn is_known(&self, id: &str) -> bool {
        self.state.processed_set.contains(id)
    }

    pub fn is_queued(&self, id: &str) -> bool {
        self.state.queued.contains(id)
    }

    pub fn queue(&self) -> &[String] {
        &self.state.queue
    }

    pub fn processed(&self) -> &[String] {
        &self.state.processed
    }

    pub fn failed(&self) -> &[FailedEntry] {
        &self.state.failed
    }

    pub fn failure_count(&self, id: &str) -> u32 {
        let n = self.state.failed.iter().filter(|f| f.uri == id).count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    fn retry_capped(&self, id: &str) -> bool {
        self.max_failures > 0 && self.failure_count(id) >= self.max_failures
    }

    /// Split `ids` into what `enqueue` would accept and why the rest is skipped. No writes.
    pub fn preview_enqueue<S: AsRef<str>>(&self, ids: &[S], policy: EnqueuePolicy) -> EnqueueReport {
        let mut report = EnqueueReport::default();
        let mut seen: HashSet<&str> = HashSet::new();
        for id in ids {
            let id = id.as_ref();
            if self.state.queued.contains(id) || !seen.insert(id) {
                report.already_queued.push(id.to_string());
            } else if policy == EnqueuePolicy::SkipProcessed && self.is_known(id) {
                report.already_processed.push(id.to_string());
            } else if self.retry_capped(id) {
                report.retry_capped.push(id.to_string());
            } else {
                report.accepted.push(id.to_string());
            }
        }
        report
    }

    /// Append unseen ids to the queue in input order and persist.
    ///
    /// On a write failure the in-memory queue is restored and the error returned.
    pub fn enqueue<S: AsRef<str>>(
        &mut self,
        ids: &[S],
        policy: EnqueuePolicy,
    ) -> Result<EnqueueReport> {
        let report = self.preview_enqueue(ids, policy);
        if report.accepted.is_empty() {
            debug!(target: "ledger", skipped = report.already_known(), "nothing to enqueue");
            return Ok(report);
        }

        let snapshot = self.state.clone();
        for id in &report.accepted {
            self.state.queued.insert(id.clone());
            self.state.queue.push(id.clone());
        }
        if let Err(e) = self.persist_with_retry(Doc::Queue) {
            self.state = snapshot;
            return Err(e.context("enqueue not committed"));
        }

        info!(
            target: "ledger",
            accepted = report.accepted.len(),
            skipped = report.already_known(),
            queued = self.state.queue.len(),
            "enqueued"
        );
        Ok(report)
    }

    /// Move `id` out of the queue into exactly one terminal record.
    ///
    /// The terminal record is written first, then the queue. If the queue write fails
    /// the terminal write is reverted, so the id is never absent from every record.
    pub fn mark_outcome(&mut self, id: &str, outcome: Outcome, detail: &str) -> Result<()> {
        let snapshot = self.state.clone();

        let terminal = match outcome {
            Outcome::Processed => {
                if self.state.processed_set.insert(id.to_string()) {
                    self.state.processed.push(id.to_string());
                    Some(Doc::Processed)
                } else {
                    None
                }
            }
            Outcome::Failed => {
                self.state.failed.push(FailedEntry {
                    uri: id.to_string(),
                    error: detail.to_string(),
                    failed_at: Utc::now().to_rfc3339(),
                });
                Some(Doc::Failed)
            }
        };
        let dequeued = self.state.queued.remove(id);
        if dequeued {
            self.state.queue.retain(|q| q != id);
        }

        if let Some(doc) = terminal {
            if let Err(e) = self.persist_with_retry(doc) {
                self.state = snapshot;
                return Err(e.context(format!("recording outcome for {id} not committed")));
            }
        }

        if dequeued {
            if let Err(e) = self.persist_with_retry(Doc::Queue) {
                let committed = std::mem::replace(&mut self.state, snapshot);
                if let Some(doc) = terminal {
                    if let Err(revert) = self.persist_with_retry(doc) {
                        // Disk holds the new terminal record and the old queue; mirror that.
                        warn!(
                            target: "ledger",
                            %id,
                            error = ?revert,
                            "could not revert terminal record; id stays queued and recorded"
                        );
                        let LedgerState { queue, queued, .. } = std::mem::take(&mut self.state);
                        self.state = LedgerState {
                            queue,
                            queued,
                            ..committed
                        };
                    }
                }
                return Err(e.context(format!("dequeue of {id} not committed")));
            }
        }

        match outcome {
            Outcome::Processed => info!(target: "ledger", %id, "marked processed"),
            Outcome::Failed => warn!(target: "ledger", %id, error = %detail, "marked failed"),
        }
        Ok(())
    }

    fn persist(&self, doc: Doc) -> Result<()> {
        let updated_at = Some(Utc::now().to_rfc3339());
        match doc {
            Doc::Queue => write_json_atomic(
                &self.paths.queue,
                &QueueDoc {
                    event_uris: self.state.queue.clone(),
                    updated_at,
                    total_events: Some(self.state.queue.len()),
                },
            ),
            Doc::Processed => write_json_atomic(
                &self.paths.processed,
                &ProcessedDoc {
                    processed_uris: self.state.processed.clone(),
                    updated_at,
                    total_processed: Some(self.state.processed.len()),
                },
            ),
            Doc::Failed => write_json_atomic(
                &self.paths.failed,
                &FailedDoc {
                    failed_uris: self.state.failed.clone(),
                    updated_at,
                    total_failed: Some(self.state.failed.len()),
                },
            ),
        }
    }

    fn persist_with_retry(&self, doc: Doc) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.persist(doc) {
                Ok(()) => {
                    counter!("ledger_writes_total").increment(1);
                    return Ok(());
                }
                Err(e) => {
                    counter!("ledger_write_errors_total").increment(1);
                    if attempt >= WRITE_ATTEMPTS {
                        return Err(e);
                    }
                    warn!(target: "ledger", ?doc, attempt, error = ?e, "ledger write failed, retrying");
                    // Blocking sleep: at most 150ms per write, and only on the worker
                    // driving this run. Runs never overlap.
                    std::thread::sleep(Duration::from_millis(50u64 << (attempt - 1)));
                }
            }
        }
    }
}

fn check_count(path: &Path, declared: Option<usize>, actual: usize) {
    if let Some(n) = declared {
        if n != actual {
            warn!(
                target: "ledger",
                path = %path.display(),
                declared = n,
                actual,
                "count field disagrees with array length; using array length"
            );
        }
    }
}

fn read_doc<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(s) if s.trim().is_empty() => Ok(T::default()),
        Ok(s) => serde_json::from_str(&s)
            .with_context(|| format!("parsing ledger file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("reading ledger file {}", path.display())),
    }
}

/// Serialize to a sibling temp file, fsync, then rename over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let json = serde_json::to_string_pretty(value).context("serializing ledger document")?;
    let temp_path = parent_dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("ledger"),
        std::process::id()
    ));

    let written = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&temp_path)?;
        f.write_all(json.as_bytes())?;
        f.write_all(b"\n")?;
        f.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("writing temp file {}", temp_path.display()));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!("renaming {} over {}", temp_path.display(), path.display())
        });
    }
    Ok(())
}
