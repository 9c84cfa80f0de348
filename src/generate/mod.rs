//! Downstream consumer: turns queued event ids into article files and records the outcome.

pub mod gemini;
pub mod thread;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ingest::types::{EventDetails, EventSource};
use crate::ledger::{write_json_atomic, DedupLedger, Outcome};

/// Longest filename stem derived from a headline.
const MAX_STEM_CHARS: usize = 100;

/// Structured article as returned by a generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reflection_questions: Vec<String>,
    #[serde(default)]
    pub calls_to_action: Vec<String>,
}

/// Article file on disk: provenance fields followed by the article itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub source_event_uri: String,
    pub generated_at: String,
    #[serde(flatten)]
    pub article: Article,
}

/// Event id plus details in, article or failure reason out.
#[async_trait]
pub trait ArticleGenerator: Send + Sync {
    async fn generate(&self, event_id: &str, details: &EventDetails) -> Result<Article, String>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeOutcome {
    QueueEmpty,
    AllFailed,
    Completed,
    Partial,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumeReport {
    pub processed: Vec<String>,
    pub failed: Vec<String>,
    pub remaining: Vec<String>,
    pub articles: Vec<PathBuf>,
}

impl ConsumeReport {
    pub fn outcome(&self) -> ConsumeOutcome {
        match (self.processed.is_empty(), self.failed.is_empty()) {
            (true, true) => ConsumeOutcome::QueueEmpty,
            (true, false) => ConsumeOutcome::AllFailed,
            (false, true) => ConsumeOutcome::Completed,
            (false, false) => ConsumeOutcome::Partial,
        }
    }
}

/// Lowercase, hyphenate whitespace, drop anything outside `[a-z0-9_-]`, cap, add `.json`.
pub fn sanitize_filename(headline: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());

    let lowered = headline.trim().to_lowercase();
    let hyphenated = re_ws.replace_all(&lowered, "-");
    let stem: String = hyphenated
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .take(MAX_STEM_CHARS)
        .collect();
    if stem.is_empty() {
        "article.json".to_string()
    } else {
        format!("{stem}.json")
    }
}

/// First free `stem.json`, `stem-2.json`, ... in `dir`.
fn unique_article_path(dir: &Path, file_name: &str) -> PathBuf {
    let first = dir.join(file_name);
    if !first.exists() {
        return first;
    }
    let stem = file_name.trim_end_matches(".json");
    (2u32..)
        .map(|n| dir.join(format!("{stem}-{n}.json")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Write one article file and return its path.
pub fn write_article(dir: &Path, event_id: &str, article: Article) -> Result<PathBuf> {
    let headline = if article.headline.trim().is_empty() {
        format!("article-{event_id}")
    } else {
        article.headline.clone()
    };
    let path = unique_article_path(dir, &sanitize_filename(&headline));
    let record = ArticleRecord {
        source_event_uri: event_id.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        article,
    };
    write_json_atomic(&path, &record)?;
    Ok(path)
}

async fn produce_one(
    event_id: &str,
    generator: &dyn ArticleGenerator,
    details_source: &dyn EventSource,
    articles_dir: &Path,
) -> Result<PathBuf, String> {
    let details = match details_source.event_details(event_id).await {
        Ok(Some(d)) => d,
        Ok(None) => return Err("no event information found".to_string()),
        Err(e) => return Err(format!("event details: {e:#}")),
    };
    let article = generator.generate(event_id, &details).await?;
    write_article(articles_dir, event_id, article).map_err(|e| format!("{e:#}"))
}

/// Work through a snapshot of the queue in order.
///
/// A per-event failure is recorded and processing moves on. A ledger write failure
/// stops the run and is returned.
pub async fn process_queue(
    ledger: &mut DedupLedger,
    generator: &dyn ArticleGenerator,
    details_source: &dyn EventSource,
    articles_dir: &Path,
) -> Result<ConsumeReport> {
    crate::ingest::ensure_metrics_described();
    let snapshot = ledger.queue().to_vec();
    let mut report = ConsumeReport::default();
    if snapshot.is_empty() {
        info!(target: "generate", "queue empty, nothing to generate");
        return Ok(report);
    }
    info!(
        target: "generate",
        queued = snapshot.len(),
        generator = generator.name(),
        "generating articles"
    );

    for id in &snapshot {
        match produce_one(id, generator, details_source, articles_dir).await {
            Ok(path) => {
                ledger.mark_outcome(id, Outcome::Processed, "")?;
                counter!("generate_processed_total").increment(1);
                info!(target: "generate", %id, file = %path.display(), "article written");
                report.processed.push(id.clone());
                report.articles.push(path);
            }
            Err(reason) => {
                ledger.mark_outcome(id, Outcome::Failed, &reason)?;
                counter!("generate_failed_total").increment(1);
                warn!(target: "generate", %id, error = %reason, "generation failed");
                report.failed.push(id.clone());
            }
        }
    }

    report.remaining = ledger.queue().to_vec();
    info!(
        target: "generate",
        processed = report.processed.len(),
        failed = report.failed.len(),
        remaining = report.remaining.len(),
        "generation finished"
    );
    Ok(report)
}
