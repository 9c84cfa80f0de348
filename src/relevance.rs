// src/relevance.rs
//! Relevance gate: subject terms define the domain, modifier terms the sub-topic,
//! and competing-subject terms veto stories that are really about an adjacent topic.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ingest::types::Event;

/// Term lists as configured (`[relevance]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceTerms {
    #[serde(default = "default_subject")]
    pub subject: Vec<String>,
    #[serde(default = "default_modifier")]
    pub modifier: Vec<String>,
    #[serde(default = "default_competing")]
    pub competing: Vec<String>,
    /// Disable to keep events even when competing subjects dominate.
    #[serde(default = "default_true")]
    pub exclude_competing: bool,
}

fn default_subject() -> Vec<String> {
    vec!["bitcoin".into()]
}

fn default_modifier() -> Vec<String> {
    ["mining", "miner", "hashrate", "hash rate", "asic"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_competing() -> Vec<String> {
    [
        "ethereum",
        "eth",
        "bitcoin cash",
        "bch",
        "litecoin",
        "ltc",
        "dogecoin",
        "doge",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

impl Default for RelevanceTerms {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            modifier: default_modifier(),
            competing: default_competing(),
            exclude_competing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    EmptyText,
    NoSubject,
    NoModifier,
    CompetingSubject { subject: usize, competing: usize },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::EmptyText => f.write_str("empty_text"),
            RejectReason::NoSubject => f.write_str("no_subject"),
            RejectReason::NoModifier => f.write_str("no_modifier"),
            RejectReason::CompetingSubject { subject, competing } => {
                write!(f, "competing:{competing}>={subject}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Candidate,
    Rejected(RejectReason),
}

/// Result of relevance evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relevance {
    pub verdict: Verdict,
    /// Modifier-term hit count. Orders candidates; never gates them.
    pub score: u32,
    pub matched: Vec<String>,
    pub subject_hits: usize,
    pub competing_hits: usize,
}

impl Relevance {
    fn rejected(reason: RejectReason) -> Self {
        Self {
            verdict: Verdict::Rejected(reason),
            score: 0,
            matched: Vec::new(),
            subject_hits: 0,
            competing_hits: 0,
        }
    }

    pub fn is_candidate(&self) -> bool {
        self.verdict == Verdict::Candidate
    }
}

#[derive(Debug)]
struct CompetingTerm {
    term: String,
    re: Regex,
}

/// Compiled filter. Cheap to share by reference; holds no mutable state.
#[derive(Debug)]
pub struct RelevanceFilter {
    subject: Vec<String>,
    modifier: Vec<String>,
    competing: Vec<CompetingTerm>,
    exclude_competing: bool,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::new(&RelevanceTerms::default()).expect("built-in relevance terms compile")
    }
}

/// Lowercase, trim and de-duplicate, keeping first-seen order.
/// Trim, lower-case and de-duplicate, keeping first-seen order.
pub(crate) fn clean_terms(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

impl RelevanceFilter {
    pub fn new(terms: &RelevanceTerms) -> anyhow::Result<Self> {
        let subject = clean_terms(&terms.subject);
        let modifier = clean_terms(&terms.modifier);
        if subject.is_empty() || modifier.is_empty() {
            anyhow::bail!("relevance config needs at least one subject and one modifier term");
        }

        // Competing terms are often short tickers ("eth", "ltc"); whole-word
        // matching keeps them from firing inside unrelated words.
        let competing = clean_terms(&terms.competing)
            .into_iter()
            .map(|term| {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&term)))
                    .map_err(|e| anyhow::anyhow!("competing term `{term}` regex error: {e}"))?;
                Ok(CompetingTerm { term, re })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            subject,
            modifier,
            competing,
            exclude_competing: terms.exclude_competing,
        })
    }

    /// Score an event on its title and summary.
    pub fn evaluate(&self, ev: &Event) -> Relevance {
        let rel = self.score_text(&ev.title, &ev.summary);
        dev_log_relevance(ev, &rel);
        rel
    }

    pub fn score_text(&self, title: &str, summary: &str) -> Relevance {
        if title.trim().is_empty() && summary.trim().is_empty() {
            return Relevance::rejected(RejectReason::EmptyText);
        }
        let text = format!("{title} {summary}").to_lowercase();

        let mut matched = Vec::new();
        let mut subject_hits = 0usize;
        for term in &self.subject {
            let n = text.matches(term.as_str()).count();
            if n > 0 {
                subject_hits += n;
                matched.push(term.clone());
            }
        }
        if subject_hits == 0 {
            return Relevance::rejected(RejectReason::NoSubject);
        }

        let mut modifier_hits = 0usize;
        for term in &self.modifier {
            let n = text.matches(term.as_str()).count();
            if n > 0 {
                modifier_hits += n;
                matched.push(term.clone());
            }
        }
        if modifier_hits == 0 {
            return Relevance::rejected(RejectReason::NoModifier);
        }

        let competing_hits: usize = self
            .competing
            .iter()
            .map(|c| c.re.find_iter(&text).count())
            .sum();
        if self.exclude_competing && competing_hits > 0 && subject_hits <= competing_hits {
            return Relevance {
                competing_hits,
                subject_hits,
                ..Relevance::rejected(RejectReason::CompetingSubject {
                    subject: subject_hits,
                    competing: competing_hits,
                })
            };
        }

        Relevance {
            verdict: Verdict::Candidate,
            score: u32::try_from(modifier_hits).unwrap_or(u32::MAX),
            matched,
            subject_hits,
            competing_hits,
        }
    }

    /// Competing terms that occur in `text`, for diagnostics.
    pub fn competing_in(&self, text: &str) -> Vec<&str> {
        self.competing
            .iter()
            .filter(|c| c.re.is_match(text))
            .map(|c| c.term.as_str())
            .collect()
    }
}

// Short, non-reversible fingerprint so logs never carry raw article text.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn dev_log_relevance(ev: &Event, rel: &Relevance) {
    if !tracing::enabled!(target: "relevance", tracing::Level::DEBUG) {
        return;
    }
    let fingerprint = anon_hash(&format!("{} {}", ev.title, ev.summary));
    let verdict = match &rel.verdict {
        Verdict::Candidate => "candidate".to_string(),
        Verdict::Rejected(r) => r.to_string(),
    };
    debug!(
        target: "relevance",
        event = %ev.id,
        %fingerprint,
        %verdict,
        score = rel.score,
        matched = ?rel.matched
    );
}

/* ----------------------------
Tests
---------------------------- */
