// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::ingest::normalize_text;
use crate::ingest::planner::KeywordExpr;

/// Language preferred when a multi-language field lacks the requested one.
pub const DEFAULT_LANG: &str = "eng";

/// Upstream text fields arrive missing, as a bare string, or keyed by language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    #[default]
    Absent,
    Single(String),
    Multi(BTreeMap<String, String>),
}

impl LocalizedText {
    /// One canonical, normalized string: requested language, then `eng`, then any non-empty value.
    pub fn canonical(&self, lang: &str) -> String {
        let raw = match self {
            LocalizedText::Absent => return String::new(),
            LocalizedText::Single(s) => s.as_str(),
            LocalizedText::Multi(by_lang) => {
                let non_empty = |s: &&String| !s.trim().is_empty();
                by_lang
                    .get(lang)
                    .filter(non_empty)
                    .or_else(|| by_lang.get(DEFAULT_LANG).filter(non_empty))
                    .or_else(|| by_lang.values().find(non_empty))
                    .map(String::as_str)
                    .unwrap_or_default()
            }
        };
        normalize_text(raw)
    }

    pub fn is_blank(&self) -> bool {
        match self {
            LocalizedText::Absent => true,
            LocalizedText::Single(s) => s.trim().is_empty(),
            LocalizedText::Multi(m) => m.values().all(|s| s.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLabel {
    #[serde(default)]
    pub label: LocalizedText,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleCounts {
    #[serde(default)]
    pub total: Option<u64>,
}

/// One event record as the search API returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub summary: LocalizedText,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub concepts: Vec<RawLabel>,
    #[serde(default)]
    pub article_counts: ArticleCounts,
    #[serde(default)]
    pub location: Option<RawLabel>,
    /// Upstream-computed relevance weight.
    #[serde(default)]
    pub wgt: Option<f64>,
}

/// A story cluster. Identity is `id` alone; the other fields are a best-effort cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub article_count: Option<u64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub source_weight: Option<f64>,
    /// Modifier-term hit count, filled in by the relevance filter.
    #[serde(default)]
    pub relevance: Option<u32>,
}

impl Event {
    /// Normalize a raw record. Records without an identifier are dropped.
    pub fn from_raw(raw: RawEvent, lang: &str) -> Option<Self> {
        let id = raw.uri.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())?;
        let concepts = raw
            .concepts
            .iter()
            .map(|c| c.label.canonical(lang))
            .filter(|l| !l.is_empty())
            .take(5)
            .collect();
        let location = raw
            .location
            .map(|l| l.label.canonical(lang))
            .filter(|l| !l.is_empty());

        Some(Self {
            id,
            title: raw.title.canonical(lang),
            summary: raw.summary.canonical(lang),
            concepts,
            article_count: raw.article_counts.total,
            location,
            event_date: raw.event_date,
            source_weight: raw.wgt,
            relevance: None,
        })
    }

    /// Identifier-only event (dry runs, queue entries without cached details).
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Date,
    Rel,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Date => "date",
            SortOrder::Rel => "rel",
        }
    }
}

/// Fully resolved upstream search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub keywords: KeywordExpr,
    pub excluded_terms: Vec<String>,
    pub window_minutes: u32,
    pub language: String,
    pub min_articles: u32,
    pub max_articles: u32,
    pub sort_by: SortOrder,
    pub count: u32,
}

/// Details handed to the article generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventDetails {
    pub title: String,
    pub summary: String,
    pub concepts: Vec<String>,
}

impl From<&Event> for EventDetails {
    fn from(ev: &Event) -> Self {
        Self {
            title: ev.title.clone(),
            summary: ev.summary.clone(),
            concepts: ev.concepts.clone(),
        }
    }
}

/// The upstream search API. Offers no timeout of its own; callers impose deadlines.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RawEvent>>;

    /// Look up a single event for the generation stage. Sources without detail lookup return `None`.
    async fn event_details(&self, _event_id: &str) -> Result<Option<EventDetails>> {
        Ok(None)
    }

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localized_text_prefers_requested_then_eng() {
        let t: LocalizedText =
            serde_json::from_str(r#"{"deu": "Bitcoin Mining", "eng": "Bitcoin mining"}"#).unwrap();
        assert_eq!(t.canonical("deu"), "Bitcoin Mining");
        assert_eq!(t.canonical("spa"), "Bitcoin mining");

        let single: LocalizedText = serde_json::from_str(r#""  plain &amp; simple ""#).unwrap();
        assert_eq!(single.canonical("eng"), "plain & simple");

        let absent: LocalizedText = serde_json::from_str("null").unwrap();
        assert_eq!(absent, LocalizedText::Absent);
        assert!(absent.is_blank());
    }

    #[test]
    fn raw_event_without_uri_is_dropped() {
        let raw: RawEvent = serde_json::from_str(r#"{"title": {"eng": "x"}}"#).unwrap();
        assert!(Event::from_raw(raw, DEFAULT_LANG).is_none());
    }

    #[test]
    fn raw_event_maps_cached_fields() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "uri": "eng-123",
                "title": {"eng": "Hashrate hits record"},
                "summary": "Miners <b>expand</b>",
                "concepts": [{"label": {"eng": "Bitcoin"}}, {"label": {"eng": ""}}],
                "articleCounts": {"total": 12, "eng": 9},
                "location": {"label": {"eng": "Texas"}},
                "wgt": 41.5
            }"#,
        )
        .unwrap();
        let ev = Event::from_raw(raw, DEFAULT_LANG).unwrap();
        assert_eq!(ev.id, "eng-123");
        assert_eq!(ev.summary, "Miners expand");
        assert_eq!(ev.concepts, vec!["Bitcoin".to_string()]);
        assert_eq!(ev.article_count, Some(12));
        assert_eq!(ev.location.as_deref(), Some("Texas"));
        assert_eq!(ev, Event::placeholder("eng-123"));
    }
}
