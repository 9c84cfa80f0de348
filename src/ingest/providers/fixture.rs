use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::ingest::providers::event_registry::parse_events_response;
use crate::ingest::types::{
    Event, EventDetails, EventSource, RawEvent, SearchRequest, DEFAULT_LANG,
};

/// Serves canned events in the upstream response shape, for offline runs and tests.
pub struct FixtureSource {
    events: Vec<RawEvent>,
}

impl FixtureSource {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }

    /// Accepts a full `getEvents` response or a bare array of event records.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s).context("parsing fixture json")?;
        let events = match value {
            Value::Array(_) => serde_json::from_value(value).context("fixture event array")?,
            other => parse_events_response(other)?,
        };
        Ok(Self { events })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Self::from_json_str(&s)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventSource for FixtureSource {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RawEvent>> {
        Ok(self
            .events
            .iter()
            .take(request.count as usize)
            .cloned()
            .collect())
    }

    async fn event_details(&self, event_id: &str) -> Result<Option<EventDetails>> {
        Ok(self
            .events
            .iter()
            .filter(|r| r.uri.as_deref() == Some(event_id))
            .find_map(|r| Event::from_raw(r.clone(), DEFAULT_LANG))
            .map(|ev| EventDetails::from(&ev)))
    }

    fn name(&self) -> &'static str {
        "Fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::planner::{KeywordStrategy, QueryConfig, QuerySpec};

    const FIXTURE: &str = r#"{"events": {"results": [
        {"uri": "e1", "title": {"eng": "Bitcoin miners expand"}, "summary": {"eng": "Hashrate up"}},
        {"uri": "e2", "title": "Bitcoin ETF flows", "summary": ""}
    ]}}"#;

    #[tokio::test]
    async fn serves_up_to_requested_count() {
        let src = FixtureSource::from_json_str(FIXTURE).unwrap();
        assert_eq!(src.len(), 2);
        let req = QueryConfig::default().request_for(&QuerySpec {
            window_minutes: 30,
            strategy: KeywordStrategy::Narrow,
            count: 1,
        });
        assert_eq!(src.search(&req).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn details_lookup_by_id() {
        let src = FixtureSource::from_json_str(FIXTURE).unwrap();
        let d = src.event_details("e1").await.unwrap().unwrap();
        assert_eq!(d.title, "Bitcoin miners expand");
        assert!(src.event_details("nope").await.unwrap().is_none());
    }

    #[test]
    fn bare_array_is_accepted() {
        let src = FixtureSource::from_json_str(r#"[{"uri": "x"}]"#).unwrap();
        assert!(!src.is_empty());
    }
}
