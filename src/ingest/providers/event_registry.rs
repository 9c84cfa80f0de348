use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::ingest::types::{
    Event, EventDetails, EventSource, RawEvent, SearchRequest, DEFAULT_LANG,
};

pub const DEFAULT_BASE_URL: &str = "https://eventregistry.org";

#[derive(Debug, Deserialize)]
struct EventsEnvelope {
    #[serde(default)]
    events: Option<EventsPage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    results: Vec<RawEvent>,
}

/// Thin EventRegistry client. Sets no request timeout: deadlines belong to the caller.
pub struct EventRegistryClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl EventRegistryClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("EventRegistry API key is empty"));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("mining-news-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building EventRegistry http client")?;
        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request body for `getEvents`. The API filters by calendar date, so the window's
    /// start is rounded down to its day.
    pub fn search_body(&self, req: &SearchRequest, now: DateTime<Utc>) -> Value {
        let start = now - ChronoDuration::minutes(i64::from(req.window_minutes));

        let mut conditions = vec![
            req.keywords.to_query_json(),
            json!({
                "dateStart": start.format("%Y-%m-%d").to_string(),
                "dateEnd": now.format("%Y-%m-%d").to_string(),
            }),
            json!({ "lang": req.language }),
        ];
        if !req.excluded_terms.is_empty() {
            let excluded: Vec<Value> = req
                .excluded_terms
                .iter()
                .map(|t| json!({ "keyword": t }))
                .collect();
            conditions.push(json!({ "$not": { "$or": excluded } }));
        }

        json!({
            "apiKey": self.api_key,
            "query": {
                "$query": { "$and": conditions },
                "$filter": {
                    "minArticlesInEvent": req.min_articles,
                    "maxArticlesInEvent": req.max_articles,
                }
            },
            "resultType": "events",
            "eventsSortBy": req.sort_by.as_str(),
            "eventsCount": req.count,
            "eventsPage": 1,
        })
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        let status = resp.status();
        let text = resp.text().await.context("reading EventRegistry body")?;
        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(anyhow!("EventRegistry HTTP {status}: {snippet}"));
        }
        serde_json::from_str(&text).context("decoding EventRegistry response")
    }
}

/// Pull the result list out of a `getEvents` response.
pub fn parse_events_response(body: Value) -> Result<Vec<RawEvent>> {
    let env: EventsEnvelope =
        serde_json::from_value(body).context("unexpected EventRegistry response shape")?;
    if let Some(err) = env.error {
        return Err(anyhow!("EventRegistry error: {err}"));
    }
    Ok(env.events.map(|p| p.results).unwrap_or_default())
}

#[async_trait]
impl EventSource for EventRegistryClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RawEvent>> {
        let body = self.search_body(request, Utc::now());
        let value = self.post("/api/v1/event/getEvents", &body).await?;
        let events = parse_events_response(value)?;
        tracing::debug!(target: "event_registry", found = events.len(), "getEvents");
        Ok(events)
    }

    async fn event_details(&self, event_id: &str) -> Result<Option<EventDetails>> {
        let body = json!({
            "apiKey": self.api_key,
            "eventUri": event_id,
            "resultType": "info",
        });
        let value = self.post("/api/v1/event/getEvent", &body).await?;
        let Some(info) = value.get(event_id).and_then(|v| v.get("info")) else {
            return Ok(None);
        };
        let mut raw: RawEvent =
            serde_json::from_value(info.clone()).context("decoding event info")?;
        raw.uri.get_or_insert_with(|| event_id.to_string());
        Ok(Event::from_raw(raw, DEFAULT_LANG).map(|ev| EventDetails::from(&ev)))
    }

    fn name(&self) -> &'static str {
        "EventRegistry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::planner::{KeywordStrategy, QueryConfig, QuerySpec};
    use chrono::TimeZone;

    #[test]
    fn search_body_carries_window_and_filters() {
        let client = EventRegistryClient::new("k").unwrap();
        let query = QueryConfig {
            excluded_terms: vec!["ethereum".into()],
            ..Default::default()
        };
        let req = query.request_for(&QuerySpec {
            window_minutes: 2 * 24 * 60,
            strategy: KeywordStrategy::Broad,
            count: 15,
        });
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let body = client.search_body(&req, now);

        let and = body["query"]["$query"]["$and"].as_array().unwrap();
        assert_eq!(and[0]["$or"][0]["keyword"], "bitcoin mining");
        assert_eq!(and[1]["dateStart"], "2024-05-08");
        assert_eq!(and[1]["dateEnd"], "2024-05-10");
        assert_eq!(and[2]["lang"], "eng");
        assert_eq!(and[3]["$not"]["$or"][0]["keyword"], "ethereum");
        assert_eq!(body["query"]["$filter"]["maxArticlesInEvent"], 20);
        assert_eq!(body["eventsCount"], 15);
        assert_eq!(body["eventsSortBy"], "date");
    }

    #[test]
    fn parse_response_shapes() {
        let ok = json!({"events": {"results": [{"uri": "e1"}], "totalResults": 1}});
        assert_eq!(parse_events_response(ok).unwrap().len(), 1);

        let empty = json!({});
        assert!(parse_events_response(empty).unwrap().is_empty());

        let err = json!({"error": "invalid api key"});
        assert!(parse_events_response(err).is_err());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(EventRegistryClient::new("  ").is_err());
    }
}
