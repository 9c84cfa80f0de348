// src/generate/gemini.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::generate::{Article, ArticleGenerator};
use crate::ingest::types::EventDetails;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` client. Requires `GEMINI_API_KEY`.
pub struct GeminiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("Gemini API key is empty"));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("mining-news-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .context("building Gemini http client")?;
        Ok(Self {
            http,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Journalist prompt asking for a single JSON object with the `Article` keys.
pub fn build_prompt(details: &EventDetails) -> String {
    let or_na = |s: &str| if s.trim().is_empty() { "N/A".to_string() } else { s.to_string() };
    format!(
        r#"Act as a senior financial journalist with a writing style that blends the analytical depth of The Wall Street Journal with the global perspective of The Financial Times.

Your task is to generate a comprehensive news article based on the following event data:
- Event Title: {title}
- Event Summary: {summary}
- Key Concepts: {concepts}

Generate the article in a structured JSON format. The JSON object must contain the following keys: "headline", "summary", "key_points", "body", "tags", "reflection_questions", "calls_to_action".

Follow these specific instructions:
1. Headline (`headline`): Create a compelling, professional headline.
2. Summary (`summary`): Write a concise, one-paragraph summary that encapsulates the most critical information.
3. Key Points (`key_points`): Provide a list of 3-5 bullet points highlighting the main takeaways.
4. Body (`body`): Write a detailed, multi-paragraph article separated by blank lines. Provide context and link to relevant market trends where appropriate. Avoid speculation; ground every claim in the provided data and state inferred connections cautiously.
5. Tags (`tags`): Generate a list of relevant lowercase keywords for categorization (e.g. "bitcoin-mining", "market-analysis").
6. Reflection Questions (`reflection_questions`): Create 2-3 thought-provoking questions about the topic's implications.
7. Calls to Action (`calls_to_action`): Formulate 1-2 calls to action prompting readers to engage.

Ensure the entire output is a single, valid JSON object. Do not include any text or formatting outside of the JSON structure."#,
        title = or_na(&details.title),
        summary = or_na(&details.summary),
        concepts = details.concepts.join(", "),
    )
}

/// Strip markdown code fences and parse the model reply as an `Article`.
pub fn parse_article_reply(text: &str) -> Result<Article, String> {
    let cleaned = text
        .trim()
        .replace("```json", "")
        .replace("```", "");
    let article: Article = serde_json::from_str(cleaned.trim())
        .map_err(|e| format!("model reply is not a valid article JSON: {e}"))?;
    if article.headline.trim().is_empty() && article.body.trim().is_empty() {
        return Err("model reply has neither headline nor body".to_string());
    }
    Ok(article)
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}
#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
struct Req<'a> {
    contents: Vec<Content<'a>>,
}
#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}
#[derive(Deserialize)]
struct Candidate {
    content: Option<RespContent>,
}
#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}
#[derive(Deserialize)]
struct RespPart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ArticleGenerator for GeminiGenerator {
    async fn generate(&self, event_id: &str, details: &EventDetails) -> Result<Article, String> {
        let prompt = build_prompt(details);
        let req = Req {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
        };
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        tracing::debug!(target: "generate", %event_id, model = %self.model, "calling Gemini");

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| format!("Gemini request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(format!("Gemini HTTP {status}: {snippet}"));
        }
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| format!("Gemini response decode failed: {e}"))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err("Gemini returned no text".to_string());
        }
        parse_article_reply(&text)
    }

    fn name(&self) -> &'static str {
        "Gemini"
    }
}
