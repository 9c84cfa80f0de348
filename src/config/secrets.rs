// src/config/secrets.rs
use std::env;

pub const ENV_EVENTREGISTRY_API_KEY: &str = "EVENTREGISTRY_API_KEY";
/// Older spelling still found in `.env` files.
pub const ENV_EVENTREGISTRY_API_KEY_ALIAS: &str = "EVENT_REGISTRY_API_KEY";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GEMINI_MODEL: &str = "GEMINI_MODEL";

/// API credentials resolved from the process environment (after `.env` is loaded).
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub event_registry: Option<String>,
    pub gemini: Option<String>,
    pub gemini_model: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    // Never print key material; key length is enough for diagnostics.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("event_registry_len", &self.event_registry.as_ref().map(String::len))
            .field("gemini_len", &self.gemini.as_ref().map(String::len))
            .field("gemini_model", &self.gemini_model)
            .finish()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ApiKeys {
    pub fn from_env() -> Self {
        Self {
            event_registry: non_empty_var(ENV_EVENTREGISTRY_API_KEY)
                .or_else(|| non_empty_var(ENV_EVENTREGISTRY_API_KEY_ALIAS)),
            gemini: non_empty_var(ENV_GEMINI_API_KEY),
            gemini_model: non_empty_var(ENV_GEMINI_MODEL),
        }
    }

    pub fn require_event_registry(&self) -> anyhow::Result<&str> {
        self.event_registry.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "Missing {ENV_EVENTREGISTRY_API_KEY} (or {ENV_EVENTREGISTRY_API_KEY_ALIAS}) env var"
            )
        })
    }

    pub fn require_gemini(&self) -> anyhow::Result<&str> {
        self.gemini
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Missing {ENV_GEMINI_API_KEY} env var"))
    }
}
