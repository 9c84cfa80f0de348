// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::planner::QueryConfig;
use crate::relevance::{clean_terms, RelevanceTerms};

pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";

/// Term lists and query strategies. Every table is optional; gaps use built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub relevance: RelevanceTerms,
    #[serde(default)]
    pub query: QueryConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        Ok(cfg.cleaned())
    }

    fn cleaned(mut self) -> Self {
        self.query.excluded_terms = clean_terms(&self.query.excluded_terms);
        self.query.language = self.query.language.trim().to_string();
        if self.query.language.is_empty() {
            self.query.language = crate::ingest::types::DEFAULT_LANG.to_string();
        }
        self
    }
}

/// Load config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading pipeline config from {}", path.display()))?;
    PipelineConfig::from_toml_str(&content)
        .with_context(|| format!("in {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $PIPELINE_CONFIG_PATH (must exist)
/// 2) config/pipeline.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<PipelineConfig> {
    if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!(
            "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path {}",
            pb.display()
        ));
    }
    let default_p = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
    if default_p.exists() {
        return load_config_from(&default_p);
    }
    tracing::debug!(target: "config", "no pipeline config file, using built-in terms");
    Ok(PipelineConfig::default())
}
