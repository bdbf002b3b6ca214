//! Runtime configuration: YAML file plus environment overrides.
//!
//! The whole config is loaded once per process and treated as an immutable
//! snapshot for every cycle; nothing in the pipeline reads it from a global.

use std::path::Path;

use anyhow::{Context, Result};
use jobwatch_adapters::{FetchQuery, SourceSpec};
use jobwatch_core::ScoringConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Search terms forwarded to sources that support them.
    #[serde(default)]
    pub query: FetchQuery,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// How many source adapters may fetch at once.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Per-source fetch deadline; a slow adapter is cut off and counted as
    /// an error without blocking the rest of the cycle.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Six-field cron expression for daemon-mode polling.
    #[serde(default = "default_poll_cron")]
    pub poll_cron: String,
    /// Six-field cron expression for the daemon's digest flush.
    #[serde(default = "default_digest_cron")]
    pub digest_cron: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            scoring: ScoringConfig::default(),
            query: FetchQuery::default(),
            database_url: default_database_url(),
            slack_webhook_url: None,
            fetch_concurrency: default_fetch_concurrency(),
            source_timeout_secs: default_source_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            poll_cron: default_poll_cron(),
            digest_cron: default_digest_cron(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Label used in reports and logs, e.g. `"greenhouse:acme"`.
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub spec: SourceSpec,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Self =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(url) = std::env::var("JOBWATCH_SLACK_WEBHOOK") {
            self.slack_webhook_url = Some(url);
        }
        if let Ok(agent) = std::env::var("JOBWATCH_USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(secs) = std::env::var("JOBWATCH_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.http_timeout_secs = secs;
        }
    }
}

fn default_database_url() -> String {
    "sqlite://jobwatch.db".to_string()
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_source_timeout_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    "jobwatch/0.1".to_string()
}

fn default_poll_cron() -> String {
    // Every 30 minutes.
    "0 */30 * * * *".to_string()
}

fn default_digest_cron() -> String {
    // Daily at 18:00.
    "0 0 18 * * *".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
sources:
  - name: "greenhouse:acme"
    kind: greenhouse
    board: acme
  - name: "lever:globex"
    kind: lever
    site: globex
    timeout_secs: 10
  - name: jobswithgpt
    kind: jobs_with_gpt
    enabled: false
scoring:
  title_allowlist: ["Rust Engineer"]
  company_denylist: ["Hooli"]
  location_preferences:
    allow_remote: true
    states: ["OR"]
  immediate_alert_threshold: 0.92
query:
  keywords: ["rust", "distributed systems"]
slack_webhook_url: "https://hooks.slack.com/services/T/B/x"
"#;

    #[test]
    fn yaml_config_parses_sources_and_scoring() {
        let config: PipelineConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert!(config.sources[0].enabled);
        assert!(!config.sources[2].enabled);
        assert_eq!(config.sources[1].timeout_secs, Some(10));
        assert_eq!(config.scoring.immediate_alert_threshold, 0.92);
        assert_eq!(config.scoring.company_denylist, vec!["Hooli"]);
        assert_eq!(config.query.keywords.len(), 2);
        assert_eq!(config.database_url, "sqlite://jobwatch.db");
        match &config.sources[1].spec {
            jobwatch_adapters::SourceSpec::Lever { site } => assert_eq!(site, "globex"),
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn defaults_cover_an_empty_config() {
        let config: PipelineConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.fetch_concurrency, 4);
        assert_eq!(config.source_timeout_secs, 30);
        assert_eq!(config.scoring.digest_min_score, 0.7);
    }
}
