//! Configuration parsing and validation.
//!
//! Settings come from a TOML file (default `./config/rdx.toml`). Every
//! section and key is optional; a missing file yields the built-in defaults.
//! Endpoints and secrets can be overridden from the environment after the
//! file has been read:
//!
//! | Variable | Key |
//! |----------|-----|
//! | `REDDIT_CLIENT_ID` | `reddit.client_id` |
//! | `REDDIT_CLIENT_SECRET` | `reddit.client_secret` |
//! | `REDDIT_USER_AGENT` | `reddit.user_agent` |
//! | `QDRANT_URL` | `qdrant.url` |
//! | `QDRANT_API_KEY` | `qdrant.api_key` |
//! | `MEILI_URL` | `meili.url` |
//! | `MEILI_MASTER_KEY` | `meili.master_key` |
//! | `EMBEDDING_MODEL_ID` | `embedding.model` |
//! | `LOG_LEVEL` | `log.level` |
//!
//! # Example
//!
//! ```toml
//! [reddit]
//! client_id = "abc"
//! client_secret = "xyz"
//!
//! [embedding]
//! model = "local:BAAI/bge-small-en-v1.5"
//!
//! [index]
//! collection = "reddit_bge_small"
//! comments_limit = 20
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use reddit_index_core::sink::CommentOptions;
use reddit_index_core::thread::PlaceholderExpansion;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub meili: MeiliConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: default_user_agent(),
            auth_url: default_auth_url(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_user_agent() -> String {
    "reddit-mcp/0.1".to_string()
}
fn default_auth_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}
fn default_api_url() -> String {
    "https://oauth.reddit.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MeiliConfig {
    #[serde(default = "default_meili_url")]
    pub url: String,
    #[serde(default)]
    pub master_key: Option<String>,
    /// Set to `false` to skip the lexical store entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for `wait_for_task` polling.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for MeiliConfig {
    fn default() -> Self {
        Self {
            url: default_meili_url(),
            master_key: None,
            enabled: true,
            timeout_secs: default_timeout_secs(),
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_meili_url() -> String {
    "http://localhost:7700".to_string()
}
fn default_true() -> bool {
    true
}
fn default_wait_timeout_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Model reference, resolved by [`crate::embedding::resolve_model_ref`].
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector size for the OpenAI and Ollama providers. When unset it is
    /// taken from the first response.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            openai_url: default_openai_url(),
            ollama_url: default_ollama_url(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Collection (Qdrant) and index (Meilisearch) name. Keep one per
    /// embedding dimension.
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_true")]
    pub include_comments: bool,
    #[serde(default = "default_comments_limit")]
    pub comments_limit: Option<usize>,
    #[serde(default)]
    pub comment_sort: Option<String>,
    /// Maximum number of "more comments" placeholders to expand per post.
    /// Unset means no limit; `0` disables expansion.
    #[serde(default)]
    pub expand_more: Option<usize>,
    #[serde(default = "default_true")]
    pub wait_for_lexical: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            limit: default_limit(),
            include_comments: true,
            comments_limit: default_comments_limit(),
            comment_sort: None,
            expand_more: None,
            wait_for_lexical: true,
        }
    }
}

impl IndexConfig {
    pub fn comment_options(&self) -> CommentOptions {
        if !self.include_comments {
            return CommentOptions::none();
        }
        self.enabled_comment_options()
    }

    /// Comment options with comments switched on, regardless of
    /// `include_comments`. Used when a request asks for comments explicitly.
    pub fn enabled_comment_options(&self) -> CommentOptions {
        CommentOptions {
            include: true,
            comments_limit: self.comments_limit,
            comment_sort: self.comment_sort.clone(),
            expansion: PlaceholderExpansion::from_limit(self.expand_more),
        }
    }
}

fn default_collection() -> String {
    "reddit_mcp_posts".to_string()
}
fn default_limit() -> usize {
    10
}
fn default_comments_limit() -> Option<usize> {
    Some(50)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(v);
        }
        if let Some(v) = get("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(v);
        }
        if let Some(v) = get("REDDIT_USER_AGENT") {
            self.reddit.user_agent = v;
        }
        if let Some(v) = get("QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Some(v) = get("QDRANT_API_KEY") {
            self.qdrant.api_key = Some(v);
        }
        if let Some(v) = get("MEILI_URL") {
            self.meili.url = v;
        }
        if let Some(v) = get("MEILI_MASTER_KEY") {
            self.meili.master_key = Some(v);
        }
        if let Some(v) = get("EMBEDDING_MODEL_ID") {
            self.embedding.model = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log.level = v.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }
        if self.index.limit == 0 {
            bail!("index.limit must be >= 1");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }
        if self.meili.poll_interval_ms == 0 {
            bail!("meili.poll_interval_ms must be > 0");
        }
        Ok(())
    }
}

/// Parse a TOML document without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    Ok(config)
}

/// Load configuration from `path`, apply environment overrides and validate.
///
/// A missing file is not an error: the defaults are used instead.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env_with(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.qdrant.url, "http://localhost:6333");
        assert_eq!(config.meili.url, "http://localhost:7700");
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert_eq!(config.index.collection, "reddit_mcp_posts");
        assert_eq!(config.index.limit, 10);
        assert_eq!(config.reddit.user_agent, "reddit-mcp/0.1");

        let options = config.index.comment_options();
        assert!(options.include);
        assert_eq!(options.comments_limit, Some(50));
        assert_eq!(options.expansion, PlaceholderExpansion::Unlimited);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file() {
        let config = parse_config(
            r#"
            [index]
            collection = "bge_small"
            include_comments = false

            [meili]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.index.collection, "bge_small");
        assert_eq!(config.index.limit, 10);
        assert!(!config.index.comment_options().include);
        let enabled = config.index.enabled_comment_options();
        assert!(enabled.include);
        assert_eq!(enabled.comments_limit, Some(50));
        assert!(!config.meili.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REDDIT_CLIENT_ID", "id"),
            ("REDDIT_CLIENT_SECRET", "secret"),
            ("QDRANT_URL", "http://qdrant:6333"),
            ("MEILI_MASTER_KEY", "key"),
            ("EMBEDDING_MODEL_ID", "BAAI/bge-small-en-v1.5"),
            ("LOG_LEVEL", "DEBUG"),
            ("MEILI_URL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.reddit.client_id.as_deref(), Some("id"));
        assert_eq!(config.reddit.client_secret.as_deref(), Some("secret"));
        assert_eq!(config.qdrant.url, "http://qdrant:6333");
        assert_eq!(config.meili.master_key.as_deref(), Some("key"));
        assert_eq!(config.meili.url, "http://localhost:7700");
        assert_eq!(config.embedding.model, "BAAI/bge-small-en-v1.5");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.index.limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.index.collection = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.dims = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"0.0.0.0:9000\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/rdx.example.toml")).unwrap();
        assert_eq!(config.index.comments_limit, Some(50));
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(parse_config("[index\ncollection =").is_err());
    }
}
