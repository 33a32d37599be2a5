//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`** — runs models locally via fastembed; no network calls after model download.
//! - **[`MockProvider`]** — deterministic hashed vectors, for tests and offline runs.
//!
//! # Model references
//!
//! A model reference is a plain string. [`resolve_model_ref`] normalizes a
//! configured model id, and [`provider_for_ref`] builds the provider:
//!
//! | Reference | Provider |
//! |-----------|----------|
//! | `local:<name>` | `LocalProvider` |
//! | `<org>/<name>` (Hugging Face id) | `LocalProvider` (rewritten to `local:<org>/<name>`) |
//! | `ollama:<model>` | [`OllamaProvider`] |
//! | `mock`, `default` | [`MockProvider`] |
//! | anything else | [`OpenAIProvider`] |
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Prefix marking a locally executed model.
pub const LOCAL_PREFIX: &str = "local:";
/// Prefix marking a model served by Ollama.
pub const OLLAMA_PREFIX: &str = "ollama:";

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Normalize a configured embedding model id into a model reference.
///
/// ```rust
/// use reddit_index::embedding::resolve_model_ref;
///
/// assert_eq!(resolve_model_ref("local:bge-small-en-v1.5"), "local:bge-small-en-v1.5");
/// assert_eq!(resolve_model_ref("BAAI/bge-small-en-v1.5"), "local:BAAI/bge-small-en-v1.5");
/// assert_eq!(resolve_model_ref("text-embedding-3-large"), "text-embedding-3-large");
/// ```
pub fn resolve_model_ref(model_id: &str) -> String {
    let model_id = model_id.trim();
    if model_id.starts_with(LOCAL_PREFIX) {
        model_id.to_string()
    } else if model_id.contains('/') && !model_id.starts_with(OLLAMA_PREFIX) {
        format!("{}{}", LOCAL_PREFIX, model_id)
    } else {
        model_id.to_string()
    }
}

/// Build the provider for a model reference.
///
/// # Errors
///
/// Returns an error for unknown local models, when the local provider is
/// not compiled in, or when `OPENAI_API_KEY` is missing for an OpenAI model.
pub fn provider_for_ref(
    model_ref: &str,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    if let Some(name) = model_ref.strip_prefix(LOCAL_PREFIX) {
        return local_provider(name, config);
    }
    if let Some(model) = model_ref.strip_prefix(OLLAMA_PREFIX) {
        return Ok(Arc::new(OllamaProvider::new(model, config)?));
    }
    match model_ref {
        "mock" | "default" => Ok(Arc::new(MockProvider::new(
            config.dims.unwrap_or(MockProvider::DEFAULT_DIMS),
        ))),
        "" => bail!("Empty embedding model reference"),
        model => Ok(Arc::new(OpenAIProvider::new(model, config)?)),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_provider(name: &str, config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(LocalProvider::new(name, config)?))
}

#[cfg(not(feature = "local-embeddings-fastembed"))]
fn local_provider(name: &str, _config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    bail!(
        "Local embedding model '{}' requires --features local-embeddings-fastembed",
        name
    )
}

/// Embed `texts` in batches of `batch_size`.
///
/// Verifies that the provider returned one vector per input.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = provider.embed(batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding provider '{}' returned {} vectors for {} texts",
                provider.model_name(),
                vectors.len(),
                batch.len()
            );
        }
        out.extend(vectors);
    }
    Ok(out)
}

// ============ Shared retry loop ============

/// POST `body` to `url`, retrying 429/5xx and network errors with backoff.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    service: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", service, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", service)))
}

fn json_vector(value: &Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {openai_url}/embeddings`. Requires the `OPENAI_API_KEY`
/// environment variable. When `embedding.dims` is set it is sent as the
/// `dimensions` request parameter.
pub struct OpenAIProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(model, api_key, config)
    }

    pub fn with_api_key(
        model: &str,
        api_key: impl Into<String>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: model.to_string(),
            dims: config.dims,
            url: format!("{}/embeddings", config.openai_url.trim_end_matches('/')),
            api_key: api_key.into(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // The API rejects empty strings.
        let input: Vec<&str> = texts
            .iter()
            .map(|t| if t.is_empty() { " " } else { t.as_str() })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        if let Some(dims) = self.dims {
            body["dimensions"] = serde_json::json!(dims);
        }

        let json = post_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, json_vector(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST {ollama_url}/api/embed`. Requires Ollama to be running with
/// the embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        if model.trim().is_empty() {
            bail!("ollama model name must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: model.to_string(),
            url: format!("{}/api/embed", config.ollama_url.trim_end_matches('/')),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json =
            post_with_retry(&self.client, &self.url, None, &body, self.max_retries, "Ollama")
                .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings.iter().map(json_vector).collect()
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
type SharedModel = Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>;

/// Embedding provider for local inference via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached, then
/// reused for every later call.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    batch_size: usize,
    loaded: SharedModel,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(name: &str, config: &EmbeddingConfig) -> Result<Self> {
        let model_name = local_model_name(name);
        let model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let loaded = self.loaded.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let init = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(init);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local embedding model not initialized"))?;
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Reduce a Hugging Face id (`BAAI/bge-small-en-v1.5`) to the short,
/// lower-case model name.
pub fn local_model_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_lowercase()
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

// ============ Mock Provider ============

/// Deterministic provider: hashes whitespace-separated tokens into a fixed
/// number of buckets and L2-normalizes the result. Equal texts always get
/// equal vectors; no network or model download.
pub struct MockProvider {
    dims: usize,
}

impl MockProvider {
    pub const DEFAULT_DIMS: usize = 64;

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            // Qdrant rejects zero vectors under cosine distance.
            v[0] = 1.0;
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            openai_url: format!("{}/v1", server.uri()),
            ollama_url: server.uri(),
            max_retries: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_model_ref() {
        assert_eq!(resolve_model_ref("local:all-minilm-l6-v2"), "local:all-minilm-l6-v2");
        assert_eq!(
            resolve_model_ref("sentence-transformers/all-MiniLM-L6-v2"),
            "local:sentence-transformers/all-MiniLM-L6-v2"
        );
        assert_eq!(resolve_model_ref("text-embedding-3-large"), "text-embedding-3-large");
        assert_eq!(resolve_model_ref("default"), "default");
        assert_eq!(resolve_model_ref("ollama:nomic-embed-text"), "ollama:nomic-embed-text");
    }

    #[test]
    fn test_local_model_name() {
        assert_eq!(local_model_name("BAAI/bge-small-en-v1.5"), "bge-small-en-v1.5");
        assert_eq!(
            local_model_name("sentence-transformers/all-MiniLM-L6-v2"),
            "all-minilm-l6-v2"
        );
        assert_eq!(local_model_name("bge-base-en-v1.5"), "bge-base-en-v1.5");
    }

    #[test]
    fn test_provider_for_ref_mock() {
        let provider = provider_for_ref("mock", &EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "mock");
        assert!(provider_for_ref("", &EmbeddingConfig::default()).is_err());
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[test]
    fn test_unknown_local_model() {
        let err = match provider_for_ref("local:no-such-model", &EmbeddingConfig::default()) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Unknown local embedding model"));
    }

    #[tokio::test]
    async fn test_mock_is_deterministic_and_normalized() {
        let provider = MockProvider::new(8);
        let texts = vec!["hello world".to_string(), "".to_string(), "hello world".to_string()];
        let vectors = provider.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert!(vectors.iter().all(|v| v.len() == 8));
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(vectors[1][0], 1.0);
    }

    #[tokio::test]
    async fn test_embed_batched_splits_requests() {
        let provider = MockProvider::new(4);
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let vectors = embed_batched(&provider, &texts, 2).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[3], provider.vector("text 3"));
    }

    #[tokio::test]
    async fn test_openai_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["a", " "]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            OpenAIProvider::with_api_key("text-embedding-3-small", "sk-test", &config_for(&server))
                .unwrap();
        let vectors = provider
            .embed(&["a".to_string(), String::new()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_openai_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_api_key("m", "k", &config_for(&server)).unwrap();
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_ollama_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.5, 0.5, 0.5]]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new("nomic-embed-text", &config_for(&server)).unwrap();
        let vectors = provider.embed(&["x".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5, 0.5]]);
    }
}
