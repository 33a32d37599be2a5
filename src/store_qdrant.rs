//! Qdrant vector sink.
//!
//! Embeds document texts with the provider named by the model reference and
//! upserts one point per document over Qdrant's REST API:
//!
//! 1. embed all texts (batched, see [`crate::embedding::embed_batched`]);
//! 2. `GET /collections/{c}`: create the collection on 404 with cosine
//!    distance and the produced dimension, or fail when an existing
//!    collection has a different vector size;
//! 3. `PUT /collections/{c}/points?wait=true`.
//!
//! Point ids are UUID v5 of the document id, so indexing the same document
//! again overwrites its point. The payload holds the document metadata plus
//! `doc_id` and `text`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use reddit_index_core::models::EmbeddingDocument;
use reddit_index_core::sink::VectorSink;

use crate::config::{EmbeddingConfig, QdrantConfig};
use crate::embedding::{embed_batched, provider_for_ref, EmbeddingProvider};

/// Stable point id for a document id.
pub fn point_id(doc_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes())
}

/// Qdrant REST client implementing [`VectorSink`].
pub struct QdrantSink {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    embedding: EmbeddingConfig,
    providers: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl QdrantSink {
    pub fn new(config: &QdrantConfig, embedding: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedding: embedding.clone(),
            providers: Mutex::new(HashMap::new()),
        })
    }

    /// Provider for `model_ref`, built once and reused.
    fn provider(&self, model_ref: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut providers = self
            .providers
            .lock()
            .map_err(|_| anyhow!("embedding provider cache lock poisoned"))?;
        if let Some(p) = providers.get(model_ref) {
            return Ok(p.clone());
        }
        let provider = provider_for_ref(model_ref, &self.embedding)?;
        providers.insert(model_ref.to_string(), provider.clone());
        Ok(provider)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Make sure `collection` exists with vectors of size `dims`.
    pub async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let path = format!("/collections/{}", collection);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .with_context(|| format!("Qdrant unreachable at {}", self.url))?;

        match response.status().as_u16() {
            200 => {
                let info: Value = response.json().await?;
                match existing_vector_size(&info) {
                    Some(size) if size != dims => bail!(
                        "Qdrant collection '{}' expects vectors of dimension {}, model produced {}",
                        collection,
                        size,
                        dims
                    ),
                    _ => Ok(()),
                }
            }
            404 => {
                let response = self
                    .request(reqwest::Method::PUT, &path)
                    .json(&json!({ "vectors": { "size": dims, "distance": "Cosine" } }))
                    .send()
                    .await?;
                let status = response.status();
                // 409: created concurrently by another writer.
                if !status.is_success() && status.as_u16() != 409 {
                    let body = response.text().await.unwrap_or_default();
                    bail!("Qdrant create collection '{}' failed ({}): {}", collection, status, body);
                }
                tracing::info!(collection, dims, "created Qdrant collection");
                Ok(())
            }
            _ => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("Qdrant collection lookup failed ({}): {}", status, body)
            }
        }
    }
}

/// Vector size of a collection description, for an unnamed vector config.
fn existing_vector_size(info: &Value) -> Option<usize> {
    info.pointer("/result/config/params/vectors/size")
        .and_then(|s| s.as_u64())
        .map(|s| s as usize)
}

fn point_payload(doc: &EmbeddingDocument) -> Value {
    let mut payload = doc.metadata.clone();
    payload.insert("doc_id".to_string(), json!(doc.id));
    payload.insert("text".to_string(), json!(doc.text));
    Value::Object(payload)
}

#[async_trait]
impl VectorSink for QdrantSink {
    async fn upsert(
        &self,
        collection: &str,
        documents: &[EmbeddingDocument],
        embed_model: &str,
    ) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let provider = self.provider(embed_model)?;
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = embed_batched(provider.as_ref(), &texts, self.embedding.batch_size).await?;

        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            bail!(
                "Embedding model '{}' produced inconsistent vector sizes",
                provider.model_name()
            );
        }

        self.ensure_collection(collection, dims).await?;

        let points: Vec<Value> = documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                json!({
                    "id": point_id(&doc.id).to_string(),
                    "vector": vector,
                    "payload": point_payload(doc),
                })
            })
            .collect();

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
            )
            .json(&json!({ "points": points }))
            .send()
            .await
            .with_context(|| format!("Qdrant upsert into '{}' failed", collection))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Qdrant upsert into '{}' failed ({}): {}", collection, status, body);
        }

        tracing::debug!(collection, points = points.len(), dims, "qdrant upsert complete");
        Ok(())
    }
}
